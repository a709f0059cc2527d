use anyhow::{
    Context,
    Result,
    ensure,
};
use std::{
    collections::BTreeMap,
    fs,
    path::Path,
};

use crate::shell::{
    CommandOutput,
    CommandRunner,
};

const VERCEL: &str = "vercel";

/// The `vercel`, `npm` and `git` invocations the deploy flow needs.
pub struct VercelCli<R> {
    runner: R,
}

impl<R: CommandRunner> VercelCli<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn is_installed(&self, env: &BTreeMap<String, String>) -> bool {
        self.runner
            .output(VERCEL, &["--version"], env)
            .map(|out| out.success)
            .unwrap_or(false)
    }

    pub fn install(&self, env: &BTreeMap<String, String>) -> Result<()> {
        let out = self
            .runner
            .interactive("npm", &["install", "-g", "vercel"], env)
            .context("installing the Vercel CLI")?;
        ensure!(
            out.success,
            "npm install -g vercel failed with exit code: {}",
            out.code_label()
        );
        Ok(())
    }

    /// Starts the interactive login. Its exit status is not trusted; callers
    /// confirm with [`Self::whoami`].
    pub fn login(&self, env: &BTreeMap<String, String>) -> Result<()> {
        let out = self.runner.interactive(VERCEL, &["login"], env)?;
        if !out.success {
            tracing::warn!(code = %out.code_label(), "vercel login exited unsuccessfully");
        }
        Ok(())
    }

    pub fn whoami(&self, env: &BTreeMap<String, String>) -> Result<CommandOutput> {
        self.runner.output(VERCEL, &["whoami"], env)
    }

    /// Bare `vercel`, which walks the operator through creating or linking a
    /// project.
    pub fn setup_project(&self, env: &BTreeMap<String, String>) -> Result<()> {
        let out = self.runner.interactive(VERCEL, &[], env)?;
        if !out.success {
            tracing::warn!(code = %out.code_label(), "vercel project setup exited unsuccessfully");
        }
        Ok(())
    }

    pub fn link(&self, env: &BTreeMap<String, String>) -> Result<()> {
        let out = self.runner.interactive(VERCEL, &["link"], env)?;
        ensure!(out.success, "vercel link failed with exit code: {}", out.code_label());
        Ok(())
    }

    pub fn inspect_project(&self, project_id: &str, env: &BTreeMap<String, String>) -> Result<String> {
        let out = self
            .runner
            .output(VERCEL, &["project", "inspect", project_id], env)?;
        Ok(out.combined())
    }

    /// Removes the production variable; a missing variable is not an error.
    pub fn env_rm(&self, key: &str, env: &BTreeMap<String, String>) {
        match self
            .runner
            .output(VERCEL, &["env", "rm", key, "production", "-y"], env)
        {
            Ok(out) if !out.success => {
                tracing::debug!(key, "vercel env rm reported nothing to remove")
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(key, error = %e, "vercel env rm failed"),
        }
    }

    /// Pipes the value through a temp file in `dir` so it never appears on
    /// the command line. The temp file is removed whatever the outcome.
    pub fn env_add(
        &self,
        key: &str,
        value: &str,
        dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let temp = dir.join(format!("{key}_temp.txt"));
        fs::write(&temp, value).with_context(|| format!("writing {}", temp.display()))?;
        let result = self.runner.output_with_stdin(
            VERCEL,
            &["env", "add", key, "production"],
            &temp,
            env,
        );
        if let Err(e) = fs::remove_file(&temp) {
            tracing::warn!(path = %temp.display(), error = %e, "failed to remove temp file");
        }
        let out = result?;
        ensure!(
            out.success,
            "vercel env add {key} failed with exit code {}: {}",
            out.code_label(),
            out.stderr.trim()
        );
        Ok(())
    }

    pub fn deploy_prod(&self, env: &BTreeMap<String, String>) -> Result<()> {
        let out = self.runner.interactive(VERCEL, &["deploy", "--prod"], env)?;
        ensure!(
            out.success,
            "Vercel deployment failed with exit code: {}",
            out.code_label()
        );
        Ok(())
    }

    pub fn git_remote(&self, env: &BTreeMap<String, String>) -> Option<String> {
        self.runner
            .output("git", &["remote", "get-url", "origin"], env)
            .ok()
            .filter(|out| out.success)
            .map(|out| out.stdout.trim().to_owned())
            .filter(|remote| !remote.is_empty())
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::fake::FakeRunner;
    use tempdir::TempDir;

    #[test]
    fn env_add__pipes_value_and_removes_temp_file() {
        // given
        let dir = TempDir::new("cli").unwrap();
        let runner = FakeRunner::default();
        let cli = VercelCli::new(runner.clone());

        // when
        cli.env_add("AUTH_SECRET", "s3cret", dir.path(), &BTreeMap::new())
            .unwrap();

        // then
        assert_eq!(runner.calls(), vec!["vercel env add AUTH_SECRET production"]);
        assert_eq!(runner.piped(), vec!["s3cret"]);
        assert!(!dir.path().join("AUTH_SECRET_temp.txt").exists());
    }

    #[test]
    fn env_add__cli_failure__still_removes_temp_file() {
        let dir = TempDir::new("cli").unwrap();
        let runner = FakeRunner::default().respond(
            "vercel env add AUTH_SECRET production",
            CommandOutput::failed(1, "not linked"),
        );
        let cli = VercelCli::new(runner);

        let err = cli
            .env_add("AUTH_SECRET", "s3cret", dir.path(), &BTreeMap::new())
            .unwrap_err();

        assert!(err.to_string().contains("not linked"));
        assert!(!dir.path().join("AUTH_SECRET_temp.txt").exists());
    }

    #[test]
    fn deploy_prod__non_zero_exit__reports_code() {
        let runner =
            FakeRunner::default().respond("vercel deploy --prod", CommandOutput::failed(3, ""));
        let cli = VercelCli::new(runner);

        let err = cli.deploy_prod(&BTreeMap::new()).unwrap_err();

        assert_eq!(err.to_string(), "Vercel deployment failed with exit code: 3");
    }

    #[test]
    fn git_remote__no_origin__is_none() {
        let runner = FakeRunner::default().respond(
            "git remote get-url origin",
            CommandOutput::failed(2, "error: No such remote 'origin'"),
        );

        assert_eq!(VercelCli::new(runner).git_remote(&BTreeMap::new()), None);
    }

    #[test]
    fn git_remote__origin__is_trimmed_url() {
        let runner = FakeRunner::default().respond(
            "git remote get-url origin",
            CommandOutput::ok("git@github.com:me/gifter.git\n"),
        );

        assert_eq!(
            VercelCli::new(runner).git_remote(&BTreeMap::new()).as_deref(),
            Some("git@github.com:me/gifter.git")
        );
    }
}
