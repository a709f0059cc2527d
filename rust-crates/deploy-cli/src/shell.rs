use anyhow::{
    Context,
    Result,
};
use std::{
    collections::BTreeMap,
    fs::File,
    path::{
        Path,
        PathBuf,
    },
    process::{
        Command,
        Output,
        Stdio,
    },
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr, like `2>&1`.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    pub fn code_label(&self) -> String {
        self.code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_owned())
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// External processes the deploy flow shells out to (`vercel`, `npm`, `git`).
///
/// `Err` means the program could not be started at all; a non-zero exit is
/// reported through [`CommandOutput::success`].
pub trait CommandRunner {
    /// Runs to completion with stdout and stderr captured.
    fn output(
        &self,
        program: &str,
        args: &[&str],
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput>;

    /// Runs attached to the operator's terminal. Only the exit status is reported.
    fn interactive(
        &self,
        program: &str,
        args: &[&str],
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput>;

    /// Runs with `stdin_file` piped into the child's stdin, output captured.
    fn output_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin_file: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput>;
}

/// Spawns real processes in the project root.
#[derive(Clone, Debug)]
pub struct SystemRunner {
    cwd: PathBuf,
}

impl SystemRunner {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    fn command(&self, program: &str, args: &[&str], env: &BTreeMap<String, String>) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.cwd).envs(env);
        cmd
    }
}

fn label(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

impl CommandRunner for SystemRunner {
    fn output(
        &self,
        program: &str,
        args: &[&str],
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput> {
        let label = label(program, args);
        tracing::debug!(command = %label, "running");
        let output = self
            .command(program, args, env)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to spawn {label}"))?;
        Ok(output.into())
    }

    fn interactive(
        &self,
        program: &str,
        args: &[&str],
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput> {
        let label = label(program, args);
        println!("Running: {label}");
        let status = self
            .command(program, args, env)
            .status()
            .with_context(|| format!("failed to spawn {label}"))?;
        Ok(CommandOutput {
            success: status.success(),
            code: status.code(),
            ..CommandOutput::default()
        })
    }

    fn output_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin_file: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput> {
        let label = label(program, args);
        let input = File::open(stdin_file)
            .with_context(|| format!("failed to open {}", stdin_file.display()))?;
        let output = self
            .command(program, args, env)
            .stdin(input)
            .output()
            .with_context(|| format!("failed to spawn {label}"))?;
        Ok(output.into())
    }
}
