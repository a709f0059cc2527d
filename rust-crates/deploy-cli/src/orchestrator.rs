//! The deploy flow: configure, link, push env vars, deploy, verify, record.
//!
//! Each step is a method on [`Orchestrator`]. External processes go through
//! [`CommandRunner`] and operator questions through [`Prompter`], so the whole
//! flow runs in tests against fakes.

use anyhow::{
    Context,
    Result,
    anyhow,
    bail,
};
use farcaster::neynar::{
    DEMO_API_KEY,
    FidLookup,
    NEYNAR_API_URL,
    NeynarClient,
};
use gifter_common::{
    Poll,
    RetryError,
    RetryPolicy,
    deployments::{
        DeploymentRecord,
        DeploymentStore,
    },
};
use serde_json::{
    Value,
    json,
};
use std::{
    fs,
    path::PathBuf,
    time::Duration,
};
use tracing::{
    debug,
    info,
    warn,
};

use crate::{
    domain::{
        fallback_domain,
        name_from_inspect,
        project_domain,
    },
    env_file::{
        self,
        DeployEnv,
        ENV_FILE,
        ENV_LOCAL_FILE,
        SEED_PHRASE,
    },
    manifest::{
        self,
        Custody,
        DEFAULT_BUTTON_TEXT,
    },
    prompt::{
        Prompter,
        required_input,
    },
    shell::CommandRunner,
    vercel_api::{
        Deployment,
        VERCEL_API_URL,
        VercelClient,
        default_auth_file,
        load_token,
    },
    vercel_cli::VercelCli,
};

const PROJECT_INFO_ERROR: &str =
    "Failed to load project info. Please ensure the Vercel project was created successfully.";

const REQUIRED_VARS: [(&str, &str, Option<&str>); 2] = [
    (
        "NEXT_PUBLIC_MINI_APP_NAME",
        "Enter the name for your mini app:",
        None,
    ),
    (
        "NEXT_PUBLIC_MINI_APP_BUTTON_TEXT",
        "Enter the text for your mini app button:",
        Some(DEFAULT_BUTTON_TEXT),
    ),
];

const SOURCE_CHOICES: [&str; 2] = ["Deploy local code directly", "Set up GitHub repository first"];

pub struct DeployConfig {
    pub root: PathBuf,
    pub auth_file: PathBuf,
    pub vercel_api_url: String,
    pub neynar_api_url: String,
    pub login_wait: RetryPolicy,
    pub deployment_wait: RetryPolicy,
    /// Pause after project setup so `.vercel/project.json` is on disk.
    pub settle: Duration,
}

impl DeployConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            auth_file: default_auth_file(),
            vercel_api_url: VERCEL_API_URL.to_owned(),
            neynar_api_url: NEYNAR_API_URL.to_owned(),
            login_wait: RetryPolicy::login_wait(),
            deployment_wait: RetryPolicy::deployment_wait(),
            settle: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Deployed(DeploymentRecord),
    /// The operator chose to set up a GitHub repository first.
    GithubSetup,
}

/// Custody account plus its FID, kept so the manifest can be re-signed
/// when the realised domain differs.
struct ManifestSigner {
    custody: Custody,
    fid: u64,
}

impl ManifestSigner {
    fn metadata_json(&self, domain: &str, env: &DeployEnv) -> Result<String> {
        let metadata = manifest::build_metadata(&self.custody, self.fid, domain, env)?;
        serde_json::to_string(&metadata).context("serializing mini app metadata")
    }
}

pub struct Orchestrator<R, P> {
    config: DeployConfig,
    env: DeployEnv,
    cli: VercelCli<R>,
    prompter: P,
}

impl<R: CommandRunner, P: Prompter> Orchestrator<R, P> {
    pub fn new(config: DeployConfig, env: DeployEnv, runner: R, prompter: P) -> Self {
        Self {
            config,
            env,
            cli: VercelCli::new(runner),
            prompter,
        }
    }

    pub async fn run(&mut self) -> Result<Outcome> {
        self.configure()?;
        let Some(use_github) = self.choose_source()? else {
            return Ok(Outcome::GithubSetup);
        };
        self.ensure_cli()?;
        self.login().await?;
        let project_id = self.create_project().await?;
        let api = self.api_client();
        let (domain, project_name) = self.resolve_domain(&project_id, api.as_ref()).await;
        info!(%project_id, %domain, "project resolved");

        let signer = self.manifest_signer().await?;
        let secret = self.auth_secret();
        let vars = self.deploy_vars(&domain, &secret, signer.as_ref())?;
        self.push_env(api.as_ref(), &project_id, &vars).await;

        if use_github {
            println!("\nLinking the GitHub repository...");
            self.cli.link(self.env.vars())?;
        }
        println!("\nDeploying to Vercel...");
        self.cli.deploy_prod(self.env.vars())?;

        let deployment = match &api {
            Some(api) => self.wait_for_deployment(api, &project_id).await?,
            None => None,
        };
        let realised = deployment
            .map(|d| d.url)
            .filter(|url| !url.is_empty() && *url != domain);
        let (final_domain, redeployed) = match realised {
            Some(actual) => {
                self.redeploy(api.as_ref(), &project_id, &actual, signer.as_ref())
                    .await?;
                (actual, true)
            }
            None => (domain, false),
        };

        let mut record = DeploymentRecord::new(project_id, final_domain);
        record.project_name = project_name;
        record.fid = signer.as_ref().map(|s| s.fid);
        record.manifest_signed = signer.is_some();
        record.redeployed = redeployed;
        self.record(record).map(Outcome::Deployed)
    }

    fn configure(&mut self) -> Result<()> {
        println!("\nChecking environment variables...");
        let dotenv = self.config.root.join(ENV_FILE);
        let local = self.config.root.join(ENV_LOCAL_FILE);
        let loaded = self.env.load_file(&dotenv)?;
        debug!(loaded, "loaded .env");

        if local.exists()
            && self.prompter.confirm(
                "Found .env.local. Load its values as well? (everything except SEED_PHRASE is also written to .env)",
                true,
            )?
        {
            let appended = env_file::merge_local(&mut self.env, &local, &dotenv)?;
            if !appended.is_empty() {
                println!("Added to .env: {}", appended.join(", "));
            }
        }

        for (key, message, default) in REQUIRED_VARS {
            if self.env.get(key).is_some() {
                continue;
            }
            let value = required_input(&mut self.prompter, message, default)?;
            let content = fs::read_to_string(&dotenv).unwrap_or_default();
            if !env_file::declares(&content, key) {
                env_file::append_var(&dotenv, key, &value)?;
            }
            self.env.set(key, value);
        }

        if self.env.get(SEED_PHRASE).is_none() {
            let phrase = self.prompter.secret(
                "Enter the seed phrase of your Farcaster custody account to sign the manifest (leave blank to skip):",
            )?;
            let phrase = phrase.trim();
            if !phrase.is_empty() {
                self.env.set(SEED_PHRASE, phrase);
                if self.prompter.confirm(
                    "Store the seed phrase in .env.local for future deployments?",
                    false,
                )? {
                    env_file::append_var(&local, SEED_PHRASE, phrase)?;
                    println!("Seed phrase stored in .env.local");
                }
            }
        }
        Ok(())
    }

    /// `Some(true)` deploys through the linked GitHub repository, `None`
    /// stops so the operator can create one.
    fn choose_source(&mut self) -> Result<Option<bool>> {
        match self.cli.git_remote(self.env.vars()) {
            Some(remote) => {
                println!("\nFound GitHub repository: {remote}");
                let use_github = self
                    .prompter
                    .confirm("Deploy from the GitHub repository?", true)?;
                Ok(Some(use_github))
            }
            None => {
                let choice = self.prompter.select(
                    "No GitHub repository found. How would you like to continue?",
                    &SOURCE_CHOICES,
                    0,
                )?;
                if choice == 1 {
                    println!("\nTo deploy from GitHub:");
                    println!("  1. Create a repository on GitHub");
                    println!("  2. git remote add origin <repository-url>");
                    println!("  3. git push -u origin main");
                    println!("  4. Run this deploy again");
                    return Ok(None);
                }
                Ok(Some(false))
            }
        }
    }

    fn ensure_cli(&self) -> Result<()> {
        if self.cli.is_installed(self.env.vars()) {
            return Ok(());
        }
        println!("Vercel CLI not found. Installing it with npm...");
        self.cli.install(self.env.vars())
    }

    async fn login(&self) -> Result<()> {
        println!("\nLogging into Vercel...");
        self.cli.login(self.env.vars())?;
        let result = self
            .config
            .login_wait
            .poll(|attempt| {
                let whoami = self.cli.whoami(self.env.vars());
                async move {
                    match whoami {
                        Ok(out) if out.success => Poll::Ready(()),
                        Ok(out) => {
                            if out.stderr.contains("Account not found") {
                                println!("Waiting for the Vercel account setup to finish...");
                            }
                            debug!(attempt, "not logged in yet");
                            Poll::Pending
                        }
                        Err(e) => Poll::Failed(e),
                    }
                }
            })
            .await;
        match result {
            Ok(()) => {
                println!("Logged in to Vercel");
                Ok(())
            }
            Err(RetryError::Exhausted { .. }) => bail!(
                "Login timed out. Please make sure the Vercel account setup and verification are complete."
            ),
            Err(RetryError::Terminal(e)) => Err(e.context("checking Vercel login")),
        }
    }

    async fn create_project(&self) -> Result<String> {
        let vercel_json = self.config.root.join("vercel.json");
        if !vercel_json.exists() {
            let body = json!({"buildCommand": "next build", "framework": "nextjs"});
            fs::write(&vercel_json, serde_json::to_string_pretty(&body)?)
                .context("writing vercel.json")?;
            println!("Created vercel.json");
        }

        println!("\nSetting up the Vercel project...");
        self.cli.setup_project(self.env.vars())?;
        if !self.config.settle.is_zero() {
            tokio::time::sleep(self.config.settle).await;
        }

        let raw = fs::read_to_string(self.config.root.join(".vercel").join("project.json"))
            .context(PROJECT_INFO_ERROR)?;
        let project: Value = serde_json::from_str(&raw).context(PROJECT_INFO_ERROR)?;
        project
            .get("projectId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| anyhow!(PROJECT_INFO_ERROR))
    }

    fn api_client(&self) -> Option<VercelClient> {
        if let Some(token) = load_token(&self.config.auth_file, &self.env) {
            return Some(VercelClient::with_base_url(&self.config.vercel_api_url, token));
        }
        match self.cli.whoami(self.env.vars()) {
            Ok(out) if out.success => {
                println!("No Vercel API token found; continuing with the Vercel CLI only")
            }
            _ => warn!("not logged in to the Vercel CLI; continuing without API access"),
        }
        None
    }

    async fn resolve_domain(
        &self,
        project_id: &str,
        api: Option<&VercelClient>,
    ) -> (String, Option<String>) {
        if let Some(api) = api {
            match api.project(project_id).await {
                Ok(project) => return (project_domain(&project.name), Some(project.name)),
                Err(e) => warn!(error = %format!("{e:#}"), "project lookup via API failed"),
            }
        }
        match self.cli.inspect_project(project_id, self.env.vars()) {
            Ok(output) => {
                if let Some(name) = name_from_inspect(&output) {
                    return (project_domain(&name), Some(name));
                }
            }
            Err(e) => warn!(error = %format!("{e:#}"), "vercel project inspect failed"),
        }
        let domain = fallback_domain(project_id);
        warn!(%domain, "could not determine the project name; using fallback domain");
        (domain, None)
    }

    async fn manifest_signer(&self) -> Result<Option<ManifestSigner>> {
        let Some(phrase) = self.env.get(SEED_PHRASE) else {
            println!("\nNo seed phrase provided; skipping the signed manifest");
            return Ok(None);
        };
        println!("\nGenerating the mini app manifest...");
        let custody = Custody::from_mnemonic(phrase)?;
        let api_key = self.env.get("NEYNAR_API_KEY").unwrap_or(DEMO_API_KEY);
        let neynar = NeynarClient::with_base_url(&self.config.neynar_api_url, api_key)?;
        let fid = neynar.fid_by_custody_address(custody.address()).await?;
        println!("Custody address {} has FID {fid}", custody.address());
        Ok(Some(ManifestSigner { custody, fid }))
    }

    fn auth_secret(&self) -> String {
        match self.env.get("NEXTAUTH_SECRET") {
            Some(secret) => secret.to_owned(),
            None => hex::encode(rand::random::<[u8; 32]>()),
        }
    }

    fn url_vars(
        &self,
        domain: &str,
        signer: Option<&ManifestSigner>,
    ) -> Result<Vec<(String, String)>> {
        let url = format!("https://{domain}");
        let mut vars = vec![
            ("NEXTAUTH_URL".to_owned(), url.clone()),
            ("NEXT_PUBLIC_URL".to_owned(), url),
        ];
        if let Some(signer) = signer {
            vars.push((
                "MINI_APP_METADATA".to_owned(),
                signer.metadata_json(domain, &self.env)?,
            ));
        }
        Ok(vars)
    }

    /// Computed values come first and win over same-named `NEXT_PUBLIC_*`
    /// variables from the environment.
    fn deploy_vars(
        &self,
        domain: &str,
        secret: &str,
        signer: Option<&ManifestSigner>,
    ) -> Result<Vec<(String, String)>> {
        let mut vars = vec![
            ("NEXTAUTH_SECRET".to_owned(), secret.to_owned()),
            ("AUTH_SECRET".to_owned(), secret.to_owned()),
        ];
        vars.extend(self.url_vars(domain, signer)?);
        for key in ["NEYNAR_API_KEY", "NEYNAR_CLIENT_ID"] {
            if let Some(value) = self.env.get(key) {
                vars.push((key.to_owned(), value.to_owned()));
            }
        }
        for (key, value) in self.env.next_public() {
            if !vars.iter().any(|(existing, _)| existing == key) {
                vars.push((key.to_owned(), value.to_owned()));
            }
        }
        Ok(vars)
    }

    /// Pushes each non-empty variable through the API, falling back to the
    /// CLI. Returns the keys that could not be set.
    async fn push_env(
        &self,
        api: Option<&VercelClient>,
        project_id: &str,
        vars: &[(String, String)],
    ) -> Vec<String> {
        println!("\nSetting environment variables...");
        let mut failed = Vec::new();
        for (key, value) in vars {
            if value.is_empty() {
                continue;
            }
            if let Some(api) = api {
                match api.upsert_env(project_id, key, value).await {
                    Ok(change) => {
                        println!("  {key}: {change:?}");
                        continue;
                    }
                    Err(e) => warn!(
                        key = %key,
                        error = %format!("{e:#}"),
                        "API update failed; falling back to the Vercel CLI"
                    ),
                }
            }
            self.cli.env_rm(key, self.env.vars());
            match self
                .cli
                .env_add(key, value, &self.config.root, self.env.vars())
            {
                Ok(()) => println!("  {key}: set via CLI"),
                Err(e) => {
                    warn!(key = %key, error = %format!("{e:#}"), "failed to set env var");
                    failed.push(key.clone());
                }
            }
        }
        if !failed.is_empty() {
            println!("Failed to set: {}", failed.join(", "));
        }
        failed
    }

    /// `Ok(None)` when the wait timed out; the caller keeps the assumed domain.
    async fn wait_for_deployment(
        &self,
        api: &VercelClient,
        project_id: &str,
    ) -> Result<Option<Deployment>> {
        println!("\nWaiting for the deployment to finish...");
        let result = self
            .config
            .deployment_wait
            .poll(|attempt| async move {
                match api.latest_deployment(project_id).await {
                    Ok(Some(deployment)) => match deployment.state.as_str() {
                        "READY" => Poll::Ready(deployment),
                        "ERROR" => Poll::Failed(anyhow!("Deployment failed with state: ERROR")),
                        "CANCELED" => Poll::Failed(anyhow!("Deployment was canceled")),
                        state => {
                            debug!(attempt, state, "deployment in progress");
                            Poll::Pending
                        }
                    },
                    Ok(None) => Poll::Pending,
                    Err(e) => {
                        warn!(attempt, error = %format!("{e:#}"), "deployment status check failed");
                        Poll::Pending
                    }
                }
            })
            .await;
        match result {
            Ok(deployment) => {
                info!(uid = %deployment.uid, url = %deployment.url, "deployment ready");
                Ok(Some(deployment))
            }
            Err(RetryError::Terminal(e)) => Err(e),
            Err(RetryError::Exhausted { attempts }) => {
                warn!(attempts, "timed out waiting for the deployment; continuing with the assumed domain");
                Ok(None)
            }
        }
    }

    async fn redeploy(
        &self,
        api: Option<&VercelClient>,
        project_id: &str,
        domain: &str,
        signer: Option<&ManifestSigner>,
    ) -> Result<()> {
        println!("\nDeployment is served from {domain}; updating URLs and redeploying...");
        let vars = self.url_vars(domain, signer)?;
        self.push_env(api, project_id, &vars).await;
        self.cli
            .deploy_prod(self.env.vars())
            .map_err(|e| anyhow!("Redeployment failed: {e}"))
    }

    fn record(&self, record: DeploymentRecord) -> Result<DeploymentRecord> {
        let store = DeploymentStore::open(&self.config.root).context("opening deployment store")?;
        store.append(record.clone()).context("recording deployment")?;
        println!("Deployment metadata written to {}", store.path().display());
        println!("\nDeployment complete! Your mini app is live at {}", record.url());
        Ok(record)
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        prompt::fake::{
            Answer,
            ScriptedPrompter,
        },
        shell::{
            CommandOutput,
            fake::FakeRunner,
        },
        test_server::FakeUpstream,
        vercel_api::fake::{
            FakeVercel,
            TOKEN,
        },
    };
    use actix_web::{
        HttpResponse,
        web,
    };
    use base64::{
        Engine,
        engine::general_purpose::URL_SAFE_NO_PAD,
    };
    use std::collections::HashMap;
    use tempdir::TempDir;

    const MNEMONIC: &str = "test test test test test test test test test test test junk";
    const PROJECT_ID: &str = "prj_abcdefgh12345678";

    async fn by_address(query: web::Query<HashMap<String, String>>) -> HttpResponse {
        let address = query.get("addresses").cloned().unwrap_or_default();
        let mut body = serde_json::Map::new();
        body.insert(address, json!([{"fid": 977233}]));
        HttpResponse::Ok().json(Value::Object(body))
    }

    fn neynar_routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/v2/farcaster/user/bulk-by-address", web::get().to(by_address));
    }

    fn config(root: &std::path::Path, vercel_url: &str, neynar_url: &str) -> DeployConfig {
        DeployConfig {
            root: root.to_path_buf(),
            auth_file: root.join("no-auth.json"),
            vercel_api_url: vercel_url.to_owned(),
            neynar_api_url: neynar_url.to_owned(),
            login_wait: RetryPolicy::new(3, Duration::ZERO),
            deployment_wait: RetryPolicy::new(3, Duration::ZERO),
            settle: Duration::ZERO,
        }
    }

    fn write_project(root: &std::path::Path) {
        fs::create_dir_all(root.join(".vercel")).unwrap();
        fs::write(
            root.join(".vercel").join("project.json"),
            format!(r#"{{"projectId":"{PROJECT_ID}","orgId":"team_1"}}"#),
        )
        .unwrap();
    }

    fn app_env() -> DeployEnv {
        DeployEnv::from_pairs([
            ("NEXT_PUBLIC_MINI_APP_NAME", "Gifter"),
            ("NEXT_PUBLIC_MINI_APP_BUTTON_TEXT", "Send a gift"),
        ])
    }

    #[tokio::test]
    async fn run__realised_domain_differs__re_signs_and_redeploys() {
        // given
        let dir = TempDir::new("deploy").unwrap();
        write_project(dir.path());
        fs::write(
            dir.path().join(ENV_FILE),
            "NEXT_PUBLIC_MINI_APP_NAME=Gifter\nNEXT_PUBLIC_MINI_APP_BUTTON_TEXT=\"Send a gift\"\n",
        )
        .unwrap();
        let vercel = FakeVercel::new(
            "gifter",
            json!({"uid": "dpl_1", "url": "gifter-git-main.vercel.app", "state": "READY"}),
        )
        .with_env("env1", "NEXTAUTH_URL", json!(["production"]));
        let vercel_upstream = FakeUpstream::start(vercel.routes());
        let neynar = FakeUpstream::start(neynar_routes);
        let runner = FakeRunner::default().respond(
            "git remote get-url origin",
            CommandOutput::ok("git@github.com:me/gifter.git\n"),
        );
        let env = DeployEnv::from_pairs([
            ("VERCEL_TOKEN", TOKEN),
            (SEED_PHRASE, MNEMONIC),
            ("NEYNAR_API_KEY", "neynar-key"),
        ]);
        let mut orchestrator = Orchestrator::new(
            config(dir.path(), vercel_upstream.base_url(), neynar.base_url()),
            env,
            runner.clone(),
            ScriptedPrompter::new([Answer::Confirm(false)]),
        );

        // when
        let outcome = orchestrator.run().await.unwrap();

        // then
        let Outcome::Deployed(record) = outcome else {
            panic!("expected a deployment");
        };
        assert_eq!(record.domain, "gifter-git-main.vercel.app");
        assert_eq!(record.project_name.as_deref(), Some("gifter"));
        assert_eq!(record.fid, Some(977233));
        assert!(record.manifest_signed);
        assert!(record.redeployed);
        assert_eq!(runner.count("vercel deploy --prod"), 2);
        assert_eq!(runner.count("vercel link"), 0);
        assert_eq!(
            vercel.value_of("NEXTAUTH_URL").as_deref(),
            Some("https://gifter-git-main.vercel.app")
        );
        assert_eq!(vercel.value_of("NEXT_PUBLIC_MINI_APP_NAME").as_deref(), Some("Gifter"));
        assert_eq!(vercel.value_of("NEYNAR_API_KEY").as_deref(), Some("neynar-key"));
        let metadata: Value =
            serde_json::from_str(&vercel.value_of("MINI_APP_METADATA").unwrap()).unwrap();
        let payload = metadata["accountAssociation"]["payload"].as_str().unwrap();
        assert_eq!(
            URL_SAFE_NO_PAD.decode(payload).unwrap(),
            br#"{"domain":"gifter-git-main.vercel.app"}"#
        );
        assert_eq!(metadata["frame"]["buttonTitle"], "Send a gift");
        assert!(dir.path().join("vercel.json").exists());
        let stored = DeploymentStore::open(dir.path()).unwrap().latest().unwrap();
        assert_eq!(stored, Some(record));
    }

    #[tokio::test]
    async fn run__no_remote_and_github_setup_chosen__stops_before_vercel() {
        // given
        let dir = TempDir::new("deploy").unwrap();
        let runner = FakeRunner::default().respond(
            "git remote get-url origin",
            CommandOutput::failed(2, "error: No such remote 'origin'"),
        );
        let mut orchestrator = Orchestrator::new(
            config(dir.path(), "http://127.0.0.1:9", "http://127.0.0.1:9"),
            app_env(),
            runner.clone(),
            ScriptedPrompter::new([Answer::Secret(String::new()), Answer::Select(1)]),
        );

        // when
        let outcome = orchestrator.run().await.unwrap();

        // then
        assert!(matches!(outcome, Outcome::GithubSetup));
        assert_eq!(runner.calls(), vec!["git remote get-url origin"]);
    }

    #[tokio::test]
    async fn run__cli_only__pushes_env_through_cli_and_links_github() {
        // given
        let dir = TempDir::new("deploy").unwrap();
        write_project(dir.path());
        let runner = FakeRunner::default()
            .respond(
                "git remote get-url origin",
                CommandOutput::ok("https://github.com/me/gifter.git"),
            )
            .respond(
                &format!("vercel project inspect {PROJECT_ID}"),
                CommandOutput::ok("  General\n\n    Name        cli-app\n"),
            );
        let mut orchestrator = Orchestrator::new(
            config(dir.path(), "http://127.0.0.1:9", "http://127.0.0.1:9"),
            app_env(),
            runner.clone(),
            ScriptedPrompter::new([Answer::Secret(String::new()), Answer::Confirm(true)]),
        );

        // when
        let outcome = orchestrator.run().await.unwrap();

        // then
        let Outcome::Deployed(record) = outcome else {
            panic!("expected a deployment");
        };
        assert_eq!(record.domain, "cli-app.vercel.app");
        assert!(!record.manifest_signed);
        assert!(!record.redeployed);
        let calls = runner.calls();
        assert!(calls.contains(&"vercel env rm AUTH_SECRET production -y".to_owned()));
        assert!(calls.contains(&"vercel env add NEXTAUTH_URL production".to_owned()));
        let link = calls.iter().position(|c| c == "vercel link").unwrap();
        let deploy = calls.iter().position(|c| c == "vercel deploy --prod").unwrap();
        assert!(link < deploy);
        assert!(runner.piped().contains(&"https://cli-app.vercel.app".to_owned()));
        assert!(!calls.iter().any(|c| c.contains("MINI_APP_METADATA")));
    }

    #[tokio::test]
    async fn run__deployment_errors__is_fatal_and_unrecorded() {
        // given
        let dir = TempDir::new("deploy").unwrap();
        write_project(dir.path());
        let vercel = FakeVercel::new(
            "gifter",
            json!({"uid": "dpl_1", "url": "gifter.vercel.app", "state": "ERROR"}),
        );
        let vercel_upstream = FakeUpstream::start(vercel.routes());
        let runner = FakeRunner::default();
        let mut env = app_env();
        env.set("VERCEL_TOKEN", TOKEN);
        let mut orchestrator = Orchestrator::new(
            config(dir.path(), vercel_upstream.base_url(), "http://127.0.0.1:9"),
            env,
            runner,
            ScriptedPrompter::new([Answer::Secret(String::new()), Answer::Confirm(false)]),
        );

        // when
        let err = orchestrator.run().await.unwrap_err();

        // then
        assert_eq!(err.to_string(), "Deployment failed with state: ERROR");
        let stored = DeploymentStore::open(dir.path()).unwrap().latest().unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn run__deployment_never_ready__keeps_assumed_domain() {
        let dir = TempDir::new("deploy").unwrap();
        write_project(dir.path());
        let vercel = FakeVercel::new(
            "gifter",
            json!({"uid": "dpl_1", "url": "gifter-x.vercel.app", "state": "BUILDING"}),
        );
        let vercel_upstream = FakeUpstream::start(vercel.routes());
        let runner = FakeRunner::default();
        let mut env = app_env();
        env.set("VERCEL_TOKEN", TOKEN);
        let mut orchestrator = Orchestrator::new(
            config(dir.path(), vercel_upstream.base_url(), "http://127.0.0.1:9"),
            env,
            runner.clone(),
            ScriptedPrompter::new([Answer::Secret(String::new()), Answer::Confirm(false)]),
        );

        let outcome = orchestrator.run().await.unwrap();

        let Outcome::Deployed(record) = outcome else {
            panic!("expected a deployment");
        };
        assert_eq!(record.domain, "gifter.vercel.app");
        assert!(!record.redeployed);
        assert_eq!(runner.count("vercel deploy --prod"), 1);
    }

    #[tokio::test]
    async fn login__whoami_never_succeeds__times_out() {
        // given
        let dir = TempDir::new("deploy").unwrap();
        let runner = FakeRunner::default().respond(
            "vercel whoami",
            CommandOutput::failed(1, "Error: Account not found"),
        );
        let orchestrator = Orchestrator::new(
            config(dir.path(), "http://127.0.0.1:9", "http://127.0.0.1:9"),
            DeployEnv::default(),
            runner.clone(),
            ScriptedPrompter::default(),
        );

        // when
        let err = orchestrator.login().await.unwrap_err();

        // then
        assert!(err.to_string().starts_with("Login timed out"));
        assert_eq!(runner.count("vercel whoami"), 3);
        assert_eq!(runner.count("vercel login"), 1);
    }

    #[tokio::test]
    async fn create_project__missing_project_json__reports_project_info() {
        let dir = TempDir::new("deploy").unwrap();
        let orchestrator = Orchestrator::new(
            config(dir.path(), "http://127.0.0.1:9", "http://127.0.0.1:9"),
            DeployEnv::default(),
            FakeRunner::default(),
            ScriptedPrompter::default(),
        );

        let err = orchestrator.create_project().await.unwrap_err();

        assert_eq!(err.to_string(), PROJECT_INFO_ERROR);
        let vercel_json: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("vercel.json")).unwrap())
                .unwrap();
        assert_eq!(vercel_json, json!({"buildCommand": "next build", "framework": "nextjs"}));
    }

    #[test]
    fn configure__merges_local_and_prompts_for_missing_values() {
        // given
        let dir = TempDir::new("deploy").unwrap();
        fs::write(
            dir.path().join(ENV_LOCAL_FILE),
            format!("SEED_PHRASE=\"{MNEMONIC}\"\nNEYNAR_CLIENT_ID=cid\n"),
        )
        .unwrap();
        let mut orchestrator = Orchestrator::new(
            config(dir.path(), "http://127.0.0.1:9", "http://127.0.0.1:9"),
            DeployEnv::default(),
            FakeRunner::default(),
            ScriptedPrompter::new([
                Answer::Confirm(true),
                Answer::Text("Gifter".to_owned()),
                Answer::Text(String::new()),
            ]),
        );

        // when
        orchestrator.configure().unwrap();

        // then
        assert_eq!(orchestrator.env.get(SEED_PHRASE), Some(MNEMONIC));
        assert_eq!(
            orchestrator.env.get("NEXT_PUBLIC_MINI_APP_BUTTON_TEXT"),
            Some(DEFAULT_BUTTON_TEXT)
        );
        let dotenv = fs::read_to_string(dir.path().join(ENV_FILE)).unwrap();
        assert!(dotenv.contains("NEYNAR_CLIENT_ID=\"cid\""));
        assert!(dotenv.contains("NEXT_PUBLIC_MINI_APP_NAME=\"Gifter\""));
        assert!(dotenv.contains("NEXT_PUBLIC_MINI_APP_BUTTON_TEXT=\"Launch Mini App\""));
        assert!(!dotenv.contains("SEED_PHRASE"));
        assert_eq!(orchestrator.prompter.asked.len(), 3);
    }

    #[test]
    fn configure__seed_entered__offers_to_store_it_locally() {
        let dir = TempDir::new("deploy").unwrap();
        let mut orchestrator = Orchestrator::new(
            config(dir.path(), "http://127.0.0.1:9", "http://127.0.0.1:9"),
            app_env(),
            FakeRunner::default(),
            ScriptedPrompter::new([
                Answer::Secret(format!("  {MNEMONIC}  ")),
                Answer::Confirm(true),
            ]),
        );

        orchestrator.configure().unwrap();

        let local = fs::read_to_string(dir.path().join(ENV_LOCAL_FILE)).unwrap();
        assert_eq!(local, format!("SEED_PHRASE=\"{MNEMONIC}\"\n"));
    }

    #[tokio::test]
    async fn push_env__api_unreachable__falls_back_and_reports_cli_failures() {
        // given
        let dir = TempDir::new("deploy").unwrap();
        let runner = FakeRunner::default().respond(
            "vercel env add BROKEN production",
            CommandOutput::failed(1, "boom"),
        );
        let orchestrator = Orchestrator::new(
            config(dir.path(), "http://127.0.0.1:9", "http://127.0.0.1:9"),
            DeployEnv::default(),
            runner.clone(),
            ScriptedPrompter::default(),
        );
        let api = VercelClient::with_base_url("http://127.0.0.1:9", TOKEN);
        let vars = vec![
            ("GOOD".to_owned(), "1".to_owned()),
            ("EMPTY".to_owned(), String::new()),
            ("BROKEN".to_owned(), "2".to_owned()),
        ];

        // when
        let failed = orchestrator.push_env(Some(&api), PROJECT_ID, &vars).await;

        // then
        assert_eq!(failed, vec!["BROKEN".to_owned()]);
        assert_eq!(runner.count("vercel env add GOOD production"), 1);
        assert!(!runner.calls().iter().any(|c| c.contains("EMPTY")));
    }

    #[test]
    fn deploy_vars__computed_values_win_over_environment() {
        let dir = TempDir::new("deploy").unwrap();
        let mut env = app_env();
        env.set("NEXT_PUBLIC_URL", "https://stale.example");
        env.set("NEXTAUTH_SECRET", "keep-me");
        let orchestrator = Orchestrator::new(
            config(dir.path(), "http://127.0.0.1:9", "http://127.0.0.1:9"),
            env,
            FakeRunner::default(),
            ScriptedPrompter::default(),
        );

        let secret = orchestrator.auth_secret();
        let vars = orchestrator.deploy_vars("gifter.vercel.app", &secret, None).unwrap();

        let lookup = |k: &str| {
            vars.iter()
                .filter(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
        };
        assert_eq!(lookup("NEXT_PUBLIC_URL"), vec!["https://gifter.vercel.app"]);
        assert_eq!(lookup("NEXTAUTH_SECRET"), vec!["keep-me"]);
        assert_eq!(lookup("AUTH_SECRET"), vec!["keep-me"]);
        assert_eq!(lookup("NEXT_PUBLIC_MINI_APP_NAME"), vec!["Gifter"]);
        assert!(lookup("MINI_APP_METADATA").is_empty());
    }

    #[test]
    fn auth_secret__unset__is_32_random_bytes_hex() {
        let dir = TempDir::new("deploy").unwrap();
        let orchestrator = Orchestrator::new(
            config(dir.path(), "http://127.0.0.1:9", "http://127.0.0.1:9"),
            DeployEnv::default(),
            FakeRunner::default(),
            ScriptedPrompter::default(),
        );

        let secret = orchestrator.auth_secret();

        assert_eq!(secret.len(), 64);
        assert!(hex::decode(&secret).is_ok());
        assert_ne!(secret, orchestrator.auth_secret());
    }
}
