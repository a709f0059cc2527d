use anyhow::{
    Context,
    Result,
    bail,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{
    Value,
    json,
};
use std::path::{
    Path,
    PathBuf,
};

use crate::env_file::DeployEnv;

pub const VERCEL_API_URL: &str = "https://api.vercel.com";
pub const AUTH_FILE: &str = "~/.vercel/auth.json";

pub fn default_auth_file() -> PathBuf {
    PathBuf::from(shellexpand::tilde(AUTH_FILE).into_owned())
}

/// The CLI's stored login token, else `VERCEL_TOKEN`.
pub fn load_token(auth_file: &Path, env: &DeployEnv) -> Option<String> {
    let from_file = std::fs::read_to_string(auth_file)
        .ok()
        .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
        .and_then(|auth| auth.get("token").and_then(Value::as_str).map(str::to_owned))
        .filter(|token| !token.is_empty());
    from_file.or_else(|| env.get("VERCEL_TOKEN").map(str::to_owned))
}

#[derive(Clone, Debug, Deserialize)]
pub struct Project {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EnvVar {
    #[serde(default)]
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub target: Value,
}

impl EnvVar {
    /// `target` is either a single string or a list of environments.
    pub fn targets_production(&self) -> bool {
        match &self.target {
            Value::String(t) => t == "production",
            Value::Array(ts) => ts.iter().any(|t| t.as_str() == Some("production")),
            _ => false,
        }
    }
}

#[derive(Deserialize)]
struct EnvList {
    #[serde(default)]
    envs: Vec<EnvVar>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Deserialize)]
struct DeploymentList {
    #[serde(default)]
    deployments: Vec<Deployment>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvChange {
    Updated,
    Created,
}

#[derive(Clone, Debug)]
pub struct VercelClient {
    base_url: String,
    token: String,
    http: Client,
}

impl VercelClient {
    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
            http: Client::new(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("{what}: request failed"))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("{what}: Vercel returned {status}: {body}");
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).with_context(|| format!("{what}: invalid JSON"))
    }

    pub async fn project(&self, project_id: &str) -> Result<Project> {
        let url = format!("{}/v9/projects/{project_id}", self.base_url);
        let body = self.send(self.http.get(url), "fetching project").await?;
        serde_json::from_value(body).context("decoding project")
    }

    pub async fn env_vars(&self, project_id: &str) -> Result<Vec<EnvVar>> {
        let url = format!("{}/v9/projects/{project_id}/env", self.base_url);
        let body = self.send(self.http.get(url), "listing env vars").await?;
        let list: EnvList = serde_json::from_value(body).context("decoding env vars")?;
        Ok(list.envs)
    }

    pub async fn edit_env(&self, project_id: &str, env_id: &str, value: &str) -> Result<()> {
        let url = format!("{}/v9/projects/{project_id}/env/{env_id}", self.base_url);
        let request = self.http.patch(url).json(&json!({
            "value": value,
            "target": ["production"],
        }));
        self.send(request, "updating env var").await?;
        Ok(())
    }

    pub async fn create_env(&self, project_id: &str, key: &str, value: &str) -> Result<()> {
        let url = format!("{}/v10/projects/{project_id}/env", self.base_url);
        let request = self.http.post(url).json(&json!({
            "key": key,
            "value": value,
            "type": "encrypted",
            "target": ["production"],
        }));
        self.send(request, "creating env var").await?;
        Ok(())
    }

    /// Edits the existing production variable or creates an encrypted one.
    pub async fn upsert_env(&self, project_id: &str, key: &str, value: &str) -> Result<EnvChange> {
        let existing = self
            .env_vars(project_id)
            .await?
            .into_iter()
            .find(|var| var.key == key && var.targets_production());
        match existing {
            Some(var) => {
                self.edit_env(project_id, &var.id, value).await?;
                Ok(EnvChange::Updated)
            }
            None => {
                self.create_env(project_id, key, value).await?;
                Ok(EnvChange::Created)
            }
        }
    }

    pub async fn latest_deployment(&self, project_id: &str) -> Result<Option<Deployment>> {
        let url = format!("{}/v6/deployments", self.base_url);
        let request = self
            .http
            .get(url)
            .query(&[("projectId", project_id), ("limit", "1")]);
        let body = self.send(request, "fetching deployments").await?;
        let list: DeploymentList =
            serde_json::from_value(body).context("decoding deployments")?;
        Ok(list.deployments.into_iter().next())
    }
}
