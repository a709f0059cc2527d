use crate::fid::extract_fid;
use anyhow::{
    Context,
    Result,
    bail,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use std::future::Future;
use url::Url;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub fid: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub pfp_url: Option<String>,
}

impl UserProfile {
    /// `@username` when known, otherwise the display name, otherwise `FID <n>`.
    pub fn label(&self) -> String {
        match (&self.username, &self.display_name) {
            (Some(username), _) => format!("@{username}"),
            (None, Some(display_name)) => display_name.clone(),
            (None, None) => format!("FID {}", self.fid),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<UserProfile>,
}

pub trait UserLookup {
    /// `Ok(None)` when the lookup succeeded but returned no users.
    fn lookup(&self, fid: u64) -> impl Future<Output = Result<Option<UserProfile>>> + Send;
}

/// Calls the mini-app server's `/api/users` route.
#[derive(Clone, Debug)]
pub struct AppUsersClient {
    app_url: String,
    http: reqwest::Client,
}

impl AppUsersClient {
    pub fn new(app_url: impl Into<String>) -> Result<Self> {
        let app_url = app_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for user lookup")?;
        Ok(Self { app_url, http })
    }
}

impl UserLookup for AppUsersClient {
    async fn lookup(&self, fid: u64) -> Result<Option<UserProfile>> {
        let mut url = Url::parse(&format!("{}/api/users", self.app_url))
            .context("invalid app URL")?;
        url.query_pairs_mut().append_pair("fids", &fid.to_string());
        let res = self
            .http
            .get(url)
            .send()
            .await
            .context("user lookup request failed")?;
        if !res.status().is_success() {
            bail!("user lookup failed with status {}", res.status());
        }
        let body: UsersResponse = res
            .json()
            .await
            .context("failed to decode user lookup response")?;
        Ok(body.users.into_iter().next())
    }
}

/// Resolves the drawn record to a profile. Records without a usable FID
/// resolve to `Ok(None)` without touching the network.
pub async fn resolve_winner<L: UserLookup>(
    lookup: &L,
    record: &Value,
) -> Result<Option<UserProfile>> {
    let Some(fid) = extract_fid(record) else {
        tracing::info!("drawn record carries no FID, skipping detail lookup");
        return Ok(None);
    };
    lookup.lookup(fid).await
}
