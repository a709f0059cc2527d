use anyhow::{
    Context,
    Result,
    anyhow,
    bail,
};
use serde_json::Value;
use std::future::Future;
use url::Url;

pub const NEYNAR_API_URL: &str = "https://api.neynar.com";
/// Public key Neynar hands out for demos; rate limited.
pub const DEMO_API_KEY: &str = "FARCASTER_V2_FRAMES_DEMO";

pub trait FidLookup {
    fn fid_by_custody_address(&self, address: &str) -> impl Future<Output = Result<u64>> + Send;
}

#[derive(Clone, Debug)]
pub struct NeynarClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl NeynarClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(NEYNAR_API_URL, api_key)
    }

    /// Uses the demo key when `api_key` is `None` or blank.
    pub fn or_demo(api_key: Option<&str>) -> Result<Self> {
        let key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .unwrap_or(DEMO_API_KEY);
        Self::new(key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for Neynar")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{path}", self.base_url)).context("invalid Neynar API URL")
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        let res = self
            .http
            .get(url)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .context("Neynar request failed")?;
        let status = res.status();
        if !status.is_success() {
            bail!("Neynar responded with {status}");
        }
        res.json().await.context("failed to decode Neynar response")
    }

    /// Followers of `fid`, returned in Neynar's response shape.
    pub async fn followers(&self, fid: u64, limit: u32, cursor: Option<&str>) -> Result<Value> {
        let mut url = self.url("/v2/farcaster/followers")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("fid", &fid.to_string());
            query.append_pair("limit", &limit.to_string());
            if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
                query.append_pair("cursor", cursor);
            }
        }
        self.get_json(url).await
    }

    /// Bulk profile lookup; the response carries a `users` array.
    pub async fn bulk_users(&self, fids: &[u64]) -> Result<Value> {
        let joined = fids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut url = self.url("/v2/farcaster/user/bulk")?;
        url.query_pairs_mut().append_pair("fids", &joined);
        self.get_json(url).await
    }
}

impl FidLookup for NeynarClient {
    async fn fid_by_custody_address(&self, address: &str) -> Result<u64> {
        let lower = address.to_lowercase();
        let mut url = self.url("/v2/farcaster/user/bulk-by-address")?;
        url.query_pairs_mut()
            .append_pair("addresses", &lower)
            .append_pair("address_types", "custody_address");
        let body = self
            .get_json(url)
            .await
            .map_err(|e| anyhow!("Failed to lookup FID: {e}"))?;
        body.get(&lower)
            .and_then(Value::as_array)
            .and_then(|users| users.first())
            .and_then(|user| user.get("fid"))
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow!("No FID found for this custody address"))
    }
}
