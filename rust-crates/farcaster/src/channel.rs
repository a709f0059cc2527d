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
use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::Duration,
};
use url::Url;

pub const FARCASTER_API_URL: &str = "https://api.farcaster.xyz";
pub const PAGE_LIMIT: u32 = 1000;
pub const PAGE_DELAY: Duration = Duration::from_millis(100);

/// Field names under `result` that may carry a page of records, in priority order.
const LIST_FIELDS: [&str; 3] = ["users", "followers", "members"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelGroup {
    Followers,
    #[default]
    Members,
}

impl ChannelGroup {
    /// Listing endpoint for the group, relative to the Farcaster API root.
    pub fn path(self) -> &'static str {
        match self {
            ChannelGroup::Members => "/fc/channel-members",
            ChannelGroup::Followers => "/v1/channel-followers",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelGroup::Members => "members",
            ChannelGroup::Followers => "followers",
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            ChannelGroup::Members => ChannelGroup::Followers,
            ChannelGroup::Followers => ChannelGroup::Members,
        }
    }
}

impl fmt::Display for ChannelGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set by the consumer when it no longer wants results; checked between pages.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn new(items: Vec<Value>, next_cursor: Option<&str>) -> Self {
        Self {
            items,
            next_cursor: next_cursor.map(str::to_owned),
        }
    }

    /// Reads a listing response: the first list field present under `result`, and
    /// `next.cursor` when it is a non-empty string.
    pub fn from_response(body: &Value) -> Self {
        let result = body.get("result");
        let items = LIST_FIELDS
            .iter()
            .find_map(|field| result.and_then(|r| r.get(field)).and_then(Value::as_array))
            .cloned()
            .unwrap_or_default();
        let next_cursor = body
            .pointer("/next/cursor")
            .and_then(Value::as_str)
            .filter(|cursor| !cursor.is_empty())
            .map(str::to_owned);
        Self { items, next_cursor }
    }
}

pub trait ChannelSource {
    fn page(
        &self,
        channel_id: &str,
        group: ChannelGroup,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<Page>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Complete(Vec<Value>),
    /// The consumer cancelled; `fetched` counts the records delivered before that.
    Cancelled { fetched: usize },
}

pub struct ChannelFetcher<S> {
    source: S,
    page_delay: Duration,
}

impl<S: ChannelSource> ChannelFetcher<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            page_delay: PAGE_DELAY,
        }
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// Walks every page of the channel listing. `on_progress` receives the running
    /// total after each accepted page and is never called once `cancel` is set.
    pub async fn fetch_all(
        &self,
        channel_id: &str,
        group: ChannelGroup,
        cancel: &CancelFlag,
        mut on_progress: impl FnMut(usize),
    ) -> Result<FetchOutcome> {
        let mut items: Vec<Value> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return Ok(FetchOutcome::Cancelled {
                    fetched: items.len(),
                });
            }
            let page = match self.source.page(channel_id, group, cursor.as_deref()).await
            {
                Ok(page) => page,
                Err(_) if cancel.is_cancelled() => {
                    return Ok(FetchOutcome::Cancelled {
                        fetched: items.len(),
                    });
                }
                Err(e) => return Err(e),
            };
            if cancel.is_cancelled() {
                return Ok(FetchOutcome::Cancelled {
                    fetched: items.len(),
                });
            }
            items.extend(page.items);
            on_progress(items.len());
            tracing::debug!(%group, channel_id, total = items.len(), "fetched channel page");
            match page.next_cursor {
                Some(next) => {
                    cursor = Some(next);
                    if !self.page_delay.is_zero() {
                        tokio::time::sleep(self.page_delay).await;
                    }
                }
                None => break,
            }
        }
        tracing::info!(%group, channel_id, total = items.len(), "channel listing complete");
        Ok(FetchOutcome::Complete(items))
    }
}

#[derive(Clone, Debug)]
pub struct FarcasterClient {
    base_url: String,
    http: reqwest::Client,
}

impl FarcasterClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for Farcaster")?;
        Ok(Self { base_url, http })
    }

    pub fn public() -> Result<Self> {
        Self::new(FARCASTER_API_URL)
    }

    fn page_url(
        &self,
        channel_id: &str,
        group: ChannelGroup,
        cursor: Option<&str>,
    ) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, group.path()))
            .context("invalid Farcaster API URL")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("channel_id", channel_id);
            query.append_pair("limit", &PAGE_LIMIT.to_string());
            if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
                query.append_pair("cursor", cursor);
            }
        }
        Ok(url)
    }
}

impl ChannelSource for FarcasterClient {
    async fn page(
        &self,
        channel_id: &str,
        group: ChannelGroup,
        cursor: Option<&str>,
    ) -> Result<Page> {
        let url = self.page_url(channel_id, group, cursor)?;
        let res = self.http.get(url).send().await.map_err(|e| {
            tracing::warn!(error = %e, %group, "channel listing request failed");
            anyhow::anyhow!("Error fetching channel {group}")
        })?;
        if !res.status().is_success() {
            tracing::warn!(status = %res.status(), %group, "channel listing rejected");
            bail!("Error fetching channel {group}");
        }
        let body: Value = res
            .json()
            .await
            .with_context(|| format!("Error fetching channel {group}"))?;
        Ok(Page::from_response(&body))
    }
}
