use crate::{
    bitrefill,
    farcaster_routes,
};
use actix_web::{
    App,
    HttpServer,
    dev::ServerHandle,
    web,
};
use anyhow::{
    Context,
    Result,
};
use farcaster::NeynarClient;
use std::{
    net::TcpListener,
    thread::JoinHandle,
};

pub const BITREFILL_API_URL: &str = "https://api.bitrefill.com/v2/";
/// Account whose followers `/api/followers/me` lists.
pub const FOLLOWERS_FID: u64 = 1115209;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: String,
    pub port: Option<u16>,
    /// Must end with `/`; the proxied path is appended verbatim.
    pub bitrefill_base: String,
    pub neynar: NeynarClient,
    pub followers_fid: u64,
}

impl ServerConfig {
    pub fn new(neynar: NeynarClient) -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: None,
            bitrefill_base: BITREFILL_API_URL.to_string(),
            neynar,
            followers_fid: FOLLOWERS_FID,
        }
    }

    pub fn with_bitrefill_base(mut self, base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        self.bitrefill_base = base;
        self
    }
}

/// Shared, read-only handler state.
pub struct AppState {
    pub http: reqwest::Client,
    pub bitrefill_base: String,
    pub neynar: NeynarClient,
    pub followers_fid: u64,
}

pub struct ProxyServer {
    base_url: String,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl ProxyServer {
    pub fn start(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind((config.bind.as_str(), config.port.unwrap_or(0)))
            .context("failed to bind HTTP listener for proxy")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{address}");
        tracing::info!("proxy listening on {}", base_url);

        let http = reqwest::Client::builder()
            .build()
            .context("failed to build upstream HTTP client")?;
        let state = web::Data::new(AppState {
            http,
            bitrefill_base: config.bitrefill_base,
            neynar: config.neynar,
            followers_fid: config.followers_fid,
        });
        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .configure(bitrefill::routes)
                .configure(farcaster_routes::routes)
        })
        .shutdown_timeout(5)
        .listen(listener)
        .context("failed to start Actix server")?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            if let Err(e) = sys.block_on(server) {
                tracing::error!(error = %e, "proxy server stopped with error");
            }
        });

        Ok(Self {
            base_url,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(true);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}


#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_bitrefill_base__missing_trailing_slash__appends_one() {
        let neynar = NeynarClient::new("key").unwrap();

        let config = ServerConfig::new(neynar).with_bitrefill_base("http://localhost:1/v2");

        assert_eq!(config.bitrefill_base, "http://localhost:1/v2/");
    }

    #[tokio::test]
    async fn start__unknown_route__returns_not_found() {
        // given
        let neynar = NeynarClient::new("key").unwrap();
        let server = ProxyServer::start(ServerConfig::new(neynar)).unwrap();

        // when
        let res = reqwest::get(format!("{}/nope", server.base_url())).await.unwrap();

        // then
        assert_eq!(res.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
