pub mod bitrefill;
pub mod farcaster_routes;
pub mod server;

pub use server::{
    ProxyServer,
    ServerConfig,
};

use tracing_subscriber::EnvFilter;

/// Logs to stdout, honouring `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
