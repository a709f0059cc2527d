use anyhow::Context;
use clap::Parser;
use farcaster::NeynarClient;
use proxy::{
    ProxyServer,
    ServerConfig,
    init_tracing,
};

#[derive(Parser, Debug)]
#[command(version, about = "Server-side routes for the channel gifter mini app", long_about = None)]
struct Args {
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    #[arg(short, long, default_value = "false")]
    tracing: bool,
}

async fn wait_for_interrupt() {
    match tokio::signal::ctrl_c().await {
        Ok(_) => {
            tracing::info!("Received interrupt, exiting");
        }
        Err(_) => {
            tracing::warn!("Received interrupt error, exiting anyway");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.tracing {
        init_tracing();
    }
    let neynar_key = std::env::var("NEYNAR_API_KEY").ok();
    if neynar_key.is_none() {
        tracing::warn!("NEYNAR_API_KEY not set, using the demo key");
    }
    let neynar = NeynarClient::or_demo(neynar_key.as_deref())
        .context("building Neynar client")?;
    let mut config = ServerConfig::new(neynar);
    config.bind = args.bind;
    config.port = args.port;

    let server = ProxyServer::start(config).context("starting proxy server")?;
    println!("Listening on {}", server.base_url());
    wait_for_interrupt().await;
    drop(server);
    tracing::info!("Proxy stopped");
    Ok(())
}
