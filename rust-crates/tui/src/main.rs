use channel_gifter::client::{
    self,
    AppConfig,
    DEFAULT_APP_URL,
};
use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    sync::OnceLock,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

const LOG_FILE_PREFIX: &str = "channel-gifter.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(version, about = "Pick a random Farcaster channel member and gift them a card")]
struct Args {
    /// Mini-app server hosting the Bitrefill proxy and user routes.
    #[arg(long, default_value = DEFAULT_APP_URL)]
    app_url: String,

    /// Settings file (defaults to ~/.config/channel-gifter/settings.json).
    #[arg(long)]
    settings: Option<String>,

    /// Directory for the daily rolling log file.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

/// The terminal belongs to the UI, so logs go to a file.
fn init_file_tracing(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .wrap_err_with(|| format!("failed to create log dir {}", log_dir.display()))?;
    let appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    init_file_tracing(&args.log_dir)?;
    tracing::info!("starting channel-gifter");
    let config = AppConfig {
        app_url: args.app_url,
        settings_path: args.settings,
        log_dir: args.log_dir,
    };
    client::run_app(config).await
}
