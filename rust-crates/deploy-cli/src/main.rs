mod domain;
mod env_file;
mod manifest;
mod orchestrator;
mod prompt;
mod shell;
#[cfg(test)]
mod test_server;
mod vercel_api;
mod vercel_cli;

use anyhow::{
    Context,
    Result,
};
use clap::Parser;
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

use crate::{
    env_file::DeployEnv,
    orchestrator::{
        DeployConfig,
        Orchestrator,
        Outcome,
    },
    prompt::TerminalPrompter,
    shell::SystemRunner,
};

#[derive(Parser, Debug)]
#[command(
    name = "gifter-deploy",
    about = "Deploy the channel gifter mini app to Vercel and sign its Farcaster manifest",
    version
)]
struct Args {}

/// Progress goes to stdout with `println!`; logs go to stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run() -> Result<()> {
    let root = std::env::current_dir().context("resolving the project directory")?;
    println!("Deploying from {}", root.display());
    let mut orchestrator = Orchestrator::new(
        DeployConfig::new(&root),
        DeployEnv::from_process(),
        SystemRunner::new(&root),
        TerminalPrompter::stdin(),
    );
    match orchestrator.run().await? {
        Outcome::Deployed(record) => {
            tracing::info!(domain = %record.domain, redeployed = record.redeployed, "deployment recorded")
        }
        Outcome::GithubSetup => tracing::info!("stopped so a GitHub repository can be set up"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let _args = Args::parse();
    init_tracing();
    if let Err(e) = run().await {
        tracing::error!(error = %format!("{e:#}"), "deployment failed");
        eprintln!("\nDeployment failed: {e:#}");
        std::process::exit(1);
    }
}
