//! spooltag CLI.
//!
//! Offline commands (`decode`, `keys`) run locally; tag commands (`read`,
//! `write`, `clone`) connect to the configured hardware agent and wait for
//! the next tag touch.

mod cli;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use spooltag_bridge::session::BridgeSession;
use spooltag_bridge::ws::WsTransport;
use spooltag_codec::dump;
use spooltag_keys::derive_keys_hex;
use spooltag_types::config::BridgeConfig;
use spooltag_types::tag::TagImage;

use crate::cli::{Cli, Commands};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Decode { dump } => cmd_decode(&dump),
        Commands::Keys { uid } => cmd_keys(&config, &uid),
        Commands::Read { out } => run_async(cmd_read(config, out)),
        Commands::Write { dump } => run_async(cmd_write(config, dump)),
        Commands::Clone { dump, rewrite_uid } => run_async(cmd_clone(config, dump, rewrite_uid)),
    }
}

fn run_async<F: std::future::Future<Output = Result<()>>>(fut: F) -> Result<()> {
    tokio::runtime::Runtime::new()
        .context("failed to start async runtime")?
        .block_on(fut)
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = BridgeConfig::load(cli.config.as_deref());
    if let Some(agent_url) = &cli.agent_url {
        let parsed = url::Url::parse(agent_url)
            .with_context(|| format!("invalid agent url: {agent_url}"))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            bail!("agent url must use the ws:// or wss:// scheme");
        }
        config.agent_url = agent_url.clone();
    }
    Ok(config)
}

fn load_dump(path: &Path) -> Result<TagImage> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let image = dump::from_file_contents(&data)
        .with_context(|| format!("failed to parse dump {}", path.display()))?;
    Ok(image)
}

/// Dial the agent and wait for the link to come up, bounded by the
/// configured request timeout.
async fn connect(config: &BridgeConfig) -> Result<(WsTransport, BridgeSession)> {
    let (transport, handle) =
        WsTransport::connect(config.agent_url.clone(), config.reconnect_delay());
    let session = BridgeSession::new(config.clone(), handle);

    let mut status = session.status();
    tokio::time::timeout(config.request_timeout(), status.wait_for(|s| s.connected))
        .await
        .map_err(|_| {
            anyhow::anyhow!("timed out waiting for the agent at {}", config.agent_url)
        })?
        .context("agent link task stopped")?;

    Ok((transport, session))
}

fn cmd_decode(path: &Path) -> Result<()> {
    let image = load_dump(path)?;
    let record = spooltag_codec::decode(&image);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn cmd_keys(config: &BridgeConfig, uid: &str) -> Result<()> {
    let keys = derive_keys_hex(&config.kdf, uid)?;
    for (sector, key) in keys.iter().enumerate() {
        println!("{sector:2}: {key}");
    }
    Ok(())
}

async fn cmd_read(config: BridgeConfig, out: Option<PathBuf>) -> Result<()> {
    let (transport, session) = connect(&config).await?;
    info!("Touch a tag to the reader");

    let outcome = session.request_read(config.request_timeout()).await?;
    let unreadable = outcome.readable.unreadable_sectors();
    if !unreadable.is_empty() {
        warn!(?unreadable, "Some sectors could not be read and were zero-filled");
    }
    println!("{}", serde_json::to_string_pretty(&outcome.record)?);

    if let Some(path) = out {
        std::fs::write(&path, outcome.image.to_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Saved raw image");
    }

    transport.shutdown();
    Ok(())
}

async fn cmd_write(config: BridgeConfig, dump: PathBuf) -> Result<()> {
    let image = load_dump(&dump)?;
    let (transport, session) = connect(&config).await?;
    info!(uid = %image.uid(), "Touch the tag to the reader");

    let outcome = session
        .request_write(&image, config.request_timeout())
        .await?;
    println!("wrote {} blocks", outcome.blocks_written);

    transport.shutdown();
    Ok(())
}

async fn cmd_clone(config: BridgeConfig, dump: PathBuf, rewrite_uid: bool) -> Result<()> {
    let image = load_dump(&dump)?;
    let source_uid = image.uid();
    let (transport, session) = connect(&config).await?;
    info!(%source_uid, rewrite_uid, "Touch the target tag to the reader");

    let outcome = session
        .request_clone(source_uid, &image, rewrite_uid, config.request_timeout())
        .await?;
    println!("wrote {} blocks", outcome.blocks_written);

    transport.shutdown();
    Ok(())
}
