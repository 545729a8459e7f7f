//! BFT Sequencer Node
//!
//! Main entry point for a sequencer. Serves the peer protocol over JSON-RPC,
//! runs the round timer and sends proposals, votes and timeouts to peers.
//! Ledger state lives in memory only.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sequencer_consensus::{
    generate_keypair, Ed25519Scheme, HttpConnector, RpcPeerTransport, Sequencer,
    StakeWeightedSchedule,
};
use sequencer_rpc::{HttpRpcServer, RpcContext};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

/// BFT block sequencer
#[derive(Parser, Debug)]
#[command(name = "sequencer")]
#[command(about = "Leader-based BFT block sequencer", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a sequencer node
    Run {
        /// Path to the JSON config file
        #[arg(long)]
        config: PathBuf,

        /// Override the listen address from the config
        #[arg(long)]
        listen_addr: Option<String>,
    },
    /// Print fresh Ed25519 keypairs for a config file
    Keygen {
        /// Number of keypairs
        #[arg(long, default_value = "1")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        Command::Run {
            config,
            listen_addr,
        } => {
            let mut node_config = NodeConfig::load(&config)
                .with_context(|| format!("loading config {}", config.display()))?;
            if let Some(addr) = listen_addr {
                node_config.listen_addr = addr;
            }
            run_sequencer(node_config).await
        }
        Command::Keygen { count } => {
            for _ in 0..count {
                let (secret, public) = generate_keypair();
                println!("{}", json!({ "secretKey": secret, "publicKey": public }));
            }
            Ok(())
        }
    }
}

/// Run a sequencer until Ctrl+C
async fn run_sequencer(config: NodeConfig) -> Result<()> {
    let seq_config = config.sequencer_config();

    tracing::info!("Starting sequencer {}", config.sequencer_id);
    tracing::info!("  RPC: {}", config.listen_addr);
    tracing::info!("  Peers: {:?}", config.peer_addresses);
    tracing::info!("  Round timeout: {}ms", config.round_timeout_ms);
    tracing::info!("  Block time: {}ms", config.block_time_ms);

    let scheme = Ed25519Scheme::from_encoded(
        config.sequencer_id,
        &config.secret_key,
        &config.public_keys,
    )?;
    let schedule = StakeWeightedSchedule::new(seq_config.peer_count(), &seq_config.stake_weights);
    let transport = RpcPeerTransport::new(
        config.peer_addresses.clone(),
        HttpConnector::new(config.request_timeout()),
        config.retry_policy(),
    );

    let sequencer = Arc::new(
        Sequencer::new(
            seq_config,
            Arc::new(schedule),
            Arc::new(scheme),
            Arc::new(transport),
        )?
        .with_block_time(config.block_time()),
    );

    // Bind before spawning so an address in use is fatal
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!("Sequencer RPC server listening on {}", config.listen_addr);

    let server = HttpRpcServer::new(Arc::new(RpcContext::new(sequencer.clone())));
    let http_server = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            tracing::error!("RPC server error: {}", e);
        }
    });

    let timer_sequencer = sequencer.clone();
    let round_timer = tokio::spawn(async move {
        timer_sequencer.run_round_timer().await;
    });

    tracing::info!(
        "Sequencer running, next leader is {}. Press Ctrl+C to stop.",
        sequencer.next_leader()
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    round_timer.abort();
    http_server.abort();

    let status = sequencer.status();
    tracing::info!(
        "Sequencer stopped at height {} ({})",
        status.latest_confirmed_block,
        status.latest_confirmed_hash
    );

    Ok(())
}
