// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # WEFT Node
//!
//! Entry point for the `weft-node` binary. Parses CLI arguments,
//! initializes logging, and assembles the substrate: append-only log,
//! seed-derived identity, discovery directory, RPC server, and the
//! wallet method table.
//!
//! The binary supports four subcommands:
//!
//! - `run`       — start a full node and print its public key
//! - `bootstrap` — run a discovery registry for other nodes
//! - `call`      — one-shot RPC call against a remote public key
//! - `version`   — print build version information

mod cli;
mod logging;
mod wallet;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use weft_protocol::directory::{DirectoryConfig, PeerDirectory, Registry};
use weft_protocol::identity::{IdentityStore, WeftKeypair, WeftPublicKey};
use weft_protocol::rpc::{Dispatcher, RpcClient, RpcServer};
use weft_protocol::storage::LogStore;

use cli::{Commands, WeftNodeCli};
use logging::LogFormat;
use wallet::WalletLedger;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = WeftNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Bootstrap(args) => run_bootstrap(args).await,
        Commands::Call(args) => run_call(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full node: log, identity, directory, RPC server, wallet.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "weft_node=info,weft_protocol=info",
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        data_dir = %args.data_dir.display(),
        rpc_port = args.rpc_port,
        bootstrap = ?args.bootstrap,
        "starting weft-node"
    );

    // --- Persistent storage ---
    let store = Arc::new(
        LogStore::open(&args.data_dir)
            .with_context(|| format!("failed to open log at {}", args.data_dir.display()))?,
    );
    tracing::info!(path = %store.path().display(), keys = store.key_count(), "log opened");

    // --- Identity ---
    // Two seeds, both resolve-or-create: the discovery identity and the
    // RPC identity. Same data directory, same keys, every boot.
    let ids = IdentityStore::new(Arc::clone(&store));
    let dht_keypair = ids.resolve_keypair("dht").context("discovery identity")?;
    let rpc_keypair = ids.resolve_keypair("rpc").context("rpc identity")?;

    // --- Discovery ---
    let directory = PeerDirectory::join(
        DirectoryConfig {
            bootstrap: args.bootstrap,
        },
        &dht_keypair,
    )
    .await
    .context("failed to join discovery network")?;

    // --- Method table ---
    let dispatcher = Arc::new(Dispatcher::new());
    let ledger = WalletLedger::new(Arc::clone(&store));
    ledger.register_on(&dispatcher);

    // --- RPC server ---
    let bind_addr = format!("0.0.0.0:{}", args.rpc_port)
        .parse()
        .expect("static bind address");
    let server = RpcServer::listen(&rpc_keypair, bind_addr, dispatcher)
        .await
        .context("failed to start RPC server")?;

    directory
        .announce(server.public_key(), server.local_addr().port())
        .await
        .context("failed to announce to the directory")?;

    // The one line of stdout: the key clients need to reach this node.
    println!("{}", rpc_keypair.public_key_hex());
    tracing::info!(
        public_key = %rpc_keypair.public_key_hex(),
        addr = %server.local_addr(),
        "node ready"
    );

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    server.shutdown();
    directory.close();
    tracing::info!("weft-node stopped");
    Ok(())
}

/// Runs a bootstrap registry until interrupted.
async fn run_bootstrap(args: cli::BootstrapArgs) -> Result<()> {
    logging::init_logging(
        "weft_node=info,weft_protocol=info",
        LogFormat::from_str_lossy(&args.log_format),
    );

    let addr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.host, args.port))?;
    let registry = Registry::bind(addr)
        .await
        .with_context(|| format!("failed to bind registry on {addr}"))?;

    println!("{}", registry.local_addr());
    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    registry.shutdown();
    Ok(())
}

/// One-shot RPC call: join, resolve, call, print, close.
async fn run_call(args: cli::CallArgs) -> Result<()> {
    logging::init_logging(
        "weft_node=warn,weft_protocol=warn",
        LogFormat::from_str_lossy(&args.log_format),
    );

    let target = WeftPublicKey::from_hex(&args.server)
        .map_err(|e| anyhow::anyhow!("invalid server public key: {e}"))?;

    // One-shot callers are ephemeral — no store, no persistent seed.
    let keypair = WeftKeypair::generate();
    let directory = PeerDirectory::join(
        DirectoryConfig {
            bootstrap: args.bootstrap,
        },
        &keypair,
    )
    .await
    .context("failed to join discovery network")?;

    let client = RpcClient::connect(&directory, &target)
        .await
        .context("failed to connect to the target node")?;

    let response = client
        .call(
            &args.method,
            args.payload.into_bytes(),
            std::time::Duration::from_secs(args.timeout_secs),
        )
        .await
        .with_context(|| format!("call to '{}' failed", args.method))?;

    // Responses are JSON by convention; print them as text either way.
    println!("{}", String::from_utf8_lossy(&response));

    client.close();
    directory.close();
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("weft-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", weft_protocol::config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
