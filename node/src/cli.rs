//! # CLI Interface
//!
//! Defines the command-line argument structure for `weft-node` using
//! `clap` derive. Supports four subcommands: `run`, `bootstrap`, `call`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use weft_protocol::config;

/// WEFT peer node.
///
/// A full WEFT node: keeps a persistent identity, joins the discovery
/// network, and serves the wallet method table over RPC. The same binary
/// can also run a bootstrap registry or make one-shot calls against a
/// remote node.
#[derive(Parser, Debug)]
#[command(
    name = "weft-node",
    about = "WEFT peer node",
    version,
    propagate_version = true
)]
pub struct WeftNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the WEFT node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node: storage, identity, discovery, RPC server.
    Run(RunArgs),
    /// Run a bootstrap registry for other nodes to discover each other
    /// through.
    Bootstrap(BootstrapArgs),
    /// Make a one-shot RPC call against a remote node identified by its
    /// public key.
    Call(CallArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node data directory holding the append-only log
    /// (and thus the identity seeds).
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "WEFT_DATA_DIR", default_value = "./weft-data")]
    pub data_dir: PathBuf,

    /// Bootstrap registry contacts, comma-separated host:port pairs.
    #[arg(
        long,
        env = "WEFT_BOOTSTRAP",
        default_value = "127.0.0.1:7340",
        value_delimiter = ','
    )]
    pub bootstrap: Vec<SocketAddr>,

    /// Port the RPC server listens on and announces to the directory.
    #[arg(long, env = "WEFT_RPC_PORT", default_value_t = config::DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "WEFT_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `bootstrap` subcommand.
#[derive(Parser, Debug)]
pub struct BootstrapArgs {
    /// Address to bind the registry on.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to serve the registry on.
    #[arg(long, env = "WEFT_BOOTSTRAP_PORT", default_value_t = config::DEFAULT_BOOTSTRAP_PORT)]
    pub port: u16,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "WEFT_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `call` subcommand.
#[derive(Parser, Debug)]
pub struct CallArgs {
    /// Hex-encoded public key of the node to call, as printed by `run`.
    pub server: String,

    /// Method name to invoke (e.g. `ping`, `create-wallet`).
    pub method: String,

    /// JSON payload for the method.
    #[arg(long, default_value = "{}")]
    pub payload: String,

    /// Bootstrap registry contacts, comma-separated host:port pairs.
    #[arg(
        long,
        env = "WEFT_BOOTSTRAP",
        default_value = "127.0.0.1:7340",
        value_delimiter = ','
    )]
    pub bootstrap: Vec<SocketAddr>,

    /// Seconds to wait for the response before giving up.
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "WEFT_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}
