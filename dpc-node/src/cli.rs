//! Command-line surface for the `dpc-node` binary, grounded in the same
//! `Args`/`Subcommand` nesting the orchestrator CLI this project grew out
//! of uses: a top-level command picks a resource, and each resource picks
//! an action.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dpc-node", author, version, about = "Distributed Private Collaboration node", long_about = None)]
pub struct DpcCli {
    /// Node home directory (identity, knowledge, firewall rules, config.toml).
    #[arg(long, global = true, env = "DPC_HOME")]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: DpcCommand,
}

#[derive(Subcommand, Debug)]
pub enum DpcCommand {
    /// Identity and config bootstrapping.
    Init(InitArgs),

    /// Print this node's identity.
    Id,

    /// Run the node: DHT, P2P fabric, signaling client, and every
    /// background loop, until interrupted.
    Serve(ServeArgs),

    /// DHT inspection and maintenance.
    Dht(DhtArgs),

    /// Context firewall rule checks.
    Firewall(FirewallArgs),

    /// Current connection mode.
    Status,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite config.toml with defaults if one already exists.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Override the DHT bind address from config.toml.
    #[arg(long)]
    pub dht_bind: Option<SocketAddr>,

    /// Override the direct-TLS bind address from config.toml.
    #[arg(long)]
    pub tls_bind: Option<SocketAddr>,

    /// Additional DHT bootstrap seeds, `host:port`, on top of config.toml.
    #[arg(long = "bootstrap", value_name = "ADDR")]
    pub bootstrap_seeds: Vec<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct DhtArgs {
    #[command(subcommand)]
    pub action: DhtAction,
}

#[derive(Subcommand, Debug)]
pub enum DhtAction {
    /// Ping a set of seeds and merge any that respond into the routing table.
    Bootstrap {
        #[arg(value_name = "ADDR", required = true)]
        seeds: Vec<SocketAddr>,
    },
    /// Look up the closest known contacts to a NodeId.
    Lookup {
        node_id: String,
    },
    /// Publish this node's certificate and address to its closest contacts.
    Announce,
}

#[derive(Args, Debug)]
pub struct FirewallArgs {
    #[command(subcommand)]
    pub action: FirewallAction,
}

#[derive(Subcommand, Debug)]
pub enum FirewallAction {
    /// Evaluate `.dpc_access` for a requester against a dotted path.
    Check {
        /// `node:<id>` or `hub`.
        requester: String,
        /// `personal.json` or `device_context.json`.
        kind: String,
        path: String,
    },
}
