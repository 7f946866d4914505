//! `dpc-node` binary entrypoint: installs the TLS crypto provider, sets up
//! structured logging, and dispatches the parsed CLI.

use anyhow::{Context, Result};
use clap::Parser;
use dpc_node::cli::{DhtAction, DpcCli, DpcCommand, FirewallAction};
use dpc_node::node::DpcNode;
use dpc_node::NodeConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("installing the default rustls crypto provider should only ever happen once");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
                .add_directive("webrtc=warn".parse().unwrap())
                .add_directive("rustls=warn".parse().unwrap()),
        )
        .init();

    let cli = DpcCli::parse();
    let home = cli.home.unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| ".".into()).join(".dpc"));

    match cli.command {
        DpcCommand::Init(args) => cmd_init(&home, args.force),
        DpcCommand::Id => cmd_id(&home).await,
        DpcCommand::Serve(args) => cmd_serve(&home, args).await,
        DpcCommand::Dht(args) => cmd_dht(&home, args).await,
        DpcCommand::Firewall(args) => cmd_firewall(&home, args).await,
        DpcCommand::Status => cmd_status(&home).await,
    }
}

fn cmd_init(home: &std::path::Path, force: bool) -> Result<()> {
    let config = NodeConfig::load(home)?;
    let path = NodeConfig::config_path(home);
    if path.is_file() && !force {
        println!("config already exists at {}; pass --force to overwrite", path.display());
        return Ok(());
    }
    config.save()?;
    println!("wrote default config to {}", path.display());
    Ok(())
}

async fn cmd_id(home: &std::path::Path) -> Result<()> {
    let config = NodeConfig::load(home)?;
    let node = DpcNode::bootstrap(config).await.context("bootstrapping node identity")?;
    println!("{}", node.identity.node_id);
    Ok(())
}

async fn cmd_serve(home: &std::path::Path, args: dpc_node::cli::ServeArgs) -> Result<()> {
    let mut config = NodeConfig::load(home)?;
    if let Some(addr) = args.dht_bind {
        config.dht_bind = addr;
    }
    if let Some(addr) = args.tls_bind {
        config.tls_bind = addr;
    }
    config.bootstrap_seeds.extend(args.bootstrap_seeds);

    let node = DpcNode::bootstrap(config).await.context("bootstrapping node")?;
    node.start().context("starting background tasks")?;

    tracing::info!(node_id = %node.identity.node_id, dht = %node.config.dht_bind, tls = %node.config.tls_bind, "dpc-node serving");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutting down");
    node.shutdown();
    Ok(())
}

async fn cmd_dht(home: &std::path::Path, args: dpc_node::cli::DhtArgs) -> Result<()> {
    let config = NodeConfig::load(home)?;
    let node = DpcNode::bootstrap(config).await.context("bootstrapping node")?;

    match args.action {
        DhtAction::Bootstrap { seeds } => {
            node.dht.bootstrap(&seeds).await.context("dht bootstrap failed")?;
            println!("bootstrap complete");
        }
        DhtAction::Lookup { node_id } => {
            let target = lib_identity::NodeId::parse(&node_id).context("invalid NodeId")?;
            let contacts = node.dht.find_node(&target).await;
            for contact in contacts {
                println!("{} {}", contact.node_id, contact.addr);
            }
        }
        DhtAction::Announce => {
            let published = node.dht.publish_certificate(&node.identity.certificate.certificate_pem).await;
            let announced = node.dht.announce(node.config.tls_bind).await;
            println!("published certificate to {published} contacts, announced address to {announced} contacts");
        }
    }
    Ok(())
}

async fn cmd_firewall(home: &std::path::Path, args: dpc_node::cli::FirewallArgs) -> Result<()> {
    let config = NodeConfig::load(home)?;
    let FirewallAction::Check { requester, kind, path } = args.action;

    let rules_text = std::fs::read_to_string(config.firewall_rules_path()).unwrap_or_default();
    let rules = lib_firewall::AccessRules::parse(&rules_text)?;

    let file_kind = match kind.as_str() {
        "personal.json" => lib_firewall::FileKind::Personal,
        "device_context.json" => lib_firewall::FileKind::Device,
        other => anyhow::bail!("unknown kind '{other}', expected personal.json or device_context.json"),
    };
    let requester = if requester == "hub" {
        lib_firewall::Requester::Hub
    } else {
        let id = requester.strip_prefix("node:").unwrap_or(&requester);
        lib_firewall::Requester::Node(id)
    };

    let verdict = lib_firewall::can_access(&rules, &requester, file_kind, &path);
    println!("{verdict:?}");
    Ok(())
}

async fn cmd_status(home: &std::path::Path) -> Result<()> {
    let config = NodeConfig::load(home)?;
    let node = DpcNode::bootstrap(config).await.context("bootstrapping node")?;
    println!("{:?}", node.status.current_mode());
    Ok(())
}
