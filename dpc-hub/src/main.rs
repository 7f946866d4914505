//! Federation Hub binary: boots the axum router and in-memory services
//! (spec §4.13, C13). OAuth provider wiring is a placeholder — the Hub
//! crate only specifies the `OAuthProvider` contract (spec §1), a real
//! deployment supplies its own provider client.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use dpc_hub::{build_router, oauth::{OAuthIdentity, OAuthProvider}, HubError, HubServices};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dpc-hub", about = "Federation Hub: identity bootstrapping, discovery, and signaling")]
struct Args {
    /// Address to bind the HTTP/WebSocket listener on.
    #[arg(long, default_value = "0.0.0.0:8443")]
    bind: SocketAddr,

    /// Secret used to sign issued JWTs. Production deployments must
    /// override this via `--jwt-secret` or the `DPC_HUB_JWT_SECRET` env var.
    #[arg(long, env = "DPC_HUB_JWT_SECRET", default_value = "dev-only-insecure-secret")]
    jwt_secret: String,
}

/// A placeholder `OAuthProvider` that treats the authorization "code" as
/// the email address directly. Real deployments replace this with a
/// client for their chosen provider (spec §1 scopes that integration out).
struct DevOAuthProvider;

#[async_trait]
impl OAuthProvider for DevOAuthProvider {
    fn login_url(&self, _local_redirect_port: u16) -> String {
        "https://example.com/oauth/authorize".to_string()
    }

    async fn exchange(&self, code: &str) -> Result<OAuthIdentity, HubError> {
        Ok(OAuthIdentity { email: code.to_string(), provider: "dev".to_string() })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let services = Arc::new(HubServices::new(&args.jwt_secret, Arc::new(DevOAuthProvider)));
    services.auth.spawn_blacklist_sweep();

    let router = build_router(services);

    tracing::info!(bind = %args.bind, "dpc-hub listening");
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, router.into_make_service()).await?;

    Ok(())
}
