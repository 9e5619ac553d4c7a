use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use kgate_core::{Core, UpstreamClientConfig, WreqUpstreamClient};
use kgate_provider_core::{CredentialRotator, ProviderRegistry};
use kgate_provider_impl::{KiroProvider, KiroSettings, register_builtin_providers};

mod cli;
mod credentials;

use crate::cli::Cli;
use crate::credentials::rotator_entries;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("kgate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let config = cli.to_patch()?.into_config()?;
    info!(
        host = %config.host,
        port = config.port,
        proxy = %config.proxy.as_deref().unwrap_or(""),
        auth_dir = %config.auth_dir.as_deref().unwrap_or(""),
        "config loaded"
    );

    let region = cli.region();
    let entries = rotator_entries(&config, region.as_deref())?;
    for entry in &entries {
        info!(
            credential = %entry.display_name(),
            region = %entry.region,
            "credential location"
        );
    }

    let client = WreqUpstreamClient::new(UpstreamClientConfig::from_global(&config))?;
    let kiro = KiroProvider::new(
        KiroSettings {
            region,
            malformed_markers: config.malformed_markers.clone(),
        },
        CredentialRotator::new(entries),
        Arc::new(client),
    );
    let mut registry = ProviderRegistry::new();
    let kiro = register_builtin_providers(&mut registry, kiro);
    info!(
        credentials = kiro.rotator().len(),
        malformed_markers = kiro.matcher().markers().len(),
        "kiro provider ready"
    );

    let core = Core::new(Arc::new(registry));
    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, core.router()).await?;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("kgate=info,kgate_core=info,kgate_provider_impl=info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
