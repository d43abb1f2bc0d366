mod storefront;

use std::net::Ipv4Addr;
use std::sync::Arc;

use clap::Parser;
use fieldgate_lib::config::Config;
use fieldgate_lib::graphql_api::api_router;
use fieldgate_lib::{CliOptions, PrometheusExporter, FIELDGATE_VERSION};
use tokio::net::TcpListener;
use tracing::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!(version = FIELDGATE_VERSION, "Parse options");
    let cli_options = CliOptions::parse();

    info!("Loading configuration file");
    let config = Config::read(&cli_options.config)?;
    let port = cli_options.port.unwrap_or(config.graphql.port);

    let _exporter = PrometheusExporter::start(&config)?;

    info!("Initializing demo catalog");
    let executor = Arc::new(storefront::executor(&config)?);

    info!(port, "Serving GraphQL API");
    axum::serve(
        TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?,
        api_router(executor, config.default_scope.clone()),
    )
    .await?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
