// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use lockmint_bridge_config::Config;
use lockmint_relayer::config::RelayerNodeConfig;
use lockmint_relayer::node::run_relayer_node;
use lockmint_relayer::server::run_metrics_server;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};
use tap::TapFallible;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
    /// Sync every direction up to its current safe tip, then exit
    #[clap(long, default_value_t = false)]
    pub once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Init logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lockmint_relayer=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayerNodeConfig::load(&args.config_path)?;

    let registry = prometheus::Registry::new();
    let metrics_address =
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), config.metrics_port);
    let _metrics_server = run_metrics_server(&metrics_address, registry.clone());
    info!("Metrics server started at port {}", config.metrics_port);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            shutdown.cancel();
        }
    });

    run_relayer_node(config, registry, cancel, args.once)
        .await
        .tap_err(|e| error!("Relayer stopped with error: {:?}", e))
}
