// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain::eth::EvmChainClient;
use crate::chain::{ActionSubmitter, ChainEventSource};
use crate::config::RelayerNodeConfig;
use crate::ledger::ProcessedEventLedger;
use crate::metrics::RelayerMetrics;
use crate::server::run_server;
use crate::sync_engine::{SyncEngine, SyncEngineBuilder};
use crate::types::{ChainSide, Direction};
use anyhow::Context;
use futures::stream::{FuturesUnordered, StreamExt};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wire every configured direction onto the two chain clients.
pub fn assemble_engine<C>(
    config: &RelayerNodeConfig,
    ledger: Arc<ProcessedEventLedger>,
    chain_a: Arc<C>,
    chain_b: Arc<C>,
    metrics: Arc<RelayerMetrics>,
) -> anyhow::Result<SyncEngine>
where
    C: ChainEventSource + ActionSubmitter + 'static,
{
    let side = |side: ChainSide| match side {
        ChainSide::A => chain_a.clone(),
        ChainSide::B => chain_b.clone(),
    };
    let mut builder = SyncEngineBuilder::new(ledger)
        .with_metrics(metrics)
        .with_lock_to_mint(
            config.watcher_config(Direction::LockToMint)?,
            chain_a.clone(),
            chain_b.clone(),
        )
        .with_burn_to_unlock(
            config.watcher_config(Direction::BurnToUnlock)?,
            chain_b.clone(),
            chain_a.clone(),
        );
    if let Some(governance) = &config.governance {
        builder = builder.with_governance(
            config.watcher_config(Direction::Governance)?,
            side(governance.source),
            side(governance.source.other()),
        );
    }
    Ok(builder.build()?)
}

async fn connect(
    config: &RelayerNodeConfig,
    side: ChainSide,
    relayer_key: &str,
) -> anyhow::Result<Arc<EvmChainClient>> {
    let chain = config.chain(side);
    let client = EvmChainClient::new(
        &chain.name,
        &chain.rpc_url,
        chain.expected_chain_id,
        chain.contracts()?,
        Some(relayer_key),
    )
    .await
    .with_context(|| format!("[{}] failed to connect to {}", chain.name, chain.rpc_url))?;
    Ok(Arc::new(client))
}

/// Run the relayer until `cancel` fires or a watcher hits a fatal error.
/// With `once`, every direction is synced to its current safe tip and the call returns.
pub async fn run_relayer_node(
    config: RelayerNodeConfig,
    prometheus_registry: prometheus::Registry,
    cancel: CancellationToken,
    once: bool,
) -> anyhow::Result<()> {
    config.validate()?;
    let metrics = Arc::new(RelayerMetrics::new(&prometheus_registry));
    let start_time = Instant::now();

    // Start uptime tracking task
    let uptime_metrics = metrics.clone();
    let uptime_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            uptime_metrics
                .uptime_seconds
                .set(start_time.elapsed().as_secs() as i64);
            tokio::select! {
                _ = uptime_cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(10)) => {}
            }
        }
    });

    let relayer_key = std::fs::read_to_string(&config.relayer_key_path).with_context(|| {
        format!(
            "Failed to read relayer key from {:?}",
            config.relayer_key_path
        )
    })?;
    let ledger = Arc::new(
        ProcessedEventLedger::open(&config.ledger_dir)
            .with_context(|| format!("Failed to open ledger at {:?}", config.ledger_dir))?,
    );
    info!("Ledger opened at {:?}", config.ledger_dir);

    let chain_a = connect(&config, ChainSide::A, &relayer_key).await?;
    let chain_b = connect(&config, ChainSide::B, &relayer_key).await?;
    let engine = Arc::new(assemble_engine(
        &config,
        ledger,
        chain_a,
        chain_b,
        metrics,
    )?);

    if once {
        engine.run_until_caught_up(&cancel).await?;
        for report in engine.report().await {
            info!(
                "[{}] cursor={:?} pending={} confirmed={} failed={}",
                report.status.direction,
                report.stats.cursor,
                report.stats.pending,
                report.stats.confirmed,
                report.stats.failed
            );
        }
        return Ok(());
    }

    if let Some(port) = config.server_listen_port {
        let socket_address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
        let server = run_server(&socket_address, engine.clone());
        tokio::spawn(async move {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Status server failed: {:?}", e),
                Err(e) => error!("Status server task failed: {:?}", e),
            }
        });
    }

    await_watchers(&engine, cancel).await
}

/// Wait for every watcher. The first fatal error cancels the others.
pub async fn await_watchers(engine: &SyncEngine, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut handles: FuturesUnordered<_> = engine.run(cancel.clone()).into_iter().collect();
    let mut first_error = None;
    while let Some(joined) = handles.next().await {
        let result = joined
            .map_err(|e| anyhow::anyhow!("Watcher task join error: {}", e))
            .and_then(|r| r.map_err(anyhow::Error::from));
        if let Err(e) = result {
            error!("Watcher failed, stopping relayer: {:?}", e);
            cancel.cancel();
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => {
            info!("All watchers stopped");
            Ok(())
        }
    }
}
