// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cross-chain synchronization engine
//!
//! Wires one [`watcher::DirectionWatcher`] per configured direction:
//!
//! - `lock_to_mint`: `Locked` on chain A becomes `mintWrapped` on chain B
//! - `burn_to_unlock`: `Burned` on chain B becomes `unlock` on chain A
//! - `governance`: `ProposalPassed` on the voting chain becomes `pauseBridge`
//!   on the other chain
//!
//! Watchers share nothing but the [`ProcessedEventLedger`].

pub mod config;
pub mod dispatch;
pub mod pause;
pub mod watcher;
pub mod window;


use crate::chain::{ActionSubmitter, ChainEventSource};
use crate::error::{RelayerError, RelayerResult};
use crate::ledger::{LedgerStats, ProcessedEventLedger};
use crate::metrics::RelayerMetrics;
use crate::types::{Direction, ProcessedRecord, RecordStatus};
use config::WatcherConfig;
use dispatch::Dispatcher;
use pause::{PauseCoordinator, PauseSignal};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use watcher::{DirectionStatus, DirectionWatcher, ReverifyReport, SharedSyncStatus, WatcherPhase};

struct DirectionWiring {
    config: WatcherConfig,
    source: Arc<dyn ChainEventSource>,
    submitter: Arc<dyn ActionSubmitter>,
}

pub struct SyncEngineBuilder {
    ledger: Arc<ProcessedEventLedger>,
    metrics: Option<Arc<RelayerMetrics>>,
    directions: BTreeMap<Direction, DirectionWiring>,
}

impl SyncEngineBuilder {
    pub fn new(ledger: Arc<ProcessedEventLedger>) -> Self {
        Self {
            ledger,
            metrics: None,
            directions: BTreeMap::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RelayerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn with_direction(
        mut self,
        config: WatcherConfig,
        source: Arc<dyn ChainEventSource>,
        submitter: Arc<dyn ActionSubmitter>,
    ) -> Self {
        self.directions.insert(
            config.direction,
            DirectionWiring {
                config,
                source,
                submitter,
            },
        );
        self
    }

    /// Watch `Locked` on chain A, mint on chain B
    pub fn with_lock_to_mint(
        self,
        config: WatcherConfig,
        chain_a: Arc<dyn ChainEventSource>,
        chain_b: Arc<dyn ActionSubmitter>,
    ) -> Self {
        self.with_direction(
            WatcherConfig {
                direction: Direction::LockToMint,
                ..config
            },
            chain_a,
            chain_b,
        )
    }

    /// Watch `Burned` on chain B, unlock on chain A
    pub fn with_burn_to_unlock(
        self,
        config: WatcherConfig,
        chain_b: Arc<dyn ChainEventSource>,
        chain_a: Arc<dyn ActionSubmitter>,
    ) -> Self {
        self.with_direction(
            WatcherConfig {
                direction: Direction::BurnToUnlock,
                ..config
            },
            chain_b,
            chain_a,
        )
    }

    /// Watch `ProposalPassed` on the voting chain, pause the other chain
    pub fn with_governance(
        self,
        config: WatcherConfig,
        voting_chain: Arc<dyn ChainEventSource>,
        pause_target: Arc<dyn ActionSubmitter>,
    ) -> Self {
        self.with_direction(
            WatcherConfig {
                direction: Direction::Governance,
                ..config
            },
            voting_chain,
            pause_target,
        )
    }

    pub fn build(self) -> RelayerResult<SyncEngine> {
        if self.directions.is_empty() {
            return Err(RelayerError::ConfigError(
                "no direction configured".to_string(),
            ));
        }
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(RelayerMetrics::new_for_testing()));

        let mut initial_status = BTreeMap::new();
        for (direction, wiring) in &self.directions {
            wiring.config.validate().map_err(|e| {
                RelayerError::ConfigError(e)
            })?;
            initial_status.insert(
                *direction,
                DirectionStatus {
                    direction: *direction,
                    source_chain: wiring.source.chain_name().to_string(),
                    destination_chain: wiring.submitter.chain_name().to_string(),
                    phase: WatcherPhase::Bootstrapping,
                    cursor: None,
                    safe_tip: None,
                    last_error: None,
                },
            );
        }
        let status: SharedSyncStatus = Arc::new(RwLock::new(initial_status));

        let mut watchers = BTreeMap::new();
        let mut pause = None;
        for (direction, wiring) in self.directions {
            let dispatcher = Dispatcher::new(
                direction,
                self.ledger.clone(),
                wiring.submitter.clone(),
                wiring.config.dispatch,
                metrics.clone(),
            );
            let mut watcher = DirectionWatcher::new(
                wiring.config,
                wiring.source.clone(),
                self.ledger.clone(),
                dispatcher,
                status.clone(),
                metrics.clone(),
            );
            if direction == Direction::Governance {
                let coordinator = Arc::new(PauseCoordinator::new(
                    wiring.source.chain_name(),
                    wiring.submitter.chain_name(),
                    metrics.clone(),
                ));
                watcher = watcher.with_pause_coordinator(coordinator.clone());
                pause = Some(coordinator);
            }
            watchers.insert(direction, Arc::new(watcher));
        }

        Ok(SyncEngine {
            ledger: self.ledger,
            watchers,
            pause,
            status,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectionReport {
    #[serde(flatten)]
    pub status: DirectionStatus,
    pub stats: LedgerStats,
}

pub struct SyncEngine {
    ledger: Arc<ProcessedEventLedger>,
    watchers: BTreeMap<Direction, Arc<DirectionWatcher>>,
    pause: Option<Arc<PauseCoordinator>>,
    status: SharedSyncStatus,
}

impl SyncEngine {
    pub fn ledger(&self) -> &Arc<ProcessedEventLedger> {
        &self.ledger
    }

    pub fn directions(&self) -> Vec<Direction> {
        self.watchers.keys().copied().collect()
    }

    pub fn status(&self) -> SharedSyncStatus {
        self.status.clone()
    }

    pub fn pause_signal(&self) -> Option<PauseSignal> {
        self.pause.as_ref().and_then(|p| p.latest())
    }

    pub fn pause_coordinator(&self) -> Option<&Arc<PauseCoordinator>> {
        self.pause.as_ref()
    }

    fn watcher(&self, direction: Direction) -> RelayerResult<&Arc<DirectionWatcher>> {
        self.watchers
            .get(&direction)
            .ok_or(RelayerError::DirectionNotConfigured(direction))
    }

    /// Spawn every watcher; each handle resolves when its watcher stops.
    pub fn run(&self, cancel: CancellationToken) -> Vec<JoinHandle<RelayerResult<()>>> {
        self.watchers
            .values()
            .map(|watcher| {
                info!("[{}] Starting watcher", watcher.direction());
                tokio::spawn(watcher.clone().run(cancel.clone()))
            })
            .collect()
    }

    /// Bootstrap every direction to its current safe tip, then return.
    pub async fn run_until_caught_up(&self, cancel: &CancellationToken) -> RelayerResult<()> {
        futures::future::try_join_all(
            self.watchers
                .values()
                .map(|watcher| async move { watcher.bootstrap(cancel).await }),
        )
        .await?;
        Ok(())
    }

    /// One window per direction; used by the node's `--once` mode and tests.
    pub async fn sync_step(
        &self,
        direction: Direction,
        cancel: &CancellationToken,
    ) -> RelayerResult<watcher::StepOutcome> {
        self.watcher(direction)?.sync_step(cancel).await
    }

    pub async fn reverify_range(
        &self,
        direction: Direction,
        from: u64,
        to: u64,
        cancel: &CancellationToken,
    ) -> RelayerResult<ReverifyReport> {
        self.watcher(direction)?
            .reverify_range(from, to, cancel)
            .await
    }

    pub async fn sweep_retries(
        &self,
        direction: Direction,
        cancel: &CancellationToken,
    ) -> RelayerResult<usize> {
        self.watcher(direction)?.sweep_retries(cancel).await
    }

    /// Move a failed record back to pending; the next sweep resubmits it.
    pub async fn requeue_failed(&self, direction: Direction, nonce: u64) -> RelayerResult<()> {
        self.watcher(direction)?;
        self.ledger.requeue_failed(direction, nonce).await?;
        Ok(())
    }

    pub async fn failed_records(&self, direction: Direction) -> RelayerResult<Vec<ProcessedRecord>> {
        self.watcher(direction)?;
        Ok(self
            .ledger
            .records_with_status(direction, RecordStatus::Failed)
            .await)
    }

    pub async fn report(&self) -> Vec<DirectionReport> {
        let statuses: Vec<DirectionStatus> = self.status.read().await.values().cloned().collect();
        let mut reports = Vec::with_capacity(statuses.len());
        for mut status in statuses {
            status.cursor = self.ledger.cursor(status.direction).await;
            let stats = self.ledger.stats(status.direction).await;
            reports.push(DirectionReport { status, stats });
        }
        reports
    }
}
