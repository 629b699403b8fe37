// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Direction watcher
//!
//! One watcher per direction, strictly sequential inside:
//!
//! ```text
//!  Bootstrapping ──(window end > safe tip)──► LiveSyncing ──(cancel)──► Stopped
//!       │  step until caught up                  │  step on every poll tick
//!       │                                        │  sweep retryable records
//! ```
//!
//! A step fetches one window `[cursor + 1, min(cursor + max_block_range, safe_tip)]`,
//! dispatches every event in (block, log index) order and only then advances
//! the cursor to the window end.

use super::config::WatcherConfig;
use super::dispatch::{DispatchOutcome, Dispatcher};
use super::pause::PauseCoordinator;
use super::window::{next_from, next_window, safe_tip};
use crate::chain::{ChainError, ChainEventSource};
use crate::error::{RelayerError, RelayerResult};
use crate::ledger::ProcessedEventLedger;
use crate::metrics::RelayerMetrics;
use crate::retry_with_max_elapsed_time;
use crate::types::{BridgeEvent, Direction, FailureReason, RawEvent, RecordStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherPhase {
    Bootstrapping,
    LiveSyncing,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectionStatus {
    pub direction: Direction,
    pub source_chain: String,
    pub destination_chain: String,
    pub phase: WatcherPhase,
    pub cursor: Option<u64>,
    pub safe_tip: Option<u64>,
    pub last_error: Option<String>,
}

pub type SharedSyncStatus = Arc<RwLock<BTreeMap<Direction, DirectionStatus>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A window was drained and the cursor advanced to `to`
    Progressed { from: u64, to: u64, events: usize },
    /// Nothing left below the safe tip
    CaughtUp { safe_tip: u64 },
    /// Shutdown observed; the cursor did not move
    Interrupted,
}

/// Per-window counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowTally {
    pub events: usize,
    pub dispatched: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(skip)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReverifyReport {
    pub direction: Direction,
    pub from: u64,
    pub to: u64,
    pub tally: WindowTally,
}

pub struct DirectionWatcher {
    config: WatcherConfig,
    source: Arc<dyn ChainEventSource>,
    ledger: Arc<ProcessedEventLedger>,
    dispatcher: Dispatcher,
    pause: Option<Arc<PauseCoordinator>>,
    status: SharedSyncStatus,
    metrics: Arc<RelayerMetrics>,
    // serializes steps, sweeps and re-verification of this direction
    step_lock: Mutex<()>,
}

impl DirectionWatcher {
    pub fn new(
        config: WatcherConfig,
        source: Arc<dyn ChainEventSource>,
        ledger: Arc<ProcessedEventLedger>,
        dispatcher: Dispatcher,
        status: SharedSyncStatus,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        Self {
            config,
            source,
            ledger,
            dispatcher,
            pause: None,
            status,
            metrics,
            step_lock: Mutex::new(()),
        }
    }

    pub fn with_pause_coordinator(mut self, pause: Arc<PauseCoordinator>) -> Self {
        self.pause = Some(pause);
        self
    }

    pub fn direction(&self) -> Direction {
        self.config.direction
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    async fn update_status(&self, f: impl FnOnce(&mut DirectionStatus)) {
        let mut status = self.status.write().await;
        if let Some(entry) = status.get_mut(&self.config.direction) {
            f(entry);
        }
    }

    /// Latest block with backoff on recoverable errors; `None` when cancelled while waiting.
    async fn latest_block(&self, cancel: &CancellationToken) -> RelayerResult<Option<u64>> {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            result = async {
                retry_with_max_elapsed_time!(
                    self.source.latest_block(),
                    self.config.fetch.max_retry_duration,
                    ChainError::is_recoverable
                )
            } => result,
        };
        match result {
            Ok(Ok(latest)) => Ok(Some(latest)),
            Ok(Err(e)) | Err(e) => Err(e.into()),
        }
    }

    async fn fetch_window(
        &self,
        from: u64,
        to: u64,
        cancel: &CancellationToken,
    ) -> RelayerResult<Option<Vec<RawEvent>>> {
        let kind = self.config.direction.event_kind();
        let result: Result<Result<Vec<RawEvent>, ChainError>, ChainError> = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            result = async {
                retry_with_max_elapsed_time!(
                    self.source.fetch_events(kind, from, to),
                    self.config.fetch.max_retry_duration,
                    ChainError::is_recoverable
                )
            } => result,
        };
        match result {
            Ok(Ok(mut events)) => {
                events.sort_by_key(|e| (e.block_number, e.log_index));
                Ok(Some(events))
            }
            Ok(Err(e)) | Err(e) => Err(e.into()),
        }
    }

    /// Scan the next window and dispatch its events.
    pub async fn sync_step(&self, cancel: &CancellationToken) -> RelayerResult<StepOutcome> {
        let _guard = self.step_lock.lock().await;
        let direction = self.config.direction;
        let label = direction.as_str();

        let Some(latest) = self.latest_block(cancel).await? else {
            return Ok(StepOutcome::Interrupted);
        };
        let safe_tip = safe_tip(latest, self.config.confirmation_depth);
        self.metrics
            .safe_tip
            .with_label_values(&[label])
            .set(safe_tip as i64);
        self.update_status(|s| s.safe_tip = Some(safe_tip)).await;

        let from = next_from(
            self.ledger.cursor(direction).await,
            self.config.start_block,
        );
        let Some((from, to)) = next_window(from, safe_tip, self.config.fetch.max_block_range)
        else {
            return Ok(StepOutcome::CaughtUp { safe_tip });
        };

        let Some(events) = self.fetch_window(from, to, cancel).await? else {
            return Ok(StepOutcome::Interrupted);
        };
        debug!(
            "[{}] Window [{}, {}] on {}: {} events",
            direction,
            from,
            to,
            self.source.chain_name(),
            events.len()
        );

        let tally = self.process_events(&events, cancel).await?;
        self.refresh_pending_gauge().await;
        if tally.interrupted {
            return Ok(StepOutcome::Interrupted);
        }

        self.ledger.advance_cursor(direction, to).await?;
        self.metrics
            .last_scanned_block
            .with_label_values(&[label])
            .set(to as i64);
        self.update_status(|s| {
            s.cursor = Some(to);
            s.last_error = None;
        })
        .await;
        if tally.events > 0 {
            info!(
                "[{}] Advanced cursor to {} (events={}, dispatched={}, skipped={}, failed={})",
                direction, to, tally.events, tally.dispatched, tally.skipped, tally.failed
            );
        }
        Ok(StepOutcome::Progressed {
            from,
            to,
            events: tally.events,
        })
    }

    /// Dispatch `events` one at a time, in order. Cancellation is only
    /// observed between dispatches.
    async fn process_events(
        &self,
        events: &[RawEvent],
        cancel: &CancellationToken,
    ) -> RelayerResult<WindowTally> {
        let direction = self.config.direction;
        let label = direction.as_str();
        let mut tally = WindowTally::default();

        for raw in events {
            if cancel.is_cancelled() {
                tally.interrupted = true;
                return Ok(tally);
            }
            tally.events += 1;
            self.metrics.observed_events.with_label_values(&[label]).inc();

            let event = match BridgeEvent::try_from_raw(direction, raw) {
                Ok(event) => event,
                Err(malformed) => {
                    self.metrics.malformed_events.with_label_values(&[label]).inc();
                    let Some(nonce) = malformed.nonce else {
                        error!(
                            "[{}] Undecodable event without nonce at block {} tx {}: {}",
                            direction, raw.block_number, raw.tx_hash, malformed.reason
                        );
                        return Err(RelayerError::MalformedEvent {
                            direction,
                            block: raw.block_number,
                            reason: malformed.reason,
                        });
                    };
                    if self
                        .ledger
                        .get_record(direction, nonce)
                        .await
                        .is_some_and(|r| r.is_terminal())
                    {
                        tally.skipped += 1;
                        continue;
                    }
                    error!(
                        "[{}] Malformed event nonce={} at block {} tx {}: {}",
                        direction, nonce, raw.block_number, raw.tx_hash, malformed.reason
                    );
                    let reason = FailureReason::Malformed(malformed.reason);
                    self.ledger.mark_failed(direction, nonce, reason.clone()).await?;
                    self.metrics
                        .failed_records
                        .with_label_values(&[label, reason.label()])
                        .inc();
                    tally.failed += 1;
                    continue;
                }
            };

            let proposal = match (&event, &self.pause) {
                (BridgeEvent::ProposalPassed(p), Some(pause)) => {
                    pause.on_proposal_observed(p);
                    Some((p, pause))
                }
                _ => None,
            };

            let outcome = self.dispatcher.dispatch(&event, cancel).await?;
            if let Some((p, pause)) = proposal {
                pause.on_dispatched(p, &outcome);
            }
            match outcome {
                DispatchOutcome::Skipped => tally.skipped += 1,
                DispatchOutcome::Confirmed { .. } => tally.dispatched += 1,
                DispatchOutcome::Failed(_) => {
                    tally.dispatched += 1;
                    tally.failed += 1;
                }
                DispatchOutcome::Interrupted => {
                    tally.interrupted = true;
                    return Ok(tally);
                }
            }
        }
        Ok(tally)
    }

    /// Retry leftover pending records and failed records with a retryable reason.
    pub async fn sweep_retries(&self, cancel: &CancellationToken) -> RelayerResult<usize> {
        let _guard = self.step_lock.lock().await;
        let direction = self.config.direction;
        let candidates = self.ledger.retry_candidates(direction).await;
        if candidates.is_empty() {
            return Ok(0);
        }
        info!(
            "[{}] Sweeping {} retryable records",
            direction,
            candidates.len()
        );
        let mut retried = 0;
        for record in candidates {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self.dispatcher.retry_record(&record, cancel).await?;
            if let (Some(pause), Some(BridgeEvent::ProposalPassed(p))) =
                (&self.pause, record.event.as_ref())
            {
                pause.on_dispatched(p, &outcome);
            }
            if outcome == DispatchOutcome::Interrupted {
                break;
            }
            retried += 1;
        }
        self.refresh_pending_gauge().await;
        Ok(retried)
    }

    /// Re-scan `[from, to]` (clamped to the cursor) with full dedup. Never moves the cursor.
    pub async fn reverify_range(
        &self,
        from: u64,
        to: u64,
        cancel: &CancellationToken,
    ) -> RelayerResult<ReverifyReport> {
        let _guard = self.step_lock.lock().await;
        let direction = self.config.direction;
        let cursor = self.ledger.cursor(direction).await;
        let clamped = cursor.map(|c| to.min(c)).filter(|end| from <= *end);
        let mut report = ReverifyReport {
            direction,
            from,
            to: clamped.unwrap_or(to),
            tally: WindowTally::default(),
        };
        let Some(to) = clamped else {
            info!(
                "[{}] Nothing to re-verify in [{}, {}] (cursor {:?})",
                direction, from, to, cursor
            );
            return Ok(report);
        };
        info!("[{}] Re-verifying blocks [{}, {}]", direction, from, to);

        let mut next = from;
        while let Some((start, end)) = next_window(next, to, self.config.fetch.max_block_range) {
            let Some(events) = self.fetch_window(start, end, cancel).await? else {
                report.tally.interrupted = true;
                break;
            };
            let tally = self.process_events(&events, cancel).await?;
            report.tally.events += tally.events;
            report.tally.dispatched += tally.dispatched;
            report.tally.skipped += tally.skipped;
            report.tally.failed += tally.failed;
            if tally.interrupted {
                report.tally.interrupted = true;
                break;
            }
            if end == u64::MAX {
                break;
            }
            next = end + 1;
        }
        self.refresh_pending_gauge().await;
        info!(
            "[{}] Re-verified [{}, {}]: events={}, dispatched={}, skipped={}",
            direction,
            from,
            to,
            report.tally.events,
            report.tally.dispatched,
            report.tally.skipped
        );
        Ok(report)
    }

    async fn refresh_pending_gauge(&self) {
        let pending = self
            .ledger
            .records_with_status(self.config.direction, RecordStatus::Pending)
            .await
            .len();
        self.metrics
            .pending_records
            .with_label_values(&[self.config.direction.as_str()])
            .set(pending as i64);
    }

    async fn record_step_error(&self, e: &RelayerError) {
        self.metrics
            .fetch_errors
            .with_label_values(&[self.config.direction.as_str(), e.error_type()])
            .inc();
        let message = e.to_string();
        self.update_status(|s| s.last_error = Some(message)).await;
    }

    /// Step until caught up. Recoverable errors wait one poll interval and retry.
    pub async fn bootstrap(&self, cancel: &CancellationToken) -> RelayerResult<bool> {
        let direction = self.config.direction;
        self.update_status(|s| s.phase = WatcherPhase::Bootstrapping)
            .await;
        info!(
            "[{}] Bootstrapping from cursor {:?} (start_block={}, confirmation_depth={})",
            direction,
            self.ledger.cursor(direction).await,
            self.config.start_block,
            self.config.confirmation_depth
        );
        loop {
            match self.sync_step(cancel).await {
                Ok(StepOutcome::Progressed { .. }) => continue,
                Ok(StepOutcome::CaughtUp { safe_tip }) => {
                    info!("[{}] Caught up to safe tip {}", direction, safe_tip);
                    return Ok(true);
                }
                Ok(StepOutcome::Interrupted) => return Ok(false),
                Err(e) if e.is_fatal() => {
                    self.record_step_error(&e).await;
                    return Err(e);
                }
                Err(e) => {
                    warn!("[{}] Bootstrap step failed, will retry: {}", direction, e);
                    self.record_step_error(&e).await;
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(false),
                        _ = time::sleep(self.config.fetch.poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Drain every window that became available since the last tick.
    async fn live_tick(&self, cancel: &CancellationToken) -> RelayerResult<()> {
        loop {
            match self.sync_step(cancel).await {
                Ok(StepOutcome::Progressed { .. }) => continue,
                Ok(StepOutcome::CaughtUp { .. }) | Ok(StepOutcome::Interrupted) => return Ok(()),
                Err(e) if e.is_fatal() => {
                    self.record_step_error(&e).await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "[{}] Sync step failed, retrying next tick: {}",
                        self.config.direction, e
                    );
                    self.record_step_error(&e).await;
                    return Ok(());
                }
            }
        }
    }

    /// Run until cancelled. Returns an error only for ledger failures.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> RelayerResult<()> {
        let direction = self.config.direction;
        let result = self.run_inner(&cancel).await;
        self.update_status(|s| s.phase = WatcherPhase::Stopped)
            .await;
        match &result {
            Ok(()) => info!("[{}] Watcher stopped", direction),
            Err(e) => error!("[{}] Watcher stopped on fatal error: {}", direction, e),
        }
        result
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> RelayerResult<()> {
        let direction = self.config.direction;
        if !self.bootstrap(cancel).await? {
            return Ok(());
        }
        self.update_status(|s| s.phase = WatcherPhase::LiveSyncing)
            .await;
        info!(
            "[{}] Live syncing every {:?}",
            direction, self.config.fetch.poll_interval
        );

        let mut poll = time::interval(self.config.fetch.poll_interval);
        poll.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        let mut sweep = time::interval(self.config.fetch.failed_retry_interval);
        sweep.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[{}] Watcher cancelled", direction);
                    return Ok(());
                }
                _ = poll.tick() => {
                    self.live_tick(cancel).await?;
                }
                _ = sweep.tick() => {
                    match self.sweep_retries(cancel).await {
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => warn!("[{}] Retry sweep failed: {}", direction, e),
                    }
                }
            }
        }
    }
}
