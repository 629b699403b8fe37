// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Idempotent action dispatch keyed by (direction, nonce)

use super::config::DispatchRetryConfig;
use crate::chain::ActionSubmitter;
use crate::error::RelayerResult;
use crate::ledger::{LedgerError, ProcessedEventLedger};
use crate::metrics::RelayerMetrics;
use crate::types::{
    BridgeEvent, Direction, FailureReason, ProcessedRecord, RecordStatus, SubmitOutcome,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A terminal record already existed, nothing was submitted
    Skipped,
    /// `duplicate` when the destination had already applied the action
    Confirmed { duplicate: bool },
    Failed(FailureReason),
    /// Shutdown arrived during backoff; the record stays pending
    Interrupted,
}

pub struct Dispatcher {
    direction: Direction,
    ledger: Arc<ProcessedEventLedger>,
    submitter: Arc<dyn ActionSubmitter>,
    retry: DispatchRetryConfig,
    metrics: Arc<RelayerMetrics>,
}

impl Dispatcher {
    pub fn new(
        direction: Direction,
        ledger: Arc<ProcessedEventLedger>,
        submitter: Arc<dyn ActionSubmitter>,
        retry: DispatchRetryConfig,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        Self {
            direction,
            ledger,
            submitter,
            retry,
            metrics,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Turn `event` into its action unless the ledger already holds a
    /// terminal record for the nonce.
    pub async fn dispatch(
        &self,
        event: &BridgeEvent,
        cancel: &CancellationToken,
    ) -> RelayerResult<DispatchOutcome> {
        let nonce = event.nonce();
        if self.ledger.has_processed(self.direction, nonce).await {
            debug!(
                "[{}] nonce {} already processed, skipping",
                self.direction, nonce
            );
            self.metrics
                .skipped_processed_events
                .with_label_values(&[self.direction.as_str()])
                .inc();
            return Ok(DispatchOutcome::Skipped);
        }
        self.submit_with_retry(event, cancel).await
    }

    /// Re-dispatch a pending or retryable failed record found by the sweep.
    pub async fn retry_record(
        &self,
        record: &ProcessedRecord,
        cancel: &CancellationToken,
    ) -> RelayerResult<DispatchOutcome> {
        let Some(event) = record.event.as_ref() else {
            return Ok(DispatchOutcome::Skipped);
        };
        if record.status == RecordStatus::Confirmed {
            return Ok(DispatchOutcome::Skipped);
        }
        info!(
            "[{}] Retrying {:?} record nonce={} (attempts so far: {})",
            self.direction, record.status, record.nonce, record.attempts
        );
        self.submit_with_retry(event, cancel).await
    }

    async fn submit_with_retry(
        &self,
        event: &BridgeEvent,
        cancel: &CancellationToken,
    ) -> RelayerResult<DispatchOutcome> {
        let direction = self.direction;
        let label = direction.as_str();
        let nonce = event.nonce();
        let action = event.to_action();
        let mut last_error = String::new();

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for_attempt(attempt - 1);
                self.metrics.dispatch_retries.with_label_values(&[label]).inc();
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(
                            "[{}] Shutdown during backoff, nonce {} stays pending",
                            direction, nonce
                        );
                        return Ok(DispatchOutcome::Interrupted);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match self.ledger.mark_pending(direction, event).await {
                Ok(_) => {}
                Err(LedgerError::AlreadyConfirmed { .. }) => return Ok(DispatchOutcome::Skipped),
                Err(e) => return Err(e.into()),
            }

            let started = Instant::now();
            let result =
                tokio::time::timeout(self.retry.submit_timeout, self.submitter.submit(&action))
                    .await;
            self.metrics
                .submit_latency
                .with_label_values(&[label])
                .observe(started.elapsed().as_secs_f64());
            let outcome = match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => SubmitOutcome::RejectedOther(e.to_string()),
                Err(_) => SubmitOutcome::RejectedOther(format!(
                    "submission timed out after {:?}",
                    self.retry.submit_timeout
                )),
            };
            self.metrics
                .dispatch_outcomes
                .with_label_values(&[label, outcome.label()])
                .inc();

            match outcome {
                SubmitOutcome::Accepted | SubmitOutcome::RejectedDuplicate => {
                    let duplicate = outcome == SubmitOutcome::RejectedDuplicate;
                    self.ledger.mark_confirmed(direction, nonce).await?;
                    info!(
                        "[{}] {} confirmed on {} (duplicate={})",
                        direction,
                        action,
                        self.submitter.chain_name(),
                        duplicate
                    );
                    return Ok(DispatchOutcome::Confirmed { duplicate });
                }
                SubmitOutcome::RejectedUnauthorized => {
                    let reason = FailureReason::Unauthorized;
                    self.record_failure(nonce, &reason).await?;
                    error!(
                        "[{}] {} rejected: relayer is not authorized on {}",
                        direction,
                        action,
                        self.submitter.chain_name()
                    );
                    return Ok(DispatchOutcome::Failed(reason));
                }
                SubmitOutcome::RejectedOther(reason) => {
                    warn!(
                        "[{}] {} attempt {}/{} rejected: {}",
                        direction,
                        action,
                        attempt + 1,
                        self.retry.max_attempts,
                        reason
                    );
                    last_error = reason;
                }
            }
        }

        let reason = FailureReason::RetriesExhausted(last_error);
        self.record_failure(nonce, &reason).await?;
        error!(
            "[{}] {} failed after {} attempts: {}",
            direction, action, self.retry.max_attempts, reason
        );
        Ok(DispatchOutcome::Failed(reason))
    }

    async fn record_failure(&self, nonce: u64, reason: &FailureReason) -> RelayerResult<()> {
        self.ledger
            .mark_failed(self.direction, nonce, reason.clone())
            .await?;
        self.metrics
            .failed_records
            .with_label_values(&[self.direction.as_str(), reason.label()])
            .inc();
        Ok(())
    }
}
