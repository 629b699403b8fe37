// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pause propagation
//!
//! The governance direction is watched like any other: each `ProposalPassed`
//! is deduplicated by proposal id in the ledger and turned into a single pause
//! on the other chain. The coordinator only observes what the governance
//! watcher did and publishes the latest pause for status readers.

use super::dispatch::DispatchOutcome;
use crate::metrics::RelayerMetrics;
use crate::types::{now_ms, ProposalPassedEvent};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PauseSignal {
    pub proposal_id: u64,
    /// Proposal payload, hex encoded; never interpreted
    pub payload: String,
    pub source_chain: String,
    pub target_chain: String,
    pub triggered_at_ms: u64,
    /// The target was already paused when the relayer got there
    pub already_paused: bool,
}

pub struct PauseCoordinator {
    source_chain: String,
    target_chain: String,
    tx: watch::Sender<Option<PauseSignal>>,
    metrics: Arc<RelayerMetrics>,
}

impl PauseCoordinator {
    pub fn new(source_chain: &str, target_chain: &str, metrics: Arc<RelayerMetrics>) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            source_chain: source_chain.to_string(),
            target_chain: target_chain.to_string(),
            tx,
            metrics,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PauseSignal>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<PauseSignal> {
        self.tx.borrow().clone()
    }

    pub fn on_proposal_observed(&self, proposal: &ProposalPassedEvent) {
        info!(
            "[governance] ProposalPassed id={} on {} at block {}, payload=0x{}",
            proposal.proposal_id,
            self.source_chain,
            proposal.source_block,
            hex::encode(&proposal.payload)
        );
    }

    pub fn on_dispatched(&self, proposal: &ProposalPassedEvent, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Confirmed { duplicate } => {
                let signal = PauseSignal {
                    proposal_id: proposal.proposal_id,
                    payload: format!("0x{}", hex::encode(&proposal.payload)),
                    source_chain: self.source_chain.clone(),
                    target_chain: self.target_chain.clone(),
                    triggered_at_ms: now_ms(),
                    already_paused: *duplicate,
                };
                warn!(
                    "[governance] Bridge on {} paused by proposal {} (already_paused={})",
                    self.target_chain, signal.proposal_id, signal.already_paused
                );
                self.metrics.bridge_paused.set(1);
                self.tx.send_replace(Some(signal));
            }
            DispatchOutcome::Failed(reason) => warn!(
                "[governance] Pause for proposal {} not applied on {}: {}",
                proposal.proposal_id, self.target_chain, reason
            ),
            DispatchOutcome::Skipped | DispatchOutcome::Interrupted => {}
        }
    }
}
