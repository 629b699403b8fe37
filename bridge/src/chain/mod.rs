// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain adapters
//!
//! The sync engine only talks to chains through these two traits. Adapters are
//! stateless with respect to relay progress; all dedup state lives in the ledger.

pub mod eth;

use crate::types::{BridgeAction, EventKind, RawEvent, SubmitOutcome};

/// Read side of a chain: tip height and event logs
#[async_trait::async_trait]
pub trait ChainEventSource: Send + Sync {
    /// Name used in log prefixes and metric labels
    fn chain_name(&self) -> &str;

    async fn latest_block(&self) -> ChainResult<u64>;

    /// Events of `kind` in `[from, to]`, ordered by (block, log index).
    /// `to` beyond the latest block is rejected with `ChainError::BeyondTip`.
    async fn fetch_events(&self, kind: EventKind, from: u64, to: u64)
        -> ChainResult<Vec<RawEvent>>;
}

/// Write side of a chain: submits counter-actions and classifies the result
#[async_trait::async_trait]
pub trait ActionSubmitter: Send + Sync {
    fn chain_name(&self) -> &str;

    /// `Err` is reserved for failures where the chain gave no verdict
    /// (connectivity, signing); those are retried like `RejectedOther`.
    async fn submit(&self, action: &BridgeAction) -> ChainResult<SubmitOutcome>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("transient RPC error: {0}")]
    Transient(String),

    #[error("requested block {requested} is beyond latest block {latest}")]
    BeyondTip { requested: u64, latest: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl ChainError {
    /// Whether this error is recoverable (should retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
