// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Processed-Event Ledger
//!
//! Durable dedup and progress state for the relayer:
//! - one record per (direction, nonce), created on first observation
//! - one monotonic scan cursor per direction
//!
//! Each direction is an independent partition with its own journal file
//! (`<ledger_dir>/<direction>.jsonl`) and its own lock, so watchers of
//! different directions never contend.
//!
//! ```text
//!  mark_pending / mark_confirmed / mark_failed / advance_cursor
//!        │
//!        ▼
//!  journal append + fsync  ──►  in-memory partition update  ──►  return
//! ```

mod journal;
mod store;

pub use journal::{Journal, JournalEntry, JournalOp};
pub use store::{LedgerStats, ProcessedEventLedger};

use crate::types::{Direction, RecordStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[{direction}] cursor regression from {current} to {requested}")]
    CursorRegression {
        direction: Direction,
        current: u64,
        requested: u64,
    },

    #[error("[{direction}] record {nonce} is already confirmed")]
    AlreadyConfirmed { direction: Direction, nonce: u64 },

    #[error("[{direction}] no record for nonce {nonce}")]
    UnknownRecord { direction: Direction, nonce: u64 },

    #[error("[{direction}] record {nonce} has no stored event; re-verify its block range instead")]
    NotRetryable { direction: Direction, nonce: u64 },

    #[error("journal {path:?} is corrupt at byte {offset}")]
    Corrupt { path: std::path::PathBuf, offset: u64 },

    #[error("[{direction}] record {nonce} is {status:?}, expected failed")]
    NotFailed {
        direction: Direction,
        nonce: u64,
        status: RecordStatus,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
