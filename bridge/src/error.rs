// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain::ChainError;
use crate::ledger::LedgerError;
use crate::types::Direction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayerError {
    // Transient RPC provider error, retried with backoff
    TransientProviderError(String),
    // Non-transient RPC provider error
    ProviderError(String),
    // Requested block range extends past the chain tip
    BeyondTip { requested: u64, latest: u64 },
    // Observed event could not be decoded and carries no usable nonce
    MalformedEvent { direction: Direction, block: u64, reason: String },
    // Cursor would move backwards
    CursorRegression { direction: Direction, current: u64, requested: u64 },
    // Ledger could not persist or replay; fatal for the engine
    StorageError(String),
    // Operator request refers to a direction with no configured watcher
    DirectionNotConfigured(Direction),
    // Operator request that does not apply to the current ledger state
    InvalidRequest(String),
    // Invalid configuration
    ConfigError(String),
}

impl RelayerError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayerError::TransientProviderError(_) => "transient_provider_error",
            RelayerError::ProviderError(_) => "provider_error",
            RelayerError::BeyondTip { .. } => "beyond_tip",
            RelayerError::MalformedEvent { .. } => "malformed_event",
            RelayerError::CursorRegression { .. } => "cursor_regression",
            RelayerError::StorageError(_) => "storage_error",
            RelayerError::DirectionNotConfigured(_) => "direction_not_configured",
            RelayerError::InvalidRequest(_) => "invalid_request",
            RelayerError::ConfigError(_) => "config_error",
        }
    }

    /// Whether the watcher must stop. Everything else is retried on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayerError::StorageError(_) | RelayerError::CursorRegression { .. }
        )
    }
}

impl std::fmt::Display for RelayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayerError::TransientProviderError(e) => write!(f, "transient provider error: {}", e),
            RelayerError::ProviderError(e) => write!(f, "provider error: {}", e),
            RelayerError::BeyondTip { requested, latest } => write!(
                f,
                "requested block {} is beyond latest block {}",
                requested, latest
            ),
            RelayerError::MalformedEvent {
                direction,
                block,
                reason,
            } => write!(
                f,
                "[{}] undecodable event without nonce at block {}: {}",
                direction, block, reason
            ),
            RelayerError::CursorRegression {
                direction,
                current,
                requested,
            } => write!(
                f,
                "[{}] cursor regression from {} to {}",
                direction, current, requested
            ),
            RelayerError::StorageError(e) => write!(f, "storage error: {}", e),
            RelayerError::DirectionNotConfigured(d) => {
                write!(f, "direction {} is not configured", d)
            }
            RelayerError::InvalidRequest(e) => write!(f, "invalid request: {}", e),
            RelayerError::ConfigError(e) => write!(f, "config error: {}", e),
        }
    }
}

impl std::error::Error for RelayerError {}

impl From<LedgerError> for RelayerError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::CursorRegression {
                direction,
                current,
                requested,
            } => RelayerError::CursorRegression {
                direction,
                current,
                requested,
            },
            err @ (LedgerError::Io(_) | LedgerError::Json(_) | LedgerError::Corrupt { .. }) => {
                RelayerError::StorageError(err.to_string())
            }
            other => RelayerError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<ChainError> for RelayerError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Transient(msg) => RelayerError::TransientProviderError(msg),
            ChainError::BeyondTip { requested, latest } => {
                RelayerError::BeyondTip { requested, latest }
            }
            other => RelayerError::ProviderError(other.to_string()),
        }
    }
}

pub type RelayerResult<T> = Result<T, RelayerError>;
