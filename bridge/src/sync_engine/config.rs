// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-direction watcher configuration

use crate::types::Direction;
use std::time::Duration;

/// How a watcher fetches source-chain events
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum number of blocks to query in a single RPC call
    pub max_block_range: u64,

    /// Interval between sync steps once caught up
    pub poll_interval: Duration,

    /// Maximum retry duration for failed RPC requests
    pub max_retry_duration: Duration,

    /// Interval between sweeps over retryable failed and leftover pending records
    pub failed_retry_interval: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_block_range: 1000,
            poll_interval: Duration::from_secs(2),
            max_retry_duration: Duration::from_secs(600),
            failed_retry_interval: Duration::from_secs(300),
        }
    }
}

/// Bounded exponential backoff for `RejectedOther` submissions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchRetryConfig {
    /// Attempts per dispatch, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Cap for exponential growth
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Upper bound for a single submission
    pub submit_timeout: Duration,
}

impl DispatchRetryConfig {
    /// Delay after the given failed attempt (0-indexed):
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for DispatchRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            submit_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub direction: Direction,
    /// Blocks behind the tip considered final; 0 trusts the tip
    pub confirmation_depth: u64,
    /// First block scanned when the ledger has no cursor for this direction
    pub start_block: u64,
    pub fetch: FetchConfig,
    pub dispatch: DispatchRetryConfig,
}

impl WatcherConfig {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            confirmation_depth: 0,
            start_block: 0,
            fetch: FetchConfig::default(),
            dispatch: DispatchRetryConfig::default(),
        }
    }

    pub fn with_confirmation_depth(mut self, depth: u64) -> Self {
        self.confirmation_depth = depth;
        self
    }

    pub fn with_start_block(mut self, block: u64) -> Self {
        self.start_block = block;
        self
    }

    pub fn with_max_block_range(mut self, range: u64) -> Self {
        self.fetch.max_block_range = range;
        self
    }

    /// Short intervals so engine tests run in milliseconds
    pub fn for_testing(direction: Direction) -> Self {
        Self {
            direction,
            confirmation_depth: 0,
            start_block: 0,
            fetch: FetchConfig {
                max_block_range: 1000,
                poll_interval: Duration::from_millis(20),
                max_retry_duration: Duration::from_millis(500),
                failed_retry_interval: Duration::from_millis(100),
            },
            dispatch: DispatchRetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
                submit_timeout: Duration::from_secs(2),
            },
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.fetch.max_block_range == 0 {
            return Err(format!("[{}] max_block_range must be positive", self.direction));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(format!("[{}] max_attempts must be positive", self.direction));
        }
        if self.dispatch.multiplier < 1.0 {
            return Err(format!("[{}] backoff multiplier must be >= 1.0", self.direction));
        }
        if self.fetch.poll_interval.is_zero() {
            return Err(format!("[{}] poll_interval must be positive", self.direction));
        }
        if self.fetch.failed_retry_interval.is_zero() {
            return Err(format!(
                "[{}] failed_retry_interval must be positive",
                self.direction
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_for_attempt_is_capped() {
        let config = DispatchRetryConfig {
            max_attempts: 6,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            submit_timeout: Duration::from_secs(1),
        };
        let delays: Vec<_> = (0..5).map(|a| config.delay_for_attempt(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
    }

    #[test]
    fn test_validate() {
        assert!(WatcherConfig::new(Direction::LockToMint).validate().is_ok());
        assert!(WatcherConfig::for_testing(Direction::Governance)
            .validate()
            .is_ok());
        assert!(WatcherConfig::new(Direction::LockToMint)
            .with_max_block_range(0)
            .validate()
            .is_err());

        let mut config = WatcherConfig::new(Direction::BurnToUnlock);
        config.dispatch.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
