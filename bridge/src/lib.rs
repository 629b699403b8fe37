// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::new_without_default)]

pub mod chain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod node;
pub mod server;
pub mod sync_engine;
pub mod types;

#[cfg(test)]
pub mod test_utils;

#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        $crate::retry_with_max_elapsed_time!($func, $max_elapsed_time, |_| true)
    }};
    ($func:expr, $max_elapsed_time:expr, $is_transient:expr) => {{
        // The following delay sequence (in secs) will be used, applied with jitter
        // 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 51.2, 102.4, 120, 120 ...
        let backoff = backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: std::time::Duration::from_secs(120),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => {
                        return Ok(result);
                    }
                    Err(e) => {
                        if !($is_transient)(&e) {
                            tracing::debug!("Not retrying permanent error: {:?}", e);
                            return Err(backoff::Error::permanent(e));
                        }
                        tracing::debug!("Retrying due to error: {:?}", e);
                        return Err(backoff::Error::transient(e));
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    async fn example_func_ok() -> anyhow::Result<()> {
        Ok(())
    }

    async fn example_func_err() -> anyhow::Result<()> {
        tracing::info!("example_func_err");
        Err(anyhow::anyhow!(""))
    }

    #[tokio::test]
    async fn test_retry_with_max_elapsed_time() {
        crate::test_utils::init_for_testing();
        // no retry is needed, should return immediately. We give it a very small
        // max_elapsed_time and it should still finish in time.
        let max_elapsed_time = Duration::from_millis(20);
        retry_with_max_elapsed_time!(example_func_ok(), max_elapsed_time)
            .unwrap()
            .unwrap();

        // now call a function that always errors and expect it to return before max_elapsed_time runs out
        let max_elapsed_time = Duration::from_secs(10);
        let instant = std::time::Instant::now();
        retry_with_max_elapsed_time!(example_func_err(), max_elapsed_time).unwrap_err();
        assert!(instant.elapsed() < max_elapsed_time);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        crate::test_utils::init_for_testing();
        let calls = std::sync::atomic::AtomicU32::new(0);
        let max_elapsed_time = Duration::from_secs(10);
        let instant = std::time::Instant::now();
        let err = retry_with_max_elapsed_time!(
            async {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                example_func_err().await
            },
            max_elapsed_time,
            |_: &anyhow::Error| false
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(instant.elapsed() < Duration::from_secs(1));
    }
}
