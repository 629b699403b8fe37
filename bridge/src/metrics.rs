// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, HistogramVec,
    IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

const SUBMIT_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 7.5, 10., 15., 20., 30., 45., 60., 90., 120.,
    180., 300.,
];

#[derive(Clone, Debug)]
pub struct RelayerMetrics {
    pub(crate) observed_events: IntCounterVec,
    pub(crate) skipped_processed_events: IntCounterVec,
    pub(crate) malformed_events: IntCounterVec,
    pub(crate) dispatch_outcomes: IntCounterVec,
    pub(crate) dispatch_retries: IntCounterVec,
    pub(crate) failed_records: IntCounterVec,
    pub(crate) fetch_errors: IntCounterVec,
    pub(crate) submit_latency: HistogramVec,

    pub(crate) last_scanned_block: IntGaugeVec,
    pub(crate) safe_tip: IntGaugeVec,
    pub(crate) pending_records: IntGaugeVec,
    pub(crate) bridge_paused: IntGauge,
    pub(crate) uptime_seconds: IntGauge,
}

impl RelayerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            observed_events: register_int_counter_vec_with_registry!(
                "relayer_observed_events",
                "Total number of source-chain events observed, by direction",
                &["direction"],
                registry,
            )
            .unwrap(),
            skipped_processed_events: register_int_counter_vec_with_registry!(
                "relayer_skipped_processed_events",
                "Total number of observed events skipped because the ledger already holds a terminal record, by direction",
                &["direction"],
                registry,
            )
            .unwrap(),
            malformed_events: register_int_counter_vec_with_registry!(
                "relayer_malformed_events",
                "Total number of events that could not be decoded, by direction",
                &["direction"],
                registry,
            )
            .unwrap(),
            dispatch_outcomes: register_int_counter_vec_with_registry!(
                "relayer_dispatch_outcomes",
                "Total number of submission outcomes, by direction and outcome",
                &["direction", "outcome"],
                registry,
            )
            .unwrap(),
            dispatch_retries: register_int_counter_vec_with_registry!(
                "relayer_dispatch_retries",
                "Total number of submission retries, by direction",
                &["direction"],
                registry,
            )
            .unwrap(),
            failed_records: register_int_counter_vec_with_registry!(
                "relayer_failed_records",
                "Total number of records marked failed, by direction and reason",
                &["direction", "reason"],
                registry,
            )
            .unwrap(),
            fetch_errors: register_int_counter_vec_with_registry!(
                "relayer_fetch_errors",
                "Total number of failed sync steps, by direction and error type",
                &["direction", "type"],
                registry,
            )
            .unwrap(),
            submit_latency: register_histogram_vec_with_registry!(
                "relayer_submit_latency",
                "Latency of a single submission, by direction",
                &["direction"],
                SUBMIT_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            last_scanned_block: register_int_gauge_vec_with_registry!(
                "relayer_last_scanned_block",
                "Ledger cursor, by direction",
                &["direction"],
                registry,
            )
            .unwrap(),
            safe_tip: register_int_gauge_vec_with_registry!(
                "relayer_safe_tip",
                "Latest block minus confirmation depth on the source chain, by direction",
                &["direction"],
                registry,
            )
            .unwrap(),
            pending_records: register_int_gauge_vec_with_registry!(
                "relayer_pending_records",
                "Number of records currently pending, by direction",
                &["direction"],
                registry,
            )
            .unwrap(),
            bridge_paused: register_int_gauge_with_registry!(
                "relayer_bridge_paused",
                "Set to 1 once a pause was propagated by this relayer",
                registry,
            )
            .unwrap(),
            uptime_seconds: register_int_gauge_with_registry!(
                "relayer_uptime_seconds",
                "Relayer uptime in seconds",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_gathered() {
        let registry = Registry::new();
        let metrics = RelayerMetrics::new(&registry);
        metrics
            .dispatch_outcomes
            .with_label_values(&["lock_to_mint", "accepted"])
            .inc();
        metrics
            .last_scanned_block
            .with_label_values(&["lock_to_mint"])
            .set(42);

        let families = registry.gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"relayer_dispatch_outcomes".to_string()));
        assert!(names.contains(&"relayer_last_scanned_block".to_string()));
    }
}
