/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Metrics Module
//!
//! This module provides Prometheus metrics for the Tom Worker.
//! It exposes metrics about job execution, device leases and cache traffic.

use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

/// Global Prometheus registry for all worker metrics
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Jobs processed counter
/// Labels: status (complete, failed, requeued, aborted)
pub static JOBS_PROCESSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "tom_worker_jobs_processed_total",
        "Total number of jobs processed by final status",
    );
    let counter =
        CounterVec::new(opts, &["status"]).expect("Failed to create jobs processed counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register jobs processed counter");
    counter
});

/// Job execution duration histogram
/// Labels: adapter
pub static JOB_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "tom_worker_job_duration_seconds",
        "Job execution latency distribution in seconds",
    )
    .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]);
    let histogram =
        HistogramVec::new(opts, &["adapter"]).expect("Failed to create job duration histogram");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("Failed to register job duration histogram");
    histogram
});

/// Active device leases held by this worker
/// Labels: device
pub static ACTIVE_LEASES: Lazy<GaugeVec> = Lazy::new(|| {
    let opts = Opts::new(
        "tom_worker_active_leases",
        "Device leases currently held by this worker",
    );
    let gauge = GaugeVec::new(opts, &["device"]).expect("Failed to create active leases gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("Failed to register active leases gauge");
    gauge
});

/// Commands executed on devices
/// Labels: adapter, outcome (ok, error)
pub static COMMANDS_EXECUTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "tom_worker_commands_executed_total",
        "Commands executed on devices by adapter and outcome",
    );
    let counter = CounterVec::new(opts, &["adapter", "outcome"])
        .expect("Failed to create commands executed counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register commands executed counter");
    counter
});

/// Encodes all registered metrics in Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to UTF-8")
}
