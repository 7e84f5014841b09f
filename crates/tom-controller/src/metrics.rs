/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Metrics Module
//!
//! This module provides Prometheus metrics for the Tom Controller.
//! It exposes metrics about HTTP requests, job submission, and cache traffic.

use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Global Prometheus registry for all controller metrics
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// HTTP request counter
/// Labels: endpoint, method, status
pub static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "tom_http_requests_total",
        "Total number of HTTP requests by endpoint and status",
    );
    let counter = CounterVec::new(opts, &["endpoint", "method", "status"])
        .expect("Failed to create HTTP requests counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register HTTP requests counter");
    counter
});

/// HTTP request duration histogram
/// Labels: endpoint, method
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "tom_http_request_duration_seconds",
        "HTTP request latency distribution in seconds",
    )
    .buckets(vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]);
    let histogram = HistogramVec::new(opts, &["endpoint", "method"])
        .expect("Failed to create HTTP request duration histogram");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("Failed to register HTTP request duration histogram");
    histogram
});

/// Jobs enqueued counter
/// Labels: kind, adapter
pub static JOBS_ENQUEUED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "tom_jobs_enqueued_total",
        "Total number of jobs enqueued by kind and adapter",
    );
    let counter =
        CounterVec::new(opts, &["kind", "adapter"]).expect("Failed to create jobs enqueued counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register jobs enqueued counter");
    counter
});

/// Cache lookup counter
/// Labels: outcome (hit, miss, refresh, bypass)
pub static CACHE_LOOKUPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "tom_cache_lookups_total",
        "Total number of cache lookups by outcome",
    );
    let counter =
        CounterVec::new(opts, &["outcome"]).expect("Failed to create cache lookups counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("Failed to register cache lookups counter");
    counter
});

/// Number of jobs reclaimed by the supervisor sweep since startup
pub static JOBS_SWEPT_TOTAL: Lazy<IntGauge> = Lazy::new(|| {
    let opts = Opts::new(
        "tom_jobs_swept_total",
        "Jobs reclaimed from dead workers by the supervisor sweep",
    );
    let gauge = IntGauge::with_opts(opts).expect("Failed to create jobs swept gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("Failed to register jobs swept gauge");
    gauge
});

/// Encodes all registered metrics in Prometheus text format
///
/// # Returns
///
/// Returns a String containing all metrics in Prometheus exposition format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to UTF-8")
}
