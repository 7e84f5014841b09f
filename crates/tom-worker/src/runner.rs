/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Worker main loop.
//!
//! Pulls jobs off the shared queue and executes each on its own task, up to
//! the configured concurrency. The worker itself is stateless beyond its
//! identity string: it can be started and stopped at any time, and a
//! graceful shutdown stops fetching, then gives in-flight jobs the
//! configured grace period before abandoning them (the supervisor sweep
//! requeues whatever was abandoned).

use crate::credentials::build_credential_store;
use crate::executor::Executor;
use crate::metrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tom_store::ops::WorkerHeartbeat;
use tom_store::Store;
use tom_utils::Settings;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct Runner {
    store: Store,
    settings: Settings,
    worker_id: String,
    executor: Arc<Executor>,
    active_jobs: Arc<AtomicUsize>,
}

impl Runner {
    pub async fn new(settings: Settings) -> Result<Self, Box<dyn std::error::Error>> {
        let store = Store::connect(&settings).await?;
        let credentials = build_credential_store(&settings)?;
        let worker_id = format!(
            "{}-{}",
            hostname(),
            Uuid::new_v4().to_string().split('-').next().unwrap_or("0")
        );
        info!(worker_id = %worker_id, "worker initialized");

        let executor = Arc::new(Executor {
            store: store.clone(),
            credentials,
            settings: settings.clone(),
            worker_id: worker_id.clone(),
        });

        Ok(Self {
            store,
            settings,
            worker_id,
            executor,
            active_jobs: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Runs until a shutdown signal arrives.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_worker_heartbeat();
        if let Some(port) = self.settings.worker.health_port {
            self.spawn_health_server(port);
        }

        let mut jobs: JoinSet<()> = JoinSet::new();
        let fetch_timeout = Duration::from_secs(self.settings.worker.fetch_timeout_s);
        let max_concurrent = self.settings.worker.max_concurrent_jobs.max(1);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!("entering main loop");
        loop {
            // Reap finished jobs without blocking.
            while let Some(result) = jobs.try_join_next() {
                if let Err(e) = result {
                    error!("job task panicked: {}", e);
                }
                self.active_jobs.fetch_sub(1, Ordering::Relaxed);
            }

            if jobs.len() >= max_concurrent {
                tokio::select! {
                    _ = &mut shutdown => break,
                    joined = jobs.join_next() => {
                        if joined.is_some() {
                            self.active_jobs.fetch_sub(1, Ordering::Relaxed);
                        }
                    }
                }
                continue;
            }

            let jobs_ops = self.store.jobs();
            tokio::select! {
                _ = &mut shutdown => break,
                fetched = jobs_ops.fetch(&self.worker_id, fetch_timeout) => {
                    match fetched {
                        Ok(Some(job)) => {
                            info!(job_id = %job.job_id, attempts = job.attempts, "job fetched");
                            self.active_jobs.fetch_add(1, Ordering::Relaxed);
                            let executor = Arc::clone(&self.executor);
                            jobs.spawn(async move {
                                executor.execute(job).await;
                            });
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!("queue fetch failed: {}", e);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        info!("shutdown signal received, draining in-flight jobs");
        let grace = Duration::from_secs(self.settings.worker.shutdown_grace_s);
        let drained = tokio::time::timeout(grace, async {
            while jobs.join_next().await.is_some() {
                self.active_jobs.fetch_sub(1, Ordering::Relaxed);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "shutdown grace of {}s expired with {} jobs in flight; abandoning them",
                self.settings.worker.shutdown_grace_s,
                jobs.len()
            );
            jobs.abort_all();
        }
        info!("worker stopped");
        Ok(())
    }

    fn spawn_worker_heartbeat(&self) {
        let store = self.store.clone();
        let worker_id = self.worker_id.clone();
        let active_jobs = Arc::clone(&self.active_jobs);
        let interval_s = self.settings.worker.heartbeat_interval_s.max(1);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_s));
            loop {
                ticker.tick().await;
                let heartbeat = WorkerHeartbeat {
                    worker_id: worker_id.clone(),
                    hostname: hostname(),
                    pid: std::process::id(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    timestamp: chrono::Utc::now().timestamp(),
                    active_jobs: active_jobs.load(Ordering::Relaxed),
                };
                if let Err(e) = store.ops().record_worker_heartbeat(&heartbeat).await {
                    warn!("worker heartbeat failed: {}", e);
                }
            }
        });
    }

    /// Minimal health/metrics listener, enabled by `worker.health_port`.
    fn spawn_health_server(&self, port: u16) {
        use axum::routing::get;
        let app: axum::Router = axum::Router::new()
            .route("/healthz", get(|| async { "ok" }))
            .route(
                "/metrics",
                get(|| async { metrics::encode_metrics() }),
            );
        tokio::spawn(async move {
            let addr = format!("0.0.0.0:{}", port);
            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!("health server listening on {}", addr);
                    if let Err(e) = axum::serve(listener, app).await {
                        error!("health server failed: {}", e);
                    }
                }
                Err(e) => error!("cannot bind health server on {}: {}", addr, e),
            }
        });
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}
