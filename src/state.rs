//! Application state shared across the HTTP gateway and background jobs.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RateLimitingConfig;
use crate::domain::DomainStore;
use crate::engine::{CaptchaClient, RuntimeConfig};

/// Health status of a service, self-reported for the `/status` endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Active,
    Error,
}

#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub status: ServiceStatus,
    pub updated_at: Instant,
}

/// Thread-safe registry for components to self-report their health status.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, StatusEntry>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(
            name.to_owned(),
            StatusEntry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    pub fn all(&self) -> Vec<(String, ServiceStatus)> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status.clone()))
            .collect()
    }
}

/// Tracks in-flight extraction jobs so the Gateway can cancel one by id
/// (§5: "each Coordinator honors a cancellation signal at iteration
/// boundaries"). Entries are removed once the Coordinator task exits.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    inner: Arc<DashMap<i32, CancellationToken>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: i32) -> CancellationToken {
        let token = CancellationToken::new();
        self.inner.insert(job_id, token.clone());
        token
    }

    pub fn cancel(&self, job_id: i32) -> bool {
        if let Some(token) = self.inner.get(&job_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn remove(&self, job_id: i32) {
        self.inner.remove(&job_id);
    }

    /// Cancel every tracked job, e.g. on process shutdown.
    pub fn cancel_all(&self) {
        for entry in self.inner.iter() {
            entry.value().cancel();
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub store: DomainStore,
    pub captcha: Arc<CaptchaClient>,
    pub runtime_config: RuntimeConfig,
    pub rate_limiting: RateLimitingConfig,
    pub service_statuses: ServiceStatusRegistry,
    pub jobs: JobRegistry,
    job_tasks: Arc<Mutex<JoinSet<()>>>,
}

impl AppState {
    pub fn new(
        db_pool: PgPool,
        captcha: CaptchaClient,
        runtime_config: RuntimeConfig,
        rate_limiting: RateLimitingConfig,
    ) -> Self {
        Self {
            store: DomainStore::new(db_pool.clone()),
            db_pool,
            captcha: Arc::new(captcha),
            runtime_config,
            rate_limiting,
            service_statuses: ServiceStatusRegistry::new(),
            jobs: JobRegistry::new(),
            job_tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Spawn a background job task, tracked so shutdown can wait for it.
    pub async fn spawn_job(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.job_tasks.lock().await.spawn(fut);
    }

    /// Wait for all tracked job tasks to finish, up to `timeout`.
    pub async fn drain_jobs(&self, timeout: Duration) {
        let mut tasks = self.job_tasks.lock().await;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                next = tasks.join_next() => {
                    match next {
                        Some(Err(e)) => warn!(error = %e, "job task panicked during drain"),
                        Some(Ok(())) => {}
                        None => break,
                    }
                }
                _ = &mut deadline => {
                    warn!(remaining = tasks.len(), "drain timeout elapsed with jobs still running");
                    break;
                }
            }
        }
    }
}
