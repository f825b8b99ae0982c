//! Probe-based health service.
//!
//! Each component is represented by a [`HealthProbe`]. A check times the
//! probe, counts failures per component and maps the outcome to a
//! [`HealthStatus`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::warn;

use super::{CatalogRepository, ComponentHealth, HealthService, HealthStatus, SearchService};
use crate::error::ServiceError;

/// A single component check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Component name reported in health results.
    fn name(&self) -> &str;

    /// Runs the check. `Ok` may carry a short status message.
    async fn probe(&self) -> Result<Option<String>, ServiceError>;
}

/// Checks that the catalog answers.
pub struct CatalogProbe {
    catalog: Arc<dyn CatalogRepository>,
}

impl CatalogProbe {
    /// Probes `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl HealthProbe for CatalogProbe {
    fn name(&self) -> &str {
        "knowledge_store"
    }

    async fn probe(&self) -> Result<Option<String>, ServiceError> {
        let collections = self.catalog.list_collections().await?;
        let documents: usize = collections.iter().map(|c| c.document_count).sum();
        Ok(Some(format!(
            "{} collections, {documents} documents",
            collections.len()
        )))
    }
}

/// Checks that the search backend answers a trivial query.
pub struct SearchProbe {
    search: Arc<dyn SearchService>,
}

impl SearchProbe {
    /// Probes `search`.
    #[must_use]
    pub fn new(search: Arc<dyn SearchService>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl HealthProbe for SearchProbe {
    fn name(&self) -> &str {
        "search_index"
    }

    async fn probe(&self) -> Result<Option<String>, ServiceError> {
        self.search.search("health", None, 1).await?;
        Ok(None)
    }
}

struct ProbeSlot {
    probe: Arc<dyn HealthProbe>,
    errors: AtomicU64,
}

/// [`HealthService`] that runs registered probes.
pub struct ProbeHealthService {
    slots: Vec<ProbeSlot>,
    slow_threshold: Duration,
}

impl ProbeHealthService {
    /// Creates a service over `probes`; probes slower than `slow_threshold`
    /// report `degraded`.
    #[must_use]
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>, slow_threshold: Duration) -> Self {
        Self {
            slots: probes
                .into_iter()
                .map(|probe| ProbeSlot {
                    probe,
                    errors: AtomicU64::new(0),
                })
                .collect(),
            slow_threshold,
        }
    }

    async fn run(&self, slot: &ProbeSlot) -> ComponentHealth {
        let started = Instant::now();
        let outcome = slot.probe.probe().await;
        let elapsed = started.elapsed();
        let latency_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));

        let (status, message) = match outcome {
            Ok(message) if elapsed > self.slow_threshold => (
                HealthStatus::Degraded,
                Some(message.map_or_else(
                    || format!("slow response ({} ms)", elapsed.as_millis()),
                    |m| format!("{m}; slow response ({} ms)", elapsed.as_millis()),
                )),
            ),
            Ok(message) => (HealthStatus::Healthy, message),
            Err(e) => {
                slot.errors.fetch_add(1, Ordering::Relaxed);
                warn!(component = slot.probe.name(), error = %e, "Health probe failed");
                let status = if matches!(e, ServiceError::Unavailable { .. }) {
                    HealthStatus::Offline
                } else {
                    HealthStatus::Critical
                };
                (status, Some(e.to_string()))
            }
        };

        ComponentHealth {
            name: slot.probe.name().to_string(),
            status,
            latency_ms,
            error_count: slot.errors.load(Ordering::Relaxed),
            message,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl HealthService for ProbeHealthService {
    async fn check_all(&self) -> Result<Vec<ComponentHealth>, ServiceError> {
        Ok(join_all(self.slots.iter().map(|slot| self.run(slot))).await)
    }

    async fn check_component(&self, name: &str) -> Result<ComponentHealth, ServiceError> {
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.probe.name() == name)
            .ok_or_else(|| ServiceError::NotFound {
                kind: "component",
                id: name.to_string(),
            })?;
        Ok(self.run(slot).await)
    }
}
