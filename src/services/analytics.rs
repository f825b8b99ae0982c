//! In-memory tool usage analytics.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{AnalyticsService, ToolStats, ToolUsage, UsageSummary};
use crate::error::ServiceError;

#[derive(Debug, Default)]
struct Counters {
    calls: u64,
    errors: u64,
    total_latency: Duration,
    last_called_at: Option<DateTime<Utc>>,
}

/// Per-tool counters kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryAnalytics {
    tools: DashMap<String, Counters>,
}

impl InMemoryAnalytics {
    /// Creates empty analytics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalyticsService for InMemoryAnalytics {
    async fn record(&self, usage: ToolUsage) -> Result<(), ServiceError> {
        let mut counters = self.tools.entry(usage.tool).or_default();
        counters.calls += 1;
        if usage.is_error {
            counters.errors += 1;
        }
        counters.total_latency += usage.duration;
        counters.last_called_at = Some(Utc::now());
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)] // call counts stay far below 2^52
    async fn summary(&self) -> Result<UsageSummary, ServiceError> {
        let mut tools: Vec<ToolStats> = self
            .tools
            .iter()
            .map(|entry| {
                let c = entry.value();
                ToolStats {
                    name: entry.key().clone(),
                    calls: c.calls,
                    errors: c.errors,
                    avg_latency_ms: if c.calls == 0 {
                        0.0
                    } else {
                        c.total_latency.as_secs_f64() * 1000.0 / c.calls as f64
                    },
                    last_called_at: c.last_called_at,
                }
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(UsageSummary {
            total_calls: tools.iter().map(|t| t.calls).sum(),
            total_errors: tools.iter().map(|t| t.errors).sum(),
            tools,
        })
    }
}
