//! System tools: health snapshots and usage analytics.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use super::{empty_schema, NoArguments, ToolCallResult, ToolDescriptor, ToolRegistryBuilder};
use crate::error::ServiceError;
use crate::services::{Services, SystemHealth};

#[derive(Debug, Deserialize)]
struct ComponentArgs {
    component: String,
}

fn to_result<T: serde::Serialize>(value: &T) -> Result<ToolCallResult, ServiceError> {
    serde_json::to_value(value)
        .map(|v| ToolCallResult::json(&v))
        .map_err(|e| ServiceError::Backend(e.to_string()))
}

/// Registers the system tools.
#[must_use]
pub fn register(builder: ToolRegistryBuilder, services: &Services) -> ToolRegistryBuilder {
    let health = Arc::clone(&services.health);
    let component_health = Arc::clone(&services.health);
    let analytics = Arc::clone(&services.analytics);

    builder
        .tool(
            ToolDescriptor::new(
                "get_system_health",
                "Status, latency and error count of every component, plus the overall status",
                empty_schema(),
            ),
            move |_: NoArguments| {
                let health = Arc::clone(&health);
                async move {
                    let components = health.check_all().await?;
                    to_result(&SystemHealth::from_components(components))
                }
            },
        )
        .tool(
            ToolDescriptor::new(
                "check_component_health",
                "Probe a single component by name",
                json!({
                    "type": "object",
                    "properties": {
                        "component": {
                            "type": "string",
                            "description": "Component name, e.g. knowledge_store or search_index",
                            "minLength": 1
                        }
                    },
                    "required": ["component"]
                }),
            ),
            move |args: ComponentArgs| {
                let health = Arc::clone(&component_health);
                async move { to_result(&health.check_component(&args.component).await?) }
            },
        )
        .tool(
            ToolDescriptor::new(
                "get_usage_analytics",
                "Call counts, error counts and average latency per tool",
                empty_schema(),
            ),
            move |_: NoArguments| {
                let analytics = Arc::clone(&analytics);
                async move { to_result(&analytics.summary().await?) }
            },
        )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::mcp::tools::ToolRegistry;
    use crate::services::{ComponentHealth, HealthService, InMemoryKnowledgeStore, ToolUsage};

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct DownHealth;

    #[async_trait]
    impl HealthService for DownHealth {
        async fn check_all(&self) -> Result<Vec<ComponentHealth>, ServiceError> {
            Err(ServiceError::unavailable("health", "connection refused"))
        }

        async fn check_component(&self, _name: &str) -> Result<ComponentHealth, ServiceError> {
            Err(ServiceError::unavailable("health", "connection refused"))
        }
    }

    fn services() -> Services {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        store.create_collection("ops", "Operations", None).unwrap();
        Services::in_memory(store, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn system_health_reports_components() {
        let registry = ToolRegistry::with_services(&services()).unwrap();
        let result = registry
            .call("get_system_health", json!({}), TIMEOUT)
            .await
            .unwrap();
        assert!(!result.is_error);
        let value: Value = serde_json::from_str(result.first_text().unwrap()).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["components"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_health_service_is_business_error() {
        let mut services = services();
        services.health = Arc::new(DownHealth);
        let registry = ToolRegistry::with_services(&services).unwrap();
        let result = registry
            .call("get_system_health", json!({}), TIMEOUT)
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.first_text().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn unknown_component_is_business_error() {
        let registry = ToolRegistry::with_services(&services()).unwrap();
        let result = registry
            .call("check_component_health", json!({ "component": "gpu" }), TIMEOUT)
            .await
            .unwrap();
        assert!(result.is_error);

        let result = registry
            .call(
                "check_component_health",
                json!({ "component": "knowledge_store" }),
                TIMEOUT,
            )
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn usage_analytics_reads_recorded_calls() {
        let services = services();
        services
            .analytics
            .record(ToolUsage {
                tool: "search_knowledge".to_string(),
                duration: Duration::from_millis(10),
                is_error: false,
            })
            .await
            .unwrap();
        let registry = ToolRegistry::with_services(&services).unwrap();
        let result = registry
            .call("get_usage_analytics", json!({}), TIMEOUT)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(result.first_text().unwrap()).unwrap();
        assert_eq!(value["total_calls"], 1);
        assert_eq!(value["tools"][0]["name"], "search_knowledge");
    }
}
