//! Health check module
//! Provides health status for the service and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::database::repository::GatewayTransactionStore;
use crate::workers::polling_supervisor::PollingSupervisor;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the service
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn GatewayTransactionStore>,
    supervisor: Arc<PollingSupervisor>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn GatewayTransactionStore>, supervisor: Arc<PollingSupervisor>) -> Self {
        Self { store, supervisor }
    }

    /// Store round-trip plus the state of the gateway call budget.
    ///
    /// A down store makes the service unhealthy; an exhausted gateway budget
    /// only degrades it.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let start = Instant::now();
        match timeout(Duration::from_secs(5), self.store.health_check()).await {
            Ok(Ok(())) => {
                let response_time = start.elapsed().as_millis();
                health_status.checks.insert(
                    "store".to_string(),
                    ComponentHealth::up(Some(response_time)),
                );
                info!("Store health check: OK ({}ms)", response_time);
            }
            Ok(Err(e)) => {
                health_status.status = HealthState::Unhealthy;
                health_status.checks.insert(
                    "store".to_string(),
                    ComponentHealth::down(Some(e.to_string())),
                );
                error!("Store health check failed: {}", e);
            }
            Err(_) => {
                health_status.status = HealthState::Unhealthy;
                health_status.checks.insert(
                    "store".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("Store health check timed out");
            }
        }

        let limiter = self.supervisor.limiter();
        let details = format!(
            "{} of {} gateway slots in use, {} poll loops active",
            limiter.in_use(),
            limiter.capacity(),
            self.supervisor.active_loops()
        );
        let gateway_budget = if limiter.available() == 0 {
            if health_status.status == HealthState::Healthy {
                health_status.status = HealthState::Degraded;
            }
            ComponentHealth::warning(None, Some(details))
        } else {
            ComponentHealth {
                details: Some(details),
                ..ComponentHealth::up(None)
            }
        };
        health_status
            .checks
            .insert("gateway_budget".to_string(), gateway_budget);

        health_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
        assert_eq!(warning_health.response_time_ms, Some(500));
    }
}
