//! Services module for business logic

pub mod payment_orchestrator;
pub mod references;
pub mod validation;

// Re-export orchestrator types
pub use crate::services::payment_orchestrator::{
    OrchestratorConfig, OrchestratorError, OrchestratorResult, PaymentOrchestrator, TopUpRequest,
    TopUpResult,
};
