//! Application-wide error handling
//!
//! Every layer (gateway client, persistence, orchestrator, configuration)
//! converts into [`AppError`], which carries the HTTP status mapping, a stable
//! machine-readable code and the message shown to the user.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Authentication (401)
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,

    // Validation (400)
    #[serde(rename = "INVALID_PHONE_NUMBER")]
    InvalidPhoneNumber,
    #[serde(rename = "INVALID_NATIONAL_ID")]
    InvalidNationalId,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "UNRECORDED_GATEWAY_OUTCOME")]
    UnrecordedGatewayOutcome,

    // External errors (502, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "GATEWAY_INTEGRITY_ERROR")]
    GatewayIntegrityError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Caller identity could not be established
#[derive(Debug, Clone)]
pub enum AuthenticationError {
    /// No identity was attached to the request
    MissingIdentity,
    /// An identity was attached but could not be parsed
    InvalidIdentity { reason: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
    /// The gateway accepted a payment but its outcome could not be stored
    UnrecordedGatewayOutcome { txn_ref_no: String, message: String },
    Internal { message: String },
}

/// External service errors (payment gateway)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// A gateway response failed signature verification
    IntegrityViolation { provider: String, message: String },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidPhoneNumber { reason: String },
    InvalidNationalId { reason: String },
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Authentication(AuthenticationError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Authentication(_) => 401,
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::IntegrityViolation { .. } => 502,
                ExternalError::Timeout { .. } => 504, // Gateway Timeout
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Authentication(_) => ErrorCode::Unauthorized,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::UnrecordedGatewayOutcome { .. } => {
                    ErrorCode::UnrecordedGatewayOutcome
                }
                InfrastructureError::Internal { .. } => ErrorCode::InternalError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::IntegrityViolation { .. } => ErrorCode::GatewayIntegrityError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidPhoneNumber { .. } => ErrorCode::InvalidPhoneNumber,
                ValidationError::InvalidNationalId { .. } => ErrorCode::InvalidNationalId,
                ValidationError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                ValidationError::MissingField { .. } | ValidationError::InvalidField { .. } => {
                    ErrorCode::ValidationError
                }
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Authentication(_) => "Authentication required".to_string(),
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::UnrecordedGatewayOutcome { txn_ref_no, .. } => format!(
                    "Your payment {} is being processed. Please check its status before retrying",
                    txn_ref_no
                ),
                _ => "Service temporarily unavailable. Please try again later".to_string(),
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::IntegrityViolation { .. } => {
                    "Payment provider response could not be verified. Please contact support"
                        .to_string()
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidPhoneNumber { reason } => {
                    format!("Invalid phone number: {}", reason)
                }
                ValidationError::InvalidNationalId { reason } => {
                    format!("Invalid CNIC: {}", reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Authentication(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
                // retrying would start a second gateway transaction
                InfrastructureError::UnrecordedGatewayOutcome { .. } => false,
                InfrastructureError::Internal { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::IntegrityViolation { .. } => false,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError>, From<PaymentError> and From<OrchestratorError> live next
// to their error types.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount must be positive".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidAmount);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_phone_number_error() {
        let error = AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidPhoneNumber {
                reason: "phone number contains no digits".to_string(),
            },
        ));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidPhoneNumber);
        assert!(error.user_message().contains("no digits"));
    }

    #[test]
    fn test_provider_error_retryability() {
        let retryable = AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
            provider: "jazzcash".to_string(),
            message: "connection reset".to_string(),
            is_retryable: true,
        }));
        assert_eq!(retryable.status_code(), 502);
        assert!(retryable.is_retryable());
        assert!(retryable.user_message().contains("jazzcash"));

        let integrity = AppError::new(AppErrorKind::External(ExternalError::IntegrityViolation {
            provider: "jazzcash".to_string(),
            message: "hash mismatch".to_string(),
        }));
        assert_eq!(integrity.error_code(), ErrorCode::GatewayIntegrityError);
        assert!(!integrity.is_retryable());
    }

    #[test]
    fn test_unrecorded_outcome_is_not_retryable() {
        let error = AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::UnrecordedGatewayOutcome {
                txn_ref_no: "GIKITU20250101ABC".to_string(),
                message: "connection closed".to_string(),
            },
        ));

        assert_eq!(error.status_code(), 500);
        assert!(!error.is_retryable());
        assert!(error.user_message().contains("GIKITU20250101ABC"));
    }

    #[test]
    fn test_authentication_error() {
        let error = AppError::new(AppErrorKind::Authentication(
            AuthenticationError::MissingIdentity,
        ))
        .with_request_id("req_1");

        assert_eq!(error.status_code(), 401);
        assert_eq!(error.error_code(), ErrorCode::Unauthorized);
        assert_eq!(error.request_id.as_deref(), Some("req_1"));
    }
}
