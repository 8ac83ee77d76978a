use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Gateway request timed out after {timeout_secs}s")]
    TimeoutError { timeout_secs: u64 },

    /// Response signature missing or not matching the recomputed one.
    #[error("Integrity check failed: {message}")]
    IntegrityError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        PaymentError::ValidationError {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::TimeoutError { .. } => true,
            PaymentError::IntegrityError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::TimeoutError { .. } => 504,
            PaymentError::IntegrityError { .. } => 502,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::NetworkError { .. } | PaymentError::TimeoutError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::IntegrityError { .. } => {
                "Payment provider response could not be verified".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                let validation = match field.as_deref() {
                    Some("phone_number") => ValidationError::InvalidPhoneNumber { reason: message },
                    Some("cnic_last6") => ValidationError::InvalidNationalId { reason: message },
                    Some("amount") => ValidationError::InvalidAmount {
                        amount: String::new(),
                        reason: message,
                    },
                    Some(field) => ValidationError::InvalidField {
                        field: field.to_string(),
                        reason: message,
                    },
                    None => ValidationError::InvalidField {
                        field: "request".to_string(),
                        reason: message,
                    },
                };
                AppErrorKind::Validation(validation)
            }
            PaymentError::TimeoutError { timeout_secs } => {
                AppErrorKind::External(ExternalError::Timeout {
                    service: "Payment gateway".to_string(),
                    timeout_secs,
                })
            }
            PaymentError::IntegrityError { message } => {
                AppErrorKind::External(ExternalError::IntegrityViolation {
                    provider: "jazzcash".to_string(),
                    message,
                })
            }
            PaymentError::NetworkError { message } => {
                AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: "jazzcash".to_string(),
                    message,
                    is_retryable: true,
                })
            }
            PaymentError::ProviderError {
                provider,
                message,
                retryable,
                ..
            } => AppErrorKind::External(ExternalError::PaymentProvider {
                provider,
                message,
                is_retryable: retryable,
            }),
        };

        AppError::new(kind)
    }
}
