use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PaymentMethod {
    #[serde(rename = "MWALLET")]
    Wallet,
    #[serde(rename = "CARD")]
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "MWALLET",
            PaymentMethod::Card => "CARD",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "MWALLET" => Ok(PaymentMethod::Wallet),
            "CARD" => Ok(PaymentMethod::Card),
            _ => Err(PaymentError::validation(
                "method",
                format!("unsupported payment method: {}", value),
            )),
        }
    }
}

/// Lifecycle of a gateway transaction.
///
/// `Pending` is the initial state; `Success` and `Failed` are terminal and
/// never left once stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Unknown,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }

    /// Whether a stored status may be replaced by `next`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        !self.is_terminal() && next != PaymentStatus::Pending
    }

    /// Status shown to clients: an unclassified outcome is still pending.
    pub fn client_visible(&self) -> PaymentStatus {
        match self {
            PaymentStatus::Unknown => PaymentStatus::Pending,
            other => *other,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            "UNKNOWN" => Ok(PaymentStatus::Unknown),
            _ => Err(PaymentError::validation(
                "status",
                format!("unknown payment status: {}", value),
            )),
        }
    }
}

/// Wallet debit request. Amount is in paisa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletInitiateRequest {
    pub amount: i64,
    pub bill_reference: String,
    pub txn_ref_no: String,
    pub description: String,
    pub mobile_number: String,
    pub cnic_last6: String,
    pub txn_date_time: String,
    pub txn_expiry_date_time: String,
}

/// Hosted card page request. Amount is in paisa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInitiateRequest {
    pub amount: i64,
    pub bill_reference: String,
    pub txn_ref_no: String,
    pub description: String,
    pub txn_date_time: String,
    pub txn_expiry_date_time: String,
}

/// Outcome of a verified gateway exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResult {
    pub status: PaymentStatus,
    pub response_code: String,
    pub payment_response_code: Option<String>,
    pub retrieval_reference_no: Option<String>,
    pub message: String,
    /// Verified response body, kept for audit and debugging.
    pub raw: Map<String, JsonValue>,
}

/// Signed field set the browser posts to the hosted card page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardRedirect {
    pub post_url: String,
    pub fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
}

/// Verified card return-URL post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardCallback {
    pub txn_ref_no: String,
    pub status: PaymentStatus,
    pub response_code: String,
    pub response_message: String,
    pub retrieval_reference_no: Option<String>,
    pub fields: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_wire_names() {
        assert_eq!("mwallet".parse::<PaymentMethod>().unwrap(), PaymentMethod::Wallet);
        assert_eq!("CARD".parse::<PaymentMethod>().unwrap(), PaymentMethod::Card);
        assert!("BANK".parse::<PaymentMethod>().is_err());

        let json = serde_json::to_string(&PaymentMethod::Wallet).unwrap();
        assert_eq!(json, "\"MWALLET\"");
    }

    #[test]
    fn terminal_states_are_sinks() {
        for terminal in [PaymentStatus::Success, PaymentStatus::Failed] {
            for next in [
                PaymentStatus::Pending,
                PaymentStatus::Success,
                PaymentStatus::Failed,
                PaymentStatus::Unknown,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn non_terminal_states_move_forward() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Success));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Unknown));
        assert!(PaymentStatus::Unknown.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Unknown.can_transition_to(PaymentStatus::Pending));
    }

    #[test]
    fn unknown_is_shown_as_pending() {
        assert_eq!(PaymentStatus::Unknown.client_visible(), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::Failed.client_visible(), PaymentStatus::Failed);
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&PaymentStatus::Success).unwrap();
        assert_eq!(json, "\"SUCCESS\"");
        assert_eq!("failed".parse::<PaymentStatus>().unwrap(), PaymentStatus::Failed);
    }
}
