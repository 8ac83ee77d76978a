//! Payment Orchestrator Service
//!
//! Turns a top-up request into exactly one gateway transaction. Every
//! initiation runs inside a unit of work that holds the idempotency-key lock,
//! so duplicate submissions see the transaction created by the first one and
//! are answered by reconciling it instead of calling the gateway again.

use crate::database::error::DatabaseError;
use crate::database::repository::{
    GatewayTransaction, GatewayTransactionStore, NewGatewayTransaction, UnitOfWork,
};
use crate::error::{AppError, AppErrorKind, InfrastructureError};
use crate::logging::mask_phone_number;
use crate::payments::codes;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    CardInitiateRequest, CardRedirect, PaymentMethod, PaymentStatus, WalletInitiateRequest,
};
use crate::services::references::{
    bill_reference, gateway_timestamps, offset_from_minutes, txn_reference,
};
use crate::services::validation::{normalize_cnic_last6, normalize_phone_number, validate_amount};
use crate::workers::polling_supervisor::PollingSupervisor;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MSG_ALREADY_COMPLETED: &str = "Transaction has already completed";
pub const MSG_ALREADY_FAILED: &str = "Transaction has failed";
pub const MSG_TIMED_OUT: &str = "Transaction has timed out. Please try again.";
pub const MSG_CARD_REDIRECT: &str = "Complete the payment on the card page";

// ============================================================================
// Configuration Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Description sent with every gateway request
    pub description: String,
    /// Age after which an open transaction is failed on reconciliation
    pub reconcile_deadline: Duration,
    /// Gateway local time, in minutes east of UTC
    pub gateway_utc_offset_minutes: i32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            description: "Wallet Top Up".to_string(),
            reconcile_deadline: Duration::from_secs(120),
            gateway_utc_offset_minutes: 300,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            description: std::env::var("JAZZCASH_DESCRIPTION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.description),
            reconcile_deadline: std::env::var("RECONCILE_DEADLINE_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_deadline),
            gateway_utc_offset_minutes: std::env::var("JAZZCASH_UTC_OFFSET_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.gateway_utc_offset_minutes),
        }
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpRequest {
    pub idempotency_key: Uuid,
    /// Amount in paisa
    pub amount: i64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub cnic_last6: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopUpResult {
    pub id: Uuid,
    pub txn_ref_no: String,
    /// Never `Unknown`; see [`PaymentStatus::client_visible`].
    pub status: PaymentStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<CardRedirect>,
    pub amount: i64,
}

impl TopUpResult {
    fn from_transaction(tx: &GatewayTransaction, status: PaymentStatus, message: String) -> Self {
        Self {
            id: tx.id,
            txn_ref_no: tx.txn_ref_no.clone(),
            status: status.client_visible(),
            message,
            redirect: None,
            amount: tx.amount,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The gateway accepted the request but its outcome was not stored.
    #[error("gateway outcome for {txn_ref_no} was not recorded: {source}")]
    UnrecordedGatewayOutcome {
        txn_ref_no: String,
        #[source]
        source: DatabaseError,
    },
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Payment(e) => e.into(),
            OrchestratorError::Database(e) => e.into(),
            OrchestratorError::UnrecordedGatewayOutcome { txn_ref_no, source } => {
                AppError::new(AppErrorKind::Infrastructure(
                    InfrastructureError::UnrecordedGatewayOutcome {
                        txn_ref_no,
                        message: source.to_string(),
                    },
                ))
            }
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug)]
struct WalletIdentifiers {
    mobile_number: String,
    cnic_last6: String,
}

pub struct PaymentOrchestrator {
    store: Arc<dyn GatewayTransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
    supervisor: Arc<PollingSupervisor>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn GatewayTransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        supervisor: Arc<PollingSupervisor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            supervisor,
            config,
        }
    }

    pub fn supervisor(&self) -> &Arc<PollingSupervisor> {
        &self.supervisor
    }

    /// Initiates a top-up, or reconciles the transaction already recorded
    /// under the same idempotency key.
    ///
    /// Input is validated before the key lock is taken. The unit of work is
    /// committed only after the gateway call and the status write both
    /// succeed; on any earlier failure it is dropped and nothing is stored.
    pub async fn initiate(
        &self,
        user_id: Uuid,
        request: TopUpRequest,
    ) -> OrchestratorResult<TopUpResult> {
        validate_amount(request.amount)?;
        let wallet = match request.method {
            PaymentMethod::Wallet => Some(wallet_identifiers(&request)?),
            PaymentMethod::Card => None,
        };

        let mut uow = self.store.begin(request.idempotency_key).await?;

        if let Some(existing) = uow.get_by_idempotency_key(request.idempotency_key).await? {
            info!(
                idempotency_key = %request.idempotency_key,
                txn_ref_no = %existing.txn_ref_no,
                "duplicate top-up request; reconciling existing transaction"
            );
            let (result, keep_polling) = self.reconcile(uow.as_mut(), &existing).await?;
            uow.commit().await?;
            if keep_polling {
                self.supervisor.start(&existing.txn_ref_no).await;
            }
            return Ok(result);
        }

        let now = Utc::now();
        let offset = offset_from_minutes(self.config.gateway_utc_offset_minutes);
        let (txn_date_time, txn_expiry_date_time) = gateway_timestamps(now, offset);

        let tx = uow
            .create_transaction(NewGatewayTransaction {
                user_id,
                idempotency_key: request.idempotency_key,
                bill_ref_no: bill_reference(now),
                txn_ref_no: txn_reference(now, offset),
                payment_method: request.method,
                amount: request.amount,
            })
            .await?;

        match wallet {
            Some(wallet) => {
                info!(
                    txn_ref_no = %tx.txn_ref_no,
                    amount = tx.amount,
                    phone = %mask_phone_number(&wallet.mobile_number),
                    "submitting wallet payment"
                );
                let gateway_request = WalletInitiateRequest {
                    amount: tx.amount,
                    bill_reference: tx.bill_ref_no.clone(),
                    txn_ref_no: tx.txn_ref_no.clone(),
                    description: self.config.description.clone(),
                    mobile_number: wallet.mobile_number,
                    cnic_last6: wallet.cnic_last6,
                    txn_date_time,
                    txn_expiry_date_time,
                };
                self.complete_wallet(uow, tx, gateway_request).await
            }
            None => {
                let redirect = self.gateway.initiate_card(CardInitiateRequest {
                    amount: tx.amount,
                    bill_reference: tx.bill_ref_no.clone(),
                    txn_ref_no: tx.txn_ref_no.clone(),
                    description: self.config.description.clone(),
                    txn_date_time,
                    txn_expiry_date_time,
                })?;
                uow.commit().await?;

                info!(txn_ref_no = %tx.txn_ref_no, amount = tx.amount, "card payment redirect issued");
                let mut result = TopUpResult::from_transaction(
                    &tx,
                    PaymentStatus::Pending,
                    MSG_CARD_REDIRECT.to_string(),
                );
                result.redirect = Some(redirect);
                Ok(result)
            }
        }
    }

    async fn complete_wallet(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        tx: GatewayTransaction,
        request: WalletInitiateRequest,
    ) -> OrchestratorResult<TopUpResult> {
        let outcome = match self.gateway.submit_wallet(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(txn_ref_no = %tx.txn_ref_no, error = %e, "wallet submission failed");
                return Err(e.into());
            }
        };

        let recorded: Result<(), DatabaseError> = async {
            if outcome.status != PaymentStatus::Pending {
                uow.update_status(&tx.txn_ref_no, outcome.status).await?;
            }
            uow.commit().await
        }
        .await;

        if let Err(source) = recorded {
            error!(
                txn_ref_no = %tx.txn_ref_no,
                status = %outcome.status,
                response_code = %outcome.response_code,
                error = %source,
                "gateway accepted wallet payment but the outcome was not recorded"
            );
            return Err(OrchestratorError::UnrecordedGatewayOutcome {
                txn_ref_no: tx.txn_ref_no,
                source,
            });
        }

        info!(
            txn_ref_no = %tx.txn_ref_no,
            status = %outcome.status,
            response_code = %outcome.response_code,
            "wallet payment outcome recorded"
        );

        if !outcome.status.is_terminal() {
            self.supervisor.start(&tx.txn_ref_no).await;
        }

        Ok(TopUpResult::from_transaction(&tx, outcome.status, outcome.message))
    }

    /// Records the outcome posted back by the hosted card page.
    ///
    /// The posted fields must carry a valid signature. A terminal outcome is
    /// stored unless the transaction already settled; the stored terminal
    /// status always wins.
    pub async fn apply_card_callback(
        &self,
        fields: &BTreeMap<String, String>,
    ) -> OrchestratorResult<TopUpResult> {
        let callback = self.gateway.parse_and_verify_card_callback(fields)?;
        let tx = self
            .store
            .get_by_txn_ref_no(&callback.txn_ref_no)
            .await?
            .ok_or_else(|| DatabaseError::not_found("gateway_transaction", &callback.txn_ref_no))?;

        let message = if callback.response_message.is_empty() {
            codes::user_message(&callback.response_code)
        } else {
            callback.response_message.clone()
        };

        if tx.status.is_terminal() {
            return Ok(settled_result(&tx));
        }

        if callback.status != PaymentStatus::Pending
            && !self
                .store
                .update_status(&tx.txn_ref_no, callback.status)
                .await?
        {
            return self.stored_outcome(&tx, message).await;
        }
        info!(
            txn_ref_no = %tx.txn_ref_no,
            status = %callback.status,
            response_code = %callback.response_code,
            "card callback recorded"
        );
        Ok(TopUpResult::from_transaction(&tx, callback.status, message))
    }

    /// Brings an existing transaction up to date.
    ///
    /// Terminal records are answered from storage. Open records get one
    /// inquiry; a terminal answer is stored, and a record older than the
    /// reconcile deadline is failed. The returned flag asks the caller to
    /// keep a poll loop running.
    async fn reconcile(
        &self,
        uow: &mut dyn UnitOfWork,
        tx: &GatewayTransaction,
    ) -> OrchestratorResult<(TopUpResult, bool)> {
        if tx.status.is_terminal() {
            return Ok((settled_result(tx), false));
        }

        let inquiry = self.gateway.inquiry(&tx.txn_ref_no).await.map_err(|e| {
            warn!(txn_ref_no = %tx.txn_ref_no, error = %e, "reconciliation inquiry failed");
            e
        })?;

        if inquiry.status.is_terminal() {
            if !uow.update_status(&tx.txn_ref_no, inquiry.status).await? {
                return Ok((self.stored_outcome(tx, inquiry.message).await?, false));
            }
            info!(
                txn_ref_no = %tx.txn_ref_no,
                status = %inquiry.status,
                "reconciled transaction to terminal status"
            );
            return Ok((
                TopUpResult::from_transaction(tx, inquiry.status, inquiry.message),
                false,
            ));
        }

        let elapsed = Utc::now()
            .signed_duration_since(tx.created_at)
            .to_std()
            .unwrap_or_default();
        if elapsed > self.config.reconcile_deadline {
            if !uow.update_status(&tx.txn_ref_no, PaymentStatus::Failed).await? {
                return Ok((self.stored_outcome(tx, MSG_TIMED_OUT.to_string()).await?, false));
            }
            warn!(
                txn_ref_no = %tx.txn_ref_no,
                elapsed_secs = elapsed.as_secs(),
                "open transaction exceeded reconcile deadline; marked failed"
            );
            return Ok((
                TopUpResult::from_transaction(tx, PaymentStatus::Failed, MSG_TIMED_OUT.to_string()),
                false,
            ));
        }

        Ok((
            TopUpResult::from_transaction(tx, PaymentStatus::Pending, inquiry.message),
            tx.payment_method == PaymentMethod::Wallet,
        ))
    }

    /// Answers from the stored row after a conditional status write was refused.
    ///
    /// A refused write means the row settled elsewhere in the meantime, so the
    /// stored terminal status is reported instead of the one that was attempted.
    async fn stored_outcome(
        &self,
        tx: &GatewayTransaction,
        fallback_message: String,
    ) -> OrchestratorResult<TopUpResult> {
        let current = self
            .store
            .get_by_txn_ref_no(&tx.txn_ref_no)
            .await?
            .ok_or_else(|| DatabaseError::not_found("gateway_transaction", &tx.txn_ref_no))?;

        warn!(
            txn_ref_no = %current.txn_ref_no,
            status = %current.status,
            "status write refused; answering from stored transaction"
        );
        if current.status.is_terminal() {
            Ok(settled_result(&current))
        } else {
            Ok(TopUpResult::from_transaction(&current, current.status, fallback_message))
        }
    }
}

/// Result for a transaction whose stored status is already terminal.
fn settled_result(tx: &GatewayTransaction) -> TopUpResult {
    let message = match tx.status {
        PaymentStatus::Success => MSG_ALREADY_COMPLETED,
        _ => MSG_ALREADY_FAILED,
    };
    TopUpResult::from_transaction(tx, tx.status, message.to_string())
}

fn wallet_identifiers(request: &TopUpRequest) -> PaymentResult<WalletIdentifiers> {
    let phone = request.phone_number.as_deref().ok_or_else(|| {
        PaymentError::validation("phone_number", "phone number is required for wallet payments")
    })?;
    let cnic = request.cnic_last6.as_deref().ok_or_else(|| {
        PaymentError::validation("cnic_last6", "CNIC is required for wallet payments")
    })?;

    Ok(WalletIdentifiers {
        mobile_number: normalize_phone_number(phone)?,
        cnic_last6: normalize_cnic_last6(cnic)?,
    })
}
