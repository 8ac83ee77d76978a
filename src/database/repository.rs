//! Persistence contract for gateway transactions.
//!
//! Initiation runs inside a [`UnitOfWork`] opened by
//! [`GatewayTransactionStore::begin`], which holds the per-idempotency-key
//! lock until it is committed or dropped. Status updates and the polling flag
//! are single conditional statements that run outside any unit of work.

use crate::database::error::DatabaseError;
use crate::payments::types::{PaymentMethod, PaymentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Gateway transaction entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub idempotency_key: Uuid,
    pub bill_ref_no: String,
    pub txn_ref_no: String,
    pub payment_method: PaymentMethod,
    pub amount: i64,
    pub status: PaymentStatus,
    pub polling_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for a freshly initiated transaction. Status always starts `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGatewayTransaction {
    pub user_id: Uuid,
    pub idempotency_key: Uuid,
    pub bill_ref_no: String,
    pub txn_ref_no: String,
    pub payment_method: PaymentMethod,
    pub amount: i64,
}

#[async_trait]
pub trait UnitOfWork: Send {
    /// Not-found is `Ok(None)`.
    async fn get_by_idempotency_key(
        &mut self,
        idempotency_key: Uuid,
    ) -> Result<Option<GatewayTransaction>, DatabaseError>;

    async fn create_transaction(
        &mut self,
        new: NewGatewayTransaction,
    ) -> Result<GatewayTransaction, DatabaseError>;

    /// Same semantics as [`GatewayTransactionStore::update_status`], scoped to
    /// this unit of work.
    async fn update_status(
        &mut self,
        txn_ref_no: &str,
        status: PaymentStatus,
    ) -> Result<bool, DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait GatewayTransactionStore: Send + Sync {
    /// Opens a unit of work serialized on `idempotency_key`.
    ///
    /// Units of work for the same key run one after another; different keys
    /// never wait on each other. Dropping without `commit` discards every
    /// write made through it.
    async fn begin(&self, idempotency_key: Uuid) -> Result<Box<dyn UnitOfWork>, DatabaseError>;

    /// Moves a non-terminal transaction to `status`.
    ///
    /// Returns `false` without writing when the stored status is already
    /// terminal, so `Success`/`Failed` are never overwritten.
    async fn update_status(
        &self,
        txn_ref_no: &str,
        status: PaymentStatus,
    ) -> Result<bool, DatabaseError>;

    /// Sets the polling flag if it is clear. Returns whether this call set it.
    async fn claim_polling(&self, txn_ref_no: &str) -> Result<bool, DatabaseError>;

    async fn clear_polling(&self, txn_ref_no: &str) -> Result<(), DatabaseError>;

    async fn get_by_txn_ref_no(
        &self,
        txn_ref_no: &str,
    ) -> Result<Option<GatewayTransaction>, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}
