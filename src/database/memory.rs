use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    GatewayTransaction, GatewayTransactionStore, NewGatewayTransaction, UnitOfWork,
};
use crate::payments::types::PaymentStatus;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    by_ref: HashMap<String, GatewayTransaction>,
    ref_by_key: HashMap<Uuid, String>,
}

impl Tables {
    fn apply_status(&mut self, txn_ref_no: &str, status: PaymentStatus) -> bool {
        match self.by_ref.get_mut(txn_ref_no) {
            Some(tx) if tx.status.can_transition_to(status) => {
                tx.status = status;
                tx.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

/// A thread-safe in-memory gateway transaction store.
///
/// Keeps the same locking and conditional-update semantics as the PostgreSQL
/// store. Used by tests and by local runs without a database.
#[derive(Default, Clone)]
pub struct InMemoryGatewayTransactionStore {
    tables: Arc<RwLock<Tables>>,
    key_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
    fail_status_updates: Arc<AtomicBool>,
}

impl InMemoryGatewayTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a transaction as-is, bypassing initiation.
    pub async fn seed(&self, tx: GatewayTransaction) {
        let mut tables = self.tables.write().await;
        tables.ref_by_key.insert(tx.idempotency_key, tx.txn_ref_no.clone());
        tables.by_ref.insert(tx.txn_ref_no.clone(), tx);
    }

    pub async fn all(&self) -> Vec<GatewayTransaction> {
        let tables = self.tables.read().await;
        tables.by_ref.values().cloned().collect()
    }

    /// Makes every status write fail until reset.
    pub fn fail_status_updates(&self, fail: bool) {
        self.fail_status_updates.store(fail, Ordering::SeqCst);
    }

    fn check_status_write(&self) -> Result<(), DatabaseError> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "status writes disabled".to_string(),
            }));
        }
        Ok(())
    }

    async fn key_lock(&self, idempotency_key: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        // entries only referenced by the map are idle
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(idempotency_key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

struct MemoryUnitOfWork {
    store: InMemoryGatewayTransactionStore,
    created: Vec<GatewayTransaction>,
    status_updates: Vec<(String, PaymentStatus)>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn get_by_idempotency_key(
        &mut self,
        idempotency_key: Uuid,
    ) -> Result<Option<GatewayTransaction>, DatabaseError> {
        if let Some(tx) = self
            .created
            .iter()
            .find(|tx| tx.idempotency_key == idempotency_key)
        {
            return Ok(Some(tx.clone()));
        }

        let tables = self.store.tables.read().await;
        Ok(tables
            .ref_by_key
            .get(&idempotency_key)
            .and_then(|r| tables.by_ref.get(r))
            .cloned())
    }

    async fn create_transaction(
        &mut self,
        new: NewGatewayTransaction,
    ) -> Result<GatewayTransaction, DatabaseError> {
        {
            let tables = self.store.tables.read().await;
            let key_taken = tables.ref_by_key.contains_key(&new.idempotency_key)
                || self
                    .created
                    .iter()
                    .any(|tx| tx.idempotency_key == new.idempotency_key);
            if key_taken {
                return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                    constraint: "gateway_transactions_idempotency_key_key".to_string(),
                }));
            }
            let ref_taken = tables.by_ref.contains_key(&new.txn_ref_no)
                || self.created.iter().any(|tx| tx.txn_ref_no == new.txn_ref_no);
            if ref_taken {
                return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                    constraint: "gateway_transactions_txn_ref_no_key".to_string(),
                }));
            }
        }

        let now = Utc::now();
        let tx = GatewayTransaction {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            idempotency_key: new.idempotency_key,
            bill_ref_no: new.bill_ref_no,
            txn_ref_no: new.txn_ref_no,
            payment_method: new.payment_method,
            amount: new.amount,
            status: PaymentStatus::Pending,
            polling_active: false,
            created_at: now,
            updated_at: now,
        };
        self.created.push(tx.clone());
        Ok(tx)
    }

    async fn update_status(
        &mut self,
        txn_ref_no: &str,
        status: PaymentStatus,
    ) -> Result<bool, DatabaseError> {
        self.store.check_status_write()?;

        if let Some(tx) = self.created.iter_mut().find(|tx| tx.txn_ref_no == txn_ref_no) {
            if !tx.status.can_transition_to(status) {
                return Ok(false);
            }
            tx.status = status;
            tx.updated_at = Utc::now();
            return Ok(true);
        }

        let tables = self.store.tables.read().await;
        match tables.by_ref.get(txn_ref_no) {
            Some(tx) if tx.status.can_transition_to(status) => {
                self.status_updates.push((txn_ref_no.to_string(), status));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let this = *self;
        let mut tables = this.store.tables.write().await;
        for tx in this.created {
            tables
                .ref_by_key
                .insert(tx.idempotency_key, tx.txn_ref_no.clone());
            tables.by_ref.insert(tx.txn_ref_no.clone(), tx);
        }
        for (txn_ref_no, status) in this.status_updates {
            tables.apply_status(&txn_ref_no, status);
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayTransactionStore for InMemoryGatewayTransactionStore {
    async fn begin(&self, idempotency_key: Uuid) -> Result<Box<dyn UnitOfWork>, DatabaseError> {
        let lock = self.key_lock(idempotency_key).await;
        let guard = lock.lock_owned().await;

        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            created: Vec::new(),
            status_updates: Vec::new(),
            _guard: guard,
        }))
    }

    async fn update_status(
        &self,
        txn_ref_no: &str,
        status: PaymentStatus,
    ) -> Result<bool, DatabaseError> {
        self.check_status_write()?;
        let mut tables = self.tables.write().await;
        Ok(tables.apply_status(txn_ref_no, status))
    }

    async fn claim_polling(&self, txn_ref_no: &str) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.write().await;
        match tables.by_ref.get_mut(txn_ref_no) {
            Some(tx) if !tx.polling_active => {
                tx.polling_active = true;
                tx.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_polling(&self, txn_ref_no: &str) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        if let Some(tx) = tables.by_ref.get_mut(txn_ref_no) {
            tx.polling_active = false;
            tx.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_by_txn_ref_no(
        &self,
        txn_ref_no: &str,
    ) -> Result<Option<GatewayTransaction>, DatabaseError> {
        let tables = self.tables.read().await;
        Ok(tables.by_ref.get(txn_ref_no).cloned())
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}
