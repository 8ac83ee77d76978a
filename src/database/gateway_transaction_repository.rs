use crate::database::error::DatabaseError;
use crate::database::repository::{
    GatewayTransaction, GatewayTransactionStore, NewGatewayTransaction, UnitOfWork,
};
use crate::payments::types::{PaymentMethod, PaymentStatus};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

const COLUMNS: &str = "id, user_id, idempotency_key, bill_ref_no, txn_ref_no, payment_method, \
                       amount, status, polling_active, created_at, updated_at";

/// Row shape of `gateway_transactions`
#[derive(Debug, Clone, FromRow)]
struct GatewayTransactionRow {
    id: Uuid,
    user_id: Uuid,
    idempotency_key: Uuid,
    bill_ref_no: String,
    txn_ref_no: String,
    payment_method: String,
    amount: i64,
    status: String,
    polling_active: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<GatewayTransactionRow> for GatewayTransaction {
    type Error = DatabaseError;

    fn try_from(row: GatewayTransactionRow) -> Result<Self, Self::Error> {
        let payment_method = row
            .payment_method
            .parse::<PaymentMethod>()
            .map_err(|e| DatabaseError::unknown(e.to_string()))?;
        let status = row
            .status
            .parse::<PaymentStatus>()
            .map_err(|e| DatabaseError::unknown(e.to_string()))?;

        Ok(GatewayTransaction {
            id: row.id,
            user_id: row.user_id,
            idempotency_key: row.idempotency_key,
            bill_ref_no: row.bill_ref_no,
            txn_ref_no: row.txn_ref_no,
            payment_method,
            amount: row.amount,
            status,
            polling_active: row.polling_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Only non-terminal rows may change status.
const UPDATE_STATUS_SQL: &str = "UPDATE gateway_transactions \
     SET status = $2, updated_at = NOW() \
     WHERE txn_ref_no = $1 AND status IN ('PENDING', 'UNKNOWN')";

/// PostgreSQL-backed gateway transaction store
#[derive(Clone)]
pub struct GatewayTransactionRepository {
    pool: PgPool,
}

impl GatewayTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    idempotency_key: Uuid,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn get_by_idempotency_key(
        &mut self,
        idempotency_key: Uuid,
    ) -> Result<Option<GatewayTransaction>, DatabaseError> {
        let row = sqlx::query_as::<_, GatewayTransactionRow>(&format!(
            "SELECT {} FROM gateway_transactions WHERE idempotency_key = $1",
            COLUMNS
        ))
        .bind(idempotency_key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(GatewayTransaction::try_from).transpose()
    }

    async fn create_transaction(
        &mut self,
        new: NewGatewayTransaction,
    ) -> Result<GatewayTransaction, DatabaseError> {
        let row = sqlx::query_as::<_, GatewayTransactionRow>(&format!(
            "INSERT INTO gateway_transactions \
             (user_id, idempotency_key, bill_ref_no, txn_ref_no, payment_method, amount, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {}",
            COLUMNS
        ))
        .bind(new.user_id)
        .bind(new.idempotency_key)
        .bind(&new.bill_ref_no)
        .bind(&new.txn_ref_no)
        .bind(new.payment_method.as_str())
        .bind(new.amount)
        .bind(PaymentStatus::Pending.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        GatewayTransaction::try_from(row)
    }

    async fn update_status(
        &mut self,
        txn_ref_no: &str,
        status: PaymentStatus,
    ) -> Result<bool, DatabaseError> {
        if status == PaymentStatus::Pending {
            return Ok(false);
        }
        let result = sqlx::query(UPDATE_STATUS_SQL)
            .bind(txn_ref_no)
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let mut this = *self;
        // The lock row lives only as long as the unit of work; waiters on the
        // same key retry their insert once this deletion commits.
        sqlx::query("DELETE FROM gateway_idempotency_locks WHERE idempotency_key = $1")
            .bind(this.idempotency_key)
            .execute(&mut *this.tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        this.tx.commit().await.map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl GatewayTransactionStore for GatewayTransactionRepository {
    async fn begin(&self, idempotency_key: Uuid) -> Result<Box<dyn UnitOfWork>, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Row lock on the exact key, held until commit or rollback. A concurrent
        // insert of the same key blocks on the primary key index.
        sqlx::query(
            "INSERT INTO gateway_idempotency_locks (idempotency_key) VALUES ($1) \
             ON CONFLICT (idempotency_key) DO UPDATE SET locked_at = NOW()",
        )
        .bind(idempotency_key)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(Box::new(PgUnitOfWork {
            tx,
            idempotency_key,
        }))
    }

    async fn update_status(
        &self,
        txn_ref_no: &str,
        status: PaymentStatus,
    ) -> Result<bool, DatabaseError> {
        if status == PaymentStatus::Pending {
            return Ok(false);
        }
        let result = sqlx::query(UPDATE_STATUS_SQL)
            .bind(txn_ref_no)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_polling(&self, txn_ref_no: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE gateway_transactions \
             SET polling_active = TRUE, updated_at = NOW() \
             WHERE txn_ref_no = $1 AND polling_active = FALSE",
        )
        .bind(txn_ref_no)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn clear_polling(&self, txn_ref_no: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE gateway_transactions \
             SET polling_active = FALSE, updated_at = NOW() \
             WHERE txn_ref_no = $1",
        )
        .bind(txn_ref_no)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    async fn get_by_txn_ref_no(
        &self,
        txn_ref_no: &str,
    ) -> Result<Option<GatewayTransaction>, DatabaseError> {
        let row = sqlx::query_as::<_, GatewayTransactionRow>(&format!(
            "SELECT {} FROM gateway_transactions WHERE txn_ref_no = $1",
            COLUMNS
        ))
        .bind(txn_ref_no)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(GatewayTransaction::try_from).transpose()
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        crate::database::health_check(&self.pool).await
    }
}
