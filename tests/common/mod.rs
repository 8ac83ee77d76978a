#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Map;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use wallet_topup::database::{
    GatewayTransaction, GatewayTransactionStore, InMemoryGatewayTransactionStore,
};
use wallet_topup::payments::codes;
use wallet_topup::payments::{
    CardCallback, CardInitiateRequest, CardRedirect, GatewayResult, PaymentError, PaymentGateway,
    PaymentMethod, PaymentResult, PaymentStatus, WalletInitiateRequest,
};
use wallet_topup::services::{OrchestratorConfig, PaymentOrchestrator};
use wallet_topup::workers::{GatewayRateLimiter, PollingConfig, PollingSupervisor};

/// One scripted gateway answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Code(&'static str),
    NetworkError,
    IntegrityError,
}

impl Reply {
    fn into_result(self) -> PaymentResult<GatewayResult> {
        match self {
            Reply::Code(code) => Ok(GatewayResult {
                status: codes::classify(code),
                response_code: code.to_string(),
                payment_response_code: None,
                retrieval_reference_no: None,
                message: codes::user_message(code),
                raw: Map::new(),
            }),
            Reply::NetworkError => Err(PaymentError::NetworkError {
                message: "connection reset".to_string(),
            }),
            Reply::IntegrityError => Err(PaymentError::IntegrityError {
                message: "secure hash mismatch".to_string(),
            }),
        }
    }
}

/// In-process gateway that answers from per-operation scripts and counts calls.
///
/// When a script runs out, the operation's fallback reply is repeated.
pub struct ScriptedGateway {
    wallet_script: Mutex<VecDeque<Reply>>,
    wallet_fallback: Reply,
    inquiry_script: Mutex<VecDeque<Reply>>,
    inquiry_fallback: Reply,
    wallet_delay: Duration,
    inquiry_delay: Duration,
    wallet_calls: AtomicUsize,
    inquiry_calls: AtomicUsize,
    inquiries_in_flight: AtomicUsize,
    max_inquiries_in_flight: AtomicUsize,
    settle_during_inquiry: Mutex<Option<(InMemoryGatewayTransactionStore, PaymentStatus)>>,
}

impl ScriptedGateway {
    pub fn new(wallet_fallback: Reply, inquiry_fallback: Reply) -> Self {
        Self {
            wallet_script: Mutex::new(VecDeque::new()),
            wallet_fallback,
            inquiry_script: Mutex::new(VecDeque::new()),
            inquiry_fallback,
            wallet_delay: Duration::ZERO,
            inquiry_delay: Duration::ZERO,
            wallet_calls: AtomicUsize::new(0),
            inquiry_calls: AtomicUsize::new(0),
            inquiries_in_flight: AtomicUsize::new(0),
            max_inquiries_in_flight: AtomicUsize::new(0),
            settle_during_inquiry: Mutex::new(None),
        }
    }

    pub fn with_wallet_delay(mut self, delay: Duration) -> Self {
        self.wallet_delay = delay;
        self
    }

    pub fn with_inquiry_delay(mut self, delay: Duration) -> Self {
        self.inquiry_delay = delay;
        self
    }

    pub fn script_inquiries(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.inquiry_script.lock().unwrap().extend(replies);
        self
    }

    /// Writes `status` to the store before each inquiry answers, as a
    /// concurrent writer would.
    pub fn settle_during_inquiry(&self, store: InMemoryGatewayTransactionStore, status: PaymentStatus) {
        *self.settle_during_inquiry.lock().unwrap() = Some((store, status));
    }

    pub fn wallet_calls(&self) -> usize {
        self.wallet_calls.load(Ordering::SeqCst)
    }

    pub fn inquiry_calls(&self) -> usize {
        self.inquiry_calls.load(Ordering::SeqCst)
    }

    pub fn max_inquiries_in_flight(&self) -> usize {
        self.max_inquiries_in_flight.load(Ordering::SeqCst)
    }

    fn next(script: &Mutex<VecDeque<Reply>>, fallback: &Reply) -> Reply {
        script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| fallback.clone())
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn submit_wallet(&self, _request: WalletInitiateRequest) -> PaymentResult<GatewayResult> {
        self.wallet_calls.fetch_add(1, Ordering::SeqCst);
        if !self.wallet_delay.is_zero() {
            tokio::time::sleep(self.wallet_delay).await;
        }
        Self::next(&self.wallet_script, &self.wallet_fallback).into_result()
    }

    fn initiate_card(&self, request: CardInitiateRequest) -> PaymentResult<CardRedirect> {
        let mut fields = BTreeMap::new();
        fields.insert("pp_TxnRefNo".to_string(), request.txn_ref_no);
        fields.insert("pp_Amount".to_string(), request.amount.to_string());
        fields.insert("pp_SecureHash".to_string(), "SCRIPTED".to_string());
        Ok(CardRedirect {
            post_url: "https://gateway.test/card".to_string(),
            fields,
            return_url: Some("https://merchant.test/return".to_string()),
        })
    }

    async fn inquiry(&self, txn_ref_no: &str) -> PaymentResult<GatewayResult> {
        self.inquiry_calls.fetch_add(1, Ordering::SeqCst);
        let settle = self.settle_during_inquiry.lock().unwrap().clone();
        if let Some((store, status)) = settle {
            store.update_status(txn_ref_no, status).await.unwrap();
        }
        let now = self.inquiries_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inquiries_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.inquiry_delay.is_zero() {
            tokio::time::sleep(self.inquiry_delay).await;
        }
        self.inquiries_in_flight.fetch_sub(1, Ordering::SeqCst);
        Self::next(&self.inquiry_script, &self.inquiry_fallback).into_result()
    }

    fn parse_and_verify_card_callback(
        &self,
        _fields: &BTreeMap<String, String>,
    ) -> PaymentResult<CardCallback> {
        Err(PaymentError::IntegrityError {
            message: "scripted gateway does not sign callbacks".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct Harness {
    pub store: InMemoryGatewayTransactionStore,
    pub gateway: Arc<ScriptedGateway>,
    pub supervisor: Arc<PollingSupervisor>,
    pub orchestrator: Arc<PaymentOrchestrator>,
}

pub fn harness(gateway: ScriptedGateway) -> Harness {
    harness_with(gateway, PollingConfig::default(), OrchestratorConfig::default())
}

pub fn harness_with(
    gateway: ScriptedGateway,
    polling: PollingConfig,
    orchestrator: OrchestratorConfig,
) -> Harness {
    let store = InMemoryGatewayTransactionStore::new();
    let gateway = Arc::new(gateway);
    let supervisor = Arc::new(PollingSupervisor::new(
        Arc::new(store.clone()),
        gateway.clone(),
        GatewayRateLimiter::new(polling.max_concurrent),
        polling,
    ));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        Arc::new(store.clone()),
        gateway.clone(),
        supervisor.clone(),
        orchestrator,
    ));
    Harness {
        store,
        gateway,
        supervisor,
        orchestrator,
    }
}

pub fn seeded_transaction(
    txn_ref_no: &str,
    status: PaymentStatus,
    created_at: DateTime<Utc>,
) -> GatewayTransaction {
    GatewayTransaction {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        idempotency_key: Uuid::new_v4(),
        bill_ref_no: format!("BILL{}", created_at.timestamp()),
        txn_ref_no: txn_ref_no.to_string(),
        payment_method: PaymentMethod::Wallet,
        amount: 50_000,
        status,
        polling_active: false,
        created_at,
        updated_at: created_at,
    }
}
