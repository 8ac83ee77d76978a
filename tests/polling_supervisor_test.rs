//! Timer-driven tests for the polling supervisor and gateway rate limiter

mod common;

use chrono::Utc;
use common::{harness, harness_with, seeded_transaction, Reply, ScriptedGateway};
use std::sync::Arc;
use std::time::Duration;
use wallet_topup::database::GatewayTransactionStore;
use wallet_topup::payments::PaymentStatus;
use wallet_topup::services::OrchestratorConfig;
use wallet_topup::workers::{GatewayRateLimiter, PollOutcome, PollingConfig, PollingSupervisor};

async fn stored_status(store: &impl GatewayTransactionStore, txn_ref_no: &str) -> (PaymentStatus, bool) {
    let tx = store
        .get_by_txn_ref_no(txn_ref_no)
        .await
        .unwrap()
        .expect("seeded transaction");
    (tx.status, tx.polling_active)
}

#[tokio::test(start_paused = true)]
async fn loop_settles_on_terminal_inquiry() {
    let h = harness(
        ScriptedGateway::new(Reply::Code("000"), Reply::Code("000"))
            .script_inquiries([Reply::Code("157"), Reply::Code("124")]),
    );
    h.store
        .seed(seeded_transaction("GIKITU20250101P01", PaymentStatus::Pending, Utc::now()))
        .await;

    let started = tokio::time::Instant::now();
    assert!(h.supervisor.start("GIKITU20250101P01").await);
    assert_eq!(h.supervisor.active_loops(), 1);

    let outcome = h.supervisor.join("GIKITU20250101P01").await;
    assert_eq!(outcome, Some(PollOutcome::Settled(PaymentStatus::Success)));
    assert_eq!(h.gateway.inquiry_calls(), 3);
    // third tick, five seconds apart
    assert_eq!(started.elapsed(), Duration::from_secs(15));

    let (status, polling) = stored_status(&h.store, "GIKITU20250101P01").await;
    assert_eq!(status, PaymentStatus::Success);
    assert!(!polling);
    assert_eq!(h.supervisor.active_loops(), 0);
}

#[tokio::test(start_paused = true)]
async fn loop_fails_transaction_at_deadline() {
    let h = harness(ScriptedGateway::new(Reply::Code("000"), Reply::Code("157")));
    h.store
        .seed(seeded_transaction("GIKITU20250101P02", PaymentStatus::Pending, Utc::now()))
        .await;

    let started = tokio::time::Instant::now();
    assert!(h.supervisor.start("GIKITU20250101P02").await);
    let outcome = h.supervisor.join("GIKITU20250101P02").await;

    assert_eq!(outcome, Some(PollOutcome::TimedOut));
    assert_eq!(started.elapsed(), Duration::from_secs(120));
    // ticks at 5s..115s; the deadline wins the tie at 120s
    assert_eq!(h.gateway.inquiry_calls(), 23);

    let (status, polling) = stored_status(&h.store, "GIKITU20250101P02").await;
    assert_eq!(status, PaymentStatus::Failed);
    assert!(!polling);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried_and_release_slots() {
    let h = harness(
        ScriptedGateway::new(Reply::Code("000"), Reply::Code("101")).script_inquiries([
            Reply::NetworkError,
            Reply::IntegrityError,
            Reply::NetworkError,
        ]),
    );
    h.store
        .seed(seeded_transaction("GIKITU20250101P03", PaymentStatus::Unknown, Utc::now()))
        .await;

    assert!(h.supervisor.start("GIKITU20250101P03").await);
    let outcome = h.supervisor.join("GIKITU20250101P03").await;

    assert_eq!(outcome, Some(PollOutcome::Settled(PaymentStatus::Failed)));
    assert_eq!(h.gateway.inquiry_calls(), 4);

    let limiter = h.supervisor.limiter();
    assert_eq!(limiter.in_use(), 0);
    assert_eq!(limiter.available(), limiter.capacity());
}

#[tokio::test(start_paused = true)]
async fn duplicate_start_is_refused() {
    let h = harness(ScriptedGateway::new(Reply::Code("000"), Reply::Code("157")));
    h.store
        .seed(seeded_transaction("GIKITU20250101P04", PaymentStatus::Pending, Utc::now()))
        .await;

    assert!(h.supervisor.start("GIKITU20250101P04").await);
    assert!(!h.supervisor.start("GIKITU20250101P04").await);

    // a second supervisor sharing the store sees the persisted claim
    let other = Arc::new(PollingSupervisor::new(
        Arc::new(h.store.clone()),
        h.gateway.clone(),
        GatewayRateLimiter::default(),
        PollingConfig::default(),
    ));
    assert!(!other.start("GIKITU20250101P04").await);
    assert_eq!(other.active_loops(), 0);
    assert_eq!(h.supervisor.active_loops(), 1);

    h.supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn start_for_missing_transaction_is_refused() {
    let h = harness(ScriptedGateway::new(Reply::Code("000"), Reply::Code("000")));
    assert!(!h.supervisor.start("GIKITU20250101NOPE").await);
    assert_eq!(h.supervisor.active_loops(), 0);
    assert_eq!(h.supervisor.join("GIKITU20250101NOPE").await, None);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_loops_without_touching_status() {
    let h = harness(ScriptedGateway::new(Reply::Code("000"), Reply::Code("157")));
    h.store
        .seed(seeded_transaction("GIKITU20250101P05", PaymentStatus::Pending, Utc::now()))
        .await;

    assert!(h.supervisor.start("GIKITU20250101P05").await);
    tokio::time::sleep(Duration::from_secs(12)).await;
    h.supervisor.shutdown().await;

    assert_eq!(h.supervisor.active_loops(), 0);
    let (status, polling) = stored_status(&h.store, "GIKITU20250101P05").await;
    assert_eq!(status, PaymentStatus::Pending);
    assert!(!polling);

    // no new loops after shutdown
    assert!(!h.supervisor.start("GIKITU20250101P05").await);
}

#[tokio::test(start_paused = true)]
async fn concurrent_inquiries_are_capped_by_the_limiter() {
    let polling = PollingConfig {
        max_concurrent: 2,
        ..PollingConfig::default()
    };
    let h = harness_with(
        ScriptedGateway::new(Reply::Code("000"), Reply::Code("000"))
            .with_inquiry_delay(Duration::from_secs(2)),
        polling,
        OrchestratorConfig::default(),
    );

    let refs: Vec<String> = (0..5).map(|i| format!("GIKITU20250101C{:02}", i)).collect();
    for reference in &refs {
        h.store
            .seed(seeded_transaction(reference, PaymentStatus::Pending, Utc::now()))
            .await;
        assert!(h.supervisor.start(reference).await);
    }

    for reference in &refs {
        assert_eq!(
            h.supervisor.join(reference).await,
            Some(PollOutcome::Settled(PaymentStatus::Success))
        );
    }

    assert_eq!(h.gateway.inquiry_calls(), 5);
    assert_eq!(h.gateway.max_inquiries_in_flight(), 2);
    assert_eq!(h.supervisor.limiter().in_use(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_right_after_start_cancels_the_new_loop() {
    let h = harness(ScriptedGateway::new(Reply::Code("000"), Reply::Code("157")));
    h.store
        .seed(seeded_transaction("GIKITU20250101P06", PaymentStatus::Pending, Utc::now()))
        .await;

    let started = tokio::time::Instant::now();
    assert!(h.supervisor.start("GIKITU20250101P06").await);
    h.supervisor.shutdown().await;

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(h.gateway.inquiry_calls(), 0);
    let (status, polling) = stored_status(&h.store, "GIKITU20250101P06").await;
    assert_eq!(status, PaymentStatus::Pending);
    assert!(!polling);
}

#[tokio::test(start_paused = true)]
async fn finished_loops_are_pruned_from_the_registry() {
    let h = harness(ScriptedGateway::new(Reply::Code("000"), Reply::Code("000")));

    for i in 0..50 {
        let reference = format!("GIKITU20250101R{:02}", i);
        h.store
            .seed(seeded_transaction(&reference, PaymentStatus::Pending, Utc::now()))
            .await;
        assert!(h.supervisor.start(&reference).await);
    }
    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(h.supervisor.active_loops(), 0);

    h.store
        .seed(seeded_transaction("GIKITU20250101R99", PaymentStatus::Pending, Utc::now()))
        .await;
    assert!(h.supervisor.start("GIKITU20250101R99").await);
    assert_eq!(h.supervisor.registered_loops(), 1);

    let (status, _) = stored_status(&h.store, "GIKITU20250101R07").await;
    assert_eq!(status, PaymentStatus::Success);

    h.supervisor.shutdown().await;
    assert_eq!(h.supervisor.registered_loops(), 0);
}
