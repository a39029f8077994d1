//! 兑换、号码租用与短信拉取的端到端流程测试
//!
//! 存储使用内存实现，支付服务商与短信源使用 wiremock 模拟 HTTP 接口。

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use otp_shared::config::AppConfig;

use credit_ledger::repository::{AccountRepositoryTrait, LedgerRepositoryTrait};
use credit_ledger::{
    Backends, CreditLedgerApp, HttpPaymentVerifier, HttpSmsSource, InMemoryStore, LedgerError,
    LedgerReason, NewCountry, NewGiftCode,
};

struct Harness {
    store: Arc<InMemoryStore>,
    app: CreditLedgerApp,
}

fn config(payment: &MockServer, sms: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.payment.base_url = payment.uri();
    config.payment.secret_key = "sk_test_123".to_string();
    config.payment.timeout_seconds = 2;
    config.sms.base_url = format!("{}/api", sms.uri());
    config.sms.api_token = Some("sms-token".to_string());
    config.sms.timeout_seconds = 2;
    config.sms.follow_up_delay_ms = 10;
    config.rate_limit.number_lease_per_minute = 3;
    config
}

async fn harness(payment: &MockServer, sms: &MockServer) -> Harness {
    let config = config(payment, sms);
    let store = Arc::new(InMemoryStore::new());
    let backends = Backends::in_memory(
        &config,
        store.clone(),
        Arc::new(HttpPaymentVerifier::new(&config.payment).unwrap()),
        Arc::new(HttpSmsSource::new(&config.sms).unwrap()),
    );
    let app = CreditLedgerApp::build(&config, backends);
    Harness { store, app }
}

async fn sign_up(h: &Harness, username: &str) -> Uuid {
    h.app.accounts.sign_up(username, None).await.unwrap().account.id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_welcome100_single_claim_under_contention() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    let h = harness(&payment, &sms).await;
    let alice = sign_up(&h, "alice").await;
    let bob = sign_up(&h, "bob").await;

    h.app
        .redemptions
        .create_gift_code(NewGiftCode {
            code: "WELCOME100".to_string(),
            credits_amount: 100,
            max_claims: 1,
            expiry_date: Utc::now() + Duration::days(30),
        })
        .await
        .unwrap();

    let first = {
        let redemptions = h.app.redemptions.clone();
        tokio::spawn(async move { redemptions.claim_gift_code("WELCOME100", alice).await })
    };
    let second = {
        let redemptions = h.app.redemptions.clone();
        tokio::spawn(async move { redemptions.claim_gift_code("WELCOME100", bob).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    let successes: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(successes.len(), 1);
    assert!(successes[0].success);
    assert_eq!(successes[0].credits_added, 100);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::Exhausted(_))))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_lease_scenario_debits_five_credits() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    let h = harness(&payment, &sms).await;
    let alice = sign_up(&h, "alice").await;
    let country = h
        .app
        .allocator
        .add_country(NewCountry {
            name: "Netherlands".to_string(),
            code: "NL".to_string(),
            numbers_file: "+31600000001\n+31600000002\n+31600000003\n".to_string(),
        })
        .await
        .unwrap();

    let lease = h.app.lease_number(alice, country.id).await.unwrap();
    assert_eq!(lease.new_balance, 95);
    assert!(lease.phone_number.starts_with("+316"));

    let account = h.store.get_account(alice).await.unwrap().unwrap();
    assert_eq!(account.balance, 95);

    let lease_entries: Vec<_> = h
        .store
        .list_entries(alice, 50)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.reason == LedgerReason::NumberLease)
        .collect();
    assert_eq!(lease_entries.len(), 1);
    assert_eq!(lease_entries[0].delta, -5);
    assert_eq!(lease_entries[0].reason.as_str(), "number-lease");
}

#[tokio::test]
async fn test_lease_rate_limited_at_boundary() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    let h = harness(&payment, &sms).await;
    let alice = sign_up(&h, "alice").await;
    let country = h
        .app
        .allocator
        .add_country(NewCountry {
            name: "Canada".to_string(),
            code: "CA".to_string(),
            numbers_file: "+15550100".to_string(),
        })
        .await
        .unwrap();

    for _ in 0..3 {
        h.app.lease_number(alice, country.id).await.unwrap();
    }
    let err = h.app.lease_number(alice, country.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::RateLimited { .. }));

    // 限流拒绝不扣费
    let account = h.store.get_account(alice).await.unwrap().unwrap();
    assert_eq!(account.balance, 85);
}

#[tokio::test]
async fn test_payment_verified_twice_credits_once() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    Mock::given(method("GET"))
        .and(path("/verify/T-2025-0001"))
        .and(header("authorization", "Bearer sk_test_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Verification successful",
            "data": { "status": "success", "amount": 50_000 }
        })))
        .expect(1)
        .mount(&payment)
        .await;

    let h = harness(&payment, &sms).await;
    let alice = sign_up(&h, "alice").await;

    let first = h
        .app
        .redemptions
        .verify_payment("T-2025-0001", alice)
        .await
        .unwrap();
    assert!(first.success);
    assert_eq!(first.credits_added, 500);
    assert_eq!(first.new_balance, 600);

    let second = h
        .app
        .redemptions
        .verify_payment("T-2025-0001", alice)
        .await
        .unwrap();
    assert!(second.success);
    assert_eq!(second.credits_added, 500);
    assert!(second.replayed);

    assert_eq!(h.store.get_account(alice).await.unwrap().unwrap().balance, 600);
    let stats = h.app.ledger.wallet_stats().await.unwrap();
    assert_eq!(stats.total_purchased, 500);
}

#[tokio::test]
async fn test_payment_abandoned_is_verification_failure() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    Mock::given(method("GET"))
        .and(path("/verify/T-ABANDONED"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Verification successful",
            "data": { "status": "abandoned", "amount": 50_000 }
        })))
        .mount(&payment)
        .await;

    let h = harness(&payment, &sms).await;
    let alice = sign_up(&h, "alice").await;

    let err = h
        .app
        .redemptions
        .verify_payment("T-ABANDONED", alice)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::VerificationFailed { .. }));
    assert_eq!(h.store.get_account(alice).await.unwrap().unwrap().balance, 100);
}

#[tokio::test]
async fn test_payment_unknown_reference_is_verification_failure() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    Mock::given(method("GET"))
        .and(path("/verify/T-MISSING"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": false,
            "message": "Transaction reference not found"
        })))
        .expect(1)
        .mount(&payment)
        .await;

    let h = harness(&payment, &sms).await;
    let alice = sign_up(&h, "alice").await;

    let err = h
        .app
        .redemptions
        .verify_payment("T-MISSING", alice)
        .await
        .unwrap_err();
    match err {
        LedgerError::VerificationFailed { reason, .. } => {
            assert_eq!(reason, "Transaction reference not found")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_payment_provider_outage_retried_once_without_credit() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    Mock::given(method("GET"))
        .and(path("/verify/T-OUTAGE"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&payment)
        .await;

    let h = harness(&payment, &sms).await;
    let alice = sign_up(&h, "alice").await;

    let err = h
        .app
        .redemptions
        .verify_payment("T-OUTAGE", alice)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ExternalUnavailable { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.store.get_account(alice).await.unwrap().unwrap().balance, 100);
}

fn sms_body() -> serde_json::Value {
    json!({
        "status": "success",
        "data": [
            { "dt": "2025-06-01 12:00:00", "num": "447700900123", "cli": "Google", "message": "G-482913 is your verification code" },
            { "dt": "2025-06-01 12:00:05", "num": "447700900123", "cli": "Telegram", "message": "Telegram code: 55120" }
        ]
    })
}

#[tokio::test]
async fn test_sms_polled_twice_records_once() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    Mock::given(method("GET"))
        .and(path("/api/messages"))
        .and(query_param("token", "sms-token"))
        .and(query_param("filternum", "447700900123"))
        .and(query_param("records", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sms_body()))
        .mount(&sms)
        .await;

    let h = harness(&payment, &sms).await;

    let first = h.app.sms_poller.poll("447700900123").await.unwrap();
    assert!(first.source_available);
    assert_eq!(first.new_messages, 2);

    let second = h.app.sms_poller.poll("447700900123").await.unwrap();
    assert_eq!(second.new_messages, 0);
    let third = h.app.sms_poller.poll("447700900123").await.unwrap();
    assert_eq!(third.new_messages, 0);

    let messages = h.app.sms_poller.messages("447700900123").await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, "Telegram");
}

#[tokio::test]
async fn test_sms_check_through_boundary() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    Mock::given(method("GET"))
        .and(path("/api/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sms_body()))
        .expect(2)
        .mount(&sms)
        .await;

    let h = harness(&payment, &sms).await;
    let alice = sign_up(&h, "alice").await;

    let inbox = h.app.check_sms(alice, "447700900123").await.unwrap();
    assert_eq!(inbox.new_messages, 2);
    assert_eq!(inbox.messages.len(), 2);
}

#[tokio::test]
async fn test_sms_source_outage_is_soft_failure() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    Mock::given(method("GET"))
        .and(path("/api/messages"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&sms)
        .await;

    let h = harness(&payment, &sms).await;

    let outcome = h.app.sms_poller.poll("447700900123").await.unwrap();
    assert!(!outcome.source_available);
    assert_eq!(outcome.new_messages, 0);
}

#[tokio::test]
async fn test_sms_non_success_status_means_no_messages() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    Mock::given(method("GET"))
        .and(path("/api/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "error",
            "message": "no messages"
        })))
        .mount(&sms)
        .await;

    let h = harness(&payment, &sms).await;

    let outcome = h.app.sms_poller.poll("447700900123").await.unwrap();
    assert!(outcome.source_available);
    assert_eq!(outcome.fetched, 0);
    assert_eq!(outcome.new_messages, 0);
}

#[tokio::test]
async fn test_sign_up_referral_and_daily_bonus_flow() {
    let (payment, sms) = (MockServer::start().await, MockServer::start().await);
    let h = harness(&payment, &sms).await;

    let alice = h.app.accounts.sign_up("alice", None).await.unwrap();
    let bob = h
        .app
        .accounts
        .sign_up("bob", Some(alice.account.referral_code.as_str()))
        .await
        .unwrap();
    assert_eq!(bob.referral.map(|r| r.credits_added), Some(50));

    let daily = h.app.accounts.on_login(bob.account.id).await.unwrap();
    assert!(daily.success);
    assert_eq!(daily.new_balance, 150);

    let history = h.app.ledger.history(alice.account.id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].reason, LedgerReason::Referral);
    assert_eq!(history[1].reason, LedgerReason::Opening);
}
