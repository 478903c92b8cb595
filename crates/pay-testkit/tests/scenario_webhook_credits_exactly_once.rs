//! A provider callback is re-verified and credits tokens exactly once.

use std::sync::Arc;
use std::time::Duration;

use pay_currency::{Currency, CurrencyTable};
use pay_gateway::PaymentState;
use pay_reconcile::{
    NewOrder, OrderRecord, OrderState, OrderStore, ReconcileEngine, ReconcileError,
    RedirectWaitPolicy,
};
use pay_testkit::{GatewayCall, MemoryStore, ScriptedGateway, ScriptedStatus};

fn engine(gateway: Arc<ScriptedGateway>, store: Arc<MemoryStore>) -> ReconcileEngine {
    ReconcileEngine::new(
        gateway,
        store,
        CurrencyTable::default(),
        RedirectWaitPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_total_wait: Duration::from_millis(50),
        },
    )
}

async fn seed_order(store: &MemoryStore, email: &str, mref: &str, sref: &str) -> OrderRecord {
    store
        .create_order(NewOrder {
            user_email: email.to_string(),
            amount: 10.0,
            currency: Currency::Gbp,
            description: "1000 tokens".to_string(),
            tokens: 1000,
            merchant_ref: mref.to_string(),
            system_ref: Some(sref.to_string()),
            status: OrderState::Processing,
            response: serde_json::json!({}),
        })
        .await
        .expect("seed order")
}

#[tokio::test]
async fn webhook_approval_credits_once_and_reverifies() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    store.add_user("buyer@example.com", 0);
    let order = seed_order(&store, "buyer@example.com", "mref-1", "sys-1").await;

    gateway.script_status_for("mref-1", ScriptedStatus::state(PaymentState::Approved));
    gateway.script_status_for("mref-1", ScriptedStatus::state(PaymentState::Approved));

    let eng = engine(gateway.clone(), store.clone());

    // The callback body claims approval but only the reference is trusted.
    let body = serde_json::json!({"order": {"orderSystemId": "sys-1", "orderState": "APPROVED"}});
    let applied = eng.handle_webhook(&body).await.expect("webhook");
    assert_eq!(applied.state, OrderState::Approved);
    assert!(applied.credited);
    assert!(matches!(
        gateway.calls().last(),
        Some(GatewayCall::Status { .. })
    ));

    assert_eq!(store.balance_of("buyer@example.com"), Some(1000));
    let ledger = store.ledger();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].balance_after, 1000);
    assert_eq!(ledger[0].order_id, Some(order.order_id));

    // Replayed callback: terminal order, no second credit.
    let applied = eng.handle_webhook(&body).await.expect("webhook replay");
    assert_eq!(applied.state, OrderState::Approved);
    assert!(!applied.credited);
    assert_eq!(store.balance_of("buyer@example.com"), Some(1000));
    assert_eq!(store.ledger().len(), 1);
}

#[tokio::test]
async fn webhook_without_reference_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    let eng = engine(gateway.clone(), store.clone());

    let err = eng
        .handle_webhook(&serde_json::json!({"hello": "world"}))
        .await
        .expect_err("no reference");
    assert!(matches!(err, ReconcileError::MissingReference));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn webhook_for_unknown_order_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    let eng = engine(gateway.clone(), store.clone());

    let err = eng
        .handle_webhook(&serde_json::json!({"orderSystemId": "sys-nope"}))
        .await
        .expect_err("unknown order");
    assert!(matches!(err, ReconcileError::OrderNotFound(_)));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn webhook_falls_back_to_merchant_reference() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    store.add_user("buyer@example.com", 0);
    // Order persisted before the provider assigned a system reference; the
    // callback carries the merchant reference in the orderId slot.
    let order = store
        .create_order(NewOrder {
            user_email: "buyer@example.com".to_string(),
            amount: 10.0,
            currency: Currency::Gbp,
            description: "1000 tokens".to_string(),
            tokens: 1000,
            merchant_ref: "mref-2".to_string(),
            system_ref: None,
            status: OrderState::Processing,
            response: serde_json::json!({}),
        })
        .await
        .expect("seed order");

    gateway.script_status_for("mref-2", ScriptedStatus::state(PaymentState::Approved));
    let eng = engine(gateway.clone(), store.clone());

    let applied = eng
        .handle_webhook(&serde_json::json!({"orderId": "mref-2"}))
        .await
        .expect("webhook");
    assert_eq!(applied.order_id, order.order_id);
    assert!(applied.credited);
}
