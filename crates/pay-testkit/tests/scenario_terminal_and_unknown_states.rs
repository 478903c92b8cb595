//! Declines never credit, terminal orders never move again, and unknown
//! provider vocabulary leaves an order open for the next pass.

use std::sync::Arc;
use std::time::Duration;

use pay_currency::{Currency, CurrencyTable};
use pay_gateway::PaymentState;
use pay_reconcile::{
    NewOrder, OrderRecord, OrderState, OrderStore, ReconcileEngine, RedirectWaitPolicy,
};
use pay_testkit::{MemoryStore, ScriptedGateway, ScriptedStatus};

fn engine(gateway: Arc<ScriptedGateway>, store: Arc<MemoryStore>) -> ReconcileEngine {
    ReconcileEngine::new(
        gateway,
        store,
        CurrencyTable::default(),
        RedirectWaitPolicy {
            max_attempts: 0,
            initial_delay: Duration::from_millis(1),
            max_total_wait: Duration::from_millis(1),
        },
    )
}

async fn seed(store: &MemoryStore, mref: &str) -> OrderRecord {
    store
        .create_order(NewOrder {
            user_email: "buyer@example.com".to_string(),
            amount: 10.0,
            currency: Currency::Gbp,
            description: "1000 tokens".to_string(),
            tokens: 1000,
            merchant_ref: mref.to_string(),
            system_ref: Some(format!("sys-{mref}")),
            status: OrderState::Processing,
            response: serde_json::json!({}),
        })
        .await
        .expect("seed order")
}

#[tokio::test]
async fn declined_order_never_credits() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    store.add_user("buyer@example.com", 0);
    seed(&store, "mref-d").await;

    gateway.script_status_for("mref-d", ScriptedStatus::state(PaymentState::Declined));
    let eng = engine(gateway.clone(), store.clone());

    let report = eng.sweep().await.expect("sweep");
    assert_eq!(report.advanced, 1);
    assert_eq!(report.credited, 0);
    assert_eq!(store.balance_of("buyer@example.com"), Some(0));
    assert!(store.ledger().is_empty());

    // A later (bogus) approval cannot resurrect a declined order.
    gateway.script_status_for("mref-d", ScriptedStatus::state(PaymentState::Approved));
    let applied = eng
        .handle_webhook(&serde_json::json!({"orderSystemId": "sys-mref-d"}))
        .await
        .expect("webhook");
    assert_eq!(applied.state, OrderState::Declined);
    assert!(!applied.credited);
    assert_eq!(store.balance_of("buyer@example.com"), Some(0));
}

#[tokio::test]
async fn unknown_provider_state_leaves_order_open() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    store.add_user("buyer@example.com", 0);
    let order = seed(&store, "mref-u").await;

    gateway.script_status_for(
        "mref-u",
        ScriptedStatus::state(PaymentState::Other("3DS_WAIT".to_string())),
    );
    let eng = engine(gateway.clone(), store.clone());

    let report = eng.sweep().await.expect("first sweep");
    assert_eq!(report.checked, 1);
    assert_eq!(report.advanced, 0);
    let reread = store.order(order.order_id).expect("order");
    assert_eq!(reread.status, OrderState::Processing);
    assert!(!reread.credited);

    // The next pass sees a real outcome and settles the order.
    gateway.script_status_for("mref-u", ScriptedStatus::state(PaymentState::Approved));
    let report = eng.sweep().await.expect("second sweep");
    assert_eq!(report.advanced, 1);
    assert_eq!(report.credited, 1);
    assert_eq!(store.balance_of("buyer@example.com"), Some(1000));
}

#[tokio::test]
async fn failed_order_is_terminal() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    store.add_user("buyer@example.com", 0);
    let order = seed(&store, "mref-f").await;

    gateway.script_status_for("mref-f", ScriptedStatus::state(PaymentState::Failed));
    let eng = engine(gateway.clone(), store.clone());

    eng.sweep().await.expect("sweep");
    let reread = store.order(order.order_id).expect("order");
    assert_eq!(reread.status, OrderState::Failed);

    // Terminal orders answer status lookups from storage, no provider call.
    let before = gateway.status_call_count();
    let applied = eng
        .check_by_merchant_ref("mref-f")
        .await
        .expect("status lookup");
    assert_eq!(applied.state, OrderState::Failed);
    assert_eq!(gateway.status_call_count(), before);
}
