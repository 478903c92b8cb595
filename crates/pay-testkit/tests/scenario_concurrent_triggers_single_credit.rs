//! A webhook and a sweep racing on the same approval produce one credit.

use std::sync::Arc;
use std::time::Duration;

use pay_currency::{Currency, CurrencyTable};
use pay_gateway::PaymentState;
use pay_reconcile::{
    NewOrder, OrderState, OrderStore, ReconcileEngine, RedirectWaitPolicy,
};
use pay_testkit::{MemoryStore, ScriptedGateway, ScriptedStatus};

#[tokio::test]
async fn racing_webhook_and_sweep_credit_once() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    store.add_user("buyer@example.com", 0);
    store
        .create_order(NewOrder {
            user_email: "buyer@example.com".to_string(),
            amount: 50.0,
            currency: Currency::Gbp,
            description: "5000 tokens".to_string(),
            tokens: 5000,
            merchant_ref: "mref-race".to_string(),
            system_ref: Some("sys-race".to_string()),
            status: OrderState::Processing,
            response: serde_json::json!({}),
        })
        .await
        .expect("seed order");

    // Both triggers will observe APPROVED.
    gateway.script_status_for("mref-race", ScriptedStatus::state(PaymentState::Approved));
    gateway.script_status_for("mref-race", ScriptedStatus::state(PaymentState::Approved));

    let eng = Arc::new(ReconcileEngine::new(
        gateway.clone(),
        store.clone(),
        CurrencyTable::default(),
        RedirectWaitPolicy {
            max_attempts: 0,
            initial_delay: Duration::from_millis(1),
            max_total_wait: Duration::from_millis(1),
        },
    ));

    let body = serde_json::json!({"orderSystemId": "sys-race"});
    let (webhook, sweep) = tokio::join!(eng.handle_webhook(&body), eng.sweep());
    let webhook = webhook.expect("webhook");
    let report = sweep.expect("sweep");

    let credits = usize::from(webhook.credited) + report.credited;
    assert_eq!(credits, 1, "exactly one trigger may credit");
    assert_eq!(store.balance_of("buyer@example.com"), Some(5000));
    assert_eq!(store.ledger().len(), 1);
}
