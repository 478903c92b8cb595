//! The persistence seam of the reconcile engine.
//!
//! [`OrderStore`] is implemented by the Postgres store (pay-db) in production
//! and by an in-memory store (pay-testkit) in tests. The crediting contract
//! lives here: [`OrderStore::credit_order`] must be an atomic check-and-set
//! on the order's `credited` flag, so that any number of concurrent callers
//! produce exactly one ledger entry and one balance change.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pay_currency::Currency;
use serde_json::Value;
use uuid::Uuid;

use crate::state::OrderState;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An order to insert. The store assigns `order_id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_email: String,
    pub amount: f64,
    pub currency: Currency,
    pub description: String,
    /// Tokens this order buys on approval, fixed at creation time.
    pub tokens: i64,
    pub merchant_ref: String,
    pub system_ref: Option<String>,
    pub status: OrderState,
    /// Last raw provider response, kept for audit.
    pub response: Value,
}

#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order_id: Uuid,
    pub user_email: String,
    pub amount: f64,
    pub currency: Currency,
    pub description: String,
    pub tokens: i64,
    pub merchant_ref: String,
    pub system_ref: Option<String>,
    pub status: OrderState,
    pub credited: bool,
    pub response: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: Uuid,
    pub email: String,
    pub token_balance: i64,
    pub currency: Currency,
}

/// One append-only ledger row. `balance_after` snapshots the user's balance
/// as of this entry so history reads need no folding.
#[derive(Debug, Clone)]
pub struct LedgerEntryRecord {
    pub entry_id: Uuid,
    pub user_id: Uuid,
    pub entry_type: String,
    pub delta: i64,
    pub balance_after: i64,
    pub currency: Currency,
    /// Money moved, in minor units, when the entry is tied to a payment.
    pub amount_minor: Option<i64>,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Result of the atomic credit check-and-set.
#[derive(Debug, Clone)]
pub enum CreditOutcome {
    /// This caller won the flag flip; the ledger entry was written.
    Credited(LedgerEntryRecord),
    /// Another trigger already credited this order.
    AlreadyCredited,
    /// The order's email matches no user. The order stays approved and
    /// uncredited; operators reconcile by hand.
    UserNotFound,
}

/// Result of a manual ledger append.
#[derive(Debug, Clone)]
pub enum LedgerOutcome {
    /// The balance moved and the entry was written.
    Applied(LedgerEntryRecord),
    /// The delta would take the balance below zero; nothing was written.
    InsufficientBalance { balance: i64, delta: i64 },
}

// ---------------------------------------------------------------------------
// OrderStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, new: NewOrder) -> anyhow::Result<OrderRecord>;

    /// Persist a state advance. Updates `system_ref` when the provider
    /// finally reports one, and refreshes the stored raw response.
    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderState,
        system_ref: Option<&str>,
        response: &Value,
    ) -> anyhow::Result<()>;

    async fn find_by_merchant_ref(&self, merchant_ref: &str)
        -> anyhow::Result<Option<OrderRecord>>;

    async fn find_by_system_ref(&self, system_ref: &str) -> anyhow::Result<Option<OrderRecord>>;

    /// All orders the sweep still owes work: PENDING and PROCESSING rows,
    /// plus APPROVED rows whose credit has not landed.
    async fn find_open_orders(&self) -> anyhow::Result<Vec<OrderRecord>>;

    async fn list_orders_for_email(&self, email: &str) -> anyhow::Result<Vec<OrderRecord>>;

    async fn fetch_user_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>>;

    /// Fetch the user for `email`, creating a zero-balance account when none
    /// exists. Used by manual top-ups; the payment path never creates users.
    async fn ensure_user(&self, email: &str) -> anyhow::Result<UserRecord>;

    /// Atomically flip the order's `credited` flag and, if this caller won,
    /// apply the token delta and append the ledger entry in one transaction.
    async fn credit_order(&self, order_id: Uuid) -> anyhow::Result<CreditOutcome>;

    /// Append a manual ledger entry (top-up or adjustment) and move the
    /// user's balance, in one transaction. An overdraft is a refusal, not
    /// an error: callers match on [`LedgerOutcome`].
    async fn append_ledger(
        &self,
        user_id: Uuid,
        entry_type: &str,
        delta: i64,
        currency: Currency,
        amount_minor: Option<i64>,
    ) -> anyhow::Result<LedgerOutcome>;

    async fn list_ledger_for_user(&self, user_id: Uuid)
        -> anyhow::Result<Vec<LedgerEntryRecord>>;
}
