//! In-memory [`OrderStore`] with the production crediting contract.
//!
//! One mutex guards all tables, so every trait method is atomic exactly the
//! way the Postgres transactions are. The lock is never held across an
//! await point.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use pay_currency::{to_minor_units, Currency};
use pay_reconcile::{
    CreditOutcome, LedgerEntryRecord, LedgerOutcome, NewOrder, OrderRecord, OrderState,
    OrderStore, UserRecord,
};
use serde_json::Value;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    orders: HashMap<Uuid, OrderRecord>,
    users: HashMap<Uuid, UserRecord>,
    ledger: Vec<LedgerEntryRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user. Test setup only; the engine never creates users.
    pub fn add_user(&self, email: &str, token_balance: i64) -> UserRecord {
        let user = UserRecord {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            token_balance,
            currency: Currency::Gbp,
        };
        self.inner
            .lock()
            .expect("store lock")
            .users
            .insert(user.user_id, user.clone());
        user
    }

    pub fn order(&self, order_id: Uuid) -> Option<OrderRecord> {
        self.inner
            .lock()
            .expect("store lock")
            .orders
            .get(&order_id)
            .cloned()
    }

    pub fn ledger(&self) -> Vec<LedgerEntryRecord> {
        self.inner.lock().expect("store lock").ledger.clone()
    }

    pub fn balance_of(&self, email: &str) -> Option<i64> {
        let inner = self.inner.lock().expect("store lock");
        inner
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .map(|u| u.token_balance)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(&self, new: NewOrder) -> Result<OrderRecord> {
        let mut inner = self.inner.lock().expect("store lock");
        if inner
            .orders
            .values()
            .any(|o| o.merchant_ref == new.merchant_ref)
        {
            return Err(anyhow!("duplicate merchant_ref {}", new.merchant_ref));
        }
        let now = Utc::now();
        let order = OrderRecord {
            order_id: Uuid::new_v4(),
            user_email: new.user_email,
            amount: new.amount,
            currency: new.currency,
            description: new.description,
            tokens: new.tokens,
            merchant_ref: new.merchant_ref,
            system_ref: new.system_ref,
            status: new.status,
            credited: false,
            response: new.response,
            created_at: now,
            updated_at: now,
        };
        inner.orders.insert(order.order_id, order.clone());
        Ok(order)
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderState,
        system_ref: Option<&str>,
        response: &Value,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock");
        let Some(order) = inner.orders.get_mut(&order_id) else {
            return Err(anyhow!("no order with id {order_id}"));
        };
        // Terminal rows are immutable, mirroring the SQL state guard.
        if order.status.is_terminal() {
            return Ok(());
        }
        order.status = status;
        if let Some(sr) = system_ref {
            order.system_ref = Some(sr.to_string());
        }
        order.response = response.clone();
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn find_by_merchant_ref(&self, merchant_ref: &str) -> Result<Option<OrderRecord>> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .orders
            .values()
            .find(|o| o.merchant_ref == merchant_ref)
            .cloned())
    }

    async fn find_by_system_ref(&self, system_ref: &str) -> Result<Option<OrderRecord>> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .orders
            .values()
            .find(|o| o.system_ref.as_deref() == Some(system_ref))
            .cloned())
    }

    async fn find_open_orders(&self) -> Result<Vec<OrderRecord>> {
        let inner = self.inner.lock().expect("store lock");
        let mut open: Vec<OrderRecord> = inner
            .orders
            .values()
            .filter(|o| {
                !o.status.is_terminal() || (o.status == OrderState::Approved && !o.credited)
            })
            .cloned()
            .collect();
        open.sort_by_key(|o| o.created_at);
        Ok(open)
    }

    async fn list_orders_for_email(&self, email: &str) -> Result<Vec<OrderRecord>> {
        let inner = self.inner.lock().expect("store lock");
        let mut orders: Vec<OrderRecord> = inner
            .orders
            .values()
            .filter(|o| o.user_email.eq_ignore_ascii_case(email))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn fetch_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn ensure_user(&self, email: &str) -> Result<UserRecord> {
        if let Some(user) = self.fetch_user_by_email(email).await? {
            return Ok(user);
        }
        Ok(self.add_user(email, 0))
    }

    async fn credit_order(&self, order_id: Uuid) -> Result<CreditOutcome> {
        let mut inner = self.inner.lock().expect("store lock");

        let Some(order) = inner.orders.get(&order_id).cloned() else {
            return Err(anyhow!("no order with id {order_id}"));
        };
        if order.credited {
            return Ok(CreditOutcome::AlreadyCredited);
        }

        let Some(user_id) = inner
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(&order.user_email))
            .map(|u| u.user_id)
        else {
            return Ok(CreditOutcome::UserNotFound);
        };

        let user = inner.users.get_mut(&user_id).expect("user present");
        user.token_balance += order.tokens;
        let balance_after = user.token_balance;
        let currency = user.currency;

        inner.orders.get_mut(&order_id).expect("order present").credited = true;

        let entry = LedgerEntryRecord {
            entry_id: Uuid::new_v4(),
            user_id,
            entry_type: "Purchase".to_string(),
            delta: order.tokens,
            balance_after,
            currency,
            amount_minor: Some(to_minor_units(order.amount)),
            order_id: Some(order_id),
            created_at: Utc::now(),
        };
        inner.ledger.push(entry.clone());
        Ok(CreditOutcome::Credited(entry))
    }

    async fn append_ledger(
        &self,
        user_id: Uuid,
        entry_type: &str,
        delta: i64,
        currency: Currency,
        amount_minor: Option<i64>,
    ) -> Result<LedgerOutcome> {
        let mut inner = self.inner.lock().expect("store lock");
        let Some(user) = inner.users.get_mut(&user_id) else {
            return Err(anyhow!("no user with id {user_id}"));
        };
        if user.token_balance + delta < 0 {
            return Ok(LedgerOutcome::InsufficientBalance {
                balance: user.token_balance,
                delta,
            });
        }
        user.token_balance += delta;
        let entry = LedgerEntryRecord {
            entry_id: Uuid::new_v4(),
            user_id,
            entry_type: entry_type.to_string(),
            delta,
            balance_after: user.token_balance,
            currency,
            amount_minor,
            order_id: None,
            created_at: Utc::now(),
        };
        inner.ledger.push(entry.clone());
        Ok(LedgerOutcome::Applied(entry))
    }

    async fn list_ledger_for_user(&self, user_id: Uuid) -> Result<Vec<LedgerEntryRecord>> {
        let inner = self.inner.lock().expect("store lock");
        let mut entries: Vec<LedgerEntryRecord> = inner
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }
}
