//! pay-db
//!
//! Postgres implementation of the reconcile engine's [`OrderStore`] seam.
//!
//! The crediting path is the one piece of money-adjacent logic in this crate
//! and it is deliberately paranoid: the order row is locked and its
//! `credited` flag flipped, the user row is locked, the balance moved, and
//! the ledger row appended, all inside one transaction. The
//! `uq_ledger_order` unique constraint backstops the flag at the schema
//! level.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pay_currency::{to_minor_units, Currency};
use pay_reconcile::{
    CreditOutcome, LedgerEntryRecord, LedgerOutcome, NewOrder, OrderRecord, OrderState,
    OrderStore, UserRecord,
};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "PAY_DATABASE_URL";

/// Ledger entry written when an approved order is credited.
pub const ENTRY_PURCHASE: &str = "Purchase";

/// Connect to Postgres using PAY_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_orders_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const ORDER_COLUMNS: &str = r#"
    order_id, user_email, amount, currency, description, tokens,
    merchant_ref, system_ref, status, credited, response,
    created_at, updated_at
"#;

fn order_from_row(row: &PgRow) -> Result<OrderRecord> {
    Ok(OrderRecord {
        order_id: row.try_get("order_id")?,
        user_email: row.try_get("user_email")?,
        amount: row.try_get("amount")?,
        currency: Currency::parse(&row.try_get::<String, _>("currency")?)?,
        description: row.try_get("description")?,
        tokens: row.try_get("tokens")?,
        merchant_ref: row.try_get("merchant_ref")?,
        system_ref: row.try_get("system_ref")?,
        status: OrderState::parse(&row.try_get::<String, _>("status")?)?,
        credited: row.try_get("credited")?,
        response: row.try_get("response")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<UserRecord> {
    Ok(UserRecord {
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        token_balance: row.try_get("token_balance")?,
        currency: Currency::parse(&row.try_get::<String, _>("currency")?)?,
    })
}

fn ledger_from_row(row: &PgRow) -> Result<LedgerEntryRecord> {
    Ok(LedgerEntryRecord {
        entry_id: row.try_get("entry_id")?,
        user_id: row.try_get("user_id")?,
        entry_type: row.try_get("entry_type")?,
        delta: row.try_get("delta")?,
        balance_after: row.try_get("balance_after")?,
        currency: Currency::parse(&row.try_get::<String, _>("currency")?)?,
        amount_minor: row.try_get("amount_minor")?,
        order_id: row.try_get("order_id")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Detect a Postgres unique constraint violation by name.
fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn create_order(&self, new: NewOrder) -> Result<OrderRecord> {
        let order_id = Uuid::new_v4();
        let row = sqlx::query(&format!(
            r#"
            insert into orders (
              order_id, user_email, amount, currency, description, tokens,
              merchant_ref, system_ref, status, response
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            )
            returning {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(&new.user_email)
        .bind(new.amount)
        .bind(new.currency.as_str())
        .bind(&new.description)
        .bind(new.tokens)
        .bind(&new.merchant_ref)
        .bind(&new.system_ref)
        .bind(new.status.as_str())
        .bind(&new.response)
        .fetch_one(&self.pool)
        .await
        .context("create_order insert failed")?;

        order_from_row(&row)
    }

    /// State-guarded update: terminal rows are immutable at the SQL layer,
    /// so a racing trigger that lost cannot overwrite the outcome.
    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderState,
        system_ref: Option<&str>,
        response: &Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            update orders
            set status = $2,
                system_ref = coalesce($3, system_ref),
                response = $4,
                updated_at = now()
            where order_id = $1
              and status in ('PENDING','PROCESSING')
            "#,
        )
        .bind(order_id)
        .bind(status.as_str())
        .bind(system_ref)
        .bind(response)
        .execute(&self.pool)
        .await
        .context("update_order_status failed")?;

        Ok(())
    }

    async fn find_by_merchant_ref(&self, merchant_ref: &str) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from orders where merchant_ref = $1"
        ))
        .bind(merchant_ref)
        .fetch_optional(&self.pool)
        .await
        .context("find_by_merchant_ref failed")?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_by_system_ref(&self, system_ref: &str) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from orders where system_ref = $1"
        ))
        .bind(system_ref)
        .fetch_optional(&self.pool)
        .await
        .context("find_by_system_ref failed")?;

        row.as_ref().map(order_from_row).transpose()
    }

    /// Open rows plus approved rows still owed their credit, so the sweep
    /// can settle orders that crashed between approval and crediting.
    async fn find_open_orders(&self) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            select {ORDER_COLUMNS}
            from orders
            where status in ('PENDING','PROCESSING')
               or (status = 'APPROVED' and not credited)
            order by created_at
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .context("find_open_orders failed")?;

        rows.iter().map(order_from_row).collect()
    }

    async fn list_orders_for_email(&self, email: &str) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            select {ORDER_COLUMNS}
            from orders
            where lower(user_email) = lower($1)
            order by created_at desc
            "#
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .context("list_orders_for_email failed")?;

        rows.iter().map(order_from_row).collect()
    }

    async fn fetch_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            r#"
            select user_id, email, token_balance, currency
            from users
            where lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("fetch_user_by_email failed")?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn ensure_user(&self, email: &str) -> Result<UserRecord> {
        if let Some(user) = self.fetch_user_by_email(email).await? {
            return Ok(user);
        }
        let row = sqlx::query(
            r#"
            insert into users (email)
            values ($1)
            on conflict (lower(email)) do update set email = users.email
            returning user_id, email, token_balance, currency
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .context("ensure_user insert failed")?;

        user_from_row(&row)
    }

    async fn credit_order(&self, order_id: Uuid) -> Result<CreditOutcome> {
        let mut tx = self.pool.begin().await.context("credit_order begin failed")?;

        // Lock the order row first; concurrent callers serialize here.
        let order_row = sqlx::query(
            r#"
            select user_email, tokens, amount, currency, credited
            from orders
            where order_id = $1
            for update
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .context("credit_order order lock failed")?
        .ok_or_else(|| anyhow!("credit_order: no order with id {order_id}"))?;

        if order_row.try_get::<bool, _>("credited")? {
            tx.rollback().await.ok();
            return Ok(CreditOutcome::AlreadyCredited);
        }

        let user_email: String = order_row.try_get("user_email")?;
        let tokens: i64 = order_row.try_get("tokens")?;
        let amount: f64 = order_row.try_get("amount")?;
        let currency = Currency::parse(&order_row.try_get::<String, _>("currency")?)?;

        let user_row = sqlx::query(
            r#"
            select user_id, token_balance
            from users
            where lower(email) = lower($1)
            for update
            "#,
        )
        .bind(&user_email)
        .fetch_optional(&mut *tx)
        .await
        .context("credit_order user lock failed")?;

        let Some(user_row) = user_row else {
            tx.rollback().await.ok();
            return Ok(CreditOutcome::UserNotFound);
        };
        let user_id: Uuid = user_row.try_get("user_id")?;
        let balance: i64 = user_row.try_get("token_balance")?;
        let balance_after = balance + tokens;

        sqlx::query(
            r#"
            update orders
            set credited = true, updated_at = now()
            where order_id = $1
            "#,
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await
        .context("credit_order flag flip failed")?;

        sqlx::query("update users set token_balance = $2 where user_id = $1")
            .bind(user_id)
            .bind(balance_after)
            .execute(&mut *tx)
            .await
            .context("credit_order balance update failed")?;

        let entry_id = Uuid::new_v4();
        let res = sqlx::query(
            r#"
            insert into ledger_entries (
              entry_id, user_id, entry_type, delta, balance_after,
              currency, amount_minor, order_id
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8
            )
            returning entry_id, user_id, entry_type, delta, balance_after,
                      currency, amount_minor, order_id, created_at
            "#,
        )
        .bind(entry_id)
        .bind(user_id)
        .bind(ENTRY_PURCHASE)
        .bind(tokens)
        .bind(balance_after)
        .bind(currency.as_str())
        .bind(to_minor_units(amount))
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await;

        let entry_row = match res {
            Ok(row) => row,
            Err(e) if is_unique_constraint_violation(&e, "uq_ledger_order") => {
                // Schema backstop fired: someone credited between our lock
                // release windows. Roll back and report the duplicate.
                tx.rollback().await.ok();
                return Ok(CreditOutcome::AlreadyCredited);
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context("credit_order ledger insert failed"))
            }
        };
        let entry = ledger_from_row(&entry_row)?;

        tx.commit().await.context("credit_order commit failed")?;
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
        let mut tx = self.pool.begin().await.context("append_ledger begin failed")?;

        let user_row = sqlx::query(
            "select token_balance from users where user_id = $1 for update",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("append_ledger user lock failed")?
        .ok_or_else(|| anyhow!("append_ledger: no user with id {user_id}"))?;

        let balance: i64 = user_row.try_get("token_balance")?;
        let balance_after = balance + delta;
        if balance_after < 0 {
            tx.rollback().await.ok();
            return Ok(LedgerOutcome::InsufficientBalance { balance, delta });
        }

        sqlx::query("update users set token_balance = $2 where user_id = $1")
            .bind(user_id)
            .bind(balance_after)
            .execute(&mut *tx)
            .await
            .context("append_ledger balance update failed")?;

        let row = sqlx::query(
            r#"
            insert into ledger_entries (
              entry_id, user_id, entry_type, delta, balance_after,
              currency, amount_minor, order_id
            ) values (
              $1, $2, $3, $4, $5, $6, $7, null
            )
            returning entry_id, user_id, entry_type, delta, balance_after,
                      currency, amount_minor, order_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(entry_type)
        .bind(delta)
        .bind(balance_after)
        .bind(currency.as_str())
        .bind(amount_minor)
        .fetch_one(&mut *tx)
        .await
        .context("append_ledger insert failed")?;
        let entry = ledger_from_row(&row)?;

        tx.commit().await.context("append_ledger commit failed")?;
        Ok(LedgerOutcome::Applied(entry))
    }

    async fn list_ledger_for_user(&self, user_id: Uuid) -> Result<Vec<LedgerEntryRecord>> {
        let rows = sqlx::query(
            r#"
            select entry_id, user_id, entry_type, delta, balance_after,
                   currency, amount_minor, order_id, created_at
            from ledger_entries
            where user_id = $1
            order by created_at desc
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("list_ledger_for_user failed")?;

        rows.iter().map(ledger_from_row).collect()
    }
}
