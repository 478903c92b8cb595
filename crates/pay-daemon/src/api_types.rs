//! Request and response types for all pay-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded by
//! Axum and decoded by tests. No business logic lives here; card fields pass
//! through to the gateway types and are never logged or persisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pay_gateway::CardDetails;
use pay_reconcile::{LedgerEntryRecord, OrderRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Error body (any non-2xx)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// POST /v1/sale
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardBody {
    pub printed_name: String,
    pub number: String,
    pub cvv: String,
    pub expire_month: String,
    pub expire_year: String,
    pub postal_code: String,
    pub city: String,
    pub address_line1: String,
    pub country_code: String,
}

impl CardBody {
    pub fn into_details(self) -> CardDetails {
        CardDetails {
            printed_name: self.printed_name,
            number: self.number,
            cvv: self.cvv,
            expire_month: self.expire_month,
            expire_year: self.expire_year,
            postal_code: self.postal_code,
            city: self.city,
            address_line1: self.address_line1,
            country_code: self.country_code,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleBody {
    pub email: String,
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    pub card: CardBody,
}

/// 202 body when checkout ends without a 3-D-Secure redirect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalePendingResponse {
    pub status: &'static str,
    pub order_id: Uuid,
    pub merchant_ref: String,
    pub state: String,
    pub credited: bool,
}

// ---------------------------------------------------------------------------
// POST /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBody {
    #[serde(default)]
    pub merchant_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub order_id: Uuid,
    pub state: String,
    pub credited: bool,
}

// ---------------------------------------------------------------------------
// POST /v1/webhook  POST /v1/sweep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResponse {
    pub checked: usize,
    pub advanced: usize,
    pub credited: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// GET /v1/orders  GET /v1/ledger  POST /v1/ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EmailQuery {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderView {
    pub order_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub tokens: i64,
    pub merchant_ref: String,
    pub system_ref: Option<String>,
    pub status: String,
    pub credited: bool,
    pub created_at: DateTime<Utc>,
}

impl From<OrderRecord> for OrderView {
    fn from(o: OrderRecord) -> Self {
        Self {
            order_id: o.order_id,
            amount: o.amount,
            currency: o.currency.as_str().to_string(),
            description: o.description,
            tokens: o.tokens,
            merchant_ref: o.merchant_ref,
            system_ref: o.system_ref,
            status: o.status.as_str().to_string(),
            credited: o.credited,
            created_at: o.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerView {
    pub entry_id: Uuid,
    pub entry_type: String,
    pub delta: i64,
    pub balance_after: i64,
    pub currency: String,
    pub amount_minor: Option<i64>,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntryRecord> for LedgerView {
    fn from(e: LedgerEntryRecord) -> Self {
        Self {
            entry_id: e.entry_id,
            entry_type: e.entry_type,
            delta: e.delta,
            balance_after: e.balance_after,
            currency: e.currency.as_str().to_string(),
            amount_minor: e.amount_minor,
            order_id: e.order_id,
            created_at: e.created_at,
        }
    }
}

/// Manual ledger operation. `Top-up` converts money into tokens through the
/// currency table and creates the account when missing; `Adjust` applies a
/// raw token delta to an existing account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerPostBody {
    pub email: String,
    pub entry_type: String,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub tokens: Option<i64>,
}

// ---------------------------------------------------------------------------
// GET /v1/plans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanView {
    pub id: &'static str,
    pub name: &'static str,
    pub tokens: i64,
    /// Price per supported currency, derived from the conversion table.
    pub prices: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "'de: 'static"))]
pub struct PlansResponse {
    pub plans: Vec<PlanView>,
}
