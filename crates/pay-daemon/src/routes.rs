//! Axum router and all HTTP handlers for pay-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.
//!
//! Provider failures never leak upstream detail: the sale and webhook
//! handlers answer 502 with a generic message.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pay_currency::{to_minor_units, Currency};
use pay_reconcile::{CheckoutOutcome, CheckoutRequest, LedgerOutcome, ReconcileError};
use serde_json::Value;

use crate::{
    api_types::{
        EmailQuery, ErrorResponse, HealthResponse, LedgerPostBody, LedgerView, OrderView,
        PlanView, PlansResponse, SaleBody, SalePendingResponse, StatusBody, StatusResponse,
        SweepResponse, WebhookAck,
    },
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/sale", post(sale))
        .route("/v1/status", post(status_proxy))
        .route("/v1/webhook", post(webhook))
        .route("/v1/sweep", post(sweep))
        .route("/v1/orders", get(orders))
        .route("/v1/ledger", get(ledger_history).post(ledger_append))
        .route("/v1/plans", get(plans))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn bad_request(msg: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: msg.into() }),
    )
        .into_response()
}

fn not_found(msg: impl Into<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse { error: msg.into() }),
    )
        .into_response()
}

fn internal_error(e: anyhow::Error) -> Response {
    tracing::error!(error = %format!("{e:#}"), "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal error".to_string(),
        }),
    )
        .into_response()
}

fn reconcile_error(err: ReconcileError) -> Response {
    match err {
        ReconcileError::Gateway(e) => {
            tracing::warn!(error = %e, "provider call failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: "payment provider unavailable".to_string(),
                }),
            )
                .into_response()
        }
        ReconcileError::Currency(e) => bad_request(e.to_string()),
        ReconcileError::InvalidAmount(_) => bad_request("amount below the chargeable minimum"),
        ReconcileError::OrderNotFound(_) => not_found("order not found"),
        ReconcileError::MissingReference => bad_request("missing order reference"),
        ReconcileError::Store(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/sale
// ---------------------------------------------------------------------------

/// Checkout. Answers 302 with a Location header when the provider wants a
/// 3-D-Secure hop, otherwise 202 with the persisted order's state.
pub(crate) async fn sale(
    State(st): State<Arc<AppState>>,
    Json(body): Json<SaleBody>,
) -> Response {
    let currency = match Currency::parse(&body.currency) {
        Ok(c) => c,
        Err(e) => return bad_request(e.to_string()),
    };
    if body.email.trim().is_empty() {
        return bad_request("email is required");
    }

    let req = CheckoutRequest {
        email: body.email,
        amount: body.amount,
        currency,
        description: body.description,
        card: body.card.into_details(),
    };

    match st.engine.submit_sale(req).await {
        Ok(CheckoutOutcome::Redirect { url, .. }) => {
            (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
        }
        Ok(CheckoutOutcome::Accepted {
            order_id,
            merchant_ref,
            state,
            credited,
        }) => (
            StatusCode::ACCEPTED,
            Json(SalePendingResponse {
                status: "pending",
                order_id,
                merchant_ref,
                state: state.as_str().to_string(),
                credited,
            }),
        )
            .into_response(),
        Err(e) => reconcile_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_proxy(
    State(st): State<Arc<AppState>>,
    Json(body): Json<StatusBody>,
) -> Response {
    let Some(merchant_ref) = body
        .merchant_ref
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return bad_request("merchant_ref is required");
    };

    match st.engine.check_by_merchant_ref(merchant_ref).await {
        Ok(applied) => (
            StatusCode::OK,
            Json(StatusResponse {
                order_id: applied.order_id,
                state: applied.state.as_str().to_string(),
                credited: applied.credited,
            }),
        )
            .into_response(),
        Err(e) => reconcile_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/webhook
// ---------------------------------------------------------------------------

/// Provider callback. The body is only mined for an order reference; the
/// engine re-verifies the state with a direct provider call.
pub(crate) async fn webhook(
    State(st): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    match st.engine.handle_webhook(&body).await {
        Ok(applied) => {
            tracing::info!(
                order_id = %applied.order_id,
                state = applied.state.as_str(),
                credited = applied.credited,
                "webhook applied"
            );
            (StatusCode::OK, Json(WebhookAck { ok: true })).into_response()
        }
        Err(e) => reconcile_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/sweep
// ---------------------------------------------------------------------------

pub(crate) async fn sweep(State(st): State<Arc<AppState>>) -> Response {
    match st.engine.sweep().await {
        Ok(report) => (
            StatusCode::OK,
            Json(SweepResponse {
                checked: report.checked,
                advanced: report.advanced,
                credited: report.credited,
                failed: report.failures.len(),
            }),
        )
            .into_response(),
        Err(e) => reconcile_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/orders?email=
// ---------------------------------------------------------------------------

pub(crate) async fn orders(
    State(st): State<Arc<AppState>>,
    Query(q): Query<EmailQuery>,
) -> Response {
    let Some(email) = q.email.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return bad_request("email is required");
    };

    match st.engine.store().list_orders_for_email(email).await {
        Ok(orders) => {
            let views: Vec<OrderView> = orders.into_iter().map(OrderView::from).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/ledger?email=
// ---------------------------------------------------------------------------

pub(crate) async fn ledger_history(
    State(st): State<Arc<AppState>>,
    Query(q): Query<EmailQuery>,
) -> Response {
    let Some(email) = q.email.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return bad_request("email is required");
    };

    let user = match st.engine.store().fetch_user_by_email(email).await {
        Ok(Some(u)) => u,
        Ok(None) => return not_found("unknown user"),
        Err(e) => return internal_error(e),
    };

    match st.engine.store().list_ledger_for_user(user.user_id).await {
        Ok(entries) => {
            let views: Vec<LedgerView> = entries.into_iter().map(LedgerView::from).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/ledger
// ---------------------------------------------------------------------------

/// Manual ledger operation. `Top-up` converts an amount of money into tokens
/// and creates the account when missing; `Adjust` applies a raw token delta
/// to an existing account (404 when absent).
pub(crate) async fn ledger_append(
    State(st): State<Arc<AppState>>,
    Json(body): Json<LedgerPostBody>,
) -> Response {
    let email = body.email.trim();
    if email.is_empty() {
        return bad_request("email is required");
    }

    let store = st.engine.store();
    let (user, delta, currency, amount_minor) = match body.entry_type.as_str() {
        "Top-up" => {
            let Some(amount) = body.amount else {
                return bad_request("Top-up requires an amount");
            };
            let currency = match body.currency.as_deref().map(Currency::parse) {
                Some(Ok(c)) => c,
                Some(Err(e)) => return bad_request(e.to_string()),
                None => return bad_request("Top-up requires a currency"),
            };
            let delta = match st.engine.currencies().tokens_for(amount, currency) {
                Ok(t) => t,
                Err(e) => return bad_request(e.to_string()),
            };
            if delta <= 0 {
                return bad_request("Top-up amount is too small");
            }
            let user = match store.ensure_user(email).await {
                Ok(u) => u,
                Err(e) => return internal_error(e),
            };
            (user, delta, currency, Some(to_minor_units(amount)))
        }
        "Adjust" => {
            let Some(tokens) = body.tokens else {
                return bad_request("Adjust requires a token delta");
            };
            let user = match store.fetch_user_by_email(email).await {
                Ok(Some(u)) => u,
                Ok(None) => return not_found("unknown user"),
                Err(e) => return internal_error(e),
            };
            let currency = user.currency;
            (user, tokens, currency, None)
        }
        other => return bad_request(format!("unknown entry_type: {other}")),
    };

    match store
        .append_ledger(user.user_id, &body.entry_type, delta, currency, amount_minor)
        .await
    {
        Ok(LedgerOutcome::Applied(entry)) => {
            (StatusCode::OK, Json(LedgerView::from(entry))).into_response()
        }
        Ok(LedgerOutcome::InsufficientBalance { .. }) => {
            bad_request("balance would go below zero")
        }
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/plans
// ---------------------------------------------------------------------------

/// Static checkout plans, priced in every configured currency.
const PLANS: [(&str, &str, f64); 3] = [
    ("beginner", "Beginner", 10.0),
    ("pro", "Pro", 50.0),
    ("business", "Business", 100.0),
];

pub(crate) async fn plans(State(st): State<Arc<AppState>>) -> Response {
    let table = st.engine.currencies();
    let mut out = Vec::with_capacity(PLANS.len());
    for (id, name, base_amount) in PLANS {
        let tokens = match table.tokens_for(base_amount, table.base) {
            Ok(t) => t,
            Err(e) => return internal_error(e.into()),
        };
        let mut prices = std::collections::BTreeMap::new();
        for &currency in table.rates.keys() {
            match table.from_base(base_amount, currency) {
                Ok(p) => {
                    prices.insert(currency.as_str().to_string(), round2(p));
                }
                Err(e) => return internal_error(e.into()),
            }
        }
        out.push(PlanView {
            id,
            name,
            tokens,
            prices,
        });
    }
    (StatusCode::OK, Json(PlansResponse { plans: out })).into_response()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
