//! pay-gateway
//!
//! CardServ HTTP adapter: sale creation and status polling.
//!
//! This crate owns the provider wire format and its quirks. It does **not**
//! touch persistent storage; callers (the reconcile engine) decide what to do
//! with the normalized results. Connection settings arrive as an explicit
//! [`GatewayConfig`] — nothing here reads process env.
//!
//! The bearer token and card details pass through this crate; neither is ever
//! logged.

pub mod normalize;

use async_trait::async_trait;
use pay_config::GatewayConfig;
use pay_currency::Currency;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// PaymentState
// ---------------------------------------------------------------------------

/// Order state as reported on the wire by the provider.
///
/// The provider's vocabulary is open-ended; states outside the documented set
/// are carried verbatim in `Other` so callers can log them without this crate
/// guessing at their meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentState {
    Processing,
    Approved,
    Declined,
    Failed,
    Other(String),
}

impl PaymentState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "PROCESSING" | "PENDING" => PaymentState::Processing,
            "APPROVED" => PaymentState::Approved,
            "DECLINED" => PaymentState::Declined,
            "FAILED" => PaymentState::Failed,
            other => PaymentState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentState::Processing => "PROCESSING",
            PaymentState::Approved => "APPROVED",
            PaymentState::Declined => "DECLINED",
            PaymentState::Failed => "FAILED",
            PaymentState::Other(s) => s.as_str(),
        }
    }
}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Transport failures and non-2xx provider responses.
///
/// Unparseable bodies on a 2xx response are deliberately NOT an error — they
/// normalize to a PROCESSING state (see [`normalize::parse_body_fail_open`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection, TLS, or timeout failure before an HTTP status was read.
    Transport(String),
    /// The provider answered with a non-success status.
    Http { status: u16, body: String },
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Transport(msg) => write!(f, "gateway transport error: {msg}"),
            GatewayError::Http { status, .. } => {
                write!(f, "gateway http error: status={status}")
            }
        }
    }
}

impl std::error::Error for GatewayError {}

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

/// Card details collected at checkout. Passed through to the provider,
/// never persisted and never logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDetails {
    pub printed_name: String,
    pub number: String,
    pub cvv: String,
    /// "MM"
    pub expire_month: String,
    /// "YYYY"
    pub expire_year: String,
    pub postal_code: String,
    pub city: String,
    pub address_line1: String,
    pub country_code: String,
}

/// A sale to submit to the provider.
#[derive(Debug, Clone)]
pub struct SaleRequest {
    /// Merchant-generated reference, unique per order attempt.
    pub merchant_ref: String,
    pub email: String,
    pub amount: f64,
    pub currency: Currency,
    pub description: String,
    pub card: CardDetails,
}

/// Normalized result of a sale creation.
#[derive(Debug, Clone)]
pub struct SaleResult {
    pub merchant_ref: String,
    pub system_ref: Option<String>,
    pub state: PaymentState,
    pub redirect_url: Option<String>,
    /// The raw (possibly synthetic fail-open) response body.
    pub raw: Value,
}

/// Normalized result of a status poll.
#[derive(Debug, Clone)]
pub struct StatusResult {
    pub system_ref: Option<String>,
    pub state: PaymentState,
    pub redirect_url: Option<String>,
    pub raw: Value,
}

// ---------------------------------------------------------------------------
// PaymentGateway trait
// ---------------------------------------------------------------------------

/// The seam between the reconcile engine and the provider.
///
/// Production wires [`CardServClient`]; tests use a scripted fake.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_sale(&self, req: &SaleRequest) -> Result<SaleResult, GatewayError>;

    async fn get_status(
        &self,
        merchant_ref: &str,
        system_ref: Option<&str>,
        currency: Currency,
    ) -> Result<StatusResult, GatewayError>;
}

// ---------------------------------------------------------------------------
// CardServClient
// ---------------------------------------------------------------------------

/// Live CardServ adapter over reqwest.
#[derive(Debug, Clone)]
pub struct CardServClient {
    http: reqwest::Client,
    cfg: GatewayConfig,
}

impl CardServClient {
    pub fn new(cfg: GatewayConfig) -> Self {
        Self::new_with_http(cfg, reqwest::Client::new())
    }

    pub fn new_with_http(cfg: GatewayConfig, http: reqwest::Client) -> Self {
        Self { http, cfg }
    }

    fn sale_url(&self) -> String {
        format!(
            "{}/api/payments/sale/{}",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.requestor_id
        )
    }

    fn status_url(&self) -> String {
        format!(
            "{}/api/payments/status/{}",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.requestor_id
        )
    }

    /// Build the provider sale body: order / customer / card / urls.
    fn sale_body(&self, req: &SaleRequest) -> Value {
        let (firstname, lastname) = split_name(&req.card.printed_name);
        json!({
            "order": {
                "orderMerchantId": req.merchant_ref,
                "merchantId": self.cfg.merchant_id,
                "orderDescription": req.description,
                "orderAmount": format!("{:.2}", req.amount),
                "orderCurrencyCode": req.currency.as_str(),
            },
            "customer": {
                "firstname": firstname,
                "lastname": lastname,
                "customerEmail": req.email,
                "address": {
                    "countryCode": req.card.country_code,
                    "zipCode": req.card.postal_code,
                    "city": req.card.city,
                    "line1": req.card.address_line1,
                },
            },
            "card": {
                "cardNumber": req.card.number,
                "cvv2": req.card.cvv,
                "expireMonth": req.card.expire_month,
                "expireYear": req.card.expire_year,
                "cardPrintedName": req.card.printed_name,
            },
            "urls": {
                "resultUrl": self.cfg.result_url,
                "webhookUrl": self.cfg.webhook_url,
            },
        })
    }

    /// POST a JSON body with bearer auth and return (status, raw text).
    async fn post(&self, url: &str, body: &Value) -> Result<(u16, String), GatewayError> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.bearer_token)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(GatewayError::Http { status, body: text });
        }
        Ok((status, text))
    }
}

#[async_trait]
impl PaymentGateway for CardServClient {
    async fn create_sale(&self, req: &SaleRequest) -> Result<SaleResult, GatewayError> {
        let body = self.sale_body(req);
        let (_status, text) = self.post(&self.sale_url(), &body).await?;

        let raw = normalize::parse_body_fail_open(&text);
        Ok(SaleResult {
            merchant_ref: req.merchant_ref.clone(),
            system_ref: normalize::extract_system_ref(&raw),
            state: normalize::extract_state(&raw),
            redirect_url: normalize::extract_redirect_url(&raw),
            raw,
        })
    }

    async fn get_status(
        &self,
        merchant_ref: &str,
        system_ref: Option<&str>,
        currency: Currency,
    ) -> Result<StatusResult, GatewayError> {
        let body = json!({
            "orderMerchantId": merchant_ref,
            "orderSystemId": system_ref,
            "orderCurrencyCode": currency.as_str(),
        });
        let (_status, text) = self.post(&self.status_url(), &body).await?;

        let raw = normalize::parse_body_fail_open(&text);
        Ok(StatusResult {
            system_ref: normalize::extract_system_ref(&raw),
            state: normalize::extract_state(&raw),
            redirect_url: normalize::extract_redirect_url(&raw),
            raw,
        })
    }
}

fn split_name(printed: &str) -> (String, String) {
    let mut parts = printed.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let rest: Vec<&str> = parts.collect();
    (first, rest.join(" "))
}

// ---------------------------------------------------------------------------
// Unit tests (no network; client tests live in tests/cardserv_client.rs)
// ---------------------------------------------------------------------------
