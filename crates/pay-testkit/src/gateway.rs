//! Scripted [`PaymentGateway`] double.
//!
//! Sale outcomes pop from one FIFO queue; status outcomes pop from a per
//! merchant-reference queue first, then from a shared fallback queue. An
//! exhausted queue answers PROCESSING, which is also what the real provider
//! reports while an order is in flight. Every call is recorded for
//! assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use pay_currency::Currency;
use pay_gateway::{
    GatewayError, PaymentGateway, PaymentState, SaleRequest, SaleResult, StatusResult,
};
use serde_json::json;

/// One provider interaction, as observed by the double.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Sale {
        merchant_ref: String,
    },
    Status {
        merchant_ref: String,
        system_ref: Option<String>,
    },
}

/// A scripted provider answer for either endpoint.
#[derive(Debug, Clone)]
pub struct ScriptedStatus {
    pub state: PaymentState,
    pub system_ref: Option<String>,
    pub redirect_url: Option<String>,
}

impl ScriptedStatus {
    pub fn state(state: PaymentState) -> Self {
        Self {
            state,
            system_ref: None,
            redirect_url: None,
        }
    }

    pub fn with_system_ref(mut self, system_ref: &str) -> Self {
        self.system_ref = Some(system_ref.to_string());
        self
    }

    pub fn with_redirect(mut self, url: &str) -> Self {
        self.redirect_url = Some(url.to_string());
        self
    }
}

#[derive(Default)]
struct Inner {
    sales: VecDeque<Result<ScriptedStatus, GatewayError>>,
    statuses: HashMap<String, VecDeque<Result<ScriptedStatus, GatewayError>>>,
    fallback: VecDeque<Result<ScriptedStatus, GatewayError>>,
    calls: Vec<GatewayCall>,
}

#[derive(Default)]
pub struct ScriptedGateway {
    inner: Mutex<Inner>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_sale(&self, outcome: ScriptedStatus) {
        self.lock().sales.push_back(Ok(outcome));
    }

    pub fn script_sale_error(&self, err: GatewayError) {
        self.lock().sales.push_back(Err(err));
    }

    /// Queue a status answer for one specific merchant reference.
    pub fn script_status_for(&self, merchant_ref: &str, outcome: ScriptedStatus) {
        self.lock()
            .statuses
            .entry(merchant_ref.to_string())
            .or_default()
            .push_back(Ok(outcome));
    }

    pub fn script_status_error_for(&self, merchant_ref: &str, err: GatewayError) {
        self.lock()
            .statuses
            .entry(merchant_ref.to_string())
            .or_default()
            .push_back(Err(err));
    }

    /// Queue a status answer used when no per-reference queue matches.
    /// Needed for checkout-path polls, where the engine generates the
    /// merchant reference itself.
    pub fn script_status(&self, outcome: ScriptedStatus) {
        self.lock().fallback.push_back(Ok(outcome));
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    pub fn status_call_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, GatewayCall::Status { .. }))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("gateway lock")
    }
}

fn raw_for(s: &ScriptedStatus) -> serde_json::Value {
    json!({
        "orderState": s.state.as_str(),
        "orderSystemId": s.system_ref,
        "redirectUrl": s.redirect_url,
    })
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_sale(&self, req: &SaleRequest) -> Result<SaleResult, GatewayError> {
        let mut inner = self.lock();
        inner.calls.push(GatewayCall::Sale {
            merchant_ref: req.merchant_ref.clone(),
        });
        let scripted = inner
            .sales
            .pop_front()
            .unwrap_or(Ok(ScriptedStatus::state(PaymentState::Processing)))?;
        Ok(SaleResult {
            merchant_ref: req.merchant_ref.clone(),
            system_ref: scripted.system_ref.clone(),
            state: scripted.state.clone(),
            redirect_url: scripted.redirect_url.clone(),
            raw: raw_for(&scripted),
        })
    }

    async fn get_status(
        &self,
        merchant_ref: &str,
        system_ref: Option<&str>,
        _currency: Currency,
    ) -> Result<StatusResult, GatewayError> {
        let mut inner = self.lock();
        inner.calls.push(GatewayCall::Status {
            merchant_ref: merchant_ref.to_string(),
            system_ref: system_ref.map(str::to_string),
        });
        let from_ref = inner
            .statuses
            .get_mut(merchant_ref)
            .and_then(|q| q.pop_front());
        let scripted = match from_ref {
            Some(s) => s,
            None => inner
                .fallback
                .pop_front()
                .unwrap_or(Ok(ScriptedStatus::state(PaymentState::Processing))),
        }?;
        Ok(StatusResult {
            system_ref: scripted.system_ref.clone().or(system_ref.map(str::to_string)),
            state: scripted.state.clone(),
            redirect_url: scripted.redirect_url.clone(),
            raw: raw_for(&scripted),
        })
    }
}
