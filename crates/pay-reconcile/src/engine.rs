//! The reconcile engine: checkout, sweep, and webhook triggers over one
//! shared transition path.

use std::sync::Arc;

use pay_currency::{Currency, CurrencyTable};
use pay_gateway::{normalize, CardDetails, PaymentGateway, PaymentState, SaleRequest};
use serde_json::Value;
use uuid::Uuid;

use crate::backoff::RedirectWaitPolicy;
use crate::error::ReconcileError;
use crate::state::{transition, OrderState, Transition};
use crate::store::{CreditOutcome, NewOrder, OrderRecord, OrderStore};

// ---------------------------------------------------------------------------
// Request / outcome types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub email: String,
    pub amount: f64,
    pub currency: Currency,
    pub description: Option<String>,
    pub card: CardDetails,
}

/// How a checkout ends from the shopper's point of view.
#[derive(Debug, Clone)]
pub enum CheckoutOutcome {
    /// The provider wants a 3-D Secure hop; send the shopper there.
    /// No further status polling happens on this path — the sweep and the
    /// webhook own the order from here.
    Redirect {
        order_id: Uuid,
        merchant_ref: String,
        url: String,
    },
    /// The order settled (or is still in flight) without a redirect.
    Accepted {
        order_id: Uuid,
        merchant_ref: String,
        state: OrderState,
        credited: bool,
    },
}

/// What one status observation did to an order.
#[derive(Debug, Clone)]
pub struct StatusApplied {
    pub order_id: Uuid,
    pub state: OrderState,
    pub credited: bool,
}

/// Summary of one sweep pass. A failing order never aborts the pass.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub checked: usize,
    pub advanced: usize,
    pub credited: usize,
    pub failures: Vec<(Uuid, String)>,
}

// ---------------------------------------------------------------------------
// ReconcileEngine
// ---------------------------------------------------------------------------

pub struct ReconcileEngine {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn OrderStore>,
    currencies: CurrencyTable,
    redirect_wait: RedirectWaitPolicy,
}

impl ReconcileEngine {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn OrderStore>,
        currencies: CurrencyTable,
        redirect_wait: RedirectWaitPolicy,
    ) -> Self {
        Self {
            gateway,
            store,
            currencies,
            redirect_wait,
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub fn currencies(&self) -> &CurrencyTable {
        &self.currencies
    }

    // -----------------------------------------------------------------------
    // Trigger 1: synchronous checkout
    // -----------------------------------------------------------------------

    /// Submit a sale, persist the order, and wait a bounded schedule for an
    /// outcome or a redirect. Provider failures *after* the order row exists
    /// do not fail the checkout; the sweep picks the order up later.
    pub async fn submit_sale(
        &self,
        req: CheckoutRequest,
    ) -> Result<CheckoutOutcome, ReconcileError> {
        if req.amount < self.currencies.min_amount(req.currency) {
            return Err(ReconcileError::InvalidAmount(req.amount));
        }
        let tokens = self.currencies.tokens_for(req.amount, req.currency)?;

        let merchant_ref = Uuid::new_v4().to_string();
        let description = req
            .description
            .clone()
            .unwrap_or_else(|| format!("{tokens} tokens"));

        let sale = self
            .gateway
            .create_sale(&SaleRequest {
                merchant_ref: merchant_ref.clone(),
                email: req.email.clone(),
                amount: req.amount,
                currency: req.currency,
                description: description.clone(),
                card: req.card.clone(),
            })
            .await?;

        let initial = initial_state(&sale.state);
        let order = self
            .store
            .create_order(NewOrder {
                user_email: req.email.clone(),
                amount: req.amount,
                currency: req.currency,
                description,
                tokens,
                merchant_ref: merchant_ref.clone(),
                system_ref: sale.system_ref.clone(),
                status: initial,
                response: sale.raw.clone(),
            })
            .await?;
        tracing::info!(
            order_id = %order.order_id,
            merchant_ref = %merchant_ref,
            state = initial.as_str(),
            "sale created"
        );

        if let Some(url) = sale.redirect_url {
            return Ok(CheckoutOutcome::Redirect {
                order_id: order.order_id,
                merchant_ref,
                url,
            });
        }

        let mut credited = false;
        if initial == OrderState::Approved {
            credited = self.credit(&order).await?;
            return Ok(CheckoutOutcome::Accepted {
                order_id: order.order_id,
                merchant_ref,
                state: initial,
                credited,
            });
        }

        // Bounded wait for a terminal outcome or a late redirect.
        let mut current = order;
        for delay in self.redirect_wait.delays() {
            tokio::time::sleep(delay).await;
            let st = match self
                .gateway
                .get_status(&merchant_ref, current.system_ref.as_deref(), req.currency)
                .await
            {
                Ok(st) => st,
                Err(e) => {
                    tracing::warn!(
                        merchant_ref = %merchant_ref,
                        error = %e,
                        "status poll failed during checkout wait"
                    );
                    continue;
                }
            };

            if let Some(sr) = &st.system_ref {
                current.system_ref = Some(sr.clone());
            }
            if let Some(url) = st.redirect_url.clone() {
                let applied = self
                    .apply_status(&current, &st.state, st.system_ref.as_deref(), &st.raw)
                    .await?;
                return Ok(CheckoutOutcome::Redirect {
                    order_id: applied.order_id,
                    merchant_ref,
                    url,
                });
            }

            let applied = self
                .apply_status(&current, &st.state, st.system_ref.as_deref(), &st.raw)
                .await?;
            current.status = applied.state;
            credited |= applied.credited;
            if applied.state.is_terminal() {
                break;
            }
        }

        Ok(CheckoutOutcome::Accepted {
            order_id: current.order_id,
            merchant_ref,
            state: current.status,
            credited,
        })
    }

    // -----------------------------------------------------------------------
    // Trigger 2: periodic sweep
    // -----------------------------------------------------------------------

    /// Re-check every open order against the provider and settle approved
    /// orders whose credit never landed. One bad order is recorded and
    /// skipped; the rest of the pass continues.
    pub async fn sweep(&self) -> Result<SweepReport, ReconcileError> {
        let orders = self.store.find_open_orders().await?;
        let mut report = SweepReport {
            checked: orders.len(),
            ..SweepReport::default()
        };
        for order in &orders {
            // A terminal row only shows up here when its credit is still
            // owed; settling it needs no provider call.
            let outcome = if order.status.is_terminal() {
                self.heal_uncredited(order).await.map(|credited| StatusApplied {
                    order_id: order.order_id,
                    state: order.status,
                    credited,
                })
            } else {
                self.check_order(order).await
            };
            match outcome {
                Ok(applied) => {
                    if applied.state != order.status {
                        report.advanced += 1;
                    }
                    if applied.credited {
                        report.credited += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        order_id = %order.order_id,
                        error = %e,
                        "sweep check failed, continuing"
                    );
                    report.failures.push((order.order_id, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Trigger 3: provider webhook
    // -----------------------------------------------------------------------

    /// A callback body is a hint, not a fact: the only thing taken from it is
    /// the order reference. The state itself is re-verified with a direct
    /// status call before anything mutates.
    pub async fn handle_webhook(&self, body: &Value) -> Result<StatusApplied, ReconcileError> {
        let reference = normalize::extract_system_ref(body)
            .or_else(|| normalize::extract_merchant_ref(body))
            .ok_or(ReconcileError::MissingReference)?;

        let order = match self.store.find_by_system_ref(&reference).await? {
            Some(o) => Some(o),
            None => self.store.find_by_merchant_ref(&reference).await?,
        }
        .ok_or_else(|| ReconcileError::OrderNotFound(reference.clone()))?;

        tracing::info!(
            order_id = %order.order_id,
            reference = %reference,
            "webhook received, re-verifying with provider"
        );
        self.check_order(&order).await
    }

    /// Status lookup for one order by its merchant reference. Terminal
    /// orders answer from storage, settling any still-owed credit on the
    /// way; open orders trigger a fresh provider poll.
    pub async fn check_by_merchant_ref(
        &self,
        merchant_ref: &str,
    ) -> Result<StatusApplied, ReconcileError> {
        let order = self
            .store
            .find_by_merchant_ref(merchant_ref)
            .await?
            .ok_or_else(|| ReconcileError::OrderNotFound(merchant_ref.to_string()))?;
        if order.status.is_terminal() {
            let credited = self.heal_uncredited(&order).await?;
            return Ok(StatusApplied {
                order_id: order.order_id,
                state: order.status,
                credited,
            });
        }
        self.check_order(&order).await
    }

    // -----------------------------------------------------------------------
    // Shared transition path
    // -----------------------------------------------------------------------

    async fn check_order(&self, order: &OrderRecord) -> Result<StatusApplied, ReconcileError> {
        let st = self
            .gateway
            .get_status(
                &order.merchant_ref,
                order.system_ref.as_deref(),
                order.currency,
            )
            .await?;
        self.apply_status(order, &st.state, st.system_ref.as_deref(), &st.raw)
            .await
    }

    async fn apply_status(
        &self,
        order: &OrderRecord,
        observed: &PaymentState,
        system_ref: Option<&str>,
        raw: &Value,
    ) -> Result<StatusApplied, ReconcileError> {
        match transition(order.status, observed) {
            Transition::IgnoredTerminal => {
                let credited = self.heal_uncredited(order).await?;
                Ok(StatusApplied {
                    order_id: order.order_id,
                    state: order.status,
                    credited,
                })
            }
            Transition::Unchanged => {
                if let PaymentState::Other(s) = observed {
                    tracing::warn!(
                        order_id = %order.order_id,
                        state = %s,
                        "provider reported unrecognized order state"
                    );
                }
                Ok(StatusApplied {
                    order_id: order.order_id,
                    state: order.status,
                    credited: false,
                })
            }
            Transition::Advance(next) => {
                let system_ref = system_ref.or(order.system_ref.as_deref());
                self.store
                    .update_order_status(order.order_id, next, system_ref, raw)
                    .await?;
                tracing::info!(
                    order_id = %order.order_id,
                    from = order.status.as_str(),
                    to = next.as_str(),
                    "order advanced"
                );
                let mut credited = false;
                if next == OrderState::Approved {
                    credited = self.credit(order).await?;
                }
                Ok(StatusApplied {
                    order_id: order.order_id,
                    state: next,
                    credited,
                })
            }
        }
    }

    /// A crash or store error between the status update and the credit
    /// leaves an order APPROVED with `credited` still false. Every trigger
    /// that meets a terminal order passes through here, so the credit
    /// eventually lands; `credit_order`'s check-and-set keeps it
    /// exactly-once.
    async fn heal_uncredited(&self, order: &OrderRecord) -> Result<bool, ReconcileError> {
        if order.status == OrderState::Approved && !order.credited {
            return self.credit(order).await;
        }
        Ok(false)
    }

    /// Returns true only when this caller won the credit check-and-set.
    async fn credit(&self, order: &OrderRecord) -> Result<bool, ReconcileError> {
        match self.store.credit_order(order.order_id).await? {
            CreditOutcome::Credited(entry) => {
                tracing::info!(
                    order_id = %order.order_id,
                    tokens = order.tokens,
                    balance_after = entry.balance_after,
                    "order credited"
                );
                Ok(true)
            }
            CreditOutcome::AlreadyCredited => {
                tracing::debug!(order_id = %order.order_id, "order already credited");
                Ok(false)
            }
            CreditOutcome::UserNotFound => {
                tracing::warn!(
                    order_id = %order.order_id,
                    "approved order has no matching user, left uncredited"
                );
                Ok(false)
            }
        }
    }
}

fn initial_state(observed: &PaymentState) -> OrderState {
    match observed {
        PaymentState::Processing | PaymentState::Other(_) => OrderState::Processing,
        PaymentState::Approved => OrderState::Approved,
        PaymentState::Declined => OrderState::Declined,
        PaymentState::Failed => OrderState::Failed,
    }
}
