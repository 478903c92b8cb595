//! Order lifecycle states and the single authoritative transition function.
//!
//! Every trigger (checkout wait loop, sweep, webhook) funnels its observed
//! provider state through [`transition`]. Terminal states are immutable:
//! re-observation of a terminal order is a no-op, never an error.

use pay_gateway::PaymentState;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OrderState
// ---------------------------------------------------------------------------

/// Persisted lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderState {
    /// Created locally, not yet acknowledged by the provider.
    Pending,
    /// Acknowledged by the provider, outcome not yet known.
    Processing,
    Approved,
    Declined,
    Failed,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Approved | OrderState::Declined | OrderState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "PENDING",
            OrderState::Processing => "PROCESSING",
            OrderState::Approved => "APPROVED",
            OrderState::Declined => "DECLINED",
            OrderState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderState::Pending),
            "PROCESSING" => Ok(OrderState::Processing),
            "APPROVED" => Ok(OrderState::Approved),
            "DECLINED" => Ok(OrderState::Declined),
            "FAILED" => Ok(OrderState::Failed),
            other => anyhow::bail!("unknown order state: {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// Outcome of applying an observed provider state to a persisted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Persist the new state. Crediting fires only when the target is
    /// `Approved`.
    Advance(OrderState),
    /// The observation carries no new information; leave the row alone.
    Unchanged,
    /// The order is already terminal; all further observations are ignored.
    IgnoredTerminal,
}

/// The one place that decides how an observed provider state moves an order.
///
/// Unknown provider vocabulary (`PaymentState::Other`) never mutates the
/// order: it is logged by callers and the order stays where it was, to be
/// retried by the next sweep.
pub fn transition(current: OrderState, observed: &PaymentState) -> Transition {
    if current.is_terminal() {
        return Transition::IgnoredTerminal;
    }
    match observed {
        PaymentState::Processing => {
            if current == OrderState::Processing {
                Transition::Unchanged
            } else {
                Transition::Advance(OrderState::Processing)
            }
        }
        PaymentState::Approved => Transition::Advance(OrderState::Approved),
        PaymentState::Declined => Transition::Advance(OrderState::Declined),
        PaymentState::Failed => Transition::Advance(OrderState::Failed),
        PaymentState::Other(_) => Transition::Unchanged,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_advances_to_processing() {
        assert_eq!(
            transition(OrderState::Pending, &PaymentState::Processing),
            Transition::Advance(OrderState::Processing)
        );
    }

    #[test]
    fn processing_re_observation_is_unchanged() {
        assert_eq!(
            transition(OrderState::Processing, &PaymentState::Processing),
            Transition::Unchanged
        );
    }

    #[test]
    fn processing_advances_to_each_terminal_state() {
        for (observed, target) in [
            (PaymentState::Approved, OrderState::Approved),
            (PaymentState::Declined, OrderState::Declined),
            (PaymentState::Failed, OrderState::Failed),
        ] {
            assert_eq!(
                transition(OrderState::Processing, &observed),
                Transition::Advance(target)
            );
        }
    }

    #[test]
    fn terminal_states_ignore_everything() {
        for current in [OrderState::Approved, OrderState::Declined, OrderState::Failed] {
            for observed in [
                PaymentState::Processing,
                PaymentState::Approved,
                PaymentState::Declined,
                PaymentState::Failed,
                PaymentState::Other("WEIRD".to_string()),
            ] {
                assert_eq!(
                    transition(current, &observed),
                    Transition::IgnoredTerminal,
                    "current={current:?} observed={observed:?}"
                );
            }
        }
    }

    #[test]
    fn unknown_vocabulary_never_mutates() {
        assert_eq!(
            transition(
                OrderState::Processing,
                &PaymentState::Other("3DS_WAIT".to_string())
            ),
            Transition::Unchanged
        );
    }

    #[test]
    fn state_round_trips_through_strings() {
        for s in [
            OrderState::Pending,
            OrderState::Processing,
            OrderState::Approved,
            OrderState::Declined,
            OrderState::Failed,
        ] {
            assert_eq!(OrderState::parse(s.as_str()).unwrap(), s);
        }
        assert!(OrderState::parse("LIMBO").is_err());
    }
}
