//! Error taxonomy for the reconciliation workflow.

use pay_currency::UnsupportedCurrency;
use pay_gateway::GatewayError;

#[derive(Debug)]
pub enum ReconcileError {
    /// The provider call itself failed (transport or non-2xx).
    Gateway(GatewayError),
    /// The submitted currency has no configured conversion rate.
    Currency(UnsupportedCurrency),
    /// The submitted amount is below the configured minimum.
    InvalidAmount(f64),
    /// A callback or status request named an order we do not hold.
    OrderNotFound(String),
    /// A callback carried no usable order reference.
    MissingReference,
    /// Persistence failure.
    Store(anyhow::Error),
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::Gateway(e) => write!(f, "{e}"),
            ReconcileError::Currency(e) => write!(f, "{e}"),
            ReconcileError::InvalidAmount(a) => {
                write!(f, "amount {a} is below the minimum chargeable amount")
            }
            ReconcileError::OrderNotFound(r) => write!(f, "no order matches reference {r}"),
            ReconcileError::MissingReference => {
                write!(f, "callback carried no order reference")
            }
            ReconcileError::Store(e) => write!(f, "store error: {e:#}"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Gateway(e) => Some(e),
            ReconcileError::Currency(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GatewayError> for ReconcileError {
    fn from(e: GatewayError) -> Self {
        ReconcileError::Gateway(e)
    }
}

impl From<UnsupportedCurrency> for ReconcileError {
    fn from(e: UnsupportedCurrency) -> Self {
        ReconcileError::Currency(e)
    }
}

impl From<anyhow::Error> for ReconcileError {
    fn from(e: anyhow::Error) -> Self {
        ReconcileError::Store(e)
    }
}
