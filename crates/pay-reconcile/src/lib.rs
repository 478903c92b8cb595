//! pay-reconcile
//!
//! The payment-order reconciliation workflow.
//!
//! One authoritative state-transition function drives all three triggers —
//! the synchronous checkout path, the periodic status sweep, and the provider
//! webhook — so their behavior cannot drift. Crediting happens exclusively on
//! a transition into `Approved`, through the store's transactional
//! check-and-set, which makes it exactly-once no matter how many triggers
//! observe the approval.

pub mod backoff;
pub mod engine;
pub mod error;
pub mod state;
pub mod store;

pub use backoff::RedirectWaitPolicy;
pub use engine::{
    CheckoutOutcome, CheckoutRequest, ReconcileEngine, StatusApplied, SweepReport,
};
pub use error::ReconcileError;
pub use state::{transition, OrderState, Transition};
pub use store::{
    CreditOutcome, LedgerEntryRecord, LedgerOutcome, NewOrder, OrderRecord, OrderStore,
    UserRecord,
};
