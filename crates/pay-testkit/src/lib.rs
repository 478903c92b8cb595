//! pay-testkit
//!
//! Deterministic in-process doubles for the reconcile engine's two seams:
//! an in-memory [`MemoryStore`] with the same atomic crediting contract as
//! the Postgres store, and a [`ScriptedGateway`] that replays pre-arranged
//! provider behavior. No network I/O, no database.

pub mod gateway;
pub mod store;

pub use gateway::{GatewayCall, ScriptedGateway, ScriptedStatus};
pub use store::MemoryStore;
