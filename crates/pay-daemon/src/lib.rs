//! pay-daemon library surface.
//!
//! Exposed as a lib so the scenario tests under `tests/` can build the router
//! in-process and drive it without a TCP socket.

pub mod api_types;
pub mod routes;
pub mod state;
