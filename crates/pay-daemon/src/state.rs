//! Shared runtime state for pay-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The state owns the
//! reconcile engine; the background sweep task holds its own clone.

use std::sync::Arc;
use std::time::Duration;

use pay_reconcile::ReconcileEngine;
use tokio::task::JoinHandle;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconcileEngine>,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(engine: Arc<ReconcileEngine>) -> Self {
        Self {
            engine,
            build: BuildInfo {
                service: "pay-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Background sweep
// ---------------------------------------------------------------------------

/// Periodically re-check open orders against the provider. The task never
/// exits; a failing pass is logged and the next tick runs as scheduled.
pub fn spawn_sweep_tick(engine: Arc<ReconcileEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            match engine.sweep().await {
                Ok(report) if report.checked > 0 => {
                    info!(
                        checked = report.checked,
                        advanced = report.advanced,
                        credited = report.credited,
                        failed = report.failures.len(),
                        "sweep tick"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "sweep tick failed"),
            }
        }
    })
}
