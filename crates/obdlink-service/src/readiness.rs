//! Host readiness gate.
//!
//! Before the connection is brought up the service asks the host for a
//! busy/keep-awake claim so the process is not suspended mid-session. The
//! claim is released as the final step of shutdown. Hosts without such a
//! facility use [`ProcessGate`], an in-process marker with the same
//! semantics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Errors from acquiring or holding a readiness claim.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GateError {
    /// The host facility is not available at all.
    #[error("readiness facility unavailable: {0}")]
    Unavailable(String),
    /// The claim was refused, e.g. because it is already held.
    #[error("readiness claim denied: {0}")]
    Denied(String),
}

/// A claim on host readiness for the lifetime of the service.
#[async_trait]
pub trait HostGate: Send + Sync {
    /// Acquire the claim. Acquiring an already-held claim is an error.
    async fn acquire(&self) -> Result<(), GateError>;

    /// Release the claim. Releasing an unheld claim is a no-op.
    async fn release(&self);

    /// Whether the claim is currently held.
    fn is_held(&self) -> bool;
}

/// In-process readiness gate.
///
/// Marks the service busy without talking to any host facility; useful on
/// hosts with no suspend behavior and as the default when nothing better
/// is wired in.
#[derive(Debug, Default)]
pub struct ProcessGate {
    held: AtomicBool,
}

impl ProcessGate {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostGate for ProcessGate {
    async fn acquire(&self) -> Result<(), GateError> {
        if self.held.swap(true, Ordering::SeqCst) {
            return Err(GateError::Denied("claim already held".to_string()));
        }
        Ok(())
    }

    async fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

/// Backoff before the single retry.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Acquire `gate`, bounding each attempt by `window` and retrying once.
///
/// Startup keeps going either way; a missing claim degrades the service
/// (the host may suspend it) but does not prevent it from running.
pub async fn acquire_within(gate: &dyn HostGate, window: Duration) -> Result<(), GateError> {
    match try_acquire(gate, window).await {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!("readiness claim failed ({first}), retrying once");
            sleep(RETRY_BACKOFF).await;
            try_acquire(gate, window).await
        }
    }
}

async fn try_acquire(gate: &dyn HostGate, window: Duration) -> Result<(), GateError> {
    match timeout(window, gate.acquire()).await {
        Ok(result) => result,
        Err(_) => Err(GateError::Unavailable(format!(
            "claim not granted within {window:?}"
        ))),
    }
}
