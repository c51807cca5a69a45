//! Per-stage execution context and cancellation

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::logger::WorkflowLogger;
use crate::services::ServiceRegistry;
use crate::state::WorkflowState;

/// Cancellation sender held by the orchestrator
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cancellation receiver carried by every stage context.
///
/// Agents observe the signal at every suspension point; timeout expiry and
/// fail-fast propagation both fire it.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
    // Keeps the sender alive for signals created without a handle
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelSignal {
    /// A signal that never fires, for tests and standalone agent runs
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation fires. If the handle is dropped without
    /// cancelling, this pends forever; callers always race it against
    /// real work.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Create a linked cancel handle/signal pair
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx },
        CancelSignal {
            rx,
            _keepalive: None,
        },
    )
}

/// Everything a stage invocation receives: the case envelope, a state
/// snapshot taken at dispatch, shared services, the per-case logger, and
/// the cancellation signal
#[derive(Clone)]
pub struct AgentContext {
    pub case_id: String,

    /// Correlation id for this stage attempt; retries get a fresh one
    pub correlation_id: String,

    /// Snapshot of the workflow state at dispatch. Read-only: results
    /// flow back through the merge protocol, never by mutation here.
    pub state: Arc<WorkflowState>,

    pub services: ServiceRegistry,

    pub logger: WorkflowLogger,

    pub cancel: CancelSignal,
}

impl AgentContext {
    pub fn new(
        state: Arc<WorkflowState>,
        services: ServiceRegistry,
        logger: WorkflowLogger,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            case_id: state.case_meta.case_id.clone(),
            correlation_id: Uuid::new_v4().to_string(),
            state,
            services,
            logger,
            cancel,
        }
    }

    /// Bail out early if cancellation has fired
    pub fn check_cancelled(&self) -> crate::error::MedflowResult<()> {
        if self.cancel.is_cancelled() {
            Err(crate::error::MedflowError::cancelled(format!(
                "case {} cancelled",
                self.case_id
            )))
        } else {
            Ok(())
        }
    }
}
