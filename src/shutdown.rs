use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Injected replacement for process-wide signal handlers.
///
/// Components register by taking a token; triggering the coordinator cancels
/// every registered token at once.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component. The token is cancelled on shutdown.
    pub fn register(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// Triggers shutdown on the first interrupt (Ctrl+C).
    pub fn listen_for_interrupt(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => {
                        info!("interrupt received, shutting down");
                        token.cancel();
                    }
                    Err(e) => warn!("failed to listen for interrupt: {e}"),
                },
                _ = token.cancelled() => {}
            }
        })
    }
}
