use std::path::PathBuf;

use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::supervisor::{SupervisorMessage, SupervisorStatus};

#[derive(Debug, Error)]
pub enum SupervisorHandleError {
    #[error("supervisor is no longer running")]
    SendError,

    #[error("supervisor dropped the request")]
    RecvError(#[from] oneshot::error::RecvError),

    #[error("supervisor task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Fatal(#[from] crate::Error),
}

/// Control over a running watch supervisor.
#[derive(Debug)]
pub struct SupervisorHandle {
    join_handle: JoinHandle<Result<(), crate::Error>>,
    tx: mpsc::UnboundedSender<SupervisorMessage>,
    shutdown: CancellationToken,
}

impl SupervisorHandle {
    pub(crate) fn new(
        join_handle: JoinHandle<Result<(), crate::Error>>,
        tx: mpsc::UnboundedSender<SupervisorMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            join_handle,
            tx,
            shutdown,
        }
    }

    /// Requests a restart as if `path` had changed on disk.
    pub fn restart(&self, path: impl Into<PathBuf>) -> Result<(), SupervisorHandleError> {
        self.send(SupervisorMessage::Restart(path.into()))
    }

    /// Stops the child and ends the supervisor loop.
    ///
    /// A type check or compile in flight is abandoned; nothing is spawned
    /// after this call.
    pub fn shutdown(&self) -> Result<(), SupervisorHandleError> {
        self.shutdown.cancel();
        self.send(SupervisorMessage::Shutdown)
    }

    pub async fn status(&self) -> Result<SupervisorStatus, SupervisorHandleError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorMessage::Status(tx))?;
        Ok(rx.await?)
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Waits for the supervisor loop to end.
    pub async fn wait(self) -> Result<(), SupervisorHandleError> {
        self.join_handle.await??;
        Ok(())
    }

    fn send(&self, msg: SupervisorMessage) -> Result<(), SupervisorHandleError> {
        self.tx
            .send(msg)
            .map_err(|_| SupervisorHandleError::SendError)
    }
}
