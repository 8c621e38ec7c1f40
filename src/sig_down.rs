//! Shutdown signal handling.
//!
//! [`SigDown`] listens for SIGINT and SIGTERM once and cancels a shared
//! [`CancellationToken`]; every long-running task holds a child of it.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

pub struct SigDown {
    token: CancellationToken,
}

impl SigDown {
    /// Install the signal handlers. Must run inside the tokio runtime.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM - shutting down"),
                _ = sigint.recv() => tracing::info!("Received SIGINT - shutting down"),
                _ = trigger.cancelled() => return,
            }
            trigger.cancel();
        });

        Ok(Self { token })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}
