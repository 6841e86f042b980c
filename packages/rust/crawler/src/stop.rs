//! Cooperative stop signal shared between a run and whoever may cancel it.

use tokio_util::sync::CancellationToken;

/// Externally settable cancellation flag.
///
/// Setting it never interrupts a request already in flight; the run polls
/// it at its checkpoints and stops issuing new work from there on.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run to stop. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_state() {
        let signal = StopSignal::new();
        let remote = signal.clone();
        assert!(!signal.is_stopped());

        remote.stop();
        assert!(signal.is_stopped());
        signal.stopped().await;
    }
}
