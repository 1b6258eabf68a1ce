use tokio_util::sync::CancellationToken;

/// Single-use cancellation token created fresh for each job run.
///
/// Triggering it unblocks any awaited read immediately. Once sealed (the job
/// reached a terminal state) further triggers have no effect, so a stale
/// cancel cannot touch a later run.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: CancellationToken,
    seal: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
            seal: CancellationToken::new(),
        }
    }

    /// Request cancellation. No-op after the token has been sealed.
    pub fn trigger(&self) {
        if !self.seal.is_cancelled() {
            self.inner.cancel();
        }
    }

    /// Mark the run terminal; later triggers become no-ops.
    pub fn seal(&self) {
        self.seal.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves when cancellation has been requested.
    pub async fn triggered(&self) {
        self.inner.cancelled().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
