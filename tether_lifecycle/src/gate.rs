use tokio_util::sync::CancellationToken;

/// Releases its [`Gate`]s, once.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    token: CancellationToken,
}

/// A barrier that opens when the shutdown routines have completed. Cheap to
/// clone; every clone opens at the same time.
#[derive(Debug, Clone)]
pub struct Gate {
    token: CancellationToken,
}

impl Latch {
    pub(crate) fn gate(&self) -> Gate {
        Gate {
            token: self.token.clone(),
        }
    }

    /// Opens every gate of this latch. Repeated calls have no effect.
    pub(crate) fn release(&self) {
        self.token.cancel();
    }
}

impl Gate {
    /// Waits for this gate to open. Completes right away if it is open
    /// already.
    pub async fn opened(&self) {
        self.token.cancelled().await;
    }

    /// Reports whether this gate is open as of this moment.
    pub fn is_open(&self) -> bool {
        self.token.is_cancelled()
    }
}
