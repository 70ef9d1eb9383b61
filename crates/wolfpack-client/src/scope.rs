use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Lifetime flag for a mounted piece of client state.
///
/// Async work checks `is_mounted()` after every await before touching state,
/// so a response that arrives after teardown is dropped instead of applied.
#[derive(Debug, Clone, Default)]
pub struct Mounted {
    token: CancellationToken,
}

impl Mounted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mounted(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn unmount(&self) {
        self.token.cancel();
    }

    /// Resolves once `unmount` has been called.
    pub fn unmounted(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}
