use crate::error::{RebacError, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative cancellation flag shared between a caller and an in-flight
/// resolution. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RebacError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let signal = CancellationSignal::new();
        let observer = signal.clone();
        assert!(observer.ensure_live().is_ok());

        signal.cancel();
        assert!(observer.is_cancelled());
        assert!(matches!(observer.ensure_live(), Err(RebacError::Cancelled)));
    }
}
