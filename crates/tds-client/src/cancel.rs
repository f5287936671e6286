//! Cooperative cancellation.
//!
//! A blocking connection cannot be interrupted from the inside, so
//! cancellation is a flag: another thread sets it through a [`CancelToken`]
//! and the session checks it between token-processing steps. When the flag
//! is seen the session sends an ATTENTION packet, fails the operation with
//! [`Error::Cancelled`](crate::Error::Cancelled) and the connection must be
//! closed.
//!
//! ## Example
//!
//! ```rust,ignore
//! let cancel = conn.cancel_token();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(5));
//!     cancel.cancel();
//! });
//! let result = conn.execute("SELECT * FROM very_large_table");
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Handle that requests cancellation of the operation in flight.
///
/// Cloneable, `Send + Sync`. Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            tracing::debug!("cancellation requested");
        }
    }

    /// Check whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Clear the flag before a new operation.
    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());

        other.cancel();
        other.cancel();
        assert!(token.is_cancelled());

        token.reset();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CancelToken>();
    }
}
