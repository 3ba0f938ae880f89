use core::sync::atomic::{AtomicBool, Ordering};

/// A one-way shutdown flag shared between a signal handler and the run loop.
///
/// Usable from a `static` on targets without an allocator, or behind an
/// `Arc` on hosted ones.
#[derive(Debug, Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
}

impl CancellationToken {
    /// A token that has not been cancelled.
    pub const fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
        }
    }

    /// Request shutdown. Calling it again has no further effect.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether shutdown was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TOKEN: CancellationToken = CancellationToken::new();

    #[test]
    fn cancel_is_sticky() {
        assert!(!TOKEN.is_cancelled());
        TOKEN.cancel();
        TOKEN.cancel();
        assert!(TOKEN.is_cancelled());
    }
}
