//! Signal handling: SIGTERM/SIGINT request a graceful shutdown.
//!
//! Uses `signal-hook` flag registration; the daemon's main thread polls
//! [`SignalHandler::should_shutdown`] rather than blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Shutdown flag shared between the OS signal hook and the daemon.
#[derive(Clone, Debug)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register the OS hooks.
    ///
    /// Registration is best-effort; a failure is logged and the daemon still
    /// stops on [`request_shutdown`](Self::request_shutdown).
    pub fn new() -> Self {
        let handler = Self::unregistered();
        for (name, signal) in [("SIGTERM", SIGTERM), ("SIGINT", SIGINT)] {
            if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&handler.shutdown_flag)) {
                tracing::warn!(signal = name, error = %err, "failed to register signal hook");
            }
        }
        handler
    }

    /// A handler that only responds to programmatic requests.
    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programmatic_shutdown_is_visible_to_clones() {
        let handler = SignalHandler::unregistered();
        let observer = handler.clone();
        assert!(!observer.should_shutdown());
        handler.request_shutdown();
        assert!(observer.should_shutdown());
    }
}
