//! Process-wide shutdown signalling.
//!
//! Two things can request a shutdown: an operator signal (SIGINT/SIGTERM)
//! and, in `once` mode, the session engine itself once the single served
//! session has closed (§4.3 step 7). Both funnel through the same flag so
//! `server::run_server` only has to watch one thing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared shutdown flag, cheap to clone and pass into session contexts.
#[derive(Clone)]
pub struct ShutdownState {
    requested: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

/// Register SIGINT/SIGTERM/SIGHUP handlers that request a graceful
/// shutdown instead of killing the process immediately. Without this, an
/// operator's Ctrl+C would drop WebSocket connections without signalling
/// their child processes.
///
/// POSIX-only, like the rest of the fork/signal/waitpid process model this
/// crate implements — there is no Windows build of this binary.
pub fn register_signal_handlers(state: ShutdownState) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    thread::spawn(move || {
        for signal in signals.forever() {
            log::info!("received signal {signal}, requesting shutdown");
            state.request_shutdown();
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unrequested() {
        let state = ShutdownState::new();
        assert!(!state.is_shutdown_requested());
    }

    #[test]
    fn request_is_visible_across_clones() {
        let state = ShutdownState::new();
        let clone = state.clone();
        state.request_shutdown();
        assert!(clone.is_shutdown_requested());
    }
}
