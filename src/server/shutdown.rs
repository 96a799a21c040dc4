//! Cooperative shutdown flag.
//!
//! SIGINT and SIGTERM only set an atomic flag; the dispatch loop reads it once per
//! wait/dispatch return. An in-flight request always completes.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Stop flag shared between the signal handlers, the dispatch loop and any controller.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Register SIGINT and SIGTERM to set this flag.
    ///
    /// A second signal arriving while the flag is already set terminates the process with
    /// the signal's default action, so a stuck drain can still be interrupted. The handlers
    /// stay installed until the returned registration is dropped.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a handler cannot be registered.
    #[cfg(unix)]
    pub fn install_handlers(&self) -> io::Result<SignalRegistration> {
        use signal_hook::consts::{SIGINT, SIGTERM};

        let mut ids = Vec::with_capacity(4);
        for signal in [SIGINT, SIGTERM] {
            // Must precede `register`, which sets the flag the condition reads.
            ids.push(signal_hook::flag::register_conditional_default(
                signal,
                Arc::clone(&self.flag),
            )?);
            ids.push(signal_hook::flag::register(signal, Arc::clone(&self.flag))?);
        }
        info!("Signal handlers installed for SIGINT and SIGTERM");
        Ok(SignalRegistration { ids })
    }

    #[cfg(not(unix))]
    pub fn install_handlers(&self) -> io::Result<SignalRegistration> {
        debug!("Signal handlers are not supported on this platform");
        Ok(SignalRegistration {})
    }
}

/// Installed signal handlers; unregistered on drop.
///
/// Dropping removes this registration's actions but leaves the process-level signal
/// disposition with `signal-hook`, not `SIG_DFL`. After the drop a SIGINT or SIGTERM is
/// ignored unless another [`ShutdownSignal`] has installed its own handlers.
#[derive(Debug)]
pub struct SignalRegistration {
    #[cfg(unix)]
    ids: Vec<signal_hook::SigId>,
}

impl Drop for SignalRegistration {
    fn drop(&mut self) {
        #[cfg(unix)]
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
        debug!("Signal handlers removed");
    }
}
