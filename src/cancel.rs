//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is checked by the lifecycle monitor between two polls. Nothing is
//! interrupted mid-call: cancelling only guarantees that the next check point tears the match
//! down and returns [`ArenaError::Cancelled`](crate::error::ArenaError::Cancelled).

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Set from the signal handler, only ever read elsewhere.
static SIGNALLED: AtomicBool = AtomicBool::new(false);

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    observe_signals: bool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is also cancelled by SIGINT / SIGTERM.
    ///
    /// Installs the process-wide handlers; call it once, early in `main`.
    pub fn from_signals() -> anyhow::Result<Self> {
        install_signal_handlers()?;
        Ok(CancellationToken {
            flag: Arc::default(),
            observe_signals: true,
        })
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || (self.observe_signals && SIGNALLED.load(Ordering::SeqCst))
    }

    /// Sleep for `duration` unless cancelled first. Returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

#[cfg(unix)]
fn install_signal_handlers() -> anyhow::Result<()> {
    use anyhow::Context;
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    extern "C" fn on_signal(_signal: nix::libc::c_int) {
        // atomic store only, nothing else is async-signal-safe here
        SIGNALLED.store(true, Ordering::SeqCst);
    }

    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // Safety: the handler only stores into an atomic.
        unsafe { sigaction(signal, &action) }
            .with_context(|| format!("could not install {signal} handler"))?;
    }
    tracing::debug!("signal handlers installed (SIGINT, SIGTERM)");
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handlers() -> anyhow::Result<()> {
    tracing::warn!("signal handling is only available on unix, Ctrl-C will not clean up");
    Ok(())
}
