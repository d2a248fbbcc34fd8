//! Cooperative SIGINT handling.
//!
//! The signal handler only flips an atomic; a watcher thread forwards it into
//! an owned [`Interrupt`] that transfers and the controller poll.
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WATCH_INTERVAL: Duration = Duration::from_millis(50);

/// Shared abort flag, cheap to clone into worker threads.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// Written from the signal handler, so it must stay a plain atomic.
#[cfg(unix)]
static SIGINT_PENDING: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    SIGINT_PENDING.store(true, Ordering::SeqCst);
}

/// Route the first SIGINT into `interrupt` instead of terminating the
/// process. The disposition resets after it, so a second Ctrl-C kills.
#[cfg(unix)]
pub fn install_sigint_handler(interrupt: &Interrupt) -> Result<()> {
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe,
    // and the sigaction struct is fully initialized before use.
    let rc = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESETHAND;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut())
    };
    if rc != 0 {
        return Err(anyhow!(
            "install SIGINT handler: {}",
            std::io::Error::last_os_error()
        ));
    }

    let interrupt = interrupt.clone();
    std::thread::Builder::new()
        .name("sigint-watch".to_string())
        .spawn(move || loop {
            if SIGINT_PENDING.swap(false, Ordering::SeqCst) {
                tracing::info!("SIGINT received; cancelling outstanding downloads");
                interrupt.raise();
            }
            std::thread::sleep(WATCH_INTERVAL);
        })
        .map_err(|err| anyhow!("spawn SIGINT watcher: {err}"))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn install_sigint_handler(_interrupt: &Interrupt) -> Result<()> {
    Ok(())
}
