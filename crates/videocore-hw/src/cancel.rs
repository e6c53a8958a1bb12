//! Cooperative cancellation for the frame loop.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared flag checked once per frame. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

static SIGINT_TOKEN: OnceLock<CancellationToken> = OnceLock::new();

extern "C" fn on_sigint(_signal: libc::c_int) {
    if let Some(token) = SIGINT_TOKEN.get() {
        token.cancel();
    }
}

/// Cancels the returned token on the first SIGINT. The handler resets itself after that, so a
/// second SIGINT terminates the process.
pub fn install_sigint_handler() -> io::Result<CancellationToken> {
    let token = SIGINT_TOKEN.get_or_init(CancellationToken::new).clone();

    // SAFETY: `on_sigint` only touches an already-initialised OnceLock and an atomic.
    let rc = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESETHAND;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut())
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn sigint_cancels_the_installed_token() {
        let token = install_sigint_handler().unwrap();
        assert!(!token.is_cancelled());
        // SAFETY: the handler installed above catches this delivery.
        assert_eq!(unsafe { libc::raise(libc::SIGINT) }, 0);
        assert!(token.is_cancelled());
    }
}
