use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use tracing::{info, warn};

const KDSETMODE: u32 = 0x4B3A;
const KD_TEXT: libc::c_ulong = 0;
const KD_GRAPHICS: libc::c_ulong = 1;

/// Keeps the virtual console in graphics mode so it does not draw over the surface. Text mode
/// comes back on drop.
#[derive(Debug)]
pub struct ConsoleGuard {
    console: Option<File>,
}

impl ConsoleGuard {
    /// Switches `path` to graphics mode. A console that cannot be opened or switched is logged
    /// and otherwise ignored.
    pub fn graphics(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let console = match OpenOptions::new().write(true).open(path) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot open console, leaving it in text mode");
                return Self { console: None };
            }
        };
        if let Err(err) = set_mode(&console, KD_GRAPHICS) {
            warn!(path = %path.display(), %err, "KDSETMODE graphics failed");
            return Self { console: None };
        }
        info!(path = %path.display(), "console in graphics mode");
        Self {
            console: Some(console),
        }
    }

    pub fn is_active(&self) -> bool {
        self.console.is_some()
    }
}

impl Drop for ConsoleGuard {
    fn drop(&mut self) {
        if let Some(console) = self.console.take() {
            match set_mode(&console, KD_TEXT) {
                Ok(()) => info!("console back in text mode"),
                Err(err) => warn!(%err, "KDSETMODE text failed"),
            }
        }
    }
}

fn set_mode(console: &File, mode: libc::c_ulong) -> std::io::Result<()> {
    // SAFETY: KDSETMODE takes its argument by value.
    let rc = unsafe { libc::ioctl(console.as_raw_fd(), KDSETMODE as _, mode) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_console_is_not_fatal() {
        let guard = ConsoleGuard::graphics("/nonexistent/tty0");
        assert!(!guard.is_active());
    }

    #[test]
    fn non_tty_is_left_alone() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let guard = ConsoleGuard::graphics(file.path());
        assert!(!guard.is_active());
    }
}
