use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub const HINT_MKNOD_VCIO: &str = "Try creating a device file with: sudo mknod /dev/vcio c 100 0";
pub const HINT_RUN_AS_ROOT: &str = "This program should be run as root, prefix with sudo";
pub const HINT_FBSET_DEPTH: &str = "Retry after fbset -depth 32 or fbset -depth 8";
pub const HINT_SURFACE_SIZE: &str = "Request a smaller surface";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot open {}: {source}. {hint}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
        hint: &'static str,
    },

    #[error("{request} ioctl failed: {source}")]
    Ioctl {
        request: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("firmware rejected {op}")]
    Protocol { op: &'static str },

    #[error("firmware returned no handle for a {size}-byte allocation")]
    Allocation { size: u32 },

    #[error("cannot map {len} bytes at physical 0x{addr:08x}: {source}")]
    Mapping {
        addr: u64,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("{what} did not complete within {timeout:?}")]
    Timeout { what: &'static str, timeout: Duration },

    #[error("{reason}. {hint}")]
    Configuration { reason: String, hint: &'static str },
}

impl Error {
    /// Errors after which the run cannot meaningfully continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Open { .. } | Error::Mapping { .. } | Error::Configuration { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
