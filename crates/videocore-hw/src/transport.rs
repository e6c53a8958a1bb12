//! The raw firmware exchange underneath [`crate::PropertyChannel`].

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::error::{Error, Result, HINT_MKNOD_VCIO};

/// Hands a finished property message to firmware and waits for the in-place response.
pub trait PropertyTransport {
    fn exchange(&mut self, words: &mut [u32]) -> io::Result<()>;
}

impl<T: PropertyTransport + ?Sized> PropertyTransport for &mut T {
    fn exchange(&mut self, words: &mut [u32]) -> io::Result<()> {
        (**self).exchange(words)
    }
}

impl<T: PropertyTransport + ?Sized> PropertyTransport for Box<T> {
    fn exchange(&mut self, words: &mut [u32]) -> io::Result<()> {
        (**self).exchange(words)
    }
}

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn iowr(ty: u32, nr: u32, size: usize) -> u32 {
    ((IOC_READ | IOC_WRITE) << 30) | ((size as u32) << 16) | (ty << 8) | nr
}

/// `_IOWR(100, 0, char *)`.
pub const IOCTL_MBOX_PROPERTY: u32 = iowr(100, 0, std::mem::size_of::<*mut libc::c_char>());

/// The `/dev/vcio` character device.
#[derive(Debug)]
pub struct VcioDevice {
    file: File,
}

impl VcioDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| {
                let hint = if source.kind() == io::ErrorKind::NotFound {
                    HINT_MKNOD_VCIO
                } else {
                    crate::error::HINT_RUN_AS_ROOT
                };
                Error::Open {
                    path: path.to_path_buf(),
                    source,
                    hint,
                }
            })?;
        Ok(Self { file })
    }
}

impl PropertyTransport for VcioDevice {
    fn exchange(&mut self, words: &mut [u32]) -> io::Result<()> {
        // SAFETY: firmware reads and rewrites at most `words[0]` bytes, which the message builder
        // keeps equal to the buffer length.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                IOCTL_MBOX_PROPERTY as _,
                words.as_mut_ptr(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
