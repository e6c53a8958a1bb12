//! Physical memory windows mapped through `/dev/mem`.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use tracing::{debug, error};
use videocore_protocol::page_window;

use crate::error::{Error, Result, HINT_RUN_AS_ROOT};

/// Handle on the physical-memory device. Cloning shares the descriptor.
#[derive(Debug, Clone)]
pub struct MemoryMapper {
    file: Arc<File>,
    path: PathBuf,
}

impl MemoryMapper {
    /// Opens `path` read/write with `O_SYNC` so mappings are uncached.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
                hint: HINT_RUN_AS_ROOT,
            })?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maps `[addr, addr + len)`. The window is page aligned underneath; the returned mapping
    /// starts exactly at `addr`.
    pub fn map(&self, addr: u64, len: usize) -> Result<Mapping> {
        let (base, offset, window_len) = page_window(addr, len);
        let file_offset = libc::off_t::try_from(base).map_err(|_| Error::Mapping {
            addr,
            len,
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        })?;

        // SAFETY: a fresh shared mapping of a descriptor we own; the kernel picks the address.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                window_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                file_offset,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(Error::Mapping {
                addr,
                len,
                source: std::io::Error::last_os_error(),
            });
        }
        let window = NonNull::new(raw.cast::<u8>()).ok_or_else(|| Error::Mapping {
            addr,
            len,
            source: std::io::Error::from(std::io::ErrorKind::InvalidData),
        })?;

        debug!(addr = format_args!("0x{addr:08x}"), len, window_len, "mapped physical window");
        Ok(Mapping {
            window,
            window_len,
            offset,
            len,
            addr,
            mapped: true,
        })
    }
}

/// A CPU mapping of a physical range.
///
/// Dropping a mapping unmaps it. A failed unmap leaves the process address space in an unknown
/// state and terminates the process.
#[derive(Debug)]
pub struct Mapping {
    window: NonNull<u8>,
    window_len: usize,
    offset: usize,
    len: usize,
    addr: u64,
    mapped: bool,
}

// SAFETY: the mapping is plain memory owned by this value; access goes through `&self`/`&mut self`.
unsafe impl Send for Mapping {}

impl Mapping {
    /// Physical address of the first mapped byte.
    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        // SAFETY: `offset < PAGE_SIZE <= window_len`.
        unsafe { self.window.as_ptr().add(self.offset) }
    }

    fn check_word(&self, byte_offset: usize) {
        assert!(
            byte_offset % 4 == 0 && byte_offset + 4 <= self.len,
            "word access at 0x{byte_offset:x} outside a {}-byte mapping",
            self.len
        );
    }

    /// Volatile 32-bit load.
    pub fn read_u32(&self, byte_offset: usize) -> u32 {
        self.check_word(byte_offset);
        // SAFETY: bounds and alignment checked above.
        unsafe { ptr::read_volatile(self.as_ptr().add(byte_offset).cast::<u32>()) }
    }

    /// Volatile 32-bit store.
    pub fn write_u32(&mut self, byte_offset: usize, value: u32) {
        self.check_word(byte_offset);
        // SAFETY: bounds and alignment checked above.
        unsafe { ptr::write_volatile(self.as_ptr().add(byte_offset).cast::<u32>(), value) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `[as_ptr, as_ptr + len)` lies inside the live window.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` makes the borrow unique.
        unsafe { std::slice::from_raw_parts_mut(self.as_ptr(), self.len) }
    }

    pub fn as_words(&self) -> &[u32] {
        assert_eq!(self.offset % 4, 0, "mapping is not word aligned");
        // SAFETY: aligned start, length rounded down to whole words.
        unsafe { std::slice::from_raw_parts(self.as_ptr().cast::<u32>(), self.len / 4) }
    }

    pub fn as_words_mut(&mut self) -> &mut [u32] {
        assert_eq!(self.offset % 4, 0, "mapping is not word aligned");
        // SAFETY: as above; `&mut self` makes the borrow unique.
        unsafe { std::slice::from_raw_parts_mut(self.as_ptr().cast::<u32>(), self.len / 4) }
    }

    /// Releases the mapping, reporting a failed `munmap` instead of exiting.
    pub fn unmap(mut self) -> Result<()> {
        self.mapped = false;
        self.release()
    }

    fn release(&self) -> Result<()> {
        // SAFETY: `window`/`window_len` are exactly what mmap returned and were not unmapped yet.
        let rc = unsafe { libc::munmap(self.window.as_ptr().cast(), self.window_len) };
        if rc != 0 {
            return Err(Error::Mapping {
                addr: self.addr,
                len: self.len,
                source: std::io::Error::last_os_error(),
            });
        }
        debug!(addr = format_args!("0x{:08x}", self.addr), len = self.len, "unmapped physical window");
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if !self.mapped {
            return;
        }
        self.mapped = false;
        if let Err(err) = self.release() {
            error!(%err, "unmap failed");
            std::process::exit(1);
        }
    }
}
