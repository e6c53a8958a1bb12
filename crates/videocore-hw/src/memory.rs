//! GPU memory lifecycle: allocate, lock, map, then unmap, unlock, free in reverse.

use bitflags::bitflags;
use tracing::{info, warn};
use videocore_protocol::{BusAddress, BusTranslation, MemHandle};

use crate::channel::PropertyChannel;
use crate::error::{Error, Result};
use crate::mapper::{Mapping, MemoryMapper};
use crate::transport::PropertyTransport;

bitflags! {
    /// Allocation flags understood by the firmware allocator.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct MemFlags: u32 {
        /// Firmware may drop the contents while the block is unlocked.
        const DISCARDABLE = 1 << 0;
        /// Normal allocating alias. Don't use from the ARM side.
        const NORMAL = 0 << 2;
        /// `0xC` alias: uncached.
        const DIRECT = 1 << 2;
        /// `0x8` alias: non-allocating in L2 but coherent.
        const COHERENT = 2 << 2;
        /// Allocating in L2.
        const L1_NONALLOCATING = Self::DIRECT.bits() | Self::COHERENT.bits();
        /// Initialise the buffer to all zeros.
        const ZERO = 1 << 4;
        /// Don't initialise; the default is all ones.
        const NO_INIT = 1 << 5;
        /// Likely to be locked for long periods of time.
        const HINT_PERMALOCK = 1 << 6;
    }
}

impl Default for MemFlags {
    fn default() -> Self {
        Self::DIRECT
    }
}

/// Firmware memory operations plus CPU mapping of the locked blocks.
///
/// The manager never enforces ordering between the steps; callers release in the reverse order
/// of acquisition. [`GpuBuffer`] packages the usual sequence.
#[derive(Debug, Clone)]
pub struct GpuMemoryManager {
    mapper: MemoryMapper,
    translation: BusTranslation,
}

impl GpuMemoryManager {
    pub fn new(mapper: MemoryMapper, translation: BusTranslation) -> Self {
        Self { mapper, translation }
    }

    pub fn translation(&self) -> BusTranslation {
        self.translation
    }

    /// Returns [`MemHandle::NULL`] if firmware refuses.
    pub fn allocate<T: PropertyTransport>(
        &self,
        channel: &mut PropertyChannel<T>,
        size: u32,
        align: u32,
        flags: MemFlags,
    ) -> MemHandle {
        channel.allocate(size, align, flags)
    }

    /// Returns [`BusAddress::NULL`] if firmware refuses.
    pub fn lock<T: PropertyTransport>(
        &self,
        channel: &mut PropertyChannel<T>,
        handle: MemHandle,
    ) -> BusAddress {
        channel.lock(handle)
    }

    /// Maps `size` bytes of the block locked at `bus` into this process.
    pub fn map(&self, bus: BusAddress, size: usize) -> Result<Mapping> {
        if bus.0 < self.translation.offset() {
            return Err(Error::Mapping {
                addr: u64::from(bus.0),
                len: size,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "bus address below the board's bus offset",
                ),
            });
        }
        let phys = self.translation.bus_to_phys(bus);
        self.mapper.map(u64::from(phys.0), size)
    }

    pub fn unmap(&self, mapping: Mapping) -> Result<()> {
        mapping.unmap()
    }

    /// Firmware status word; `0` on success.
    pub fn unlock<T: PropertyTransport>(
        &self,
        channel: &mut PropertyChannel<T>,
        handle: MemHandle,
    ) -> u32 {
        channel.unlock(handle)
    }

    /// Firmware status word; `0` on success.
    pub fn free<T: PropertyTransport>(
        &self,
        channel: &mut PropertyChannel<T>,
        handle: MemHandle,
    ) -> u32 {
        channel.free(handle)
    }

    /// Powers the QPU array up or down.
    pub fn processor_array<T: PropertyTransport>(
        &self,
        channel: &mut PropertyChannel<T>,
        enable: bool,
    ) -> Result<()> {
        let status = channel.enable_qpu(enable);
        if status != 0 {
            return Err(Error::Protocol {
                op: if enable { "QPU enable" } else { "QPU disable" },
            });
        }
        info!(enable, "QPU array power");
        Ok(())
    }
}

/// An allocated, locked and mapped block of GPU memory.
#[derive(Debug)]
pub struct GpuBuffer {
    handle: MemHandle,
    bus: BusAddress,
    size: u32,
    mapping: Mapping,
}

impl GpuBuffer {
    /// Allocates, locks and maps `size` bytes. Steps already taken are undone if a later one
    /// fails.
    pub fn acquire<T: PropertyTransport>(
        memory: &GpuMemoryManager,
        channel: &mut PropertyChannel<T>,
        size: u32,
        align: u32,
        flags: MemFlags,
    ) -> Result<Self> {
        let handle = memory.allocate(channel, size, align, flags);
        if handle.is_null() {
            return Err(Error::Allocation { size });
        }

        let bus = memory.lock(channel, handle);
        if bus.is_null() {
            memory.free(channel, handle);
            return Err(Error::Protocol { op: "memory lock" });
        }

        let mapping = match memory.map(bus, size as usize) {
            Ok(mapping) => mapping,
            Err(err) => {
                memory.unlock(channel, handle);
                memory.free(channel, handle);
                return Err(err);
            }
        };

        info!(
            handle = handle.0,
            bus_addr = format_args!("0x{:08x}", bus.0),
            size,
            flags = flags.bits(),
            "GPU buffer acquired"
        );
        Ok(Self {
            handle,
            bus,
            size,
            mapping,
        })
    }

    /// Unmaps, unlocks and frees the block.
    pub fn release<T: PropertyTransport>(
        self,
        memory: &GpuMemoryManager,
        channel: &mut PropertyChannel<T>,
    ) -> Result<()> {
        let Self {
            handle,
            bus,
            mapping,
            ..
        } = self;

        memory.unmap(mapping)?;
        let status = memory.unlock(channel, handle);
        if status != 0 {
            warn!(handle = handle.0, status, "unlock failed, freeing anyway");
        }
        let status = memory.free(channel, handle);
        if status != 0 {
            return Err(Error::Protocol { op: "memory release" });
        }
        info!(handle = handle.0, bus_addr = format_args!("0x{:08x}", bus.0), "GPU buffer released");
        Ok(())
    }

    pub fn handle(&self) -> MemHandle {
        self.handle
    }

    pub fn bus_address(&self) -> BusAddress {
        self.bus
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn words(&self) -> &[u32] {
        self.mapping.as_words()
    }

    pub fn words_mut(&mut self) -> &mut [u32] {
        self.mapping.as_words_mut()
    }
}
