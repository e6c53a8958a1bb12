//! V3D register block.

use crate::error::Result;
use crate::mapper::{Mapping, MemoryMapper};

/// Offset of the V3D block inside the peripheral window.
pub const V3D_OFFSET: usize = 0x00C0_0000;

/// Register offsets relative to the V3D base.
pub mod reg {
    pub const IDENT0: u32 = 0x000;
    pub const IDENT1: u32 = 0x004;
    pub const IDENT2: u32 = 0x008;

    pub const L2CACTL: u32 = 0x020;
    pub const SLCACTL: u32 = 0x024;

    pub const SRQPC: u32 = 0x430;
    pub const SRQUA: u32 = 0x434;
    pub const SRQCS: u32 = 0x43c;

    pub const PCTRC: u32 = 0x670;
    pub const PCTRE: u32 = 0x674;

    pub const DBCFG: u32 = 0xe00;
    pub const DBQITE: u32 = 0xe2c;
    pub const DBQITC: u32 = 0xe30;

    pub const ERRSTAT: u32 = 0xf20;

    /// Performance counter `i` value.
    pub const fn pctr(i: usize) -> u32 {
        0x680 + 8 * i as u32
    }

    /// Performance counter `i` source select.
    pub const fn pctrs(i: usize) -> u32 {
        0x684 + 8 * i as u32
    }
}

/// SRQCS bits.
pub mod srqcs {
    /// Clear the queue error flag.
    pub const CLEAR_ERROR: u32 = 1 << 7;
    /// Clear the request count.
    pub const CLEAR_REQUESTS: u32 = 1 << 8;
    /// Clear the completed count.
    pub const CLEAR_COMPLETED: u32 = 1 << 16;
}

/// Word access to the V3D registers. Offsets are relative to the V3D base.
pub trait RegisterIo {
    fn read(&self, reg: u32) -> u32;
    fn write(&mut self, reg: u32, value: u32);
}

impl<R: RegisterIo + ?Sized> RegisterIo for &mut R {
    fn read(&self, reg: u32) -> u32 {
        (**self).read(reg)
    }

    fn write(&mut self, reg: u32, value: u32) {
        (**self).write(reg, value)
    }
}

/// The peripheral window mapped through `/dev/mem`.
#[derive(Debug)]
pub struct MappedRegisters {
    window: Mapping,
}

impl MappedRegisters {
    pub fn map(mapper: &MemoryMapper, peripheral_base: u64, peripheral_len: usize) -> Result<Self> {
        assert!(
            peripheral_len >= V3D_OFFSET + 0x1000,
            "peripheral window of {peripheral_len:#x} bytes does not reach the V3D block"
        );
        Ok(Self {
            window: mapper.map(peripheral_base, peripheral_len)?,
        })
    }

    pub fn unmap(self) -> Result<()> {
        self.window.unmap()
    }
}

impl RegisterIo for MappedRegisters {
    fn read(&self, reg: u32) -> u32 {
        self.window.read_u32(V3D_OFFSET + reg as usize)
    }

    fn write(&mut self, reg: u32, value: u32) {
        self.window.write_u32(V3D_OFFSET + reg as usize, value)
    }
}

fn field(word: u32, hi: u32, lo: u32) -> u32 {
    (word >> lo) & ((1u32 << (hi - lo + 1)) - 1)
}

/// Decoded IDENT0..IDENT2.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct V3dIdent {
    /// `b"V3D"` on a live block.
    pub id_string: [u8; 3],
    pub technology_version: u32,
    pub vpm_size_kb: u32,
    pub hdr_support: u32,
    pub semaphores: u32,
    pub tmus_per_slice: u32,
    pub qpus_per_slice: u32,
    pub slices: u32,
    pub revision: u32,
    pub tlb_double_buffer: u32,
    pub tlb_size: u32,
    pub vri_memory_size: u32,
}

impl V3dIdent {
    pub fn read(regs: &impl RegisterIo) -> Self {
        Self::decode(
            regs.read(reg::IDENT0),
            regs.read(reg::IDENT1),
            regs.read(reg::IDENT2),
        )
    }

    pub fn decode(ident0: u32, ident1: u32, ident2: u32) -> Self {
        let [a, b, c, version] = ident0.to_le_bytes();
        Self {
            id_string: [a, b, c],
            technology_version: u32::from(version),
            vpm_size_kb: field(ident1, 31, 28),
            hdr_support: field(ident1, 27, 24),
            semaphores: field(ident1, 23, 16),
            tmus_per_slice: field(ident1, 15, 12),
            qpus_per_slice: field(ident1, 11, 8),
            slices: field(ident1, 7, 4),
            revision: field(ident1, 3, 0),
            tlb_double_buffer: field(ident2, 11, 8),
            tlb_size: field(ident2, 7, 4),
            vri_memory_size: field(ident2, 3, 0),
        }
    }

    pub fn is_v3d(&self) -> bool {
        &self.id_string == b"V3D"
    }

    pub fn total_qpus(&self) -> u32 {
        self.qpus_per_slice * self.slices
    }
}

/// Decoded SRQCS: the user-program request queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueStatus {
    pub completed: u32,
    pub requested: u32,
    pub error: bool,
    pub queue_length: u32,
}

impl QueueStatus {
    pub fn decode(srqcs: u32) -> Self {
        Self {
            completed: field(srqcs, 23, 16),
            requested: field(srqcs, 15, 8),
            error: srqcs & (1 << 7) != 0,
            queue_length: field(srqcs, 5, 0),
        }
    }

    pub fn read(regs: &impl RegisterIo) -> Self {
        Self::decode(regs.read(reg::SRQCS))
    }
}
