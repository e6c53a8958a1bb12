//! In-process stand-ins for the firmware and the V3D register block.

use std::collections::BTreeMap;
use std::io;

use videocore_protocol::{
    PropertyResponse, PropertyTag, PALETTE_ENTRIES, PROPERTY_RESPONSE_ERROR,
    PROPERTY_RESPONSE_SUCCESS, REFERENCE_BUS_OFFSET, TAG_RESPONSE_FLAG,
};

use crate::regs::{reg, srqcs, RegisterIo};
use crate::transport::PropertyTransport;

/// Ways [`FakeFirmware`] can misbehave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FirmwareFailure {
    /// The buffer comes back untouched: response code still `0`.
    NoResponse,
    /// Response code `0x8000_0001`.
    ErrorCode,
    /// The ioctl itself fails.
    Io,
    /// Tags are answered but `size_bytes` claims more than the buffer holds.
    Corrupt,
}

#[derive(Copy, Clone, Debug)]
struct Allocation {
    phys: u32,
    locked: bool,
}

#[derive(Copy, Clone, Debug, Default)]
struct Display {
    virtual_width: u32,
    virtual_height: u32,
    bpp: u32,
}

impl Display {
    fn pitch(&self) -> u32 {
        self.virtual_width * self.bpp.max(8) / 8
    }
}

/// Scripted firmware answering property messages from memory.
///
/// Memory handed out lives in `[0, PHYS_MEMORY_LEN)` of physical address space, so a regular
/// file of that length can stand in for `/dev/mem`.
#[derive(Debug)]
pub struct FakeFirmware {
    bus_offset: u32,
    failure: Option<FirmwareFailure>,
    tag_failures: Vec<(PropertyTag, FirmwareFailure)>,
    requests: Vec<u32>,

    next_handle: u32,
    heap_next: u32,
    allocations: BTreeMap<u32, Allocation>,

    qpu_enabled: bool,
    qpu_status: u32,
    last_qpu_job: Option<[u32; 4]>,

    display: Display,
    surface_memory: Option<u32>,
    pans: Vec<(u32, u32)>,
    palette: Option<[u32; PALETTE_ENTRIES]>,
    surface_releases: usize,
}

impl Default for FakeFirmware {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeFirmware {
    pub const PHYS_MEMORY_LEN: u64 = 8 << 20;
    pub const HEAP_BASE: u32 = 0x0010_0000;
    pub const HEAP_END: u32 = 0x0040_0000;
    pub const SURFACE_BASE: u32 = 0x0040_0000;

    pub const FIRMWARE_REVISION: u32 = 0x5a2f_8b7c;
    pub const BOARD_MODEL: u32 = 0;
    pub const BOARD_REVISION: u32 = 0x00a0_2082;
    pub const BOARD_SERIAL: u64 = 0x0000_0000_1234_abcd;

    pub fn new() -> Self {
        Self {
            bus_offset: REFERENCE_BUS_OFFSET,
            failure: None,
            tag_failures: Vec::new(),
            requests: Vec::new(),
            next_handle: 1,
            heap_next: Self::HEAP_BASE,
            allocations: BTreeMap::new(),
            qpu_enabled: false,
            qpu_status: 0,
            last_qpu_job: None,
            display: Display::default(),
            surface_memory: None,
            pans: Vec::new(),
            palette: None,
            surface_releases: 0,
        }
    }

    /// Misbehave on every message from now on.
    pub fn set_failure(&mut self, failure: FirmwareFailure) {
        self.failure = Some(failure);
    }

    /// Misbehave on messages carrying `tag`.
    pub fn fail_tag(&mut self, tag: PropertyTag, failure: FirmwareFailure) {
        self.tag_failures.push((tag, failure));
    }

    pub fn clear_failures(&mut self) {
        self.failure = None;
        self.tag_failures.clear();
    }

    /// Status word reported by the next QPU executions.
    pub fn set_qpu_status(&mut self, status: u32) {
        self.qpu_status = status;
    }

    /// Override the memory size reported for new surfaces.
    pub fn set_surface_memory(&mut self, bytes: u32) {
        self.surface_memory = Some(bytes);
    }

    /// Tag ids of every message seen, in order.
    pub fn requests(&self) -> &[u32] {
        &self.requests
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_locked(&self, handle: videocore_protocol::MemHandle) -> bool {
        self.allocations
            .get(&handle.0)
            .is_some_and(|alloc| alloc.locked)
    }

    pub fn qpu_enabled(&self) -> bool {
        self.qpu_enabled
    }

    /// `{units, control, no_flush, timeout_ms}` of the last QPU execution.
    pub fn last_qpu_job(&self) -> Option<[u32; 4]> {
        self.last_qpu_job
    }

    pub fn pans(&self) -> &[(u32, u32)] {
        &self.pans
    }

    pub fn palette(&self) -> Option<[u32; PALETTE_ENTRIES]> {
        self.palette
    }

    pub fn surface_releases(&self) -> usize {
        self.surface_releases
    }

    fn failure_for(&self, tags: &[u32]) -> Option<FirmwareFailure> {
        self.failure.or_else(|| {
            self.tag_failures
                .iter()
                .find(|(tag, _)| tags.contains(&tag.id()))
                .map(|&(_, failure)| failure)
        })
    }

    fn allocate(&mut self, size: u32, align: u32) -> u32 {
        let align = align.max(4096);
        let phys = self.heap_next.next_multiple_of(align);
        let Some(end) = phys.checked_add(size) else {
            return 0;
        };
        if size == 0 || end > Self::HEAP_END {
            return 0;
        }
        self.heap_next = end;
        let handle = self.next_handle;
        self.next_handle += 1;
        self.allocations.insert(
            handle,
            Allocation {
                phys,
                locked: false,
            },
        );
        handle
    }

    fn answer(&mut self, tag: PropertyTag, req: &[u32]) -> Vec<u32> {
        let arg = |i: usize| req.get(i).copied().unwrap_or(0);
        match tag {
            PropertyTag::FirmwareRevision => vec![Self::FIRMWARE_REVISION],
            PropertyTag::BoardModel => vec![Self::BOARD_MODEL],
            PropertyTag::BoardRevision => vec![Self::BOARD_REVISION],
            PropertyTag::BoardSerial => {
                vec![Self::BOARD_SERIAL as u32, (Self::BOARD_SERIAL >> 32) as u32]
            }

            PropertyTag::AllocateMemory => vec![self.allocate(arg(0), arg(1))],
            PropertyTag::LockMemory => match self.allocations.get_mut(&arg(0)) {
                Some(alloc) => {
                    alloc.locked = true;
                    vec![alloc.phys + self.bus_offset]
                }
                None => vec![0],
            },
            PropertyTag::UnlockMemory => match self.allocations.get_mut(&arg(0)) {
                Some(alloc) => {
                    alloc.locked = false;
                    vec![0]
                }
                None => vec![1],
            },
            PropertyTag::ReleaseMemory => match self.allocations.remove(&arg(0)) {
                Some(_) => vec![0],
                None => vec![1],
            },
            PropertyTag::ExecuteCode => vec![0],
            PropertyTag::ExecuteQpu => {
                self.last_qpu_job = Some([arg(0), arg(1), arg(2), arg(3)]);
                vec![self.qpu_status]
            }
            PropertyTag::EnableQpu => {
                self.qpu_enabled = arg(0) != 0;
                vec![0]
            }

            PropertyTag::SetPhysicalSize => vec![arg(0), arg(1)],
            PropertyTag::SetVirtualSize => {
                self.display.virtual_width = arg(0);
                self.display.virtual_height = arg(1);
                vec![arg(0), arg(1)]
            }
            PropertyTag::SetDepth => {
                self.display.bpp = arg(0);
                vec![arg(0)]
            }
            PropertyTag::AllocateFrameBuffer => {
                let d = self.display;
                let size = self
                    .surface_memory
                    .unwrap_or(d.pitch() * d.virtual_height * (d.bpp / 8).max(1));
                vec![Self::SURFACE_BASE + self.bus_offset, size]
            }
            PropertyTag::GetPitch => vec![self.display.pitch()],
            PropertyTag::SetVirtualOffset => {
                self.pans.push((arg(0), arg(1)));
                vec![arg(0), arg(1)]
            }
            PropertyTag::SetPalette => {
                let mut palette = [0u32; PALETTE_ENTRIES];
                let entries = req.get(2..).unwrap_or(&[]);
                let n = entries.len().min(PALETTE_ENTRIES);
                palette[..n].copy_from_slice(&entries[..n]);
                self.palette = Some(palette);
                vec![0]
            }
            PropertyTag::ReleaseFrameBuffer => {
                self.surface_releases += 1;
                Vec::new()
            }
        }
    }
}

impl PropertyTransport for FakeFirmware {
    fn exchange(&mut self, words: &mut [u32]) -> io::Result<()> {
        let records: Vec<(u32, usize, usize, Vec<u32>)> = {
            let message = PropertyResponse::parse(words)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
            message
                .tags()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?
                .into_iter()
                .map(|r| (r.id, r.offset, r.payload.len(), r.payload.to_vec()))
                .collect()
        };
        let ids: Vec<u32> = records.iter().map(|r| r.0).collect();
        self.requests.extend_from_slice(&ids);

        match self.failure_for(&ids) {
            Some(FirmwareFailure::Io) => {
                return Err(io::Error::new(io::ErrorKind::Other, "mailbox transaction failed"))
            }
            Some(FirmwareFailure::NoResponse) => return Ok(()),
            Some(FirmwareFailure::ErrorCode) => {
                words[1] = PROPERTY_RESPONSE_ERROR;
                return Ok(());
            }
            Some(FirmwareFailure::Corrupt) | None => {}
        }

        for (id, offset, buffer_words, request) in records {
            let Some(tag) = PropertyTag::from_u32(id) else {
                continue;
            };
            let response = self.answer(tag, &request);
            let n = response.len().min(buffer_words);
            words[offset..offset + n].copy_from_slice(&response[..n]);
            words[offset - 1] = TAG_RESPONSE_FLAG | (n as u32 * 4);
        }
        words[1] = PROPERTY_RESPONSE_SUCCESS;

        if self.failure_for(&ids) == Some(FirmwareFailure::Corrupt) {
            words[0] = (words.len() as u32 + 4) * 4;
        }
        Ok(())
    }
}

/// V3D register file with just enough behaviour for the user-program queue and the counters.
///
/// Every unit queued through SRQPC completes immediately unless the block was built with
/// [`FakeV3d::stalled`].
#[derive(Debug, Clone)]
pub struct FakeV3d {
    regs: BTreeMap<u32, u32>,
    writes: Vec<(u32, u32)>,
    requested: u32,
    completed: u32,
    error: bool,
    completion_limit: Option<u32>,
}

impl Default for FakeV3d {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeV3d {
    /// IDENT values of a BCM2836 V3D.
    pub const IDENT: [u32; 3] = [0x0244_3356, 0xc010_2431, 0x0000_0124];

    pub fn new() -> Self {
        let mut regs = BTreeMap::new();
        regs.insert(reg::IDENT0, Self::IDENT[0]);
        regs.insert(reg::IDENT1, Self::IDENT[1]);
        regs.insert(reg::IDENT2, Self::IDENT[2]);
        Self {
            regs,
            writes: Vec::new(),
            requested: 0,
            completed: 0,
            error: false,
            completion_limit: None,
        }
    }

    /// Only the first `completions` queued units ever finish.
    pub fn stalled(completions: u32) -> Self {
        Self {
            completion_limit: Some(completions),
            ..Self::new()
        }
    }

    /// Sets a register without recording a write.
    pub fn set(&mut self, reg: u32, value: u32) {
        self.regs.insert(reg, value);
    }

    pub fn get(&self, reg: u32) -> u32 {
        self.read(reg)
    }

    /// Every write through [`RegisterIo`], in order.
    pub fn writes(&self) -> &[(u32, u32)] {
        &self.writes
    }
}

impl RegisterIo for FakeV3d {
    fn read(&self, reg: u32) -> u32 {
        if reg == reg::SRQCS {
            return ((self.completed & 0xff) << 16)
                | ((self.requested & 0xff) << 8)
                | (u32::from(self.error) << 7);
        }
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    fn write(&mut self, reg: u32, value: u32) {
        self.writes.push((reg, value));
        match reg {
            reg::SRQCS => {
                if value & srqcs::CLEAR_COMPLETED != 0 {
                    self.completed = 0;
                }
                if value & srqcs::CLEAR_REQUESTS != 0 {
                    self.requested = 0;
                }
                if value & srqcs::CLEAR_ERROR != 0 {
                    self.error = false;
                }
            }
            reg::SRQPC => {
                self.requested += 1;
                if self.completion_limit.map_or(true, |limit| self.completed < limit) {
                    self.completed += 1;
                }
            }
            reg::PCTRC => {
                for slot in 0..16 {
                    if value & (1 << slot) != 0 {
                        self.regs.insert(reg::pctr(slot), 0);
                    }
                }
            }
            _ => {
                self.regs.insert(reg, value);
            }
        }
    }
}
