//! Fixed-layout requests for every firmware operation this workspace issues.
//!
//! Each constructor returns an unfinished [`PropertyMessage`]; payload layouts and value-buffer
//! sizes follow the firmware's mailbox property interface.

use crate::addr::BusAddress;
use crate::message::PropertyMessage;
use crate::tags::PropertyTag;

/// Opaque firmware-assigned GPU memory handle. `0` is never a live handle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemHandle(pub u32);

impl MemHandle {
    pub const NULL: MemHandle = MemHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

pub const PALETTE_ENTRIES: usize = 256;

/// Value buffer of a set-palette tag: `{offset, length, entries[256]}`.
pub const PALETTE_BUFFER_BYTES: u32 = (2 + PALETTE_ENTRIES as u32) * 4;

pub fn firmware_revision() -> PropertyMessage {
    PropertyMessage::single(PropertyTag::FirmwareRevision, &[0])
}

pub fn board_model() -> PropertyMessage {
    PropertyMessage::single(PropertyTag::BoardModel, &[0])
}

pub fn board_revision() -> PropertyMessage {
    PropertyMessage::single(PropertyTag::BoardRevision, &[0])
}

pub fn board_serial() -> PropertyMessage {
    PropertyMessage::single(PropertyTag::BoardSerial, &[0, 0])
}

pub fn allocate_memory(size: u32, align: u32, flags: u32) -> PropertyMessage {
    PropertyMessage::single(PropertyTag::AllocateMemory, &[size, align, flags])
}

pub fn lock_memory(handle: MemHandle) -> PropertyMessage {
    PropertyMessage::single(PropertyTag::LockMemory, &[handle.0])
}

pub fn unlock_memory(handle: MemHandle) -> PropertyMessage {
    PropertyMessage::single(PropertyTag::UnlockMemory, &[handle.0])
}

pub fn release_memory(handle: MemHandle) -> PropertyMessage {
    PropertyMessage::single(PropertyTag::ReleaseMemory, &[handle.0])
}

/// Runs VideoCore code at bus address `code` with `r0..r5`.
pub fn execute_code(code: BusAddress, regs: [u32; 6]) -> PropertyMessage {
    let mut payload = [0u32; 7];
    payload[0] = code.0;
    payload[1..].copy_from_slice(&regs);
    PropertyMessage::single(PropertyTag::ExecuteCode, &payload)
}

pub fn execute_qpu(units: u32, control: BusAddress, no_flush: bool, timeout_ms: u32) -> PropertyMessage {
    PropertyMessage::single(
        PropertyTag::ExecuteQpu,
        &[units, control.0, u32::from(no_flush), timeout_ms],
    )
}

pub fn enable_qpu(enable: bool) -> PropertyMessage {
    PropertyMessage::single(PropertyTag::EnableQpu, &[u32::from(enable)])
}

pub fn set_virtual_offset(x: u32, y: u32) -> PropertyMessage {
    PropertyMessage::single(PropertyTag::SetVirtualOffset, &[x, y])
}

/// Firmware-side surface release. Carries no value buffer.
pub fn release_frame_buffer() -> PropertyMessage {
    let mut msg = PropertyMessage::new();
    msg.push_tag_sized(PropertyTag::ReleaseFrameBuffer, 0, 0, &[]);
    msg
}

pub fn set_palette(palette: &[u32; PALETTE_ENTRIES]) -> PropertyMessage {
    let mut payload = Vec::with_capacity(2 + PALETTE_ENTRIES);
    payload.push(0);
    payload.push(PALETTE_ENTRIES as u32);
    payload.extend_from_slice(palette);

    let mut msg = PropertyMessage::new();
    // The firmware only inspects the declared buffer size for this tag; the 4-byte request size
    // is what the reference board accepts.
    msg.push_tag_sized(PropertyTag::SetPalette, PALETTE_BUFFER_BYTES, 4, &payload);
    msg
}

/// Requested display geometry for [`surface`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SurfaceRequest {
    pub width: u32,
    pub height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub bpp: u32,
}

/// Word indices of each response field within a [`surface`] message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SurfaceFields {
    pub physical_size: usize,
    pub virtual_size: usize,
    pub depth: usize,
    pub allocation: usize,
    pub pitch: usize,
}

/// Negotiates physical size, virtual size, depth, allocation and pitch in one exchange.
pub fn surface(req: SurfaceRequest) -> (PropertyMessage, SurfaceFields) {
    let mut msg = PropertyMessage::new();
    let physical_size = msg.push_tag(PropertyTag::SetPhysicalSize, &[req.width, req.height]);
    let virtual_size = msg.push_tag(
        PropertyTag::SetVirtualSize,
        &[req.virtual_width, req.virtual_height],
    );
    let depth = msg.push_tag(PropertyTag::SetDepth, &[req.bpp]);
    // Request word is the alignment (0 = firmware default); response is {bus address, size}.
    let allocation = msg.push_tag_sized(PropertyTag::AllocateFrameBuffer, 8, 4, &[0]);
    let pitch = msg.push_tag_sized(PropertyTag::GetPitch, 4, 0, &[]);
    (
        msg,
        SurfaceFields {
            physical_size,
            virtual_size,
            depth,
            allocation,
            pitch,
        },
    )
}
