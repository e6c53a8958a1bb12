//! Property tag identifiers understood by the VideoCore firmware.
//!
//! These values are the firmware's contract; they are not ours to pick. Values mirror the
//! mailbox property interface as exposed through `/dev/vcio`.

/// One operation record type within a property message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PropertyTag {
    FirmwareRevision = 0x0000_0001,
    BoardModel = 0x0001_0001,
    BoardRevision = 0x0001_0002,
    BoardSerial = 0x0001_0004,

    AllocateMemory = 0x0003_000c,
    LockMemory = 0x0003_000d,
    UnlockMemory = 0x0003_000e,
    ReleaseMemory = 0x0003_000f,
    ExecuteCode = 0x0003_0010,
    ExecuteQpu = 0x0003_0011,
    EnableQpu = 0x0003_0012,

    AllocateFrameBuffer = 0x0004_0001,
    ReleaseFrameBuffer = 0x0004_8001,
    GetPitch = 0x0004_0008,
    SetPhysicalSize = 0x0004_8003,
    SetVirtualSize = 0x0004_8004,
    SetDepth = 0x0004_8005,
    SetVirtualOffset = 0x0004_8009,
    SetPalette = 0x0004_800b,
}

impl PropertyTag {
    pub const ALL: [PropertyTag; 19] = [
        Self::FirmwareRevision,
        Self::BoardModel,
        Self::BoardRevision,
        Self::BoardSerial,
        Self::AllocateMemory,
        Self::LockMemory,
        Self::UnlockMemory,
        Self::ReleaseMemory,
        Self::ExecuteCode,
        Self::ExecuteQpu,
        Self::EnableQpu,
        Self::AllocateFrameBuffer,
        Self::ReleaseFrameBuffer,
        Self::GetPitch,
        Self::SetPhysicalSize,
        Self::SetVirtualSize,
        Self::SetDepth,
        Self::SetVirtualOffset,
        Self::SetPalette,
    ];

    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| *tag as u32 == value)
    }

    pub const fn id(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_u32_maps_every_known_tag() {
        for tag in PropertyTag::ALL {
            assert_eq!(PropertyTag::from_u32(tag.id()), Some(tag));
        }
        assert_eq!(PropertyTag::from_u32(0), None);
        assert_eq!(PropertyTag::from_u32(0x0004_4003), None);
    }
}
