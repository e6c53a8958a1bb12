//! Request/response exchanges with the VideoCore firmware.
//!
//! Every wrapper here is a fixed-layout, single-tag call. Wrappers never fail: a rejected or
//! malformed response is logged and turned into a sentinel the caller can test for.

use std::path::Path;

use tracing::{info, trace, warn};
use videocore_protocol::{
    requests, BusAddress, MemHandle, PropertyDecodeError, PropertyMessage, PropertyResponse,
    PropertyTag,
};

use crate::error::{Error, Result};
use crate::memory::MemFlags;
use crate::transport::{PropertyTransport, VcioDevice};

/// Returned by status-word wrappers when firmware gave no usable answer. Firmware itself
/// reports success as `0`.
pub const STATUS_PROTOCOL_ERROR: u32 = 0xFFFF_FFFF;

/// Returned by board/firmware queries when firmware gave no usable answer.
pub const UNKNOWN_PROPERTY: u32 = 0xFFFF_FFFF;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BoardIdentity {
    pub model: u32,
    pub revision: u32,
    pub serial: u64,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ReplyError {
    #[error(transparent)]
    Decode(#[from] PropertyDecodeError),

    #[error("firmware returned code 0x{code:08x}")]
    Rejected { code: u32 },

    #[error("tag missing from response")]
    MissingTag,

    #[error("tag not processed by firmware")]
    NotProcessed,

    #[error("response holds {got} words, expected {expected}")]
    Short { got: usize, expected: usize },
}

/// Reads the first `N` response words of `tag` from an exchanged message.
pub(crate) fn decode_reply<const N: usize>(
    words: &[u32],
    tag: PropertyTag,
) -> Result<[u32; N], ReplyError> {
    let response = PropertyResponse::parse(words)?;
    if !response.is_success() {
        return Err(ReplyError::Rejected {
            code: response.code(),
        });
    }
    let record = response.tag(tag).ok_or(ReplyError::MissingTag)?;
    if !record.is_response() {
        return Err(ReplyError::NotProcessed);
    }
    let got = record.payload.len();
    record
        .payload
        .get(..N)
        .and_then(|slice| <[u32; N]>::try_from(slice).ok())
        .ok_or(ReplyError::Short { got, expected: N })
}

/// An open firmware property channel.
///
/// One request is in flight at a time; methods take `&mut self`.
#[derive(Debug)]
pub struct PropertyChannel<T = VcioDevice> {
    transport: T,
}

impl PropertyChannel<VcioDevice> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let transport = VcioDevice::open(path)?;
        info!(path = %path.display(), "firmware property channel open");
        Ok(Self::new(transport))
    }
}

impl<T: PropertyTransport> PropertyChannel<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Closes the channel, handing back the transport.
    pub fn close(self) -> T {
        self.transport
    }

    /// Sends a single-tag message and returns the raw response words. The response code is not
    /// checked.
    pub fn send(&mut self, tag: PropertyTag, request: &[u32]) -> Result<Vec<u32>> {
        self.exchange(PropertyMessage::single(tag, request))
    }

    /// Sends a pre-built message and returns the raw response words.
    pub fn exchange(&mut self, message: PropertyMessage) -> Result<Vec<u32>> {
        let mut words = message.finish();
        trace!(?words, "property request");
        self.transport
            .exchange(&mut words)
            .map_err(|source| Error::Ioctl {
                request: "IOCTL_MBOX_PROPERTY",
                source,
            })?;
        trace!(?words, "property response");
        Ok(words)
    }

    /// Exchanges `message` and reads `N` response words of `tag`, logging why if that fails.
    pub(crate) fn query<const N: usize>(
        &mut self,
        op: &'static str,
        tag: PropertyTag,
        message: PropertyMessage,
    ) -> Option<[u32; N]> {
        let words = match self.exchange(message) {
            Ok(words) => words,
            Err(err) => {
                warn!(op, %err, "property exchange failed");
                return None;
            }
        };
        match decode_reply::<N>(&words, tag) {
            Ok(reply) => Some(reply),
            Err(err) => {
                warn!(op, tag = format_args!("0x{:08x}", tag.id()), %err, "bad property response");
                None
            }
        }
    }

    fn status(&mut self, op: &'static str, tag: PropertyTag, message: PropertyMessage) -> u32 {
        self.query::<1>(op, tag, message)
            .map_or(STATUS_PROTOCOL_ERROR, |[status]| status)
    }

    /// Returns [`MemHandle::NULL`] on failure.
    pub fn allocate(&mut self, size: u32, align: u32, flags: MemFlags) -> MemHandle {
        self.query::<1>(
            "allocate",
            PropertyTag::AllocateMemory,
            requests::allocate_memory(size, align, flags.bits()),
        )
        .map_or(MemHandle::NULL, |[handle]| MemHandle(handle))
    }

    /// Returns [`BusAddress::NULL`] on failure.
    pub fn lock(&mut self, handle: MemHandle) -> BusAddress {
        self.query::<1>("lock", PropertyTag::LockMemory, requests::lock_memory(handle))
            .map_or(BusAddress::NULL, |[bus]| BusAddress(bus))
    }

    pub fn unlock(&mut self, handle: MemHandle) -> u32 {
        self.status(
            "unlock",
            PropertyTag::UnlockMemory,
            requests::unlock_memory(handle),
        )
    }

    pub fn free(&mut self, handle: MemHandle) -> u32 {
        self.status(
            "free",
            PropertyTag::ReleaseMemory,
            requests::release_memory(handle),
        )
    }

    /// Runs VideoCore code at `code` and returns its `r0`.
    pub fn execute_code(&mut self, code: BusAddress, regs: [u32; 6]) -> u32 {
        self.status(
            "execute code",
            PropertyTag::ExecuteCode,
            requests::execute_code(code, regs),
        )
    }

    /// Runs a QPU job and blocks until firmware reports it finished or timed out.
    pub fn execute_qpu(
        &mut self,
        units: u32,
        control: BusAddress,
        no_flush: bool,
        timeout_ms: u32,
    ) -> u32 {
        self.status(
            "execute QPU",
            PropertyTag::ExecuteQpu,
            requests::execute_qpu(units, control, no_flush, timeout_ms),
        )
    }

    pub fn enable_qpu(&mut self, enable: bool) -> u32 {
        self.status("enable QPU", PropertyTag::EnableQpu, requests::enable_qpu(enable))
    }

    pub fn firmware_revision(&mut self) -> u32 {
        self.query::<1>(
            "firmware revision",
            PropertyTag::FirmwareRevision,
            requests::firmware_revision(),
        )
        .map_or(UNKNOWN_PROPERTY, |[rev]| rev)
    }

    pub fn board_model(&mut self) -> u32 {
        self.query::<1>("board model", PropertyTag::BoardModel, requests::board_model())
            .map_or(UNKNOWN_PROPERTY, |[model]| model)
    }

    pub fn board_revision(&mut self) -> u32 {
        self.query::<1>(
            "board revision",
            PropertyTag::BoardRevision,
            requests::board_revision(),
        )
        .map_or(UNKNOWN_PROPERTY, |[rev]| rev)
    }

    /// Returns `u64::MAX` on failure.
    pub fn board_serial(&mut self) -> u64 {
        self.query::<2>("board serial", PropertyTag::BoardSerial, requests::board_serial())
            .map_or(u64::MAX, |[lo, hi]| u64::from(lo) | (u64::from(hi) << 32))
    }

    pub fn board_identity(&mut self) -> BoardIdentity {
        BoardIdentity {
            model: self.board_model(),
            revision: self.board_revision(),
            serial: self.board_serial(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFirmware, FirmwareFailure};
    use pretty_assertions::assert_eq;
    use videocore_protocol::{PROPERTY_RESPONSE_SUCCESS, TAG_RESPONSE_FLAG};

    fn channel() -> PropertyChannel<FakeFirmware> {
        PropertyChannel::new(FakeFirmware::new())
    }

    #[test]
    fn send_returns_raw_words_without_validation() {
        let mut ch = channel();
        ch.transport_mut().set_failure(FirmwareFailure::ErrorCode);
        let words = ch.send(PropertyTag::LockMemory, &[1]).unwrap();
        assert_eq!(words.len(), 7);
        assert_eq!(words[1], videocore_protocol::PROPERTY_RESPONSE_ERROR);
    }

    #[test]
    fn allocate_lock_unlock_free_round_trip() {
        let mut ch = channel();
        let handle = ch.allocate(4096, 4096, MemFlags::DIRECT);
        assert!(!handle.is_null());
        let bus = ch.lock(handle);
        assert!(bus.0 >= 0xC000_0000);
        assert_eq!(ch.unlock(handle), 0);
        assert_eq!(ch.free(handle), 0);
        assert_eq!(ch.transport().live_allocations(), 0);
    }

    #[test]
    fn free_without_lock_keeps_channel_usable() {
        let mut ch = channel();
        let first = ch.allocate(4096, 4096, MemFlags::DIRECT);
        assert_eq!(ch.free(first), 0);

        let second = ch.allocate(8192, 4096, MemFlags::DIRECT);
        assert!(!second.is_null());
        assert_ne!(second, first);
        assert!(!ch.lock(second).is_null());
        assert_eq!(ch.transport().live_allocations(), 1);
    }

    #[test]
    fn every_wrapper_returns_its_sentinel_on_malformed_response() {
        for failure in [
            FirmwareFailure::NoResponse,
            FirmwareFailure::ErrorCode,
            FirmwareFailure::Io,
            FirmwareFailure::Corrupt,
        ] {
            let mut ch = channel();
            ch.transport_mut().set_failure(failure);
            let handle = MemHandle(1);

            assert_eq!(ch.allocate(4096, 4096, MemFlags::DIRECT), MemHandle::NULL, "{failure:?}");
            assert_eq!(ch.lock(handle), BusAddress::NULL, "{failure:?}");
            assert_eq!(ch.unlock(handle), STATUS_PROTOCOL_ERROR, "{failure:?}");
            assert_eq!(ch.free(handle), STATUS_PROTOCOL_ERROR, "{failure:?}");
            assert_eq!(
                ch.execute_code(BusAddress(0xC000_0000), [0; 6]),
                STATUS_PROTOCOL_ERROR
            );
            assert_eq!(
                ch.execute_qpu(1, BusAddress(0xC000_0400), true, 100),
                STATUS_PROTOCOL_ERROR
            );
            assert_eq!(ch.enable_qpu(true), STATUS_PROTOCOL_ERROR, "{failure:?}");
            assert_eq!(ch.firmware_revision(), UNKNOWN_PROPERTY, "{failure:?}");
            assert_eq!(
                ch.board_identity(),
                BoardIdentity {
                    model: UNKNOWN_PROPERTY,
                    revision: UNKNOWN_PROPERTY,
                    serial: u64::MAX,
                },
                "{failure:?}"
            );
        }
    }

    #[test]
    fn board_queries_decode_firmware_values() {
        let mut ch = channel();
        assert_eq!(ch.firmware_revision(), FakeFirmware::FIRMWARE_REVISION);
        let id = ch.board_identity();
        assert_eq!(id.model, FakeFirmware::BOARD_MODEL);
        assert_eq!(id.revision, FakeFirmware::BOARD_REVISION);
        assert_eq!(id.serial, FakeFirmware::BOARD_SERIAL);
    }

    #[test]
    fn decode_reply_requires_processed_tag() {
        let unprocessed = [28, PROPERTY_RESPONSE_SUCCESS, 0x0003_000d, 4, 4, 9, 0];
        assert!(matches!(
            decode_reply::<1>(&unprocessed, PropertyTag::LockMemory),
            Err(ReplyError::NotProcessed)
        ));

        let processed = [
            28,
            PROPERTY_RESPONSE_SUCCESS,
            0x0003_000d,
            4,
            TAG_RESPONSE_FLAG | 4,
            9,
            0,
        ];
        assert_eq!(decode_reply::<1>(&processed, PropertyTag::LockMemory).unwrap(), [9]);
        assert!(matches!(
            decode_reply::<2>(&processed, PropertyTag::LockMemory),
            Err(ReplyError::Short { got: 1, expected: 2 })
        ));
        assert!(matches!(
            decode_reply::<1>(&processed, PropertyTag::UnlockMemory),
            Err(ReplyError::MissingTag)
        ));
    }
}
