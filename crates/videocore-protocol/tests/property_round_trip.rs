use pretty_assertions::assert_eq;
use proptest::prelude::*;
use videocore_protocol::requests::{self, SurfaceRequest};
use videocore_protocol::{
    BusAddress, MemHandle, PropertyDecodeError, PropertyMessage, PropertyResponse, PropertyTag,
    PALETTE_ENTRIES, PROPERTY_RESPONSE_SUCCESS, TAG_RESPONSE_FLAG,
};

/// Every request builder with the tag and request payload it must carry.
fn every_operation(seed: u32) -> Vec<(PropertyMessage, PropertyTag, Vec<u32>)> {
    let mut palette = [0u32; PALETTE_ENTRIES];
    for (i, entry) in palette.iter_mut().enumerate() {
        *entry = seed.wrapping_add(i as u32);
    }
    let mut palette_payload = vec![0, PALETTE_ENTRIES as u32];
    palette_payload.extend_from_slice(&palette);

    let regs = [seed, seed ^ 1, seed ^ 2, seed ^ 3, seed ^ 4, seed ^ 5];
    let mut exec_code_payload = vec![seed | 0xC000_0000];
    exec_code_payload.extend_from_slice(&regs);

    vec![
        (requests::firmware_revision(), PropertyTag::FirmwareRevision, vec![0]),
        (requests::board_model(), PropertyTag::BoardModel, vec![0]),
        (requests::board_revision(), PropertyTag::BoardRevision, vec![0]),
        (requests::board_serial(), PropertyTag::BoardSerial, vec![0, 0]),
        (
            requests::allocate_memory(seed, 4096, 0xC),
            PropertyTag::AllocateMemory,
            vec![seed, 4096, 0xC],
        ),
        (requests::lock_memory(MemHandle(seed)), PropertyTag::LockMemory, vec![seed]),
        (requests::unlock_memory(MemHandle(seed)), PropertyTag::UnlockMemory, vec![seed]),
        (requests::release_memory(MemHandle(seed)), PropertyTag::ReleaseMemory, vec![seed]),
        (
            requests::execute_code(BusAddress(seed | 0xC000_0000), regs),
            PropertyTag::ExecuteCode,
            exec_code_payload,
        ),
        (
            requests::execute_qpu(seed % 17, BusAddress(seed), false, 5000),
            PropertyTag::ExecuteQpu,
            vec![seed % 17, seed, 0, 5000],
        ),
        (requests::enable_qpu(seed & 1 == 1), PropertyTag::EnableQpu, vec![seed & 1]),
        (
            requests::set_virtual_offset(0, seed),
            PropertyTag::SetVirtualOffset,
            vec![0, seed],
        ),
        (requests::set_palette(&palette), PropertyTag::SetPalette, palette_payload),
        (requests::release_frame_buffer(), PropertyTag::ReleaseFrameBuffer, vec![]),
    ]
}

proptest! {
    #[test]
    fn every_operation_round_trips_tag_and_payload(seed in any::<u32>()) {
        for (message, tag, payload) in every_operation(seed) {
            let words = message.finish();
            prop_assert_eq!(words[0] as usize, words.len() * 4);
            prop_assert_eq!(*words.last().unwrap(), 0);

            let response = PropertyResponse::parse(&words).unwrap();
            let records: Vec<_> = response.tags().collect::<Result<_, _>>().unwrap();
            prop_assert_eq!(records.len(), 1);
            let record = records[0];
            prop_assert_eq!(record.tag(), Some(tag));
            prop_assert_eq!(&record.payload[..payload.len()], &payload[..]);
            prop_assert!(record.payload[payload.len()..].iter().all(|&w| w == 0));
            prop_assert!(!record.is_response());
        }
    }
}

#[test]
fn surface_negotiation_reply_is_readable_in_place() {
    let (message, fields) = requests::surface(SurfaceRequest {
        width: 1280,
        height: 720,
        virtual_width: 1280,
        virtual_height: 1440,
        bpp: 8,
    });
    let mut words = message.finish();

    // Firmware answers in place: flag every tag and fill allocation and pitch.
    words[1] = PROPERTY_RESPONSE_SUCCESS;
    words[fields.allocation] = 0xFE40_0000;
    words[fields.allocation + 1] = 1280 * 1440;
    words[fields.pitch] = 1280;
    let offsets: Vec<(usize, u32)> = PropertyResponse::parse(&words)
        .unwrap()
        .tags()
        .map(|r| {
            let r = r.unwrap();
            (r.offset - 1, r.buffer_bytes)
        })
        .collect();
    for (value_bytes_at, len) in offsets {
        words[value_bytes_at] = TAG_RESPONSE_FLAG | len;
    }

    let response = PropertyResponse::parse(&words).unwrap();
    assert!(response.is_success());
    let alloc = response.tag(PropertyTag::AllocateFrameBuffer).unwrap();
    assert!(alloc.is_response());
    assert_eq!(alloc.payload, &[0xFE40_0000, 1280 * 1440]);
    let pitch = response.tag(PropertyTag::GetPitch).unwrap();
    assert_eq!(pitch.response_len(), 4);
    assert_eq!(pitch.word(0), Some(1280));
}

#[test]
fn truncated_buffer_is_rejected_before_tags_are_read() {
    let words = requests::lock_memory(MemHandle(3)).finish();
    assert_eq!(
        PropertyResponse::parse(&words[..4]).unwrap_err(),
        PropertyDecodeError::SizeOverrunsBuffer {
            size_bytes: 28,
            available: 16
        }
    );
}
