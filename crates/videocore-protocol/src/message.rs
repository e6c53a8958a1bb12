//! Property message builder and reader.
//!
//! A property message is a buffer of little-endian `u32` words:
//!
//! ```text
//! [size_bytes][code][tag_id][buffer_bytes][value_bytes][payload ...] ... [0]
//! ```
//!
//! `size_bytes` always matches the finished buffer length. `code` is [`PROPERTY_REQUEST`] on the
//! way out; firmware overwrites it with [`PROPERTY_RESPONSE_SUCCESS`] or
//! [`PROPERTY_RESPONSE_ERROR`]. Firmware also sets [`TAG_RESPONSE_FLAG`] in each processed tag's
//! `value_bytes` word and writes its response into the tag's value buffer in place.

use crate::tags::PropertyTag;

pub const PROPERTY_REQUEST: u32 = 0x0000_0000;
pub const PROPERTY_RESPONSE_SUCCESS: u32 = 0x8000_0000;
pub const PROPERTY_RESPONSE_ERROR: u32 = 0x8000_0001;

/// Set by firmware in a tag's `value_bytes` word once the tag has been processed.
pub const TAG_RESPONSE_FLAG: u32 = 1 << 31;

pub const END_TAG: u32 = 0;

/// `size_bytes` + `code`.
pub const MESSAGE_HEADER_WORDS: usize = 2;
/// `tag_id` + `buffer_bytes` + `value_bytes`.
pub const TAG_HEADER_WORDS: usize = 3;

fn words_for_bytes(bytes: u32) -> usize {
    (bytes as usize).div_ceil(4)
}

/// Builder for an outgoing property message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMessage {
    words: Vec<u32>,
}

impl Default for PropertyMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyMessage {
    pub fn new() -> Self {
        Self {
            words: vec![0, PROPERTY_REQUEST],
        }
    }

    /// A message holding one tag whose value buffer is exactly `payload`.
    pub fn single(tag: PropertyTag, payload: &[u32]) -> Self {
        let mut msg = Self::new();
        msg.push_tag(tag, payload);
        msg
    }

    /// Appends a tag whose buffer and request sizes both equal `payload`'s length.
    ///
    /// Returns the word index of the tag's first payload word.
    pub fn push_tag(&mut self, tag: PropertyTag, payload: &[u32]) -> usize {
        let bytes = u32::try_from(payload.len() * 4).expect("tag payload too large for u32 size");
        self.push_tag_sized(tag, bytes, bytes, payload)
    }

    /// Appends a tag with explicit value-buffer and request-data sizes.
    ///
    /// The value buffer is zero-padded up to `buffer_bytes` so firmware has room to write its
    /// response. Returns the word index of the tag's first payload word.
    pub fn push_tag_sized(
        &mut self,
        tag: PropertyTag,
        buffer_bytes: u32,
        request_bytes: u32,
        payload: &[u32],
    ) -> usize {
        let buffer_words = words_for_bytes(buffer_bytes);
        assert!(
            payload.len() <= buffer_words,
            "tag {tag:?} payload ({} words) exceeds its value buffer ({buffer_bytes} bytes)",
            payload.len()
        );

        self.words.push(tag.id());
        self.words.push(buffer_bytes);
        self.words.push(request_bytes);
        let start = self.words.len();
        self.words.extend_from_slice(payload);
        self.words.resize(start + buffer_words, 0);
        start
    }

    pub fn is_empty(&self) -> bool {
        self.words.len() <= MESSAGE_HEADER_WORDS
    }

    /// Appends the end marker and patches `size_bytes`.
    pub fn finish(mut self) -> Vec<u32> {
        self.words.push(END_TAG);
        let size_bytes =
            u32::try_from(self.words.len() * 4).expect("property message too large for u32 size");
        self.words[0] = size_bytes;
        self.words
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PropertyDecodeError {
    #[error("property message too short ({len} words)")]
    TooShort { len: usize },

    #[error("property message size {size_bytes} is not a multiple of 4")]
    SizeNotAligned { size_bytes: u32 },

    #[error("property message declares {size_bytes} bytes but only {available} are present")]
    SizeOverrunsBuffer { size_bytes: u32, available: usize },

    #[error("tag 0x{tag:08x} at word {offset} overruns the message")]
    TagOverrun { tag: u32, offset: usize },

    #[error("property message has no end tag")]
    MissingEndTag,
}

/// Read-only view over an exchanged property message.
#[derive(Debug, Clone, Copy)]
pub struct PropertyResponse<'a> {
    words: &'a [u32],
}

impl<'a> PropertyResponse<'a> {
    /// Validates the message header and restricts the view to `size_bytes`.
    pub fn parse(words: &'a [u32]) -> Result<Self, PropertyDecodeError> {
        if words.len() < MESSAGE_HEADER_WORDS + 1 {
            return Err(PropertyDecodeError::TooShort { len: words.len() });
        }
        let size_bytes = words[0];
        if size_bytes % 4 != 0 {
            return Err(PropertyDecodeError::SizeNotAligned { size_bytes });
        }
        let size_words = size_bytes as usize / 4;
        if size_words > words.len() {
            return Err(PropertyDecodeError::SizeOverrunsBuffer {
                size_bytes,
                available: words.len() * 4,
            });
        }
        if size_words < MESSAGE_HEADER_WORDS + 1 {
            return Err(PropertyDecodeError::TooShort { len: size_words });
        }
        Ok(Self {
            words: &words[..size_words],
        })
    }

    pub fn size_bytes(&self) -> u32 {
        self.words[0]
    }

    pub fn code(&self) -> u32 {
        self.words[1]
    }

    /// Firmware processed the whole message.
    pub fn is_success(&self) -> bool {
        self.code() == PROPERTY_RESPONSE_SUCCESS
    }

    pub fn words(&self) -> &'a [u32] {
        self.words
    }

    pub fn tags(&self) -> TagIter<'a> {
        TagIter {
            words: self.words,
            offset: MESSAGE_HEADER_WORDS,
            done: false,
        }
    }

    /// First well-formed record with the given id.
    pub fn tag(&self, tag: PropertyTag) -> Option<TagRecord<'a>> {
        self.tags()
            .map_while(Result::ok)
            .find(|record| record.id == tag.id())
    }
}

/// One tag record within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagRecord<'a> {
    pub id: u32,
    pub buffer_bytes: u32,
    /// Raw `value_bytes` word, including [`TAG_RESPONSE_FLAG`] on responses.
    pub value_bytes: u32,
    /// Word index of `payload[0]` within the message.
    pub offset: usize,
    pub payload: &'a [u32],
}

impl<'a> TagRecord<'a> {
    pub fn tag(&self) -> Option<PropertyTag> {
        PropertyTag::from_u32(self.id)
    }

    pub fn is_response(&self) -> bool {
        self.value_bytes & TAG_RESPONSE_FLAG != 0
    }

    /// Length of the data firmware wrote back, in bytes.
    pub fn response_len(&self) -> u32 {
        self.value_bytes & !TAG_RESPONSE_FLAG
    }

    pub fn word(&self, index: usize) -> Option<u32> {
        self.payload.get(index).copied()
    }
}

/// Iterator over the tag records of a message, stopping at the end tag.
#[derive(Debug, Clone)]
pub struct TagIter<'a> {
    words: &'a [u32],
    offset: usize,
    done: bool,
}

impl<'a> Iterator for TagIter<'a> {
    type Item = Result<TagRecord<'a>, PropertyDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let Some(&id) = self.words.get(self.offset) else {
            self.done = true;
            return Some(Err(PropertyDecodeError::MissingEndTag));
        };
        if id == END_TAG {
            self.done = true;
            return None;
        }

        let header_end = self.offset + TAG_HEADER_WORDS;
        if header_end > self.words.len() {
            self.done = true;
            return Some(Err(PropertyDecodeError::TagOverrun {
                tag: id,
                offset: self.offset,
            }));
        }
        let buffer_bytes = self.words[self.offset + 1];
        let value_bytes = self.words[self.offset + 2];
        let payload_end = match header_end.checked_add(words_for_bytes(buffer_bytes)) {
            Some(end) if end <= self.words.len() => end,
            _ => {
                self.done = true;
                return Some(Err(PropertyDecodeError::TagOverrun {
                    tag: id,
                    offset: self.offset,
                }));
            }
        };

        let record = TagRecord {
            id,
            buffer_bytes,
            value_bytes,
            offset: header_end,
            payload: &self.words[header_end..payload_end],
        };
        self.offset = payload_end;
        Some(Ok(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_tag_message_matches_wire_layout() {
        let words = PropertyMessage::single(PropertyTag::LockMemory, &[7]).finish();
        assert_eq!(words, vec![28, 0, 0x0003_000d, 4, 4, 7, 0]);
    }

    #[test]
    fn sized_tag_pads_value_buffer() {
        let mut msg = PropertyMessage::new();
        let at = msg.push_tag_sized(PropertyTag::GetPitch, 4, 0, &[]);
        assert_eq!(at, 5);
        let words = msg.finish();
        assert_eq!(words, vec![28, 0, 0x0004_0008, 4, 0, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "exceeds its value buffer")]
    fn sized_tag_rejects_payload_larger_than_buffer() {
        let mut msg = PropertyMessage::new();
        msg.push_tag_sized(PropertyTag::SetDepth, 4, 4, &[1, 2]);
    }

    #[test]
    fn parse_rejects_declared_size_past_buffer() {
        let words = [64, 0, 0];
        assert_eq!(
            PropertyResponse::parse(&words).unwrap_err(),
            PropertyDecodeError::SizeOverrunsBuffer {
                size_bytes: 64,
                available: 12
            }
        );
    }

    #[test]
    fn tag_iter_reports_overrun() {
        // Tag claims a 64-byte value buffer inside a 7-word message.
        let words = [28, PROPERTY_RESPONSE_SUCCESS, 0x0003_000d, 64, 4, 7, 0];
        let resp = PropertyResponse::parse(&words).unwrap();
        let mut tags = resp.tags();
        assert!(matches!(
            tags.next(),
            Some(Err(PropertyDecodeError::TagOverrun { tag: 0x0003_000d, offset: 2 }))
        ));
        assert!(tags.next().is_none());
        assert!(resp.tag(PropertyTag::LockMemory).is_none());
    }

    #[test]
    fn tag_iter_requires_end_tag() {
        let words = [24, PROPERTY_RESPONSE_SUCCESS, 0x0003_000d, 4, 4, 7];
        let resp = PropertyResponse::parse(&words).unwrap();
        let results: Vec<_> = resp.tags().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(PropertyDecodeError::MissingEndTag));
    }

    #[test]
    fn response_flags_are_decoded() {
        let words = [
            28,
            PROPERTY_RESPONSE_SUCCESS,
            0x0003_000d,
            4,
            TAG_RESPONSE_FLAG | 4,
            0xC000_1000,
            0,
        ];
        let resp = PropertyResponse::parse(&words).unwrap();
        assert!(resp.is_success());
        let tag = resp.tag(PropertyTag::LockMemory).unwrap();
        assert!(tag.is_response());
        assert_eq!(tag.response_len(), 4);
        assert_eq!(tag.offset, 5);
        assert_eq!(tag.word(0), Some(0xC000_1000));
        assert_eq!(tag.word(1), None);
    }

    #[test]
    fn error_code_is_not_success() {
        let words = [12, PROPERTY_RESPONSE_ERROR, 0];
        let resp = PropertyResponse::parse(&words).unwrap();
        assert!(!resp.is_success());
        assert_eq!(resp.tags().count(), 0);
    }
}
