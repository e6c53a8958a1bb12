//! Wire-level definitions shared by everything that talks to the VideoCore firmware.
//!
//! - [`message`]: the tagged property-message format exchanged over `/dev/vcio`, with a builder
//!   ([`PropertyMessage`]) and a bounds-checked reader ([`PropertyResponse`]).
//! - [`requests`]: fixed-layout messages for each firmware operation.
//! - [`addr`]: bus/physical address translation.
//! - [`workspace`]: the byte layout of a QPU job buffer.
//!
//! Nothing in this crate touches hardware.
#![forbid(unsafe_code)]

pub mod addr;
pub mod message;
pub mod requests;
pub mod tags;
pub mod workspace;

pub use addr::{page_window, BusAddress, BusTranslation, PhysAddress, PAGE_SIZE, REFERENCE_BUS_OFFSET};
pub use message::{
    PropertyDecodeError, PropertyMessage, PropertyResponse, TagIter, TagRecord, END_TAG,
    PROPERTY_REQUEST, PROPERTY_RESPONSE_ERROR, PROPERTY_RESPONSE_SUCCESS, TAG_RESPONSE_FLAG,
};
pub use requests::{MemHandle, SurfaceFields, SurfaceRequest, PALETTE_ENTRIES};
pub use tags::PropertyTag;
pub use workspace::{ControlRecord, QpuWorkspace, WorkspaceError, MAX_UNIFORMS, MAX_UNITS};
