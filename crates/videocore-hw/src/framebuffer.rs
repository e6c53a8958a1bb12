//! Double-height display surface with page flipping.
//!
//! The surface is negotiated with a virtual height of twice the visible height. Page 0 is the
//! top half and page 1 the bottom half; panning the display over one of them leaves the other
//! free to render into.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use tracing::{debug, info, warn};
use videocore_protocol::{
    requests, BusAddress, PropertyResponse, PropertyTag, SurfaceRequest, PALETTE_ENTRIES,
};

use crate::channel::PropertyChannel;
use crate::error::{Error, Result, HINT_FBSET_DEPTH, HINT_SURFACE_SIZE};
use crate::mapper::Mapping;
use crate::memory::GpuMemoryManager;
use crate::transport::PropertyTransport;

/// `_IOW('F', 0x20, __u32)`.
const FBIO_WAITFORVSYNC: u32 = 0x4004_4620;

/// Byte written over the whole surface once it is mapped.
pub const SURFACE_FILL: u8 = 0x55;

pub type Palette = [u32; PALETTE_ENTRIES];

/// Geometry and placement of a negotiated surface, as firmware reported it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameBufferDescriptor {
    pub width: u32,
    pub height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub bpp: u32,
    /// Bytes per row.
    pub pitch: u32,
    pub bus_address: BusAddress,
    pub memory_size: u32,
}

impl FrameBufferDescriptor {
    pub fn bytes_per_pixel(&self) -> u32 {
        self.bpp / 8
    }

    /// The size the surface is checked against at negotiation time.
    pub fn required_size(&self) -> u64 {
        u64::from(self.pitch) * u64::from(self.virtual_height) * u64::from(self.bytes_per_pixel())
    }

    /// Bytes of one page.
    pub fn page_len(&self) -> u32 {
        self.pitch.saturating_mul(self.height)
    }

    /// Bytes covered by both pages.
    pub fn surface_len(&self) -> usize {
        self.pitch as usize * self.virtual_height as usize
    }

    /// Bus address of the row `offset` bytes into the surface.
    pub fn bus_at(&self, offset: u32) -> BusAddress {
        self.bus_address.offset_by(offset)
    }
}

/// Owns one negotiated surface and the display-side devices around it.
#[derive(Debug)]
pub struct FrameBufferCoordinator {
    descriptor: FrameBufferDescriptor,
    memory: GpuMemoryManager,
    surface: Option<Mapping>,
    display: Option<File>,
    palette: Palette,
}

impl FrameBufferCoordinator {
    /// Negotiates a `width`x`height` surface at `bpp` with room for two pages.
    ///
    /// Insufficient reported memory is a configuration error; nothing is retried.
    pub fn create_surface<T: PropertyTransport>(
        channel: &mut PropertyChannel<T>,
        memory: GpuMemoryManager,
        display_path: impl AsRef<Path>,
        width: u32,
        height: u32,
        bpp: u32,
    ) -> Result<Self> {
        let Some(virtual_height) = height.checked_mul(2) else {
            return Err(Error::Configuration {
                reason: format!("a double-buffered surface {height} rows high does not fit 32 bits"),
                hint: HINT_SURFACE_SIZE,
            });
        };
        let (message, fields) = requests::surface(SurfaceRequest {
            width,
            height,
            virtual_width: width,
            virtual_height,
            bpp,
        });
        let words = channel.exchange(message)?;
        let response = PropertyResponse::parse(&words).map_err(|err| {
            warn!(%err, "malformed surface response");
            Error::Protocol {
                op: "surface negotiation",
            }
        })?;
        if !response.is_success() {
            warn!(code = format_args!("0x{:08x}", response.code()), "surface rejected");
            return Err(Error::Protocol {
                op: "surface negotiation",
            });
        }

        let descriptor = FrameBufferDescriptor {
            width: words[fields.physical_size],
            height: words[fields.physical_size + 1],
            virtual_width: words[fields.virtual_size],
            virtual_height: words[fields.virtual_size + 1],
            bpp: words[fields.depth],
            pitch: words[fields.pitch],
            bus_address: BusAddress(words[fields.allocation]),
            memory_size: words[fields.allocation + 1],
        };
        info!(
            width = descriptor.width,
            height = descriptor.height,
            virtual_width = descriptor.virtual_width,
            virtual_height = descriptor.virtual_height,
            bpp = descriptor.bpp,
            pitch = descriptor.pitch,
            bus_addr = format_args!("0x{:08x}", descriptor.bus_address.0),
            memory_size = descriptor.memory_size,
            "surface negotiated"
        );

        if descriptor.bus_address.is_null() || descriptor.pitch == 0 {
            return Err(Error::Protocol {
                op: "frame buffer allocation",
            });
        }
        let required = descriptor.required_size();
        if u64::from(descriptor.memory_size) < required {
            return Err(Error::Configuration {
                reason: format!(
                    "surface needs {required} bytes but firmware reported {}",
                    descriptor.memory_size
                ),
                hint: HINT_FBSET_DEPTH,
            });
        }

        Ok(Self {
            descriptor,
            memory,
            surface: None,
            display: open_display(display_path.as_ref()),
            palette: [0; PALETTE_ENTRIES],
        })
    }

    pub fn descriptor(&self) -> &FrameBufferDescriptor {
        &self.descriptor
    }

    /// Maps both pages for CPU writes and fills them with [`SURFACE_FILL`].
    pub fn map_surface(&mut self) -> Result<()> {
        if self.surface.is_some() {
            return Ok(());
        }
        let mut mapping = self
            .memory
            .map(self.descriptor.bus_address, self.descriptor.surface_len())?;
        mapping.as_bytes_mut().fill(SURFACE_FILL);
        self.surface = Some(mapping);
        Ok(())
    }

    pub fn surface(&self) -> Option<&[u8]> {
        self.surface.as_ref().map(Mapping::as_bytes)
    }

    pub fn surface_mut(&mut self) -> Option<&mut [u8]> {
        self.surface.as_mut().map(Mapping::as_bytes_mut)
    }

    /// Pans the display and returns the byte offset of the back buffer to render into next.
    ///
    /// Page 0 selects offset 0 as the back buffer and shows the bottom half; any other page
    /// selects the bottom half and shows the top.
    pub fn present<T: PropertyTransport>(
        &mut self,
        channel: &mut PropertyChannel<T>,
        page: u32,
    ) -> u32 {
        let fb = &self.descriptor;
        let (y, back) = if page == 0 {
            (fb.height, 0)
        } else {
            (0, fb.page_len())
        };
        // Failure is already logged; the caller keeps rendering either way.
        let _ = channel.query::<2>(
            "set virtual offset",
            PropertyTag::SetVirtualOffset,
            requests::set_virtual_offset(0, y),
        );
        debug!(page, y, back, "present");
        back
    }

    /// Blocks until the next vertical retrace.
    pub fn wait_vsync(&self) -> Result<()> {
        let Some(display) = &self.display else {
            return Err(Error::Ioctl {
                request: "FBIO_WAITFORVSYNC",
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        };
        let mut arg: u32 = 0;
        // SAFETY: the driver reads one u32 through the pointer.
        let rc = unsafe {
            libc::ioctl(
                display.as_raw_fd(),
                FBIO_WAITFORVSYNC as _,
                &mut arg as *mut u32,
            )
        };
        if rc != 0 {
            return Err(Error::Ioctl {
                request: "FBIO_WAITFORVSYNC",
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Stores and pushes `palette`. Returns whether firmware accepted it.
    pub fn set_palette<T: PropertyTransport>(
        &mut self,
        channel: &mut PropertyChannel<T>,
        palette: &Palette,
    ) -> bool {
        self.palette = *palette;
        self.push_palette(channel)
    }

    /// Rotates entries 1..=255 left by one, keeping entry 0, and pushes the result.
    pub fn rotate_palette<T: PropertyTransport>(&mut self, channel: &mut PropertyChannel<T>) -> bool {
        self.palette[1..].rotate_left(1);
        self.push_palette(channel)
    }

    fn push_palette<T: PropertyTransport>(&mut self, channel: &mut PropertyChannel<T>) -> bool {
        channel
            .query::<1>(
                "set palette",
                PropertyTag::SetPalette,
                requests::set_palette(&self.palette),
            )
            .is_some_and(|[invalid]| invalid == 0)
    }

    /// Unmaps the surface. Firmware keeps the allocation; releasing it through the property
    /// interface is unreliable on the reference board.
    pub fn release_surface(self) -> Result<()> {
        if let Some(surface) = self.surface {
            self.memory.unmap(surface)?;
        }
        // `requests::release_frame_buffer` is deliberately not sent.
        debug!("surface released, firmware allocation left in place");
        Ok(())
    }
}

fn open_display(path: &Path) -> Option<File> {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            warn!(path = %path.display(), %err, "cannot open display device, vsync disabled");
            None
        }
    }
}
