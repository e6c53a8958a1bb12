//! User-space control of the VideoCore IV GPU on BCM2836/7 boards.
//!
//! - [`PropertyChannel`]: firmware requests over `/dev/vcio`.
//! - [`GpuMemoryManager`] / [`GpuBuffer`]: GPU memory allocate, lock, map and release.
//! - [`ExecutionEngine`]: QPU jobs through firmware or the V3D registers.
//! - [`FrameBufferCoordinator`]: a double-buffered display surface.
//! - [`MemoryMapper`]: physical windows through `/dev/mem`.
//!
//! Hardware access sits behind [`PropertyTransport`] and [`RegisterIo`]; the `test-utils`
//! feature exposes in-process fakes for both.

pub mod cancel;
pub mod channel;
pub mod config;
pub mod console;
pub mod counters;
pub mod engine;
pub mod error;
pub mod framebuffer;
pub mod mapper;
pub mod memory;
pub mod regs;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cancel::{install_sigint_handler, CancellationToken};
pub use channel::{BoardIdentity, PropertyChannel, STATUS_PROTOCOL_ERROR, UNKNOWN_PROPERTY};
pub use config::{ConfigError, ExecStrategy, HwConfig};
pub use console::ConsoleGuard;
pub use counters::{CounterSource, PerformanceCounterSet, DEFAULT_COUNTERS};
pub use engine::{poll_until, ErrorStatus, ExecutionEngine, Job, PollTimeout};
pub use error::{Error, Result};
pub use framebuffer::{FrameBufferCoordinator, FrameBufferDescriptor, Palette};
pub use mapper::{Mapping, MemoryMapper};
pub use memory::{GpuBuffer, GpuMemoryManager, MemFlags};
pub use regs::{MappedRegisters, QueueStatus, RegisterIo, V3dIdent};
pub use transport::{PropertyTransport, VcioDevice};
