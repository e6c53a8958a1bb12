//! Startup, frame loop and teardown of one rendering run.

use std::time::Instant;

use tracing::{debug, error, info, warn};
use videocore_hw::{
    CancellationToken, ConsoleGuard, Error, ExecutionEngine, FrameBufferCoordinator, GpuBuffer,
    GpuMemoryManager, HwConfig, Job, PerformanceCounterSet, PropertyChannel, PropertyTransport,
    RegisterIo, DEFAULT_COUNTERS,
};
use videocore_protocol::workspace::{uniform, workspace_size};
use videocore_protocol::{QpuWorkspace, MAX_UNITS};

use crate::palette::default_palette;
use crate::view::View;

/// Per-run choices that are not board configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub units: usize,
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    /// Stop after this many frames; run until cancelled otherwise.
    pub frames: Option<u64>,
    pub view: View,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            units: 12,
            width: 1280,
            height: 720,
            bpp: 8,
            frames: None,
            view: View::default(),
        }
    }
}

/// Clamps a requested unit count to what the hardware has.
pub fn clamp_units(requested: usize) -> usize {
    let units = requested.clamp(1, MAX_UNITS);
    if units != requested {
        warn!(requested, units, "unit count clamped");
    }
    units
}

/// Everything acquired for a run, released in reverse by [`Session::shutdown`].
pub struct Session<T: PropertyTransport, R: RegisterIo> {
    channel: PropertyChannel<T>,
    memory: GpuMemoryManager,
    engine: ExecutionEngine<R>,
    counters: PerformanceCounterSet,
    workspace: GpuBuffer,
    code_words: usize,
    units: usize,
    job: Job,
    frame_buffer: FrameBufferCoordinator,
    console: ConsoleGuard,
    vsync_warned: bool,
}

impl<T: PropertyTransport, R: RegisterIo> Session<T, R> {
    pub fn start(
        mut channel: PropertyChannel<T>,
        memory: GpuMemoryManager,
        regs: R,
        config: &HwConfig,
        settings: &Settings,
        code: &[u32],
    ) -> Result<Self, Error> {
        let units = clamp_units(settings.units);

        // The V3D block drops register writes until the QPUs are powered.
        memory.processor_array(&mut channel, true)?;
        let mut engine = ExecutionEngine::new(regs, config.strategy, config.job_timeout);
        engine.prepare();
        let counters = PerformanceCounterSet::setup(engine.regs_mut(), &DEFAULT_COUNTERS);

        let size = u32::try_from(workspace_size(code.len())).map_err(|_| Error::Allocation {
            size: u32::MAX,
        })?;
        let mut workspace =
            match GpuBuffer::acquire(&memory, &mut channel, size, 4096, config.alloc_flags) {
                Ok(buffer) => buffer,
                Err(err) => {
                    disable_qpu(&memory, &mut channel);
                    return Err(err);
                }
            };

        let revision = channel.firmware_revision();
        info!(revision = format_args!("0x{revision:08x}"), "firmware");
        let board = channel.board_identity();
        info!(
            model = board.model,
            revision = format_args!("0x{:08x}", board.revision),
            serial = format_args!("0x{:016x}", board.serial),
            "board"
        );

        let bus = workspace.bus_address();
        let layout = QpuWorkspace::new(bus, units, code.len(), workspace.words_mut()).map(|mut ws| {
            ws.lay_out(code);
            Job::from_workspace(&ws)
        });
        let job = match layout {
            Ok(job) => job,
            Err(err) => {
                warn!(%err, "workspace does not fit its buffer");
                release_workspace(workspace, &memory, &mut channel);
                disable_qpu(&memory, &mut channel);
                return Err(Error::Allocation { size });
            }
        };
        info!(units, code_words = code.len(), strategy = %config.strategy, "workspace laid out");

        let mut frame_buffer = match FrameBufferCoordinator::create_surface(
            &mut channel,
            memory.clone(),
            &config.fb_path,
            settings.width,
            settings.height,
            settings.bpp,
        )
        .and_then(|mut fb| fb.map_surface().map(|()| fb))
        {
            Ok(fb) => fb,
            Err(err) => {
                release_workspace(workspace, &memory, &mut channel);
                disable_qpu(&memory, &mut channel);
                return Err(err);
            }
        };

        let console = ConsoleGuard::graphics(&config.console_path);

        let back = frame_buffer.present(&mut channel, 1);
        let fb = *frame_buffer.descriptor();
        let mut session = Self {
            channel,
            memory,
            engine,
            counters,
            workspace,
            code_words: code.len(),
            units,
            job,
            frame_buffer,
            console,
            vsync_warned: false,
        };
        session.with_workspace(|ws| {
            ws.set_uniform(uniform::RENDER_TARGET, fb.bus_at(back).0)?;
            ws.set_uniform(uniform::WIDTH, fb.width)?;
            ws.set_uniform(uniform::HEIGHT, fb.height)?;
            ws.set_uniform(uniform::PITCH, fb.pitch)?;
            ws.set_uniform(uniform::DEPTH, fb.bpp)?;
            for (slot, value) in settings.view.uniforms(fb.width, fb.height) {
                ws.set_uniform(slot, value)?;
            }
            Ok(())
        });

        let palette = default_palette(settings.view.max_iterations);
        if !session
            .frame_buffer
            .set_palette(&mut session.channel, &palette)
        {
            warn!("cannot set palette");
        }
        Ok(session)
    }

    fn with_workspace(
        &mut self,
        f: impl FnOnce(&mut QpuWorkspace<'_>) -> Result<(), videocore_protocol::WorkspaceError>,
    ) {
        let bus = self.workspace.bus_address();
        let outcome = QpuWorkspace::new(bus, self.units, self.code_words, self.workspace.words_mut())
            .and_then(|mut ws| f(&mut ws));
        if let Err(err) = outcome {
            warn!(%err, "workspace update failed");
        }
    }

    pub fn channel(&self) -> &PropertyChannel<T> {
        &self.channel
    }

    pub fn engine(&self) -> &ExecutionEngine<R> {
        &self.engine
    }

    pub fn frame_buffer(&self) -> &FrameBufferCoordinator {
        &self.frame_buffer
    }

    pub fn counters(&self) -> &PerformanceCounterSet {
        &self.counters
    }

    pub fn units(&self) -> usize {
        self.units
    }

    /// Uniforms of `unit` as currently written in GPU memory.
    pub fn uniforms(&mut self, unit: usize) -> Vec<u32> {
        let bus = self.workspace.bus_address();
        QpuWorkspace::new(bus, self.units, self.code_words, self.workspace.words_mut())
            .map(|ws| ws.uniforms(unit).to_vec())
            .unwrap_or_default()
    }

    /// Renders frames until `cancel` fires or `frames` have been shown. Returns the frame count.
    pub fn run(&mut self, cancel: &CancellationToken, frames: Option<u64>) -> u64 {
        let mut frame = 0u64;
        while frames.map_or(true, |limit| frame < limit) {
            if cancel.is_cancelled() {
                info!(frame, "cancelled");
                break;
            }
            let outcome = self.frame(frame);
            frame += 1;
            if let Err(err) = outcome {
                error!(frame, %err, "stopping");
                break;
            }
        }
        frame
    }

    /// One iteration: run the job, flip pages, wait for retrace, retarget the next render.
    ///
    /// Job failures are logged and the frame carries on unless the error is fatal.
    pub fn frame(&mut self, index: u64) -> Result<(), Error> {
        self.counters.clear(self.engine.regs_mut());
        let start = Instant::now();
        let outcome = self.engine.execute(&mut self.channel, &self.job);
        let elapsed_us = start.elapsed().as_micros() as u64;
        self.counters.read(self.engine.regs());
        match outcome {
            Ok(()) => debug!(frame = index, elapsed_us, units = self.units, "frame rendered"),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => warn!(frame = index, elapsed_us, %err, "QPU job failed"),
        }

        let back = self.frame_buffer.present(&mut self.channel, (index % 2) as u32);
        if let Err(err) = self.frame_buffer.wait_vsync() {
            if !self.vsync_warned {
                warn!(%err, "vsync wait failed");
                self.vsync_warned = true;
            }
        }

        let target = self.frame_buffer.descriptor().bus_at(back).0;
        self.with_workspace(|ws| ws.set_uniform(uniform::RENDER_TARGET, target));
        Ok(())
    }

    /// Releases everything in reverse acquisition order and hands back the channel and the
    /// register window for the caller to close. Teardown continues past failures; the first one
    /// is returned.
    pub fn shutdown(self) -> Result<(PropertyChannel<T>, R), Error> {
        let Self {
            mut channel,
            memory,
            engine,
            counters,
            workspace,
            frame_buffer,
            console,
            ..
        } = self;

        counters.print();
        let queue = engine.queue_status();
        let errors = engine.error_status();
        info!(
            completed = queue.completed,
            requested = queue.requested,
            queue_error = queue.error,
            errstat = format_args!("0x{:08x}", errors.0),
            "V3D status"
        );
        if errors.has_errors() {
            warn!(errstat = format_args!("0x{:08x}", errors.0), "V3D reported errors");
        }

        drop(console);

        let mut first_err = None;
        if let Err(err) = frame_buffer.release_surface() {
            first_err.get_or_insert(err);
        }
        if let Err(err) = workspace.release(&memory, &mut channel) {
            first_err.get_or_insert(err);
        }
        if let Err(err) = memory.processor_array(&mut channel, false) {
            first_err.get_or_insert(err);
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok((channel, engine.into_regs())),
        }
    }
}

fn release_workspace<T: PropertyTransport>(
    workspace: GpuBuffer,
    memory: &GpuMemoryManager,
    channel: &mut PropertyChannel<T>,
) {
    if let Err(err) = workspace.release(memory, channel) {
        warn!(%err, "releasing workspace during failed startup");
    }
}

fn disable_qpu<T: PropertyTransport>(memory: &GpuMemoryManager, channel: &mut PropertyChannel<T>) {
    if let Err(err) = memory.processor_array(channel, false) {
        warn!(%err, "disabling QPUs during failed startup");
    }
}
