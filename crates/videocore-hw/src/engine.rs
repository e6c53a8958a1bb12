//! QPU job submission and completion.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use videocore_protocol::{BusAddress, ControlRecord, QpuWorkspace, MAX_UNITS};

use crate::channel::{PropertyChannel, STATUS_PROTOCOL_ERROR};
use crate::config::ExecStrategy;
use crate::error::{Error, Result};
use crate::regs::{reg, srqcs, QueueStatus, RegisterIo, V3dIdent};
use crate::transport::PropertyTransport;

/// Spins between clock reads in [`poll_until`].
pub const CLOCK_CHECK_INTERVAL: u64 = 1000;

/// ERRSTAT bit that is set during normal operation.
const ERRSTAT_BENIGN: u32 = 1 << 12;

/// [`poll_until`] gave up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PollTimeout {
    pub elapsed: Duration,
    pub spins: u64,
}

/// Spins on `ready` until it returns `true` or `timeout` has passed since the call.
///
/// The clock is read once every [`CLOCK_CHECK_INTERVAL`] spins. Returns the number of spins on
/// success.
pub fn poll_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> Result<u64, PollTimeout> {
    let start = Instant::now();
    let mut spins = 0u64;
    loop {
        if ready() {
            return Ok(spins);
        }
        spins += 1;
        if spins % CLOCK_CHECK_INTERVAL == 0 {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(PollTimeout { elapsed, spins });
            }
        }
        std::hint::spin_loop();
    }
}

/// A QPU job as the hardware sees it: one control record per unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    /// Bus address of the control records, for the firmware path.
    pub control: BusAddress,
    pub records: Vec<ControlRecord>,
    /// Skip the firmware's cache flush before starting.
    pub no_flush: bool,
}

impl Job {
    pub fn from_workspace(workspace: &QpuWorkspace<'_>) -> Self {
        Self {
            control: workspace.control_address(),
            records: workspace.control_records().to_vec(),
            no_flush: true,
        }
    }

    pub fn units(&self) -> usize {
        self.records.len()
    }
}

/// ERRSTAT snapshot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ErrorStatus(pub u32);

impl ErrorStatus {
    pub fn has_errors(self) -> bool {
        self.0 & !ERRSTAT_BENIGN != 0
    }
}

/// Starts jobs and waits for them, through firmware or straight through the V3D registers.
#[derive(Debug)]
pub struct ExecutionEngine<R> {
    regs: R,
    strategy: ExecStrategy,
    timeout: Duration,
}

impl<R: RegisterIo> ExecutionEngine<R> {
    pub fn new(regs: R, strategy: ExecStrategy, timeout: Duration) -> Self {
        Self {
            regs,
            strategy,
            timeout,
        }
    }

    pub fn strategy(&self) -> ExecStrategy {
        self.strategy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn into_regs(self) -> R {
        self.regs
    }

    /// Runs `job` with the configured strategy.
    pub fn execute<T: PropertyTransport>(
        &mut self,
        channel: &mut PropertyChannel<T>,
        job: &Job,
    ) -> Result<()> {
        match self.strategy {
            ExecStrategy::Firmware => self.execute_firmware(channel, job),
            ExecStrategy::Direct => self.execute_direct(job),
        }
    }

    /// One blocking firmware call. Progress is invisible until it returns.
    pub fn execute_firmware<T: PropertyTransport>(
        &mut self,
        channel: &mut PropertyChannel<T>,
        job: &Job,
    ) -> Result<()> {
        let units = job.units();
        assert!(units <= MAX_UNITS, "{units} units requested, at most 16 exist");
        let timeout_ms = u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX);

        let start = Instant::now();
        let status = channel.execute_qpu(units as u32, job.control, job.no_flush, timeout_ms);
        match status {
            0 => {
                debug!(units, elapsed_us = start.elapsed().as_micros() as u64, "firmware job done");
                Ok(())
            }
            STATUS_PROTOCOL_ERROR => Err(Error::Protocol { op: "execute QPU" }),
            status => {
                warn!(units, status, "firmware reported QPU timeout");
                Err(Error::Timeout {
                    what: "firmware QPU job",
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Queues every unit through SRQUA/SRQPC and spins on the completed count.
    pub fn execute_direct(&mut self, job: &Job) -> Result<()> {
        let units = job.units();
        assert!(units <= MAX_UNITS, "{units} units requested, at most 16 exist");
        let start = Instant::now();

        let regs = &mut self.regs;
        regs.write(reg::DBCFG, 0);
        regs.write(reg::DBQITE, 0);
        regs.write(reg::DBQITC, 0xffff_ffff);

        regs.write(reg::L2CACTL, 1 << 2);
        regs.write(reg::SLCACTL, 0xffff_ffff);

        regs.write(
            reg::SRQCS,
            srqcs::CLEAR_ERROR | srqcs::CLEAR_REQUESTS | srqcs::CLEAR_COMPLETED,
        );
        regs.write(reg::SRQCS, 1);

        for record in &job.records {
            regs.write(reg::SRQUA, record.uniforms);
            regs.write(reg::SRQPC, record.code);
        }

        let regs = &self.regs;
        let outcome = poll_until(self.timeout, || {
            QueueStatus::read(regs).completed == units as u32
        });
        match outcome {
            Ok(spins) => {
                debug!(
                    units,
                    spins,
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "direct job done"
                );
                Ok(())
            }
            Err(PollTimeout { elapsed, spins }) => {
                let status = QueueStatus::read(regs);
                warn!(
                    units,
                    completed = status.completed,
                    spins,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "QPU job timed out"
                );
                Err(Error::Timeout {
                    what: "direct QPU job",
                    timeout: self.timeout,
                })
            }
        }
    }

    pub fn ident(&self) -> V3dIdent {
        V3dIdent::read(&self.regs)
    }

    /// Logs the block's identity and status, then resets the request queue. Call once the QPUs
    /// are powered; before that the block reads back zeros.
    pub fn prepare(&mut self) -> V3dIdent {
        let ident = self.ident();
        if ident.is_v3d() {
            info!(
                version = ident.technology_version,
                slices = ident.slices,
                qpus = ident.total_qpus(),
                tmus_per_slice = ident.tmus_per_slice,
                vpm_size_kb = ident.vpm_size_kb,
                "V3D identified"
            );
        } else {
            warn!(id = ?ident.id_string, "IDENT0 does not read V3D, is the block powered?");
        }

        let queue = self.queue_status();
        info!(
            errstat = format_args!("0x{:08x}", self.regs.read(reg::ERRSTAT)),
            dbqite = format_args!("0x{:08x}", self.regs.read(reg::DBQITE)),
            l2cactl = format_args!("0x{:08x}", self.regs.read(reg::L2CACTL)),
            completed = queue.completed,
            requested = queue.requested,
            queue_error = queue.error,
            "V3D status"
        );
        self.regs.write(reg::SRQCS, 0);
        ident
    }

    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus::read(&self.regs)
    }

    pub fn error_status(&self) -> ErrorStatus {
        ErrorStatus(self.regs.read(reg::ERRSTAT))
    }
}
