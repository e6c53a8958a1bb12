use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use qpu_mandel::code::load_code;
use qpu_mandel::session::{Session, Settings};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use videocore_hw::{
    install_sigint_handler, ExecStrategy, GpuMemoryManager, HwConfig, MappedRegisters,
    MemoryMapper, PropertyChannel,
};
use videocore_protocol::BusTranslation;

#[derive(Parser, Debug)]
#[command(
    name = "qpu-mandel",
    about = "Render the Mandelbrot set on the VideoCore IV QPUs into a double-buffered frame buffer."
)]
struct Args {
    /// Precompiled QPU kernel (little-endian 64-bit instructions)
    code: PathBuf,

    /// Number of QPUs to run the kernel on (at most 16)
    #[arg(long, short = 'n', default_value_t = 12)]
    units: usize,

    /// Job submission path: `firmware` or `direct` (overrides VIDEOCORE_EXEC)
    #[arg(long)]
    strategy: Option<ExecStrategy>,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Stop after this many frames instead of running until interrupted
    #[arg(long)]
    frames: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run(Args::parse()) {
        error!("{err:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = HwConfig::from_env().context("reading VIDEOCORE_* configuration")?;
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    let settings = Settings {
        units: args.units,
        width: args.width,
        height: args.height,
        frames: args.frames,
        ..Settings::default()
    };

    let code = load_code(&args.code)?;
    let cancel = install_sigint_handler().context("installing the SIGINT handler")?;

    let channel = PropertyChannel::open(&config.vcio_path)?;
    let mapper = MemoryMapper::open(&config.mem_path)?;
    let regs = MappedRegisters::map(&mapper, config.peripheral_base, config.peripheral_len)?;
    let memory = GpuMemoryManager::new(mapper, BusTranslation::new(config.bus_offset));

    let mut session = Session::start(channel, memory, regs, &config, &settings, &code)?;
    let frames = session.run(&cancel, settings.frames);
    info!(frames, "rendering stopped");

    let (channel, regs) = session.shutdown()?;
    regs.unmap()?;
    channel.close();
    Ok(())
}
