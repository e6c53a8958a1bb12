use std::time::Duration;

use pretty_assertions::assert_eq;
use qpu_mandel::session::{Session, Settings};
use videocore_hw::testing::{FakeFirmware, FakeV3d};
use videocore_hw::{
    CancellationToken, Error, ExecStrategy, ExecutionEngine, FrameBufferCoordinator, GpuBuffer,
    GpuMemoryManager, HwConfig, Job, MemFlags, MemoryMapper, PropertyChannel,
    STATUS_PROTOCOL_ERROR,
};
use videocore_protocol::workspace::workspace_size;
use videocore_protocol::{BusTranslation, QpuWorkspace};

const CODE: [u32; 2] = [0x1003_7000, 0xe000_0000];

struct Board {
    _mem: tempfile::NamedTempFile,
    memory: GpuMemoryManager,
    firmware: FakeFirmware,
}

fn board() -> Board {
    let mem = tempfile::NamedTempFile::new().unwrap();
    mem.as_file().set_len(FakeFirmware::PHYS_MEMORY_LEN).unwrap();
    let memory = GpuMemoryManager::new(
        MemoryMapper::open(mem.path()).unwrap(),
        BusTranslation::REFERENCE,
    );
    Board {
        _mem: mem,
        memory,
        firmware: FakeFirmware::new(),
    }
}

fn workspace_job(buffer: &mut GpuBuffer, units: usize) -> Job {
    let bus = buffer.bus_address();
    let mut ws = QpuWorkspace::new(bus, units, CODE.len(), buffer.words_mut()).unwrap();
    ws.lay_out(&CODE);
    Job::from_workspace(&ws)
}

#[test]
fn buffers_can_be_reacquired_after_release() {
    let mut board = board();
    let mut channel = PropertyChannel::new(&mut board.firmware);
    let size = workspace_size(CODE.len()) as u32;

    let mut first = GpuBuffer::acquire(&board.memory, &mut channel, size, 4096, MemFlags::DIRECT)
        .unwrap();
    first.words_mut()[0] = 0xdead_beef;
    let first_bus = first.bus_address();
    first.release(&board.memory, &mut channel).unwrap();

    let second = GpuBuffer::acquire(&board.memory, &mut channel, size, 4096, MemFlags::DIRECT)
        .unwrap();
    assert_ne!(second.handle().0, 0);
    assert!(second.bus_address().0 >= first_bus.0);
    second.release(&board.memory, &mut channel).unwrap();

    assert_eq!(channel.close().live_allocations(), 0);
}

#[test]
fn firmware_and_direct_paths_run_the_same_job() {
    let mut board = board();
    let mut channel = PropertyChannel::new(&mut board.firmware);
    let mut buffer = GpuBuffer::acquire(
        &board.memory,
        &mut channel,
        workspace_size(CODE.len()) as u32,
        4096,
        MemFlags::DIRECT,
    )
    .unwrap();
    let job = workspace_job(&mut buffer, 8);

    let mut firmware_engine =
        ExecutionEngine::new(FakeV3d::new(), ExecStrategy::Firmware, Duration::from_secs(5));
    firmware_engine.execute(&mut channel, &job).unwrap();

    let mut direct_engine =
        ExecutionEngine::new(FakeV3d::new(), ExecStrategy::Direct, Duration::from_secs(5));
    direct_engine.execute(&mut channel, &job).unwrap();
    assert_eq!(direct_engine.queue_status().completed, 8);

    buffer.release(&board.memory, &mut channel).unwrap();
    let firmware = channel.close();
    assert_eq!(
        firmware.last_qpu_job(),
        Some([8, job.control.0, 1, 5000])
    );
}

#[test]
fn job_failures_surface_as_errors() {
    let mut board = board();
    let mut channel = PropertyChannel::new(&mut board.firmware);
    let mut buffer = GpuBuffer::acquire(
        &board.memory,
        &mut channel,
        workspace_size(CODE.len()) as u32,
        4096,
        MemFlags::DIRECT,
    )
    .unwrap();
    let job = workspace_job(&mut buffer, 4);

    let mut stalled =
        ExecutionEngine::new(FakeV3d::stalled(2), ExecStrategy::Direct, Duration::from_millis(20));
    let err = stalled.execute(&mut channel, &job).unwrap_err();
    assert!(matches!(err, Error::Timeout { what: "direct QPU job", .. }), "{err}");
    assert_eq!(stalled.queue_status().completed, 2);

    channel.transport_mut().set_qpu_status(STATUS_PROTOCOL_ERROR);
    let mut firmware_engine =
        ExecutionEngine::new(FakeV3d::new(), ExecStrategy::Firmware, Duration::from_secs(1));
    let err = firmware_engine.execute(&mut channel, &job).unwrap_err();
    assert!(matches!(err, Error::Protocol { op: "execute QPU" }), "{err}");

    buffer.release(&board.memory, &mut channel).unwrap();
}

#[test]
fn surface_pages_flip_around_the_hidden_page() {
    let mut board = board();
    let mut channel = PropertyChannel::new(&mut board.firmware);
    let mut fb = FrameBufferCoordinator::create_surface(
        &mut channel,
        board.memory.clone(),
        "/nonexistent/fb0",
        1280,
        720,
        8,
    )
    .unwrap();
    let d = *fb.descriptor();
    assert_eq!((d.virtual_height, d.pitch), (1440, 1280));

    fb.map_surface().unwrap();
    assert_eq!(fb.surface().unwrap().len(), 1280 * 1440);
    assert_eq!(fb.present(&mut channel, 0), 0);
    assert_eq!(fb.present(&mut channel, 1), 1280 * 720);
    fb.release_surface().unwrap();

    let firmware = channel.close();
    assert_eq!(firmware.pans(), &[(0, 720), (0, 0)]);
    assert_eq!(firmware.surface_releases(), 0);
}

#[test]
fn a_full_run_leaves_no_resources_behind() {
    let mut board = board();
    let config = HwConfig {
        fb_path: "/nonexistent/fb0".into(),
        console_path: "/nonexistent/tty0".into(),
        strategy: ExecStrategy::Direct,
        ..HwConfig::default()
    };
    let settings = Settings {
        units: 16,
        width: 320,
        height: 240,
        frames: Some(5),
        ..Settings::default()
    };

    let mut session = Session::start(
        PropertyChannel::new(&mut board.firmware),
        board.memory.clone(),
        FakeV3d::new(),
        &config,
        &settings,
        &CODE,
    )
    .unwrap();
    assert_eq!(session.run(&CancellationToken::new(), settings.frames), 5);
    let (channel, regs) = session.shutdown().unwrap();

    let firmware = channel.close();
    assert_eq!(firmware.live_allocations(), 0);
    assert!(!firmware.qpu_enabled());
    assert_eq!(firmware.pans().len(), 6);
    assert!(regs.writes().iter().any(|&(_, v)| v == 0x8000_ffff));
}
