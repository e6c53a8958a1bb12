use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use videocore_protocol::REFERENCE_BUS_OFFSET;

use crate::memory::MemFlags;

pub const DEFAULT_VCIO_PATH: &str = "/dev/vcio";
pub const DEFAULT_MEM_PATH: &str = "/dev/mem";
pub const DEFAULT_FB_PATH: &str = "/dev/fb0";
pub const DEFAULT_CONSOLE_PATH: &str = "/dev/tty0";

/// Peripheral window of BCM2836/7.
pub const DEFAULT_PERIPHERAL_BASE: u64 = 0x3F00_0000;
pub const DEFAULT_PERIPHERAL_LEN: usize = 0x0100_0000;

pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_millis(5000);

/// How QPU jobs are started and waited on.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ExecStrategy {
    /// One firmware call that blocks until the job finishes.
    #[default]
    Firmware,
    /// Queue units through the V3D registers and poll for completion.
    Direct,
}

impl FromStr for ExecStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firmware" | "mailbox" => Ok(Self::Firmware),
            "direct" | "registers" => Ok(Self::Direct),
            other => Err(format!(
                "unknown execution strategy `{other}` (expected `firmware` or `direct`)"
            )),
        }
    }
}

impl std::fmt::Display for ExecStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Firmware => "firmware",
            Self::Direct => "direct",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for env var {0}")]
    InvalidEnv(&'static str),
}

/// Board addresses, device paths and policy for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwConfig {
    pub vcio_path: PathBuf,
    pub mem_path: PathBuf,
    pub fb_path: PathBuf,
    pub console_path: PathBuf,
    pub peripheral_base: u64,
    pub peripheral_len: usize,
    pub bus_offset: u32,
    pub alloc_flags: MemFlags,
    pub job_timeout: Duration,
    pub strategy: ExecStrategy,
}

impl Default for HwConfig {
    fn default() -> Self {
        Self {
            vcio_path: DEFAULT_VCIO_PATH.into(),
            mem_path: DEFAULT_MEM_PATH.into(),
            fb_path: DEFAULT_FB_PATH.into(),
            console_path: DEFAULT_CONSOLE_PATH.into(),
            peripheral_base: DEFAULT_PERIPHERAL_BASE,
            peripheral_len: DEFAULT_PERIPHERAL_LEN,
            bus_offset: REFERENCE_BUS_OFFSET,
            alloc_flags: MemFlags::DIRECT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            strategy: ExecStrategy::Firmware,
        }
    }
}

impl HwConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reference-board defaults overridden by whatever `lookup` returns for each
    /// `VIDEOCORE_*` variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(path) = lookup("VIDEOCORE_VCIO") {
            cfg.vcio_path = path.into();
        }
        if let Some(path) = lookup("VIDEOCORE_MEM") {
            cfg.mem_path = path.into();
        }
        if let Some(path) = lookup("VIDEOCORE_FB") {
            cfg.fb_path = path.into();
        }
        if let Some(path) = lookup("VIDEOCORE_CONSOLE") {
            cfg.console_path = path.into();
        }

        if let Some(raw) = lookup("VIDEOCORE_PERIPHERAL_BASE") {
            cfg.peripheral_base = parse_int(&raw)
                .ok_or(ConfigError::InvalidEnv("VIDEOCORE_PERIPHERAL_BASE"))?;
        }
        if let Some(raw) = lookup("VIDEOCORE_PERIPHERAL_LEN") {
            cfg.peripheral_len = parse_int(&raw)
                .and_then(|v| usize::try_from(v).ok())
                .filter(|&v| v > 0)
                .ok_or(ConfigError::InvalidEnv("VIDEOCORE_PERIPHERAL_LEN"))?;
        }
        if let Some(raw) = lookup("VIDEOCORE_BUS_OFFSET") {
            cfg.bus_offset = parse_int(&raw)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or(ConfigError::InvalidEnv("VIDEOCORE_BUS_OFFSET"))?;
        }
        if let Some(raw) = lookup("VIDEOCORE_ALLOC_FLAGS") {
            cfg.alloc_flags = parse_int(&raw)
                .and_then(|v| u32::try_from(v).ok())
                .and_then(MemFlags::from_bits)
                .ok_or(ConfigError::InvalidEnv("VIDEOCORE_ALLOC_FLAGS"))?;
        }
        if let Some(raw) = lookup("VIDEOCORE_JOB_TIMEOUT_MS") {
            cfg.job_timeout = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis)
                .ok_or(ConfigError::InvalidEnv("VIDEOCORE_JOB_TIMEOUT_MS"))?;
        }
        if let Some(raw) = lookup("VIDEOCORE_EXEC") {
            cfg.strategy = raw
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("VIDEOCORE_EXEC"))?;
        }

        Ok(cfg)
    }
}

/// Decimal, or hex with a `0x` prefix. Underscores are ignored.
fn parse_int(raw: &str) -> Option<u64> {
    let cleaned: String = raw.trim().chars().filter(|&c| c != '_').collect();
    match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => cleaned.parse().ok(),
    }
}
