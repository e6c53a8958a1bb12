//! V3D performance counters.

use std::fmt;

use tracing::info;

use crate::regs::{reg, RegisterIo};

pub const MAX_COUNTERS: usize = 16;

/// Written to PCTRE: global enable plus all sixteen counters.
const PCTRE_ENABLE_ALL: u32 = 0x8000_ffff;
/// Written to PCTRC: clear all sixteen counters.
const PCTRC_CLEAR_ALL: u32 = 0x0000_ffff;

/// A hardware event source a counter can be pointed at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CounterSource {
    pub name: &'static str,
    pub index: u32,
}

const fn source(name: &'static str, index: u32) -> CounterSource {
    CounterSource { name, index }
}

pub const QPU_TOTAL_IDLE: CounterSource = source("QPU_TOTAL_IDLE", 13);
pub const QPU_TOTAL_VERTEX: CounterSource = source("QPU_TOTAL_VERTEX", 14);
pub const QPU_TOTAL_FRAGMENT: CounterSource = source("QPU_TOTAL_FRAGMENT", 15);
pub const QPU_TOTAL_VALID: CounterSource = source("QPU_TOTAL_VALID", 16);
pub const QPU_TOTAL_TMU_STALL: CounterSource = source("QPU_TOTAL_TMU_STALL", 17);
pub const QPU_TOTAL_SCOREBOARD_STALL: CounterSource = source("QPU_TOTAL_SCOREBOARD_STALL", 18);
pub const QPU_TOTAL_ICACHE_HITS: CounterSource = source("QPU_TOTAL_ICACHE_HITS", 20);
pub const QPU_TOTAL_ICACHE_MISSES: CounterSource = source("QPU_TOTAL_ICACHE_MISSES", 21);
pub const QPU_TOTAL_UCACHE_HITS: CounterSource = source("QPU_TOTAL_UCACHE_HITS", 22);
pub const QPU_TOTAL_UCACHE_MISSES: CounterSource = source("QPU_TOTAL_UCACHE_MISSES", 23);
pub const TMU_TOTAL_PROCESSED: CounterSource = source("TMU_TOTAL_PROCESSED", 24);
pub const TMU_TOTAL_MISSES: CounterSource = source("TMU_TOTAL_MISSES", 25);
pub const VDW_STALL: CounterSource = source("VDW_STALL", 26);
pub const VCD_STALL: CounterSource = source("VCD_STALL", 27);
pub const L2_HITS: CounterSource = source("L2_HITS", 28);
pub const L2_MISSES: CounterSource = source("L2_MISSES", 29);

pub const DEFAULT_COUNTERS: [CounterSource; MAX_COUNTERS] = [
    QPU_TOTAL_IDLE,
    QPU_TOTAL_VERTEX,
    QPU_TOTAL_FRAGMENT,
    QPU_TOTAL_VALID,
    QPU_TOTAL_TMU_STALL,
    QPU_TOTAL_SCOREBOARD_STALL,
    QPU_TOTAL_ICACHE_HITS,
    QPU_TOTAL_ICACHE_MISSES,
    QPU_TOTAL_UCACHE_HITS,
    QPU_TOTAL_UCACHE_MISSES,
    TMU_TOTAL_PROCESSED,
    TMU_TOTAL_MISSES,
    VDW_STALL,
    VCD_STALL,
    L2_HITS,
    L2_MISSES,
];

/// Counter slots bound to sources, with the values from the last [`read`](Self::read).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PerformanceCounterSet {
    sources: Vec<CounterSource>,
    values: Vec<u32>,
}

impl PerformanceCounterSet {
    /// Binds slot `i` to `sources[i]` and enables counting.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_COUNTERS`] sources are given.
    pub fn setup(regs: &mut impl RegisterIo, sources: &[CounterSource]) -> Self {
        assert!(
            sources.len() <= MAX_COUNTERS,
            "{} counters requested, the V3D has {MAX_COUNTERS}",
            sources.len()
        );
        for (slot, source) in sources.iter().enumerate() {
            regs.write(reg::pctrs(slot), source.index);
        }
        regs.write(reg::PCTRE, PCTRE_ENABLE_ALL);
        Self {
            sources: sources.to_vec(),
            values: vec![0; sources.len()],
        }
    }

    pub fn clear(&mut self, regs: &mut impl RegisterIo) {
        regs.write(reg::PCTRC, PCTRC_CLEAR_ALL);
    }

    /// Latches the current hardware values.
    pub fn read(&mut self, regs: &impl RegisterIo) {
        for (slot, value) in self.values.iter_mut().enumerate() {
            *value = regs.read(reg::pctr(slot));
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        self.sources
            .iter()
            .zip(&self.values)
            .map(|(source, &value)| (source.name, value))
    }

    /// Logs every latched value.
    pub fn print(&self) {
        for (name, value) in self.iter() {
            info!(counter = name, value, "performance counter");
        }
    }
}

impl fmt::Display for PerformanceCounterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{name:<28}{value:>12}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeV3d;
    use pretty_assertions::assert_eq;

    #[test]
    fn setup_binds_sources_and_enables() {
        let mut regs = FakeV3d::new();
        let set = PerformanceCounterSet::setup(&mut regs, &DEFAULT_COUNTERS);
        assert_eq!(set.len(), 16);
        assert_eq!(regs.get(reg::pctrs(0)), 13);
        assert_eq!(regs.get(reg::pctrs(5)), 18);
        assert_eq!(regs.get(reg::pctrs(6)), 20);
        assert_eq!(regs.get(reg::pctrs(15)), 29);
        assert_eq!(regs.get(reg::PCTRE), 0x8000_ffff);
    }

    #[test]
    fn clear_then_read_latches_values() {
        let mut regs = FakeV3d::new();
        let mut set = PerformanceCounterSet::setup(&mut regs, &[QPU_TOTAL_IDLE, L2_MISSES]);
        regs.set(reg::pctr(0), 1234);
        regs.set(reg::pctr(1), 99);
        set.read(&regs);
        assert_eq!(set.get("QPU_TOTAL_IDLE"), Some(1234));
        assert_eq!(set.get("L2_MISSES"), Some(99));

        set.clear(&mut regs);
        assert_eq!(regs.get(reg::pctr(0)), 0);
        set.read(&regs);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![("QPU_TOTAL_IDLE", 0), ("L2_MISSES", 0)]);
        assert!(set.to_string().starts_with("QPU_TOTAL_IDLE"));
    }

    #[test]
    #[should_panic(expected = "17 counters requested")]
    fn more_than_sixteen_sources_is_rejected() {
        let mut regs = FakeV3d::new();
        let mut sources = DEFAULT_COUNTERS.to_vec();
        sources.push(QPU_TOTAL_IDLE);
        PerformanceCounterSet::setup(&mut regs, &sources);
    }
}
