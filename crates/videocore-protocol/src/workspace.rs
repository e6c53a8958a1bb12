//! QPU workspace layout.
//!
//! One contiguous GPU buffer holds everything a job needs, at fixed byte offsets:
//!
//! ```text
//! 0x0000  input     16 rows x 16 words
//! 0x0400  control   16 x {uniforms, code}   (bus addresses, one record per unit)
//! 0x0480  uniforms  16 units x 16 words
//! 0x0880  output    4 x 16 x 16 words       (VPM-sized)
//! 0x1880  code      opaque instruction stream
//! ```
//!
//! Pointers written into the buffer are bus addresses; the CPU only ever touches it through its
//! own mapping.

use crate::addr::BusAddress;
use bytemuck::{Pod, Zeroable};

pub const MAX_UNITS: usize = 16;
pub const MAX_UNIFORMS: usize = 16;

pub const INPUT_ROWS: usize = 16;
pub const INPUT_ROW_WORDS: usize = 16;
pub const INPUT_WORDS: usize = INPUT_ROWS * INPUT_ROW_WORDS;
pub const OUTPUT_WORDS: usize = 4 * 16 * 16;

pub const INPUT_OFFSET: usize = 0;
pub const CONTROL_OFFSET: usize = INPUT_OFFSET + INPUT_WORDS * 4;
pub const UNIFORMS_OFFSET: usize = CONTROL_OFFSET + MAX_UNITS * core::mem::size_of::<ControlRecord>();
pub const OUTPUT_OFFSET: usize = UNIFORMS_OFFSET + MAX_UNITS * MAX_UNIFORMS * 4;
pub const CODE_OFFSET: usize = OUTPUT_OFFSET + OUTPUT_WORDS * 4;

/// Per-unit uniform slots with a fixed meaning.
pub mod uniform {
    pub const INPUT: usize = 0;
    pub const OUTPUT: usize = 1;
    pub const UNIT_INDEX: usize = 2;
    pub const UNIT_COUNT: usize = 3;
    pub const RENDER_TARGET: usize = 4;
    pub const WIDTH: usize = 5;
    pub const HEIGHT: usize = 6;
    pub const PITCH: usize = 7;
    pub const DEPTH: usize = 8;
    /// First slot left to the instruction stream's own parameters.
    pub const FIRST_APP: usize = 9;
}

/// What a QPU is started with: where its uniforms live and where its code starts.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ControlRecord {
    pub uniforms: u32,
    pub code: u32,
}

const _: () = {
    assert!(core::mem::size_of::<ControlRecord>() == 8);
    assert!(CONTROL_OFFSET == 0x400);
    assert!(UNIFORMS_OFFSET == 0x480);
    assert!(OUTPUT_OFFSET == 0x880);
    assert!(CODE_OFFSET == 0x1880);
};

/// Total workspace size in bytes for a code stream of `code_words` words.
pub fn workspace_size(code_words: usize) -> usize {
    CODE_OFFSET + code_words * 4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WorkspaceError {
    #[error("{units} units requested, at most 16 are supported")]
    TooManyUnits { units: usize },

    #[error("workspace needs {needed} bytes but the buffer holds {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("uniform slot {slot} out of range")]
    UniformOutOfRange { slot: usize },
}

/// CPU view of a workspace buffer living at `base` on the bus.
#[derive(Debug)]
pub struct QpuWorkspace<'a> {
    base: BusAddress,
    units: usize,
    code_words: usize,
    words: &'a mut [u32],
}

impl<'a> QpuWorkspace<'a> {
    pub fn new(
        base: BusAddress,
        units: usize,
        code_words: usize,
        words: &'a mut [u32],
    ) -> Result<Self, WorkspaceError> {
        if units > MAX_UNITS {
            return Err(WorkspaceError::TooManyUnits { units });
        }
        let needed = workspace_size(code_words);
        if words.len() * 4 < needed {
            return Err(WorkspaceError::BufferTooSmall {
                needed,
                available: words.len() * 4,
            });
        }
        Ok(Self {
            base,
            units,
            code_words,
            words,
        })
    }

    pub fn base(&self) -> BusAddress {
        self.base
    }

    pub fn units(&self) -> usize {
        self.units
    }

    fn bus_at(&self, byte_offset: usize) -> BusAddress {
        self.base.offset_by(byte_offset as u32)
    }

    pub fn input_address(&self) -> BusAddress {
        self.bus_at(INPUT_OFFSET)
    }

    pub fn control_address(&self) -> BusAddress {
        self.bus_at(CONTROL_OFFSET)
    }

    pub fn uniforms_address(&self, unit: usize) -> BusAddress {
        self.bus_at(UNIFORMS_OFFSET + unit * MAX_UNIFORMS * 4)
    }

    pub fn output_address(&self) -> BusAddress {
        self.bus_at(OUTPUT_OFFSET)
    }

    pub fn code_address(&self) -> BusAddress {
        self.bus_at(CODE_OFFSET)
    }

    /// Clears the workspace, writes one control record and the fixed uniform slots per active
    /// unit, and copies `code` verbatim into the code region.
    pub fn lay_out(&mut self, code: &[u32]) {
        assert_eq!(
            code.len(),
            self.code_words,
            "code stream length differs from the workspace it was sized for"
        );
        let end = workspace_size(self.code_words) / 4;
        self.words[..end].fill(0);

        let code_address = self.code_address();
        let input_address = self.input_address();
        let output_address = self.output_address();
        let units = self.units;
        for unit in 0..units {
            let record = ControlRecord {
                uniforms: self.uniforms_address(unit).0,
                code: code_address.0,
            };
            self.control_records_mut()[unit] = record;

            let unifs = self.uniforms_mut(unit);
            unifs[uniform::INPUT] = input_address.0;
            unifs[uniform::OUTPUT] = output_address.0;
            unifs[uniform::UNIT_INDEX] = unit as u32;
            unifs[uniform::UNIT_COUNT] = units as u32;
        }

        let code_start = CODE_OFFSET / 4;
        self.words[code_start..code_start + code.len()].copy_from_slice(code);
    }

    fn control_records_mut(&mut self) -> &mut [ControlRecord] {
        let start = CONTROL_OFFSET / 4;
        bytemuck::cast_slice_mut(&mut self.words[start..start + MAX_UNITS * 2])
    }

    /// Control records of the active units.
    pub fn control_records(&self) -> &[ControlRecord] {
        let start = CONTROL_OFFSET / 4;
        let records: &[ControlRecord] =
            bytemuck::cast_slice(&self.words[start..start + MAX_UNITS * 2]);
        &records[..self.units]
    }

    pub fn uniforms(&self, unit: usize) -> &[u32] {
        let start = UNIFORMS_OFFSET / 4 + unit * MAX_UNIFORMS;
        &self.words[start..start + MAX_UNIFORMS]
    }

    fn uniforms_mut(&mut self, unit: usize) -> &mut [u32] {
        let start = UNIFORMS_OFFSET / 4 + unit * MAX_UNIFORMS;
        &mut self.words[start..start + MAX_UNIFORMS]
    }

    /// Writes `value` into `slot` of every active unit's uniforms.
    pub fn set_uniform(&mut self, slot: usize, value: u32) -> Result<(), WorkspaceError> {
        if slot >= MAX_UNIFORMS {
            return Err(WorkspaceError::UniformOutOfRange { slot });
        }
        for unit in 0..self.units {
            self.uniforms_mut(unit)[slot] = value;
        }
        Ok(())
    }

    pub fn input_mut(&mut self) -> &mut [u32] {
        let start = INPUT_OFFSET / 4;
        &mut self.words[start..start + INPUT_WORDS]
    }

    pub fn output(&self) -> &[u32] {
        let start = OUTPUT_OFFSET / 4;
        &self.words[start..start + OUTPUT_WORDS]
    }

    pub fn code(&self) -> &[u32] {
        let start = CODE_OFFSET / 4;
        &self.words[start..start + self.code_words]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASE: BusAddress = BusAddress(0xC010_0000);

    #[test]
    fn lay_out_writes_control_records_and_fixed_uniforms() {
        let code = [0xdead_beef, 0x1000_0000, 0x3000_0000];
        let mut words = vec![0xffff_ffffu32; workspace_size(code.len()) / 4];
        let mut ws = QpuWorkspace::new(BASE, 3, code.len(), &mut words).unwrap();
        ws.lay_out(&code);

        let records = ws.control_records();
        assert_eq!(records.len(), 3);
        for (unit, record) in records.iter().enumerate() {
            assert_eq!(
                *record,
                ControlRecord {
                    uniforms: 0xC010_0480 + unit as u32 * 64,
                    code: 0xC010_1880,
                }
            );
            let unifs = ws.uniforms(unit);
            assert_eq!(&unifs[..4], &[0xC010_0000, 0xC010_0880, unit as u32, 3]);
            assert!(unifs[4..].iter().all(|&w| w == 0));
        }
        assert_eq!(ws.control_address(), BusAddress(0xC010_0400));
        assert_eq!(ws.code(), &code);
        assert!(ws.uniforms(3).iter().all(|&w| w == 0));
        assert!(ws.output().iter().all(|&w| w == 0));
    }

    #[test]
    fn set_uniform_only_touches_active_units() {
        let mut words = vec![0u32; workspace_size(1) / 4];
        let mut ws = QpuWorkspace::new(BASE, 2, 1, &mut words).unwrap();
        ws.lay_out(&[0]);
        ws.set_uniform(uniform::RENDER_TARGET, 0xC020_0000).unwrap();

        assert_eq!(ws.uniforms(0)[uniform::RENDER_TARGET], 0xC020_0000);
        assert_eq!(ws.uniforms(1)[uniform::RENDER_TARGET], 0xC020_0000);
        assert_eq!(ws.uniforms(2)[uniform::RENDER_TARGET], 0);
        assert_eq!(
            ws.set_uniform(MAX_UNIFORMS, 1),
            Err(WorkspaceError::UniformOutOfRange { slot: MAX_UNIFORMS })
        );
    }

    #[test]
    fn new_validates_units_and_buffer_size() {
        let mut words = vec![0u32; 16];
        assert_eq!(
            QpuWorkspace::new(BASE, 17, 0, &mut words).unwrap_err(),
            WorkspaceError::TooManyUnits { units: 17 }
        );
        assert_eq!(
            QpuWorkspace::new(BASE, 1, 0, &mut words).unwrap_err(),
            WorkspaceError::BufferTooSmall {
                needed: CODE_OFFSET,
                available: 64
            }
        );
    }
}
