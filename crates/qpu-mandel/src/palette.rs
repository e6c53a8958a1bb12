use std::f32::consts::PI;

use videocore_hw::Palette;
use videocore_protocol::PALETTE_ENTRIES;

/// Entry 0 black, then three phase-shifted cosine ramps over `max_iterations`. Entries are
/// `0x00BBGGRR`.
pub fn default_palette(max_iterations: u32) -> Palette {
    let mut palette = [0u32; PALETTE_ENTRIES];
    let period = max_iterations.max(1) as f32;
    for (i, entry) in palette.iter_mut().enumerate().skip(1) {
        let f = 2.0 * PI * i as f32 / period;
        let channel = |phase: f32| (150.0 + (f + phase).cos() * 255.0).clamp(0.0, 255.0) as u32;
        let r = channel(PI / 3.0);
        let g = channel(PI);
        let b = channel(5.0 * PI / 3.0);
        *entry = (b << 16) | (g << 8) | r;
    }
    palette
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_zero_is_black_and_channels_stay_in_range() {
        let palette = default_palette(256);
        assert_eq!(palette[0], 0);
        assert!(palette.iter().all(|&e| e <= 0x00ff_ffff));
        assert!(palette[1..].iter().any(|&e| e != palette[1]));
    }

    #[test]
    fn first_entry_of_a_256_ramp() {
        // f = 2pi/256: red ~272 and blue ~283 saturate, green ~-105 clamps to zero.
        assert_eq!(default_palette(256)[1], 0x00ff_00ff);

        // f = pi: red ~22, green ~405 saturates, blue ~22.
        let entry = default_palette(256)[128];
        let (r, g, b) = (entry & 0xff, (entry >> 8) & 0xff, entry >> 16);
        assert_eq!(g, 255);
        assert!((20..=24).contains(&r), "r = {r}");
        assert!((20..=24).contains(&b), "b = {b}");
    }
}
