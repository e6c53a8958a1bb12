use videocore_protocol::workspace::uniform;

/// Uniform slots read by the Mandelbrot kernel.
pub const MAX_ITERATIONS: usize = uniform::FIRST_APP;
pub const X_ORIGIN: usize = uniform::FIRST_APP + 1;
pub const Y_ORIGIN: usize = uniform::FIRST_APP + 2;
pub const STEP: usize = uniform::FIRST_APP + 3;

/// Region of the complex plane being drawn.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct View {
    pub centre_x: f32,
    pub centre_y: f32,
    /// Magnification; `1.0` shows a vertical span of 2.
    pub zoom: f32,
    pub max_iterations: u32,
}

impl Default for View {
    fn default() -> Self {
        Self {
            centre_x: -0.7449,
            centre_y: 0.1,
            zoom: 1.0,
            max_iterations: 256,
        }
    }
}

impl View {
    /// `(slot, value)` pairs for a `width`x`height` render target. Floats are passed as raw bits.
    pub fn uniforms(&self, width: u32, height: u32) -> [(usize, u32); 4] {
        let step = 1.0 / (self.zoom * height as f32 / 2.0);
        let x0 = self.centre_x - step * width as f32 / 2.0;
        let y0 = self.centre_y - step * height as f32 / 2.0;
        [
            (MAX_ITERATIONS, self.max_iterations),
            (X_ORIGIN, x0.to_bits()),
            (Y_ORIGIN, y0.to_bits()),
            (STEP, step.to_bits()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_centre_the_view() {
        let view = View {
            centre_x: 0.0,
            centre_y: 0.0,
            zoom: 1.0,
            max_iterations: 64,
        };
        let u = view.uniforms(200, 100);
        assert_eq!(u[0], (9, 64));
        assert_eq!(u[1], (10, (-2.0f32).to_bits()));
        assert_eq!(u[2], (11, (-1.0f32).to_bits()));
        assert_eq!(u[3], (12, 0.02f32.to_bits()));
    }
}
