//! Mandelbrot renderer driving the QPU array through `videocore-hw`.

pub mod code;
pub mod palette;
pub mod session;
pub mod view;
