//! vigil-hw: camera capture for the vision loop.
//!
//! Provides V4L2-based capture that converts every supported driver
//! format to packed RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, PixelFormat};
