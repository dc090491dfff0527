//! Frame acquisition seam.

use crate::types::Frame;

/// A blocking source of camera frames.
pub trait FrameSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, Self::Error>;
}
