//! vigil-core: presence tracking and on-demand face recognition.
//!
//! Turns per-frame face detections into a debounced presence state, picks
//! the closest face for recognition, and implements the file-mediated
//! request/result protocol between the vision daemon and its clients.
//! SCRFD (detection) and ArcFace (embedding) run via ONNX Runtime.

pub mod classifier;
pub mod detector;
pub mod presence;
pub mod recognizer;
pub mod selector;
pub mod signal;
pub mod snapshot;
pub mod source;
pub mod types;

use std::path::PathBuf;

pub use classifier::{Classify, Gallery, GalleryClassifier};
pub use detector::{FaceDetect, FaceDetector};
pub use presence::{PresenceConfig, PresenceState, PresenceTracker};
pub use recognizer::{Embed, FaceRecognizer};
pub use selector::closest_face;
pub use signal::{RecognitionClient, RecognitionOutcome, SignalDir};
pub use source::FrameSource;
pub use types::{BoundingBox, Embedding, FaceDetection, FaceSnapshot, Frame};

/// SCRFD detection model file name.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Per-user data directory: `$XDG_DATA_HOME/vigil`, else `~/.local/share/vigil`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("vigil")
}

/// Default location of the ONNX models.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
