use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data (width * height * 3 bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
            timestamp: Instant::now(),
        }
    }

    /// True if the buffer holds exactly `width * height` RGB pixels.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * 3
    }
}

/// Axis-aligned face box in pixel coordinates.
///
/// `left < right` and `top < bottom` always hold; use [`BoundingBox::new`]
/// to construct one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
}

impl BoundingBox {
    /// Returns `None` when the box is empty or inverted.
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Option<Self> {
        (left < right && top < bottom).then_some(Self {
            left,
            top,
            right,
            bottom,
        })
    }

    pub fn left(&self) -> i32 {
        self.left
    }

    pub fn top(&self) -> i32 {
        self.top
    }

    pub fn right(&self) -> i32 {
        self.right
    }

    pub fn bottom(&self) -> i32 {
        self.bottom
    }

    /// Widened to `i64`: a box spanning the whole `i32` range still has a
    /// positive width.
    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }

    /// Saturates instead of overflowing for extreme boxes.
    pub fn area(&self) -> i64 {
        self.width().saturating_mul(self.height())
    }

    /// Intersect with a `width × height` image. `None` if nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let w = i32::try_from(width).unwrap_or(i32::MAX);
        let h = i32::try_from(height).unwrap_or(i32::MAX);
        Self::new(
            self.left.clamp(0, w),
            self.top.clamp(0, h),
            self.right.clamp(0, w),
            self.bottom.clamp(0, h),
        )
    }
}

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// One face found in one frame. Not carried across frames.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    pub confidence: f32,
}

/// Fixed-size square RGB crop of the closest face.
#[derive(Debug, Clone)]
pub struct FaceSnapshot {
    /// Packed RGB8 data (size * size * 3 bytes).
    pub data: Vec<u8>,
    pub size: u32,
    /// Sequence number of the frame the crop was taken from.
    pub sequence: u64,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}
