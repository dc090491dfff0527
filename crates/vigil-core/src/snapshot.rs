//! Frame downscaling and face cropping.
//!
//! Faces are not aligned before recognition: the closest face's box is
//! cropped and resized to a fixed square with bilinear filtering.

use crate::types::{BoundingBox, FaceSnapshot, Frame};
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Snapshot edge length expected by the recognition pipeline.
pub const DEFAULT_SNAPSHOT_SIZE: u32 = 160;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height} RGB")]
    MalformedFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("face box lies outside the {width}x{height} frame")]
    OutOfBounds { width: u32, height: u32 },
    #[error("snapshot size must be non-zero")]
    ZeroSize,
}

fn to_image(frame: &Frame) -> Result<RgbImage, SnapshotError> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected {
        return Err(SnapshotError::MalformedFrame {
            width: frame.width,
            height: frame.height,
            expected,
            actual: frame.data.len(),
        });
    }
    RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(
        SnapshotError::MalformedFrame {
            width: frame.width,
            height: frame.height,
            expected,
            actual: frame.data.len(),
        },
    )
}

/// Resize a frame by `factor` (bilinear). A factor of 1.0 returns a copy.
pub fn downscale(frame: &Frame, factor: f32) -> Result<Frame, SnapshotError> {
    if (factor - 1.0).abs() < f32::EPSILON {
        return Ok(frame.clone());
    }

    let img = to_image(frame)?;
    let new_w = ((frame.width as f32 * factor).round() as u32).max(1);
    let new_h = ((frame.height as f32 * factor).round() as u32).max(1);
    let resized = imageops::resize(&img, new_w, new_h, FilterType::Triangle);

    Ok(Frame {
        data: resized.into_raw(),
        width: new_w,
        height: new_h,
        sequence: frame.sequence,
        timestamp: frame.timestamp,
    })
}

/// Crop `bbox` out of `frame` and resize it to a `size × size` snapshot.
pub fn crop_face(frame: &Frame, bbox: &BoundingBox, size: u32) -> Result<FaceSnapshot, SnapshotError> {
    if size == 0 {
        return Err(SnapshotError::ZeroSize);
    }

    let img = to_image(frame)?;
    let clamped = bbox
        .clamp_to(frame.width, frame.height)
        .ok_or(SnapshotError::OutOfBounds {
            width: frame.width,
            height: frame.height,
        })?;

    let crop = imageops::crop_imm(
        &img,
        clamped.left() as u32,
        clamped.top() as u32,
        clamped.width() as u32,
        clamped.height() as u32,
    )
    .to_image();
    let scaled = imageops::resize(&crop, size, size, FilterType::Triangle);

    Ok(FaceSnapshot {
        data: scaled.into_raw(),
        size,
        sequence: frame.sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = (0..width * height).flat_map(|_| rgb).collect();
        Frame::new(data, width, height, 42)
    }

    #[test]
    fn test_crop_face_output_size() {
        let frame = solid_frame(64, 48, [10, 20, 30]);
        let bbox = BoundingBox::new(8, 8, 40, 40).unwrap();
        let snap = crop_face(&frame, &bbox, 16).unwrap();
        assert_eq!(snap.size, 16);
        assert_eq!(snap.data.len(), 16 * 16 * 3);
        assert_eq!(snap.sequence, 42);
    }

    #[test]
    fn test_crop_face_preserves_color() {
        let frame = solid_frame(32, 32, [200, 100, 50]);
        let bbox = BoundingBox::new(4, 4, 20, 28).unwrap();
        let snap = crop_face(&frame, &bbox, 8).unwrap();
        assert!(snap.data.chunks(3).all(|px| px == [200, 100, 50]));
    }

    #[test]
    fn test_crop_face_picks_region() {
        // Left half black, right half white.
        let (w, h) = (20u32, 10u32);
        let data = (0..h)
            .flat_map(|_| (0..w).flat_map(|x| if x < w / 2 { [0u8; 3] } else { [255u8; 3] }))
            .collect();
        let frame = Frame::new(data, w, h, 1);

        let right = crop_face(&frame, &BoundingBox::new(12, 0, 20, 10).unwrap(), 4).unwrap();
        assert!(right.data.iter().all(|&v| v == 255));
        let left = crop_face(&frame, &BoundingBox::new(0, 0, 8, 10).unwrap(), 4).unwrap();
        assert!(left.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_crop_face_clamps_partial_box() {
        let frame = solid_frame(32, 32, [1, 2, 3]);
        let bbox = BoundingBox::new(-10, -10, 16, 16).unwrap();
        assert!(crop_face(&frame, &bbox, 8).is_ok());
    }

    #[test]
    fn test_crop_face_outside_frame() {
        let frame = solid_frame(32, 32, [1, 2, 3]);
        let bbox = BoundingBox::new(40, 40, 60, 60).unwrap();
        assert!(matches!(
            crop_face(&frame, &bbox, 8),
            Err(SnapshotError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_malformed_frame_rejected() {
        let frame = Frame::new(vec![0u8; 10], 32, 32, 0);
        let bbox = BoundingBox::new(0, 0, 8, 8).unwrap();
        assert!(matches!(
            crop_face(&frame, &bbox, 8),
            Err(SnapshotError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_downscale_half() {
        let frame = solid_frame(640, 480, [9, 9, 9]);
        let small = downscale(&frame, 0.5).unwrap();
        assert_eq!((small.width, small.height), (320, 240));
        assert_eq!(small.data.len(), 320 * 240 * 3);
        assert_eq!(small.sequence, frame.sequence);
    }

    #[test]
    fn test_downscale_identity() {
        let frame = solid_frame(4, 4, [1, 1, 1]);
        let same = downscale(&frame, 1.0).unwrap();
        assert_eq!(same.data, frame.data);
    }
}
