//! Offline gallery enrollment from still images.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use vigil_core::snapshot;
use vigil_core::{closest_face, BoundingBox, Embed, FaceDetect, FaceSnapshot, Frame};

/// Decode an image file into an RGB frame.
pub fn load_frame(path: &Path, sequence: u64) -> Result<Frame> {
    let img = image::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .into_rgb8();
    let (width, height) = img.dimensions();
    Ok(Frame::new(img.into_raw(), width, height, sequence))
}

/// Crop the closest face out of `frame` the same way the daemon does:
/// detect on the downscaled frame and crop from it.
pub fn face_snapshot<D: FaceDetect>(
    detector: &mut D,
    frame: &Frame,
    resize_factor: f32,
    snapshot_size: u32,
) -> Result<FaceSnapshot> {
    let scaled = snapshot::downscale(frame, resize_factor)?;
    let boxes: Vec<BoundingBox> = detector.detect(&scaled)?.into_iter().map(|d| d.bbox).collect();
    if boxes.is_empty() {
        return Err(anyhow!("no face detected"));
    }
    if boxes.len() > 1 {
        tracing::info!(faces = boxes.len(), "several faces found; using the closest");
    }
    let index = closest_face(&boxes)?;
    Ok(snapshot::crop_face(&scaled, &boxes[index], snapshot_size)?)
}

/// Detect, crop and embed one image.
pub fn embed_image<D: FaceDetect, E: Embed>(
    detector: &mut D,
    embedder: &mut E,
    path: &Path,
    sequence: u64,
    resize_factor: f32,
    snapshot_size: u32,
) -> Result<vigil_core::Embedding> {
    let frame = load_frame(path, sequence)?;
    let face = face_snapshot(detector, &frame, resize_factor, snapshot_size)
        .with_context(|| format!("{}", path.display()))?;
    Ok(embedder.embed(&face)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vigil_core::detector::DetectorError;
    use vigil_core::recognizer::RecognizerError;
    use vigil_core::{Embedding, FaceDetection};

    struct FixedBoxes(Vec<(i32, i32, i32, i32)>);

    impl FaceDetect for FixedBoxes {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<FaceDetection>, DetectorError> {
            Ok(self
                .0
                .iter()
                .map(|&(l, t, r, b)| FaceDetection {
                    bbox: BoundingBox::new(l, t, r, b).unwrap(),
                    landmarks: [(0.0, 0.0); 5],
                    confidence: 0.8,
                })
                .collect())
        }
    }

    struct MeanRed;

    impl Embed for MeanRed {
        fn embed(&mut self, face: &FaceSnapshot) -> Result<Embedding, RecognizerError> {
            let reds: Vec<f32> = face.data.chunks_exact(3).map(|px| px[0] as f32).collect();
            let mean = reds.iter().sum::<f32>() / reds.len() as f32;
            Ok(Embedding {
                values: vec![mean, 1.0],
                model_version: None,
            })
        }
    }

    fn write_png(dir: &Path) -> std::path::PathBuf {
        let mut img = image::RgbImage::from_pixel(40, 40, image::Rgb([0, 0, 0]));
        for y in 20..40 {
            for x in 20..40 {
                img.put_pixel(x, y, image::Rgb([200, 0, 0]));
            }
        }
        let path = dir.join("face.png");
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_load_frame() {
        let dir = tempdir().unwrap();
        let frame = load_frame(&write_png(dir.path()), 3).unwrap();
        assert_eq!((frame.width, frame.height, frame.sequence), (40, 40, 3));
        assert!(frame.is_well_formed());
    }

    #[test]
    fn test_embed_image_uses_closest_face() {
        let dir = tempdir().unwrap();
        let path = write_png(dir.path());
        let mut detector = FixedBoxes(vec![(0, 0, 5, 5), (20, 20, 40, 40)]);

        let embedding = embed_image(&mut detector, &mut MeanRed, &path, 0, 1.0, 8).unwrap();
        assert!(embedding.values[0] > 190.0);
    }

    #[test]
    fn test_no_face_is_an_error() {
        let dir = tempdir().unwrap();
        let path = write_png(dir.path());
        let err = embed_image(&mut FixedBoxes(Vec::new()), &mut MeanRed, &path, 0, 1.0, 8).unwrap_err();
        assert!(format!("{err:#}").contains("no face detected"));
    }
}
