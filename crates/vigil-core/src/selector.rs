//! Closest-face selection.
//!
//! Proximity is approximated by bounding-box area: the largest box is the
//! closest face. The choice must be deterministic so the snapshot taken for
//! recognition is the same face the rest of the pipeline acted on.

use crate::types::BoundingBox;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}

/// Index of the box with the strictly greatest area.
///
/// Ties resolve to the lowest index.
pub fn closest_face(boxes: &[BoundingBox]) -> Result<usize, SelectorError> {
    let mut best: Option<(usize, i64)> = None;

    for (i, b) in boxes.iter().enumerate() {
        let area = b.area();
        match best {
            Some((_, best_area)) if area <= best_area => {}
            _ => best = Some((i, area)),
        }
    }

    best.map(|(i, _)| i)
        .ok_or(SelectorError::InvalidInput("closest_face called with no boxes"))
}

/// Area of the largest box, or 0 for an empty slice.
pub fn max_area(boxes: &[BoundingBox]) -> i64 {
    boxes.iter().map(BoundingBox::area).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bb(l: i32, t: i32, r: i32, b: i32) -> BoundingBox {
        BoundingBox::new(l, t, r, b).unwrap()
    }

    #[test]
    fn test_largest_box_wins() {
        let boxes = [bb(0, 0, 10, 10), bb(0, 0, 20, 20), bb(5, 5, 15, 15)];
        assert_eq!(closest_face(&boxes), Ok(1));
    }

    #[test]
    fn test_tie_returns_lowest_index() {
        let boxes = [bb(0, 0, 5, 5), bb(0, 0, 10, 10), bb(40, 40, 50, 50), bb(0, 0, 2, 50)];
        assert_eq!(closest_face(&boxes), Ok(1));
    }

    #[test]
    fn test_single_box() {
        assert_eq!(closest_face(&[bb(1, 1, 2, 2)]), Ok(0));
    }

    #[test]
    fn test_empty_is_invalid_input() {
        assert!(matches!(closest_face(&[]), Err(SelectorError::InvalidInput(_))));
    }

    #[test]
    fn test_full_range_box_is_closest() {
        let boxes = [bb(0, 0, 40, 40), bb(i32::MIN, 0, i32::MAX, 10)];
        assert_eq!(closest_face(&boxes), Ok(1));
    }

    #[test]
    fn test_max_area() {
        assert_eq!(max_area(&[]), 0);
        assert_eq!(max_area(&[bb(0, 0, 10, 10), bb(0, 0, 3, 40)]), 120);
    }
}
