use std::cmp::Ordering;

/// Axis-aligned face location in frame pixel coordinates.
///
/// Every detector backend normalizes its output to this shape. `score` is the
/// backend's own confidence measure and is only comparable between boxes of
/// the same backend.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub score: f64,
    pub track_id: Option<u32>,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            score: 1.0,
            track_id: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_track_id(mut self, track_id: u32) -> Self {
        self.track_id = Some(track_id);
        self
    }

    /// Builds a box from corner coordinates, clamped to the frame.
    pub fn from_corners(corners: [f64; 4], frame_width: u32, frame_height: u32) -> Self {
        let x1 = corners[0].clamp(0.0, frame_width as f64);
        let y1 = corners[1].clamp(0.0, frame_height as f64);
        let x2 = corners[2].clamp(0.0, frame_width as f64);
        let y2 = corners[3].clamp(0.0, frame_height as f64);
        Self::new(
            x1 as i32,
            y1 as i32,
            (x2 - x1).max(0.0) as i32,
            (y2 - y1).max(0.0) as i32,
        )
    }

    pub fn corners(&self) -> [f64; 4] {
        [
            self.x as f64,
            self.y as f64,
            (self.x + self.width) as f64,
            (self.y + self.height) as f64,
        ]
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);

        let inter = (ix2 - ix1).max(0) as f64 * (iy2 - iy1).max(0) as f64;
        if inter == 0.0 {
            return 0.0;
        }

        let union = self.area() as f64 + other.area() as f64 - inter;
        inter / union
    }

    /// Orders boxes so the primary face comes first: largest area, then
    /// highest score.
    pub fn sort_primary_first(boxes: &mut [BoundingBox]) {
        boxes.sort_by(|a, b| {
            b.area().cmp(&a.area()).then_with(|| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(Ordering::Equal)
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox::new(0, 0, 10, 10);
        assert_relative_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 5, 10, 10);
        assert_relative_eq!(a.iou(&b), 25.0 / 175.0);
    }

    #[rstest]
    #[case::disjoint(BoundingBox::new(0, 0, 10, 10), BoundingBox::new(20, 20, 5, 5))]
    #[case::touching(BoundingBox::new(0, 0, 10, 10), BoundingBox::new(10, 0, 10, 10))]
    #[case::zero_width(BoundingBox::new(0, 0, 0, 100), BoundingBox::new(0, 0, 50, 50))]
    fn test_iou_no_overlap(#[case] a: BoundingBox, #[case] b: BoundingBox) {
        assert_relative_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_from_corners_clamps_to_frame() {
        let b = BoundingBox::from_corners([-10.0, 5.0, 50.0, 120.0], 40, 100);
        assert_eq!((b.x, b.y, b.width, b.height), (0, 5, 40, 95));
    }

    #[test]
    fn test_corners_round_trip() {
        let b = BoundingBox::new(3, 4, 10, 20);
        assert_eq!(b.corners(), [3.0, 4.0, 13.0, 24.0]);
    }

    #[test]
    fn test_sort_primary_first_by_area_then_score() {
        let mut boxes = vec![
            BoundingBox::new(0, 0, 10, 10).with_score(0.9),
            BoundingBox::new(0, 0, 30, 30).with_score(0.2),
            BoundingBox::new(50, 50, 10, 10).with_score(0.95),
        ];
        BoundingBox::sort_primary_first(&mut boxes);
        assert_eq!(boxes[0].width, 30);
        assert_relative_eq!(boxes[1].score, 0.95);
        assert_relative_eq!(boxes[2].score, 0.9);
    }
}
