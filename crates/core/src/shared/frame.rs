use ndarray::ArrayView3;

use crate::shared::bounding_box::BoundingBox;

/// A single camera/image frame: contiguous RGB bytes in row-major order.
///
/// Format conversion happens at I/O boundaries only; the domain layer
/// treats pixel data as opaque.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Extracts a square crop centered on the box.
    ///
    /// The side is the larger of the box dimensions so elongated detections
    /// still include the whole face, capped at the frame's shorter side. Near
    /// an edge the window slides back inside the frame instead of being cut,
    /// so the crop is always square. Returns `None` when the box does not
    /// overlap the frame.
    pub fn square_crop(&self, bbox: &BoundingBox) -> Option<Frame> {
        let fw = self.width as i32;
        let fh = self.height as i32;
        let overlaps = bbox.x < fw
            && bbox.y < fh
            && bbox.x + bbox.width > 0
            && bbox.y + bbox.height > 0;
        let side = bbox.width.max(bbox.height).min(fw).min(fh);
        if !overlaps || side <= 0 {
            return None;
        }

        let cx = bbox.x + bbox.width / 2;
        let cy = bbox.y + bbox.height / 2;
        let x1 = (cx - side / 2).clamp(0, fw - side) as usize;
        let y1 = (cy - side / 2).clamp(0, fh - side) as usize;
        let (crop_w, crop_h) = (side as usize, side as usize);
        let y2 = y1 + crop_h;
        let channels = self.channels as usize;
        let row_bytes = self.width as usize * channels;

        let mut data = Vec::with_capacity(crop_w * crop_h * channels);
        for row in y1..y2 {
            let start = row * row_bytes + x1 * channels;
            data.extend_from_slice(&self.data[start..start + crop_w * channels]);
        }

        Some(Frame::new(
            data,
            crop_w as u32,
            crop_h as u32,
            self.channels,
            self.index,
        ))
    }

    /// Resizes an RGB frame with a triangle filter.
    ///
    /// Returns the frame unchanged when it already has the requested size.
    pub fn resize(&self, width: u32, height: u32) -> Result<Frame, FrameError> {
        if self.size() == (width, height) {
            return Ok(self.clone());
        }
        let img = self.to_rgb_image()?;
        let resized =
            image::imageops::resize(&img, width, height, image::imageops::FilterType::Triangle);
        Ok(Frame::new(resized.into_raw(), width, height, 3, self.index))
    }

    /// Single-channel luma plane, as consumed by grayscale detectors.
    pub fn to_luma(&self) -> Result<Vec<u8>, FrameError> {
        let img = self.to_rgb_image()?;
        Ok(image::DynamicImage::ImageRgb8(img).to_luma8().into_raw())
    }

    pub fn to_rgb_image(&self) -> Result<image::RgbImage, FrameError> {
        if self.channels != 3 {
            return Err(FrameError::UnsupportedChannels(self.channels));
        }
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or(FrameError::InvalidDimensions {
                width: self.width,
                height: self.height,
            })
    }

    pub fn from_rgb_image(img: image::RgbImage, index: usize) -> Frame {
        let (width, height) = img.dimensions();
        Frame::new(img.into_raw(), width, height, 3, index)
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("expected an RGB frame, got {0} channels")]
    UnsupportedChannels(u8),
    #[error("pixel buffer does not match {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(w: u32, h: u32) -> Frame {
        Frame::new(vec![128; (w * h * 3) as usize], w, h, 3, 0)
    }

    #[test]
    fn test_construction_and_accessors() {
        let data = vec![0u8; 12]; // 2x2x3
        let frame = Frame::new(data.clone(), 2, 2, 3, 5);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.index(), 5);
        assert_eq!(frame.data(), &data[..]);
    }

    #[test]
    #[should_panic(expected = "data length must equal width * height * channels")]
    fn test_mismatched_data_length_panics_in_debug() {
        let data = vec![0u8; 10];
        Frame::new(data, 2, 2, 3, 0);
    }

    #[test]
    fn test_as_ndarray_pixel_access() {
        let mut data = vec![0u8; 12];
        data[6] = 255; // row=1, col=0, R
        let frame = Frame::new(data, 2, 2, 3, 0);
        let arr = frame.as_ndarray();
        assert_eq!(arr.shape(), &[2, 2, 3]);
        assert_eq!(arr[[1, 0, 0]], 255);
        assert_eq!(arr[[1, 0, 1]], 0);
    }

    #[test]
    fn test_square_crop_basic() {
        let frame = make_frame(10, 10);
        let crop = frame.square_crop(&BoundingBox::new(2, 2, 4, 4)).unwrap();
        assert_eq!(crop.size(), (4, 4));
    }

    #[test]
    fn test_square_crop_slides_inside_frame() {
        let frame = make_frame(10, 10);
        let crop = frame.square_crop(&BoundingBox::new(7, 7, 6, 6)).unwrap();
        // cx=10, cy=10, side=6 -> 4..10
        assert_eq!(crop.size(), (6, 6));

        let frame = make_frame(20, 20);
        let crop = frame.square_crop(&BoundingBox::new(-2, 3, 6, 6)).unwrap();
        assert_eq!(crop.size(), (6, 6));
    }

    #[test]
    fn test_square_crop_capped_by_short_side() {
        let frame = make_frame(30, 8);
        let crop = frame.square_crop(&BoundingBox::new(5, 0, 12, 12)).unwrap();
        assert_eq!(crop.size(), (8, 8));
    }

    #[test]
    fn test_square_crop_uses_max_dimension() {
        let frame = make_frame(100, 100);
        let crop = frame.square_crop(&BoundingBox::new(40, 35, 10, 30)).unwrap();
        assert_eq!(crop.size(), (30, 30));
    }

    #[test]
    fn test_square_crop_copies_pixels_from_region() {
        // 4x4 frame, pixel (3, 3) is red
        let mut data = vec![0u8; 4 * 4 * 3];
        data[(3 * 4 + 3) * 3] = 255;
        let frame = Frame::new(data, 4, 4, 3, 0);
        let crop = frame.square_crop(&BoundingBox::new(3, 3, 2, 2)).unwrap();
        // cx=4, cy=4, side=2 -> x 2..4, y 2..4
        assert_eq!(crop.size(), (2, 2));
        assert_eq!(crop.data()[0], 0);
        assert_eq!(crop.data()[(2 + 1) * 3], 255);
    }

    #[test]
    fn test_square_crop_outside_frame_is_none() {
        let frame = make_frame(10, 10);
        assert!(frame.square_crop(&BoundingBox::new(50, 50, 4, 4)).is_none());
    }

    #[test]
    fn test_resize_changes_dimensions() {
        let frame = make_frame(40, 20);
        let resized = frame.resize(8, 8).unwrap();
        assert_eq!(resized.size(), (8, 8));
        assert_eq!(resized.data().len(), 8 * 8 * 3);
        assert_eq!(resized.data()[0], 128);
    }

    #[test]
    fn test_resize_rejects_non_rgb() {
        let frame = Frame::new(vec![0u8; 4], 2, 2, 1, 0);
        assert_eq!(
            frame.resize(4, 4),
            Err(FrameError::UnsupportedChannels(1))
        );
    }

    #[test]
    fn test_to_luma_single_channel() {
        let frame = Frame::new(vec![255u8; 12], 2, 2, 3, 0);
        let luma = frame.to_luma().unwrap();
        assert_eq!(luma, vec![255u8; 4]);
    }
}
