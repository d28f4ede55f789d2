use std::error::Error;
use std::path::PathBuf;

use crate::detection::domain::face_detector::{DetectorError, FaceDetector};
use crate::detection::infrastructure::bytetrack_tracker::ByteTracker;
use crate::detection::infrastructure::math::ScoredBox;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::constants::TRACKER_MAX_LOST;
use crate::shared::frame::Frame;

const NAME: &str = "rustface-tracker";

#[derive(Clone, Debug)]
pub struct TrackingSettings {
    pub min_face_size: u32,
    /// Run the SeetaFace cascade every `redetect_interval` polls and serve
    /// tracked boxes in between.
    pub redetect_interval: usize,
    pub max_lost: usize,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            min_face_size: 40,
            redetect_interval: 3,
            max_lost: TRACKER_MAX_LOST,
        }
    }
}

/// Continuous face tracker: SeetaFace detection (`rustface`) associated
/// across polls with ByteTrack.
///
/// Unlike the momentary BlazeFace backend this one keeps state between
/// calls. Between detection passes `detect` returns the boxes of the last
/// pass with their track ids, so callers see the same interface either way.
/// `stop` drops the cascade and all tracks.
pub struct RustfaceTrackingDetector {
    model_path: Option<PathBuf>,
    settings: TrackingSettings,
    detector: Option<Box<dyn rustface::Detector>>,
    tracker: ByteTracker,
    polls_since_detection: usize,
}

impl RustfaceTrackingDetector {
    pub fn new(model_path: Option<PathBuf>, settings: TrackingSettings) -> Self {
        let tracker = ByteTracker::new(settings.max_lost);
        Self {
            model_path,
            settings,
            detector: None,
            tracker,
            polls_since_detection: 0,
        }
    }

    fn load(&self) -> Result<Box<dyn rustface::Detector>, Box<dyn Error>> {
        let path = self.model_path.as_deref().ok_or("model not available")?;
        let model = rustface::read_model(std::fs::File::open(path)?)?;
        let mut detector = rustface::create_detector_with_model(model);
        detector.set_min_face_size(self.settings.min_face_size);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);
        Ok(detector)
    }

    fn needs_detection(&self) -> bool {
        self.polls_since_detection == 0 || self.tracker.is_empty()
    }
}

impl FaceDetector for RustfaceTrackingDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self) -> Result<(), DetectorError> {
        if self.detector.is_some() {
            return Ok(());
        }
        let detector = self.load().map_err(|e| DetectorError::unavailable(NAME, e))?;
        self.detector = Some(detector);
        self.polls_since_detection = 0;
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        let needs_detection = self.needs_detection();
        let detector = self.detector.as_mut().ok_or(DetectorError::NotInitialized)?;

        let tracks = if needs_detection {
            let gray = frame.to_luma().map_err(DetectorError::detection)?;
            let faces =
                detector.detect(&rustface::ImageData::new(&gray, frame.width(), frame.height()));
            let detections: Vec<ScoredBox> = faces
                .iter()
                .map(|face| {
                    let bbox = face.bbox();
                    let x = bbox.x() as f64;
                    let y = bbox.y() as f64;
                    ScoredBox {
                        corners: [x, y, x + bbox.width() as f64, y + bbox.height() as f64],
                        score: face.score(),
                    }
                })
                .collect();
            log::trace!("SeetaFace pass found {} faces", detections.len());
            self.tracker.update(&detections)
        } else {
            self.tracker.last_tracks()
        };

        self.polls_since_detection =
            (self.polls_since_detection + 1) % self.settings.redetect_interval.max(1);

        Ok(tracks
            .into_iter()
            .map(|t| {
                BoundingBox::from_corners(t.bbox, frame.width(), frame.height())
                    .with_score(t.score)
                    .with_track_id(t.id)
            })
            .collect())
    }

    fn stop(&mut self) {
        self.detector = None;
        self.tracker.reset();
        self.polls_since_detection = 0;
    }
}
