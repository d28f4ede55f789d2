/// BlazeFace face detector using ONNX Runtime via `ort`.
///
/// A momentary detector: every `detect` call runs the network on the given
/// frame and keeps nothing between calls. The session is created in `init`
/// and dropped in `stop`.
use std::error::Error;
use std::path::PathBuf;

use crate::detection::domain::face_detector::{DetectorError, FaceDetector};
use crate::detection::infrastructure::math::{nms, ScoredBox};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::execution_provider::build_session;
use crate::shared::frame::Frame;

const NAME: &str = "blazeface";

/// BlazeFace model input resolution.
const INPUT_SIZE: u32 = 128;

pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const NMS_IOU_THRESH: f64 = 0.3;

/// Number of BlazeFace anchors (short-range model).
const NUM_ANCHORS: usize = 896;

pub struct OnnxBlazefaceDetector {
    model_path: Option<PathBuf>,
    confidence: f64,
    session: Option<ort::session::Session>,
    anchors: Vec<[f32; 2]>,
}

impl OnnxBlazefaceDetector {
    /// `model_path` is `None` when the model could not be resolved; `init`
    /// then reports the backend as unavailable.
    pub fn new(model_path: Option<PathBuf>, confidence: f64) -> Self {
        Self {
            model_path,
            confidence,
            session: None,
            anchors: generate_anchors(),
        }
    }

    fn run(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, Box<dyn Error>> {
        if frame.channels() != 3 {
            return Err(format!("expected RGB frame, got {} channels", frame.channels()).into());
        }
        let session = self.session.as_mut().ok_or("session not initialized")?;
        let fw = frame.width();
        let fh = frame.height();

        let input_value = ort::value::Tensor::from_array(preprocess(frame, INPUT_SIZE))?;
        let outputs = session.run(ort::inputs![input_value])?;

        // regressors: [1, 896, 16], classificators: [1, 896, 1]
        if outputs.len() < 2 {
            return Err(
                format!("BlazeFace model expected 2 outputs, got {}", outputs.len()).into(),
            );
        }
        let regressors = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let reg_data = regressors.as_slice().ok_or("Cannot get regressor slice")?;
        let score_data = scores.as_slice().ok_or("Cannot get score slice")?;

        let raw = decode(
            &self.anchors,
            reg_data,
            score_data,
            self.confidence as f32,
            (fw, fh),
        );
        Ok(nms(raw, NMS_IOU_THRESH)
            .into_iter()
            .map(|d| BoundingBox::from_corners(d.corners, fw, fh).with_score(d.score))
            .filter(|b| b.area() > 0)
            .collect())
    }
}

impl FaceDetector for OnnxBlazefaceDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self) -> Result<(), DetectorError> {
        if self.session.is_some() {
            return Ok(());
        }
        let path = self
            .model_path
            .as_deref()
            .ok_or_else(|| DetectorError::unavailable(NAME, "model not available"))?;
        let session = build_session(path).map_err(|e| DetectorError::unavailable(NAME, e))?;
        log::debug!("Loaded BlazeFace model from {}", path.display());
        self.session = Some(session);
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        if self.session.is_none() {
            return Err(DetectorError::NotInitialized);
        }
        self.run(frame).map_err(DetectorError::detection)
    }

    fn stop(&mut self) {
        self.session = None;
    }
}

/// Resize frame to `size × size` and normalize to [0,1] NCHW float32.
fn preprocess(frame: &Frame, size: u32) -> ndarray::Array4<f32> {
    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let s = size as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, s, s));
    if src_h == 0 || src_w == 0 {
        return tensor;
    }

    for y in 0..s {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / s as f64) as usize).min(src_h - 1);
        for x in 0..s {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / s as f64) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    tensor
}

/// Generate BlazeFace anchors for the short-range model.
///
/// Two feature maps, 16×16 and 8×8, with 2 and 6 anchors per cell.
fn generate_anchors() -> Vec<[f32; 2]> {
    let strides = [(8, 2), (16, 6)]; // (stride, anchors_per_cell)
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    for &(stride, num) in &strides {
        let grid_size = INPUT_SIZE as usize / stride;
        for y in 0..grid_size {
            for x in 0..grid_size {
                let cx = (x as f32 + 0.5) / grid_size as f32;
                let cy = (y as f32 + 0.5) / grid_size as f32;
                for _ in 0..num {
                    anchors.push([cx, cy]);
                }
            }
        }
    }

    anchors
}

/// Decodes anchor-relative regressions above `confidence` into frame
/// coordinates.
fn decode(
    anchors: &[[f32; 2]],
    reg_data: &[f32],
    score_data: &[f32],
    confidence: f32,
    (fw, fh): (u32, u32),
) -> Vec<ScoredBox> {
    let mut raw = Vec::new();
    let input = INPUT_SIZE as f32;

    for (i, &logit) in score_data.iter().enumerate().take(anchors.len()) {
        let score = sigmoid(logit);
        if score < confidence {
            continue;
        }
        let offset = i * 16;
        if offset + 4 > reg_data.len() {
            break;
        }

        let anchor = anchors[i];
        let cx = anchor[0] + reg_data[offset] / input;
        let cy = anchor[1] + reg_data[offset + 1] / input;
        let w = reg_data[offset + 2] / input;
        let h = reg_data[offset + 3] / input;

        raw.push(ScoredBox {
            corners: [
                ((cx - w / 2.0) * fw as f32) as f64,
                ((cy - h / 2.0) * fh as f32) as f64,
                ((cx + w / 2.0) * fw as f32) as f64,
                ((cy + h / 2.0) * fh as f32) as f64,
            ],
            score: score as f64,
        });
    }
    raw
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
