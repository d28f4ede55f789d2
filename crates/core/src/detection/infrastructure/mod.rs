pub mod bytetrack_tracker;
pub mod math;
pub mod onnx_blazeface_detector;
pub mod rustface_tracking_detector;
