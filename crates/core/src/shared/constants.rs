pub const FEATURE_EXTRACTOR_MODEL_NAME: &str = "mobilenet_v1_0.25_224_conv_pw_13.onnx";
pub const BLAZEFACE_MODEL_NAME: &str = "blazeface_short_range.onnx";
pub const SEETAFACE_MODEL_NAME: &str = "seeta_fd_frontal_v1.0.bin";

/// Side length of captured face samples, matching the extractor input.
pub const SAMPLE_SIZE: u32 = 224;

/// Output of MobileNet v1 0.25 truncated at `conv_pw_13_relu`.
pub const EMBEDDING_SHAPE: [usize; 3] = [7, 7, 256];

/// Consecutive failed polls before the detector strategy gives up.
pub const MAX_CONSECUTIVE_DETECTION_FAILURES: usize = 2;

/// Max polls a track can be lost before removal.
pub const TRACKER_MAX_LOST: usize = 15;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

pub const JPEG_QUALITY: u8 = 90;
