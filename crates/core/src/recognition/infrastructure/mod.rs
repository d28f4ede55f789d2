pub mod image_files;
pub mod image_folder_repository;
pub mod model_directory;
pub mod onnx_feature_extractor;
