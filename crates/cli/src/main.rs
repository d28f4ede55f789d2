use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};

use faceteach_core::detection::domain::detector_strategy::DetectorStrategy;
use faceteach_core::detection::infrastructure::onnx_blazeface_detector::OnnxBlazefaceDetector;
use faceteach_core::detection::infrastructure::rustface_tracking_detector::{
    RustfaceTrackingDetector, TrackingSettings,
};
use faceteach_core::pipeline::capture_sample_use_case::{
    CaptureError, CaptureOutcome, CaptureSampleUseCase,
};
use faceteach_core::pipeline::progress_logger::StdoutProgressLogger;
use faceteach_core::pipeline::recognize_faces_use_case::{RecognizeError, RecognizeFacesUseCase};
use faceteach_core::pipeline::train_head_use_case::TrainHeadUseCase;
use faceteach_core::recognition::domain::head_slot::HeadSlot;
use faceteach_core::recognition::domain::model_serializer::ModelSerializer;
use faceteach_core::recognition::domain::predictor::Predictor;
use faceteach_core::recognition::domain::sample::Label;
use faceteach_core::recognition::domain::training::{Trainer, TrainingConfig};
use faceteach_core::recognition::infrastructure::image_files::{is_image_file, read_frame};
use faceteach_core::recognition::infrastructure::image_folder_repository::ImageFolderRepository;
use faceteach_core::recognition::infrastructure::model_directory::ModelDirectory;
use faceteach_core::recognition::infrastructure::onnx_feature_extractor::OnnxFeatureExtractor;
use faceteach_core::shared::constants::TRACKER_MAX_LOST;
use faceteach_core::shared::model_resolver::{self, ModelSource};

mod settings;

use settings::Settings;

/// Teach a face recognizer from a few labeled photos.
#[derive(Parser)]
#[command(name = "faceteach")]
struct Cli {
    /// Settings file (defaults to the per-user settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect the main face in each image and store it under a label.
    Capture {
        /// Label to store the faces under.
        #[arg(long)]
        label: String,

        /// Sample folder (one subfolder per label).
        #[arg(long)]
        data: PathBuf,

        /// Input images.
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Train the classifier on a sample folder and save the model.
    Train {
        #[arg(long)]
        data: PathBuf,

        /// Output directory for model.json, model.weights.bin and labels.json.
        #[arg(long)]
        model: PathBuf,

        #[command(flatten)]
        overrides: TrainingOverrides,
    },
    /// Recognize every face in the given images.
    Predict {
        /// Model directory written by `train`.
        #[arg(long)]
        model: Option<PathBuf>,

        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Write a sample folder out again as `<label>/<label>-<i>.jpeg`.
    ExportData {
        #[arg(long)]
        data: PathBuf,

        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Args)]
struct TrainingOverrides {
    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f32>,

    #[arg(long)]
    hidden_units: Option<usize>,

    /// Fraction of samples held out for validation (0.0-1.0).
    #[arg(long)]
    validation_split: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,
}

impl TrainingOverrides {
    fn apply(&self, config: &mut TrainingConfig) {
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.hidden_units {
            config.hidden_units = v;
        }
        if let Some(v) = self.validation_split {
            config.validation_split = v;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
    }
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref());

    match cli.command {
        Command::Capture {
            label,
            data,
            images,
        } => run_capture(&settings, &label, &data, &images),
        Command::Train {
            data,
            model,
            overrides,
        } => {
            let mut config = settings.training.clone();
            overrides.apply(&mut config);
            config.validate()?;
            run_train(&settings, &config, &data, &model)
        }
        Command::Predict { model, images } => run_predict(&settings, model.as_deref(), &images),
        Command::ExportData { data, out } => run_export(&settings, &data, &out),
    }
}

fn run_capture(
    settings: &Settings,
    label: &str,
    data: &Path,
    images: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let label = Label::new(label)?;
    validate_images(images)?;
    let repository = ImageFolderRepository::new(data);
    let mut store = repository.load(settings.sample_size)?;
    let mut use_case = CaptureSampleUseCase::new(build_detector(settings));

    let mut captured = 0;
    for path in images {
        let frame = read_frame(path)?;
        match use_case.execute(&frame, &label, &mut store) {
            Ok(CaptureOutcome::Captured { count, .. }) => {
                captured += 1;
                log::info!("{}: stored as {label} #{count}", path.display());
            }
            Ok(CaptureOutcome::NoFace) => log::warn!("{}: no face found", path.display()),
            Err(CaptureError::Detector(e)) if !e.is_fatal() => {
                log::warn!("{}: {e}", path.display());
            }
            Err(e) => return Err(e.into()),
        }
    }
    use_case.stop();

    repository.save(&store)?;
    log::info!(
        "Captured {captured}/{} faces for {label} into {}",
        images.len(),
        data.display()
    );
    Ok(())
}

fn run_train(
    settings: &Settings,
    config: &TrainingConfig,
    data: &Path,
    model_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = ImageFolderRepository::new(data).load(settings.sample_size)?;
    let extractor = build_extractor(settings)?;
    let trainer = Trainer::new(HeadSlot::new());
    let mut use_case = TrainHeadUseCase::new(Box::new(extractor), trainer.clone());

    let mut logger = StdoutProgressLogger::default();
    use_case.execute(&store, config, &mut logger)?;

    let artifacts = ModelSerializer::export_current(trainer.slot())?;
    ModelDirectory::new(model_dir).write(&artifacts)?;
    log::info!("Model written to {}", model_dir.display());
    Ok(())
}

fn run_predict(
    settings: &Settings,
    model_dir: Option<&Path>,
    images: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    validate_images(images)?;
    let trainer = Trainer::new(HeadSlot::new());
    match model_dir {
        Some(dir) => {
            let artifacts = ModelDirectory::new(dir).read()?;
            trainer.install(ModelSerializer::import(&artifacts)?)?;
        }
        None => log::warn!("No model given; faces will not be recognized"),
    }

    let mut use_case = RecognizeFacesUseCase::new(
        build_detector(settings),
        Box::new(build_extractor(settings)?),
        Predictor::new(trainer.slot().clone()),
    );

    for path in images {
        let frame = read_frame(path)?;
        let faces = match use_case.execute(&frame) {
            Ok(faces) => faces,
            Err(RecognizeError::Detector(e)) if !e.is_fatal() => {
                log::warn!("{}: {e}", path.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if faces.is_empty() {
            println!("{}: no faces", path.display());
        }
        for face in faces {
            let b = &face.bbox;
            println!(
                "{}: [{}, {}, {}x{}] {}",
                path.display(),
                b.x,
                b.y,
                b.width,
                b.height,
                face.prediction
            );
        }
    }
    use_case.stop();
    Ok(())
}

fn run_export(
    settings: &Settings,
    data: &Path,
    out: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = ImageFolderRepository::new(data).load(settings.sample_size)?;
    let written = ImageFolderRepository::new(out).save(&store)?;
    log::info!("Exported {written} samples to {}", out.display());
    Ok(())
}

/// BlazeFace first, the SeetaFace tracker as fallback. A backend whose
/// model cannot be resolved is still registered and reports itself
/// unavailable from `init`.
fn build_detector(settings: &Settings) -> DetectorStrategy {
    let models = &settings.models;
    let detection = &settings.detection;

    let primary = OnnxBlazefaceDetector::new(
        resolve_optional(&models.blazeface, models.bundled_dir.as_deref()),
        detection.confidence,
    );
    let secondary = RustfaceTrackingDetector::new(
        resolve_optional(&models.seetaface, models.bundled_dir.as_deref()),
        TrackingSettings {
            min_face_size: detection.min_face_size,
            // Input images are unrelated stills; never serve tracked boxes.
            redetect_interval: 1,
            max_lost: TRACKER_MAX_LOST,
        },
    );
    DetectorStrategy::new(Box::new(primary), Box::new(secondary))
        .with_max_consecutive_failures(detection.max_consecutive_failures)
}

fn build_extractor(
    settings: &Settings,
) -> Result<OnnxFeatureExtractor, Box<dyn std::error::Error>> {
    let models = &settings.models;
    log::info!("Resolving model: {}", models.feature_extractor.file);
    let path = model_resolver::resolve(
        &models.feature_extractor,
        models.bundled_dir.as_deref(),
        Some(Box::new(download_progress)),
    )?;
    Ok(OnnxFeatureExtractor::new(&path)?)
}

fn resolve_optional(source: &ModelSource, bundled_dir: Option<&Path>) -> Option<PathBuf> {
    match model_resolver::resolve(source, bundled_dir, Some(Box::new(download_progress))) {
        Ok(path) => Some(path),
        Err(e) => {
            log::warn!("{e}");
            None
        }
    }
}

fn validate_images(images: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    for path in images {
        if !path.is_file() {
            return Err(format!("Input file not found: {}", path.display()).into());
        }
        if !is_image_file(path) {
            return Err(format!("Not a supported image: {}", path.display()).into());
        }
    }
    Ok(())
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading model... {pct}%");
    } else {
        eprint!("\rDownloading model... {downloaded} bytes");
    }
}
