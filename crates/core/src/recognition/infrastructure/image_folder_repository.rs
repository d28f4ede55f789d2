/// Persists a labeled image store as one folder per label.
///
/// Layout: `<root>/<label>/<label>-<index>.jpeg`. Loading accepts any
/// supported image extension and resizes to the store's sample size.
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::recognition::domain::image_store::{LabeledImageStore, StoreError};
use crate::recognition::domain::sample::{Label, Sample};
use crate::recognition::infrastructure::image_files::{
    decode_frame, encode_jpeg, is_image_file, is_jpeg_file, ImageFileError,
};
use crate::shared::constants::JPEG_QUALITY;
use crate::shared::frame::FrameError;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Image {
        path: PathBuf,
        source: ImageFileError,
    },
    #[error("label {0:?} cannot be used as a folder name")]
    InvalidFolderName(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub struct ImageFolderRepository {
    root: PathBuf,
}

impl ImageFolderRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads every `<root>/<label>/` folder, including empty ones.
    ///
    /// A missing root yields an empty store. Folders whose names are not
    /// valid labels and files that fail to decode are skipped with a warning.
    pub fn load(&self, sample_size: u32) -> Result<LabeledImageStore, RepositoryError> {
        let mut store = LabeledImageStore::new(sample_size);
        if !self.root.exists() {
            return Ok(store);
        }

        for dir in sorted_entries(&self.root)? {
            if !dir.is_dir() {
                continue;
            }
            let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(label) = Label::new(name) else {
                log::warn!("Skipping folder {} (not a valid label)", dir.display());
                continue;
            };
            store.add_label(label.clone())?;

            for file in sorted_entries(&dir)? {
                if !file.is_file() || !is_image_file(&file) {
                    continue;
                }
                match load_sample(&file, sample_size) {
                    Ok(sample) => {
                        store.add_sample(&label, sample)?;
                    }
                    Err(RepositoryError::Image { path, source }) => {
                        log::warn!("Skipping {}: {source}", path.display());
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        log::info!(
            "Loaded {} samples for {} labels from {}",
            store.sample_count(),
            store.label_count(),
            self.root.display()
        );
        Ok(store)
    }

    /// Writes every sample as `<label>/<label>-<index>.jpeg` and returns the
    /// number of files written. Samples keep their captured JPEG bytes when
    /// they have them.
    ///
    /// Each label folder ends up holding exactly the store's samples: other
    /// image files in it are removed once the label has been written, so a
    /// load followed by a save into the same root never duplicates samples.
    pub fn save(&self, store: &LabeledImageStore) -> Result<usize, RepositoryError> {
        let mut written = 0;
        for (label, samples) in store.iter() {
            let dir = self.label_dir(label)?;
            fs::create_dir_all(&dir).map_err(|source| RepositoryError::Io {
                path: dir.clone(),
                source,
            })?;

            let mut kept = Vec::with_capacity(samples.len());
            for (index, sample) in samples.iter().enumerate() {
                let path = dir.join(format!("{label}-{index}.jpeg"));
                let bytes = match sample.encoded() {
                    Some(encoded) => encoded.to_vec(),
                    None => encode_jpeg(sample.pixels(), JPEG_QUALITY).map_err(|source| {
                        RepositoryError::Image {
                            path: path.clone(),
                            source,
                        }
                    })?,
                };
                fs::write(&path, bytes).map_err(|source| RepositoryError::Io {
                    path: path.clone(),
                    source,
                })?;
                kept.push(path);
                written += 1;
            }
            remove_stale_images(&dir, &kept)?;
        }
        log::info!("Exported {written} samples to {}", self.root.display());
        Ok(written)
    }

    fn label_dir(&self, label: &Label) -> Result<PathBuf, RepositoryError> {
        let name = label.as_str();
        if name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(RepositoryError::InvalidFolderName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

fn load_sample(path: &Path, sample_size: u32) -> Result<Sample, RepositoryError> {
    let bytes = fs::read(path).map_err(|source| RepositoryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let frame = decode_frame(&bytes).map_err(|source| RepositoryError::Image {
        path: path.to_path_buf(),
        source,
    })?;

    if frame.size() == (sample_size, sample_size) {
        let sample = Sample::new(frame);
        return Ok(if is_jpeg_file(path) {
            sample.with_encoded(bytes)
        } else {
            sample
        });
    }
    Ok(Sample::new(frame.resize(sample_size, sample_size)?))
}

fn remove_stale_images(dir: &Path, kept: &[PathBuf]) -> Result<(), RepositoryError> {
    for file in sorted_entries(dir)? {
        if !file.is_file() || !is_image_file(&file) || kept.contains(&file) {
            continue;
        }
        log::debug!("Removing {}", file.display());
        fs::remove_file(&file).map_err(|source| RepositoryError::Io {
            path: file.clone(),
            source,
        })?;
    }
    Ok(())
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, RepositoryError> {
    let io_err = |source| RepositoryError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::frame::Frame;

    const SIZE: u32 = 16;

    fn solid(size: u32, level: u8) -> Frame {
        Frame::new(vec![level; (size * size * 3) as usize], size, size, 3, 0)
    }

    fn store_with(labels: &[(&str, usize)]) -> LabeledImageStore {
        let mut store = LabeledImageStore::new(SIZE);
        for (name, count) in labels {
            let label = Label::new(name).unwrap();
            store.add_label(label.clone()).unwrap();
            for i in 0..*count {
                store
                    .add_sample(&label, Sample::new(solid(SIZE, 40 * i as u8)))
                    .unwrap();
            }
        }
        store
    }

    #[test]
    fn test_save_uses_label_index_names() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ImageFolderRepository::new(dir.path());
        let written = repo.save(&store_with(&[("alice", 2), ("bob", 1)])).unwrap();

        assert_eq!(written, 3);
        assert!(dir.path().join("alice/alice-0.jpeg").is_file());
        assert!(dir.path().join("alice/alice-1.jpeg").is_file());
        assert!(dir.path().join("bob/bob-0.jpeg").is_file());
    }

    #[test]
    fn test_save_then_load_restores_labels_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ImageFolderRepository::new(dir.path());
        repo.save(&store_with(&[("alice", 2), ("bob", 3)])).unwrap();

        let loaded = repo.load(SIZE).unwrap();
        let labels: Vec<&str> = loaded.labels().map(Label::as_str).collect();
        assert_eq!(labels, vec!["alice", "bob"]);
        assert_eq!(loaded.sample_count(), 5);

        let alice = Label::new("alice").unwrap();
        let first = &loaded.samples(&alice).unwrap()[0];
        assert_eq!(first.pixels().size(), (SIZE, SIZE));
        assert!(first.encoded().is_some());
    }

    #[test]
    fn test_save_reuses_encoded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let label = Label::new("carol").unwrap();
        let mut store = LabeledImageStore::new(SIZE);
        store.add_label(label.clone()).unwrap();
        let sample = Sample::new(solid(SIZE, 9)).with_encoded(vec![0xFF, 0xD8, 1, 2, 3]);
        store.add_sample(&label, sample).unwrap();

        ImageFolderRepository::new(dir.path()).save(&store).unwrap();
        let bytes = fs::read(dir.path().join("carol/carol-0.jpeg")).unwrap();
        assert_eq!(bytes, vec![0xFF, 0xD8, 1, 2, 3]);
    }

    #[test]
    fn test_load_resizes_other_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let label_dir = dir.path().join("dave");
        fs::create_dir_all(&label_dir).unwrap();
        solid(40, 100)
            .to_rgb_image()
            .unwrap()
            .save(label_dir.join("big.png"))
            .unwrap();

        let store = ImageFolderRepository::new(dir.path()).load(SIZE).unwrap();
        let samples = store.samples(&Label::new("dave").unwrap()).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].pixels().size(), (SIZE, SIZE));
        assert!(samples[0].encoded().is_none());
    }

    #[test]
    fn test_load_keeps_empty_labels_and_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        fs::create_dir_all(dir.path().join("erin")).unwrap();
        fs::write(dir.path().join("erin/notes.txt"), "hello").unwrap();
        fs::write(dir.path().join("erin/broken.jpg"), "not a jpeg").unwrap();
        fs::write(dir.path().join("stray.jpg"), "top-level file").unwrap();

        let store = ImageFolderRepository::new(dir.path()).load(SIZE).unwrap();
        assert_eq!(store.label_count(), 2);
        assert_eq!(store.sample_count(), 0);
    }

    #[test]
    fn test_load_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageFolderRepository::new(dir.path().join("nope"))
            .load(SIZE)
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_repeated_load_save_keeps_sample_count() {
        let dir = tempfile::tempdir().unwrap();
        let label_dir = dir.path().join("alice");
        fs::create_dir_all(&label_dir).unwrap();
        let image = solid(SIZE, 120).to_rgb_image().unwrap();
        image.save(label_dir.join("photo.jpg")).unwrap();
        image.save(label_dir.join("other.png")).unwrap();
        fs::write(label_dir.join("notes.txt"), "keep me").unwrap();

        let repo = ImageFolderRepository::new(dir.path());
        let alice = Label::new("alice").unwrap();
        let mut counts = Vec::new();
        for _ in 0..3 {
            let store = repo.load(SIZE).unwrap();
            counts.push(store.samples(&alice).unwrap().len());
            repo.save(&store).unwrap();
        }
        assert_eq!(counts, vec![2, 2, 2]);

        let mut names: Vec<String> = fs::read_dir(&label_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["alice-0.jpeg", "alice-1.jpeg", "notes.txt"]);
    }

    #[test]
    fn test_save_rejects_path_like_labels() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageFolderRepository::new(dir.path()).save(&store_with(&[("../up", 1)]));
        assert!(matches!(result, Err(RepositoryError::InvalidFolderName(_))));
    }
}
