use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::frame::Frame;

/// Name of one person the classifier can recognize.
///
/// After sorting, a label's position is the index of its output unit in the
/// head model.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("label must not be empty")]
pub struct EmptyLabel;

impl Label {
    /// Trims surrounding whitespace; rejects empty names.
    pub fn new(name: impl AsRef<str>) -> Result<Self, EmptyLabel> {
        let trimmed = name.as_ref().trim();
        if trimmed.is_empty() {
            return Err(EmptyLabel);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Label {
    type Error = EmptyLabel;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Label::new(value)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One captured face crop.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pixels: Frame,
    encoded: Option<Vec<u8>>,
}

impl Sample {
    pub fn new(pixels: Frame) -> Self {
        Self {
            pixels,
            encoded: None,
        }
    }

    /// Attaches the compressed (JPEG) bytes the sample was captured or
    /// loaded as, reused verbatim on export.
    pub fn with_encoded(mut self, encoded: Vec<u8>) -> Self {
        self.encoded = Some(encoded);
        self
    }

    pub fn pixels(&self) -> &Frame {
        &self.pixels
    }

    pub fn encoded(&self) -> Option<&[u8]> {
        self.encoded.as_deref()
    }
}
