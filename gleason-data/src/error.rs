//! Contracted error kinds.
//!
//! Per-item failures inside bulk operations carry an [`EncodeError`];
//! they are caught at the worker boundary, logged and dropped, and
//! never abort the surrounding batch. [`ConfigurationError`]s are
//! never caught: they abort an operation before any output is
//! written. Everything else propagates as `anyhow::Error`.

use crate::common::*;
use thiserror::Error;

/// Failure to turn one image file into a record.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to read image file '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode image file '{path}'")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image file '{path}' has {channels} channels, at least 3 are required")]
    ChannelCount { path: PathBuf, channels: u8 },
}

/// Failure to reconstruct an example from container bytes.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(
        "record holds {actual} image bytes but the declared shape {shape:?} requires {expected}"
    )]
    ShapeMismatch {
        shape: [usize; 3],
        expected: usize,
        actual: usize,
    },
    #[error("container record is truncated or corrupt: {0}")]
    Corrupt(String),
    #[error("failed to read container")]
    Io(#[from] io::Error),
}

/// Invalid loader/augmentation configuration, or a degenerate label
/// distribution during weight computation.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("class {label} has no examples, cannot derive class weights")]
    EmptyClass { label: i64 },
    #[error("label {label} is outside the class set 0..=3")]
    LabelOutOfRange { label: i64 },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
