//! Loader and augmentation configuration.

use crate::{common::*, error::ConfigurationError};

/// Augmentation toggles. Stage order is fixed by the loader; toggles
/// only switch individual stages on or off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AugmentConfig {
    #[serde(default = "default_true")]
    pub random_crop: bool,
    #[serde(default = "default_true")]
    pub flip_left_right: bool,
    #[serde(default = "default_true")]
    pub flip_top_bottom: bool,
    #[serde(default = "default_true")]
    pub random_rotate: bool,
    #[serde(default = "default_true")]
    pub elastic_warp: bool,
    #[serde(default)]
    pub grayscale: bool,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            random_crop: true,
            flip_left_right: true,
            flip_top_bottom: true,
            random_rotate: true,
            elastic_warp: true,
            grayscale: false,
        }
    }
}

impl AugmentConfig {
    /// Every stage off, for deterministic evaluation pipelines.
    pub fn disabled() -> Self {
        Self {
            random_crop: false,
            flip_left_right: false,
            flip_top_bottom: false,
            random_rotate: false,
            elastic_warp: false,
            grayscale: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// The `(height, width, channels)` shape records were encoded
    /// with.
    #[serde(default = "default_record_shape")]
    pub record_shape: [usize; 3],
    /// The `(height, width)` crop shape handed to the model.
    #[serde(default = "default_model_shape")]
    pub model_shape: [usize; 2],
    pub batch_size: NonZeroUsize,
    #[serde(default = "default_true")]
    pub shuffle: bool,
    /// Shuffle buffer capacity. Defaults to `1000 + 3 * batch_size`.
    #[serde(default)]
    pub shuffle_capacity: Option<NonZeroUsize>,
    /// The buffer refuses to draw until it holds this many examples
    /// (or the stream ran dry).
    #[serde(default = "default_min_after_dequeue")]
    pub min_after_dequeue: usize,
    /// Worker pool size; defaults to the number of cores.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Fixed RNG seed; omit it for entropy-seeded runs.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub augment: AugmentConfig,
}

fn default_true() -> bool {
    true
}

fn default_record_shape() -> [usize; 3] {
    [256, 256, 3]
}

fn default_model_shape() -> [usize; 2] {
    [224, 224]
}

fn default_min_after_dequeue() -> usize {
    1000
}

impl LoaderConfig {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to open '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)
            .with_context(|| format!("failed to parse '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// The effective shuffle buffer capacity.
    pub fn shuffle_capacity(&self) -> usize {
        self.shuffle_capacity
            .map(NonZeroUsize::get)
            .unwrap_or_else(|| 1000 + 3 * self.batch_size.get())
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let [height, width, channels] = self.record_shape;
        if channels != 3 {
            return Err(ConfigurationError::Invalid(format!(
                "record_shape must have 3 channels, found {}",
                channels
            )));
        }
        if height == 0 || width == 0 {
            return Err(ConfigurationError::Invalid(
                "record_shape dimensions must be positive".into(),
            ));
        }

        let [crop_height, crop_width] = self.model_shape;
        if crop_height == 0 || crop_width == 0 {
            return Err(ConfigurationError::Invalid(
                "model_shape dimensions must be positive".into(),
            ));
        }
        if self.augment.random_crop && (crop_height > height || crop_width > width) {
            return Err(ConfigurationError::Invalid(format!(
                "random crop of {:?} cannot be taken from records of {:?}",
                self.model_shape, self.record_shape
            )));
        }

        if self.shuffle && self.min_after_dequeue >= self.shuffle_capacity() {
            return Err(ConfigurationError::Invalid(format!(
                "min_after_dequeue {} must be below the shuffle capacity {}",
                self.min_after_dequeue,
                self.shuffle_capacity()
            )));
        }

        Ok(())
    }
}
