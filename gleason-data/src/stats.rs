//! Per-split statistics: grayscale pixel moments and inverse-frequency
//! class weights.

use crate::{
    common::*,
    error::ConfigurationError,
    label::NUM_CLASSES,
    utils::{self, CancelToken},
};
use npyz::WriterBuilder as _;

/// Grayscale intensity moments of a split, taken over the per-image
/// mean intensities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelStats {
    pub mean: f64,
    pub std: f64,
}

impl PixelStats {
    pub fn save(&self, path: &Path) -> Result<()> {
        utils::atomic_write_json(path, self)
    }

    pub fn open(path: &Path) -> Result<Self> {
        utils::read_json(path)
    }
}

/// The pixel statistics path for a split, `<split>_pixel_stats.json`.
pub fn stats_path(output_dir: &Path, split: &str) -> PathBuf {
    output_dir.join(format!("{}_pixel_stats.json", split))
}

/// The class weights path for a split, `<split>_class_weights.npy`.
pub fn class_weights_path(output_dir: &Path, split: &str) -> PathBuf {
    output_dir.join(format!("{}_class_weights.npy", split))
}

/// Bounded-parallel statistics computation over a file listing.
#[derive(Debug, Clone, Default)]
pub struct StatsAggregator {
    pub workers: Option<usize>,
    pub cancel: Option<CancelToken>,
}

impl StatsAggregator {
    /// Mean and population standard deviation of the per-image mean
    /// grayscale intensity. Unreadable images are logged and dropped
    /// from the aggregate.
    pub async fn pixel_stats(&self, paths: &[PathBuf]) -> Result<PixelStats> {
        let Self { workers, ref cancel } = *self;
        let cancel = cancel.clone().unwrap_or_default();

        let means: Vec<f64> = {
            let cancel = cancel.clone();
            stream::iter(paths.to_vec())
                .take_while(move |_| {
                    let cancelled = cancel.is_cancelled();
                    async move { !cancelled }
                })
                .par_map(utils::par_params(workers), |path| {
                    move || {
                        let mean = image_mean(&path);
                        if let Err(err) = &mean {
                            warn!("skipping '{}': {:#}", path.display(), err);
                        }
                        mean.ok()
                    }
                })
                .filter_map(|mean| async move { mean })
                .collect()
                .await
        };
        ensure!(!cancel.is_cancelled(), "the statistics run was cancelled");
        ensure!(
            !means.is_empty(),
            "no readable images, cannot compute pixel statistics"
        );

        let count = means.len() as f64;
        let mean = means.iter().sum::<f64>() / count;
        let variance = means
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / count;

        Ok(PixelStats {
            mean,
            std: variance.sqrt(),
        })
    }
}

fn image_mean(path: &Path) -> Result<f64> {
    let image = crate::record::load_image(path)?.to_luma8();
    let pixels = image.as_raw();
    ensure!(!pixels.is_empty(), "image '{}' is empty", path.display());
    let sum: f64 = pixels.iter().map(|&value| value as f64).sum();
    Ok(sum / pixels.len() as f64)
}

/// Inverse-frequency class weights, normalized to sum to 1.
///
/// Every class must be represented; a split that misses a class
/// cannot produce usable weights and the run aborts instead of
/// emitting zeros or infinities.
pub fn class_weights(labels: &[i64]) -> Result<[f64; NUM_CLASSES], ConfigurationError> {
    let mut counts = [0usize; NUM_CLASSES];
    for &label in labels {
        let index =
            usize::try_from(label).map_err(|_| ConfigurationError::LabelOutOfRange { label })?;
        if index >= NUM_CLASSES {
            return Err(ConfigurationError::LabelOutOfRange { label });
        }
        counts[index] += 1;
    }

    let total = labels.len() as f64;
    let mut weights = [0f64; NUM_CLASSES];
    for (index, (&count, weight)) in counts.iter().zip(&mut weights).enumerate() {
        if count == 0 {
            return Err(ConfigurationError::EmptyClass {
                label: index as i64,
            });
        }
        *weight = total / count as f64;
    }

    let sum: f64 = weights.iter().sum();
    weights.iter_mut().for_each(|weight| *weight /= sum);
    Ok(weights)
}

/// Persist class weights as a 1-d `.npy` of `f64`.
pub fn save_class_weights(path: &Path, weights: &[f64; NUM_CLASSES]) -> Result<()> {
    let tmp_path = utils::tmp_sibling(path);
    {
        let file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create '{}'", tmp_path.display()))?;
        let mut npy = npyz::WriteOptions::new()
            .default_dtype()
            .writer(BufWriter::new(file))
            .begin_1d()?;
        npy.extend(weights.iter().copied())?;
        npy.finish()?;
    }
    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to move '{}' to '{}'",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

pub fn load_class_weights(path: &Path) -> Result<[f64; NUM_CLASSES]> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open '{}'", path.display()))?;
    let values = npyz::NpyFile::new(BufReader::new(file))?.into_vec::<f64>()?;
    let weights: [f64; NUM_CLASSES] = values.try_into().map_err(|values: Vec<f64>| {
        format_err!(
            "'{}' holds {} weights, expected {}",
            path.display(),
            values.len(),
            NUM_CLASSES
        )
    })?;
    Ok(weights)
}
