//! The training stream: decode records, augment per example, shuffle,
//! batch, and finish with batch-level processors.
//!
//! Stage order is fixed. Per example: crop, flips, rotation. Per
//! batch: elastic warp, optional grayscale, and z-score normalization
//! always last.

use crate::{
    common::*,
    config::{AugmentConfig, LoaderConfig},
    container::ContainerReader,
    processor,
    record,
    stats::PixelStats,
    utils,
};

const WARP_SEED: u64 = 0x7761_7270;
const SHUFFLE_SEED: u64 = 0x7368_7566;

/// One collated training batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingBatch {
    /// `(N, H, W, C)` pixels, normalized.
    pub images: Array4<f32>,
    pub labels: Vec<i64>,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct AugmentedExample {
    pixels: Array3<f32>,
    label: i64,
    path: String,
}

#[derive(Debug, Clone)]
pub struct TrainingStreamInit {
    pub container_file: PathBuf,
    pub stats: PixelStats,
    pub config: LoaderConfig,
}

impl TrainingStreamInit {
    pub fn build(self) -> Result<TrainingStream> {
        let Self {
            container_file,
            stats,
            config,
        } = self;
        config.validate()?;
        ensure!(
            container_file.is_file(),
            "the container file '{}' does not exist",
            container_file.display()
        );
        Ok(TrainingStream {
            container_file,
            stats,
            config,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TrainingStream {
    container_file: PathBuf,
    stats: PixelStats,
    config: LoaderConfig,
}

impl TrainingStream {
    /// Start one pass over the container. Each call opens the file
    /// afresh and, under a fixed seed, replays the identical pass.
    pub fn stream(&self) -> Result<BoxStream<'static, Result<TrainingBatch>>> {
        let Self {
            ref container_file,
            stats,
            ref config,
        } = *self;
        let batch_size = config.batch_size.get();
        let workers = config.workers;
        let seed = config.seed;
        let shuffle = config.shuffle;
        let capacity = config.shuffle_capacity();
        let record_shape = config.record_shape;
        let model_shape = config.model_shape;
        let augment = config.augment.clone();

        let reader = ContainerReader::open(container_file)?;

        // per-example decode and augmentation on the worker pool,
        // submission order preserved
        let examples = {
            let augment = augment.clone();
            stream::iter(reader.records().enumerate()).par_map(
                utils::par_params(workers),
                move |(index, result)| {
                    let augment = augment.clone();
                    move || -> Result<AugmentedExample> {
                        let encoded = result?;
                        let decoded = record::decode(encoded, record_shape)?;
                        let mut rng = example_rng(seed, index as u64);
                        let pixels =
                            augment_example(&augment, model_shape, decoded.pixels, &mut rng);
                        Ok(AugmentedExample {
                            pixels,
                            label: decoded.label,
                            path: decoded.path,
                        })
                    }
                },
            )
        };

        let examples: BoxStream<'static, Result<AugmentedExample>> = if shuffle {
            let rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed ^ SHUFFLE_SEED),
                None => StdRng::from_entropy(),
            };
            shuffle_examples(examples.boxed(), capacity, config.min_after_dequeue, rng).boxed()
        } else {
            examples.boxed()
        };

        let batches = examples
            .chunks(batch_size)
            .filter_map(move |chunk| {
                let chunk: Result<Vec<_>> = chunk.into_iter().collect();
                let output = match chunk {
                    // a shuffled pass drops the short final batch
                    Ok(examples) if shuffle && examples.len() < batch_size => None,
                    Ok(examples) => Some(Ok(examples)),
                    Err(err) => Some(Err(err)),
                };
                future::ready(output)
            })
            .enumerate()
            .par_then(utils::par_params(workers), move |(batch_index, chunk)| {
                let augment = augment.clone();
                async move {
                    let rng = match seed {
                        Some(seed) => StdRng::seed_from_u64(
                            (seed ^ WARP_SEED).wrapping_add(batch_index as u64),
                        ),
                        None => StdRng::from_entropy(),
                    };
                    collate(chunk?, &augment, stats, rng)
                }
            })
            .boxed();

        Ok(batches)
    }
}

fn example_rng(seed: Option<u64>, index: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index)),
        None => StdRng::from_entropy(),
    }
}

/// Crop, flips and rotation for one example.
fn augment_example(
    augment: &AugmentConfig,
    model_shape: [usize; 2],
    pixels: Array3<u8>,
    rng: &mut StdRng,
) -> Array3<f32> {
    let mut image = pixels.mapv(|value| value as f32);

    image = if augment.random_crop {
        processor::random_crop(&image, model_shape, rng)
    } else {
        processor::center_crop_or_pad(&image, model_shape)
    };

    if augment.flip_left_right && rng.gen::<bool>() {
        processor::flip_left_right(&mut image);
    }
    if augment.flip_top_bottom && rng.gen::<bool>() {
        processor::flip_top_bottom(&mut image);
    }

    if augment.random_rotate {
        let degrees = rng.gen_range(0..360);
        image = processor::rotate(&image, (degrees as f64).to_radians());
    }

    image
}

/// Buffered uniform shuffle. While the upstream lasts, the buffer
/// refills towards `capacity` and never draws below `min_fill`; once
/// the upstream ends it drains. Errors pass through undelayed.
fn shuffle_examples(
    mut upstream: BoxStream<'static, Result<AugmentedExample>>,
    capacity: usize,
    min_fill: usize,
    mut rng: StdRng,
) -> impl Stream<Item = Result<AugmentedExample>> + Send + 'static {
    let mut buffer: Vec<AugmentedExample> = Vec::with_capacity(capacity);
    let mut exhausted = false;

    stream::poll_fn(move |context| {
        use std::task::Poll;

        while !exhausted && buffer.len() < capacity {
            match upstream.poll_next_unpin(context) {
                Poll::Ready(Some(Ok(example))) => buffer.push(example),
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => exhausted = true,
                Poll::Pending => {
                    if buffer.len() <= min_fill {
                        return Poll::Pending;
                    }
                    break;
                }
            }
        }

        if buffer.is_empty() {
            return Poll::Ready(None);
        }
        let index = rng.gen_range(0..buffer.len());
        Poll::Ready(Some(Ok(buffer.swap_remove(index))))
    })
}

/// Stack a chunk into one batch and run the batch-level processors.
/// The elastic deformation field is drawn once and shared by every
/// example of the batch.
fn collate(
    examples: Vec<AugmentedExample>,
    augment: &AugmentConfig,
    stats: PixelStats,
    mut rng: StdRng,
) -> Result<TrainingBatch> {
    let views: Vec<_> = examples.iter().map(|example| example.pixels.view()).collect();
    let mut images = ndarray::stack(Axis(0), &views)?;
    drop(views);

    if augment.elastic_warp {
        let (_, height, width, _) = images.dim();
        let field = processor::WarpField::generate(height, width, &mut rng);
        images = field.apply(&images);
    }
    if augment.grayscale {
        images = processor::to_grayscale(&images);
    }
    processor::normalize(&mut images, &stats);

    let (labels, paths) = examples
        .into_iter()
        .map(|example| (example.label, example.path))
        .unzip();

    Ok(TrainingBatch {
        images,
        labels,
        paths,
    })
}
