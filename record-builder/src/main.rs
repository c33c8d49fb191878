use anyhow::{ensure, Context as _, Result};
use argh::FromArgs;
use gleason_data::{
    container::{self, ContainerBuilder, ContainerReader, SidecarMeta},
    dataset::{self, PatchFile},
    stats::{self, StatsAggregator},
};
use log::info;
use std::path::PathBuf;

#[derive(Debug, FromArgs)]
/// Build and inspect record containers of histopathology patches.
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Build(BuildArgs),
    Stats(StatsArgs),
    Info(InfoArgs),
}

#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "build")]
/// Encode one dataset split into a record container.
struct BuildArgs {
    /// dataset directory holding the split sub-directories
    #[argh(option)]
    data_dir: PathBuf,
    /// the split to encode, e.g. "train" or "test"
    #[argh(option)]
    split: String,
    /// output directory for the container and its sidecar
    #[argh(option)]
    output_dir: PathBuf,
    /// worker pool size, defaults to the number of cores
    #[argh(option)]
    workers: Option<usize>,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "stats")]
/// Compute pixel statistics and class weights for a split.
struct StatsArgs {
    /// dataset directory holding the split sub-directories
    #[argh(option)]
    data_dir: PathBuf,
    /// the split to analyze
    #[argh(option)]
    split: String,
    /// output directory for the statistics files
    #[argh(option)]
    output_dir: PathBuf,
    /// worker pool size, defaults to the number of cores
    #[argh(option)]
    workers: Option<usize>,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "info")]
/// Summarize an existing record container.
struct InfoArgs {
    /// the container file
    #[argh(positional)]
    container_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    let Args { command } = argh::from_env();

    match command {
        Command::Build(args) => build(args).await?,
        Command::Stats(args) => compute_stats(args).await?,
        Command::Info(args) => inspect(args)?,
    }

    Ok(())
}

async fn build(args: BuildArgs) -> Result<()> {
    let BuildArgs {
        data_dir,
        split,
        output_dir,
        workers,
    } = args;

    let files = dataset::scan_split(&data_dir, &split).await?;
    ensure!(
        !files.is_empty(),
        "no patch files found under '{}'",
        data_dir.join(&split).display()
    );

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create '{}'", output_dir.display()))?;
    let container_path = output_dir.join(format!("{}.records", split));

    let report = ContainerBuilder {
        workers,
        cancel: None,
    }
    .build(&container_path, &files)
    .await?;

    info!(
        "finished: {} of {} inputs encoded, {} failed",
        report.num_encoded, report.num_inputs, report.num_failed
    );
    Ok(())
}

async fn compute_stats(args: StatsArgs) -> Result<()> {
    let StatsArgs {
        data_dir,
        split,
        output_dir,
        workers,
    } = args;

    let files = dataset::scan_split(&data_dir, &split).await?;
    ensure!(
        !files.is_empty(),
        "no patch files found under '{}'",
        data_dir.join(&split).display()
    );
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create '{}'", output_dir.display()))?;

    let (paths, labels): (Vec<_>, Vec<_>) = files
        .into_iter()
        .map(|PatchFile { path, label }| (path, label))
        .unzip();

    let pixel_stats = StatsAggregator {
        workers,
        cancel: None,
    }
    .pixel_stats(&paths)
    .await?;
    let stats_path = stats::stats_path(&output_dir, &split);
    pixel_stats.save(&stats_path)?;
    info!(
        "pixel mean {:.3}, std {:.3} -> '{}'",
        pixel_stats.mean,
        pixel_stats.std,
        stats_path.display()
    );

    let weights = stats::class_weights(&labels)?;
    let weights_path = stats::class_weights_path(&output_dir, &split);
    stats::save_class_weights(&weights_path, &weights)?;
    info!("class weights {:?} -> '{}'", weights, weights_path.display());

    Ok(())
}

fn inspect(args: InfoArgs) -> Result<()> {
    let InfoArgs { container_file } = args;

    let reader = ContainerReader::open(&container_file)?;
    let mut num_records = 0usize;
    let mut label_counts = std::collections::HashMap::<i64, usize>::new();
    for record in reader.records() {
        let record = record?;
        *label_counts.entry(record.target_label).or_default() += 1;
        num_records += 1;
    }

    println!("container:  {}", container_file.display());
    println!("records:    {}", num_records);
    let mut labels: Vec<_> = label_counts.into_iter().collect();
    labels.sort_unstable();
    for (label, count) in labels {
        println!("  label {}: {}", label, count);
    }

    let sidecar = container::sidecar_path(&container_file);
    if sidecar.is_file() {
        let meta = SidecarMeta::load(&sidecar)?;
        println!("sidecar:    {}", sidecar.display());
        println!("submitted:  {}", meta.file_pointers.len());
        if meta.file_pointers.len() != num_records {
            println!(
                "note:       {} submitted inputs failed to encode",
                meta.file_pointers.len().saturating_sub(num_records)
            );
        }
    } else {
        println!("sidecar:    missing");
    }

    Ok(())
}
