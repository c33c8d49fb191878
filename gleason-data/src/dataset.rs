//! Dataset split scanning.

use crate::{common::*, label};

/// One labeled patch file discovered in a dataset split.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatchFile {
    pub path: PathBuf,
    pub label: i64,
}

/// List the `*.png` patches of `<data_dir>/<split>` and resolve their
/// labels from the file name convention.
pub async fn scan_split(data_dir: impl AsRef<Path>, split: &str) -> Result<Vec<PatchFile>> {
    let pattern = data_dir.as_ref().join(split).join("*.png");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| format_err!("non UTF-8 dataset path '{}'", pattern.display()))?
        .to_owned();

    let files = tokio::task::spawn_blocking(move || {
        let files: Vec<_> = glob::glob(&pattern)?
            .map(|result| -> Result<_> {
                let path = result?;
                let label = label::resolve_path_label(&path);
                Ok(PatchFile { path, label })
            })
            .try_collect()?;
        anyhow::Ok(files)
    })
    .await??;

    let num_files: usize = files.iter().map(|file| &file.path).unique().count();
    let num_labels: usize = files.iter().map(|file| file.label).unique().count();
    info!("{} files in {} categories", num_files, num_labels);

    Ok(files)
}
