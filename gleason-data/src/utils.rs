use crate::common::*;
use serde::de::DeserializeOwned;

/// Cooperative cancellation flag shared with in-flight bulk
/// operations. It is honored at worker-submission boundaries; a
/// worker that already started its item runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Worker pool parameters for the `par_*` combinators: a fixed pool
/// size when one is configured, the runtime default otherwise.
pub(crate) fn par_params(workers: Option<usize>) -> par_stream::ParParams {
    match workers {
        Some(num_workers) => num_workers.into(),
        None => Option::<par_stream::ParParamsConfig>::None.into(),
    }
}

/// The temporary sibling path used before an atomic rename.
pub fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write a JSON document to `path` via a temporary file and a rename,
/// so readers never observe a partially written file.
pub fn atomic_write_json<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    let tmp_path = tmp_sibling(path);
    {
        let file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create '{}'", tmp_path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
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

pub fn read_json<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let file =
        fs::File::open(path).with_context(|| format!("failed to open '{}'", path.display()))?;
    let value = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse '{}'", path.display()))?;
    Ok(value)
}
