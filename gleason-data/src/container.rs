//! The record container file format and the bulk encoder.
//!
//! A container starts with a fixed header followed by length-delimited
//! records. Each record is a `u64` little-endian payload length and a
//! bincode-serialized [`EncodedExample`]. Alongside every container
//! sits a JSON sidecar with the input listing the container was built
//! from.

use crate::{
    common::*,
    dataset::PatchFile,
    error::DecodeError,
    record::{self, EncodedExample},
    utils::{self, CancelToken},
};

pub const MAGIC: [u8; 8] = *b"GLSNREC\0";
pub const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Header {
    magic: [u8; 8],
    version: u32,
}

/// The sidecar metadata written next to a container.
///
/// `file_pointers` and `labels` describe the inputs *submitted* to the
/// encoder, not the records that survived it. When some inputs fail to
/// encode, these lists are longer than the container; downstream
/// consumers that need an exact record inventory must count records,
/// not sidecar entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarMeta {
    pub file_pointers: Vec<String>,
    pub labels: Vec<i64>,
    pub output_pointer: PathBuf,
}

impl SidecarMeta {
    pub fn save(&self, path: &Path) -> Result<()> {
        utils::atomic_write_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        utils::read_json(path)
    }
}

/// The sidecar path for a container path, `<stem>_meta.json`.
pub fn sidecar_path(container_path: &Path) -> PathBuf {
    let stem = container_path
        .file_stem()
        .map(|stem| stem.to_os_string())
        .unwrap_or_default();
    let mut name = stem;
    name.push("_meta.json");
    container_path.with_file_name(name)
}

/// Sequential record writer. Records land in push order. The file is
/// written to a temporary sibling and only renamed into place by
/// [`finish`](Self::finish).
#[derive(Debug)]
pub struct ContainerWriter {
    writer: BufWriter<fs::File>,
    tmp_path: PathBuf,
    path: PathBuf,
    num_records: usize,
}

impl ContainerWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let tmp_path = utils::tmp_sibling(&path);
        let file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create '{}'", tmp_path.display()))?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            magic: MAGIC,
            version: VERSION,
        };
        bincode::serialize_into(&mut writer, &header)?;

        Ok(Self {
            writer,
            tmp_path,
            path,
            num_records: 0,
        })
    }

    pub fn push(&mut self, example: &EncodedExample) -> Result<()> {
        let payload = bincode::serialize(example)?;
        self.writer.write_all(&(payload.len() as u64).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.num_records += 1;
        Ok(())
    }

    /// Flush and move the container into its final place. Returns the
    /// number of records written.
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        drop(self.writer);
        fs::rename(&self.tmp_path, &self.path).with_context(|| {
            format!(
                "failed to move '{}' to '{}'",
                self.tmp_path.display(),
                self.path.display()
            )
        })?;
        Ok(self.num_records)
    }
}

/// Sequential record reader.
#[derive(Debug)]
pub struct ContainerReader {
    reader: BufReader<fs::File>,
    path: PathBuf,
}

impl ContainerReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = fs::File::open(&path)
            .with_context(|| format!("failed to open container '{}'", path.display()))?;
        let mut reader = BufReader::new(file);

        let header: Header = bincode::deserialize_from(&mut reader)
            .with_context(|| format!("failed to read container header of '{}'", path.display()))?;
        ensure!(
            header.magic == MAGIC,
            "the file '{}' is not a record container",
            path.display()
        );
        ensure!(
            header.version == VERSION,
            "container '{}' has version {}, expected {}",
            path.display(),
            header.version,
            VERSION
        );

        Ok(Self { reader, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate the records in file order. A clean end of file at a
    /// record boundary ends the iteration; a mid-record end of file
    /// surfaces as [`DecodeError::Corrupt`].
    pub fn records(self) -> RecordIter {
        RecordIter {
            reader: self.reader,
            poisoned: false,
        }
    }
}

#[derive(Debug)]
pub struct RecordIter {
    reader: BufReader<fs::File>,
    poisoned: bool,
}

impl RecordIter {
    fn read_record(&mut self) -> Result<Option<EncodedExample>, DecodeError> {
        let mut len_bytes = [0u8; 8];
        let mut filled = 0;
        while filled < len_bytes.len() {
            let count = self.reader.read(&mut len_bytes[filled..])?;
            if count == 0 {
                break;
            }
            filled += count;
        }
        match filled {
            0 => return Ok(None),
            8 => (),
            _ => {
                return Err(DecodeError::Corrupt(
                    "end of file inside a record length".into(),
                ))
            }
        }

        let len = u64::from_le_bytes(len_bytes) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).map_err(|_| {
            DecodeError::Corrupt(format!("end of file inside a {} byte record", len))
        })?;

        let example = bincode::deserialize(&payload)
            .map_err(|err| DecodeError::Corrupt(format!("undecodable record: {}", err)))?;
        Ok(Some(example))
    }
}

impl Iterator for RecordIter {
    type Item = Result<EncodedExample, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned {
            return None;
        }
        match self.read_record() {
            Ok(Some(example)) => Some(Ok(example)),
            Ok(None) => None,
            Err(err) => {
                self.poisoned = true;
                Some(Err(err))
            }
        }
    }
}

/// Outcome of one bulk encoding run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub num_inputs: usize,
    pub num_encoded: usize,
    pub num_failed: usize,
    pub container_path: PathBuf,
}

/// Bulk encoder. Images are loaded and packed on a bounded worker
/// pool; records are committed in submission order.
#[derive(Debug, Clone, Default)]
pub struct ContainerBuilder {
    pub workers: Option<usize>,
    pub cancel: Option<CancelToken>,
}

impl ContainerBuilder {
    pub async fn build(
        &self,
        container_path: impl AsRef<Path>,
        files: &[PatchFile],
    ) -> Result<BuildReport> {
        let Self { workers, ref cancel } = *self;
        let container_path = container_path.as_ref().to_owned();
        let cancel = cancel.clone().unwrap_or_default();

        let num_files: usize = files.iter().map(|file| &file.path).unique().count();
        let num_labels: usize = files.iter().map(|file| file.label).unique().count();
        info!(
            "encoding {} files in {} categories to '{}'",
            num_files,
            num_labels,
            container_path.display()
        );

        let results: Vec<_> = {
            let cancel = cancel.clone();
            stream::iter(files.to_vec())
                .take_while(move |_| {
                    let cancelled = cancel.is_cancelled();
                    async move { !cancelled }
                })
                .par_map(utils::par_params(workers), |PatchFile { path, label }| {
                    move || {
                        let result = record::encode(&path, label);
                        (path, result)
                    }
                })
                .collect()
                .await
        };
        ensure!(!cancel.is_cancelled(), "the encoding run was cancelled");

        // nothing is written until every worker finished, so a failed
        // run never leaves a container behind
        let mut writer = ContainerWriter::create(&container_path)?;
        let mut num_failed = 0;
        for (path, result) in results {
            match result {
                Ok(example) => writer.push(&example)?,
                Err(err) => {
                    warn!("skipping '{}': {:#}", path.display(), anyhow::Error::from(err));
                    num_failed += 1;
                }
            }
        }
        let num_encoded = writer.finish()?;

        let meta = SidecarMeta {
            file_pointers: files
                .iter()
                .map(|file| file.path.to_string_lossy().into_owned())
                .collect(),
            labels: files.iter().map(|file| file.label).collect(),
            output_pointer: container_path.clone(),
        };
        meta.save(&sidecar_path(&container_path))?;

        info!(
            "wrote {} records to '{}' ({} inputs failed)",
            num_encoded,
            container_path.display(),
            num_failed
        );

        Ok(BuildReport {
            num_inputs: files.len(),
            num_encoded,
            num_failed,
            container_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(dir: &Path, name: &str, shade: u8) -> PatchFile {
        let image = image::RgbImage::from_pixel(4, 4, image::Rgb([shade, shade, shade]));
        let path = dir.join(name);
        image.save(&path).unwrap();
        PatchFile {
            label: crate::label::resolve_path_label(&path),
            path,
        }
    }

    #[tokio::test]
    async fn build_preserves_order_test() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<_> = (0..10)
            .map(|index| {
                patch(
                    dir.path(),
                    &format!("Gleason_4_{:02}.png", index),
                    index as u8 * 20,
                )
            })
            .collect();

        let container_path = dir.path().join("train.records");
        let report = ContainerBuilder::default()
            .build(&container_path, &files)
            .await
            .unwrap();
        assert_eq!(report.num_inputs, 10);
        assert_eq!(report.num_encoded, 10);
        assert_eq!(report.num_failed, 0);

        let reader = ContainerReader::open(&container_path).unwrap();
        let records: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 10);
        for (index, record) in records.iter().enumerate() {
            assert_eq!(record.image_raw[0], index as u8 * 20, "records out of order");
            assert_eq!(record.target_label, 2);
        }
    }

    #[tokio::test]
    async fn failed_inputs_are_skipped_test() {
        let dir = tempfile::tempdir().unwrap();
        let mut files: Vec<_> = (0..9)
            .map(|index| patch(dir.path(), &format!("Gleason_3_{:02}.png", index), 50))
            .collect();
        let junk_path = dir.path().join("Gleason_5_junk.png");
        fs::write(&junk_path, b"garbage").unwrap();
        files.insert(
            4,
            PatchFile {
                path: junk_path,
                label: 3,
            },
        );

        let container_path = dir.path().join("train.records");
        let report = ContainerBuilder::default()
            .build(&container_path, &files)
            .await
            .unwrap();
        assert_eq!(report.num_inputs, 10);
        assert_eq!(report.num_encoded, 9);
        assert_eq!(report.num_failed, 1);

        let reader = ContainerReader::open(&container_path).unwrap();
        assert_eq!(reader.records().count(), 9);

        // the sidecar keeps the full submitted listing
        let meta = SidecarMeta::load(&sidecar_path(&container_path)).unwrap();
        assert_eq!(meta.file_pointers.len(), 10);
        assert_eq!(meta.labels.len(), 10);
        assert_eq!(meta.output_pointer, container_path);
    }

    #[tokio::test]
    async fn duplicate_inputs_test() {
        let dir = tempfile::tempdir().unwrap();
        let file = patch(dir.path(), "Gleason_5_dup.png", 80);
        let files = vec![file.clone(), file];

        // a path submitted twice yields two records and two sidecar
        // entries; only the logged file count deduplicates
        let container_path = dir.path().join("train.records");
        let report = ContainerBuilder::default()
            .build(&container_path, &files)
            .await
            .unwrap();
        assert_eq!(report.num_inputs, 2);
        assert_eq!(report.num_encoded, 2);

        let meta = SidecarMeta::load(&sidecar_path(&container_path)).unwrap();
        assert_eq!(meta.file_pointers.len(), 2);
        assert_eq!(meta.file_pointers[0], meta.file_pointers[1]);
    }

    #[tokio::test]
    async fn cancelled_build_writes_nothing_test() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![patch(dir.path(), "Gleason_4_0.png", 10)];

        let cancel = CancelToken::new();
        cancel.cancel();
        let builder = ContainerBuilder {
            cancel: Some(cancel),
            ..Default::default()
        };

        let container_path = dir.path().join("train.records");
        assert!(builder.build(&container_path, &files).await.is_err());
        assert!(!container_path.exists());
    }

    #[test]
    fn sidecar_path_test() {
        assert_eq!(
            sidecar_path(Path::new("/data/train.records")),
            Path::new("/data/train_meta.json")
        );
    }

    #[test]
    fn bad_magic_test() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.records");
        fs::write(&path, b"not a container either way").unwrap();
        assert!(ContainerReader::open(&path).is_err());
    }

    #[test]
    fn truncated_record_test() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunc.records");

        let mut writer = ContainerWriter::create(&path).unwrap();
        writer
            .push(&EncodedExample {
                image_raw: vec![7u8; 48],
                file_path: "a.png".into(),
                target_label: 1,
            })
            .unwrap();
        writer
            .push(&EncodedExample {
                image_raw: vec![9u8; 48],
                file_path: "b.png".into(),
                target_label: 2,
            })
            .unwrap();
        writer.finish().unwrap();

        // chop the tail off the second record
        let len = fs::metadata(&path).unwrap().len();
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 10).unwrap();
        drop(file);

        let mut records = ContainerReader::open(&path).unwrap().records();
        assert!(records.next().unwrap().is_ok());
        assert!(matches!(
            records.next().unwrap(),
            Err(DecodeError::Corrupt(_))
        ));
        assert!(records.next().is_none(), "iterator must fuse after error");
    }
}
