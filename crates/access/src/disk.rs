use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mipstore_dataset::Dataset;
use mipstore_query::{AccessError, AccessResult, BlockAccess, BlockQuery};
use tracing::debug;

use crate::{format, Codec};

/// One file per block under a root directory.
///
/// The path template expands `{field}`, `{time}` and `{block}` (zero-padded
/// hex id), so a layout like `temperature/0/000000000000002a.bin` falls out
/// by default. Writes go through a sibling temp file and a rename, which
/// keeps a crashed writer from leaving a torn block behind.
#[derive(Debug)]
pub struct DiskAccess {
    root: PathBuf,
    path_template: String,
    bits_per_block: i32,
    can_read: bool,
    can_write: bool,
}

pub(crate) const DEFAULT_PATH_TEMPLATE: &str = "{field}/{time}/{block}.bin";

impl DiskAccess {
    pub fn new(
        dataset: &Dataset,
        root: impl Into<PathBuf>,
        path_template: Option<String>,
        chmod: &str,
    ) -> Self {
        Self {
            root: root.into(),
            path_template: path_template.unwrap_or_else(|| DEFAULT_PATH_TEMPLATE.to_owned()),
            bits_per_block: dataset.bits_per_block(),
            can_read: chmod.contains('r'),
            can_write: chmod.contains('w'),
        }
    }

    fn block_path(&self, query: &BlockQuery) -> PathBuf {
        let time = format_time(query.time);
        let block = format!("{:016x}", query.blockid);
        let rel = self
            .path_template
            .replace("{field}", &query.field.name)
            .replace("{time}", &time)
            .replace("{block}", &block);
        self.root.join(rel)
    }
}

fn format_time(time: f64) -> String {
    if time.fract() == 0.0 {
        format!("{}", time as i64)
    } else {
        format!("{time}")
    }
}

#[async_trait]
impl BlockAccess for DiskAccess {
    fn name(&self) -> &str {
        "disk"
    }

    fn bits_per_block(&self) -> i32 {
        self.bits_per_block
    }

    fn can_read(&self) -> bool {
        self.can_read
    }

    fn can_write(&self) -> bool {
        self.can_write
    }

    async fn read_block(&self, query: &mut BlockQuery) -> AccessResult<()> {
        let path = self.block_path(query);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AccessError::NotFound)
            }
            Err(err) => return Err(err.into()),
        };
        if query.aborted.is_aborted() {
            return Err(AccessError::Aborted);
        }

        let array = format::read_block_bytes(&bytes, query.nsamples(), query.field.dtype)?;
        debug!(blockid = query.blockid, path = %path.display(), "block read");
        query.buffer = Some(array);
        Ok(())
    }

    async fn write_block(&self, query: &mut BlockQuery) -> AccessResult<()> {
        let buffer = query
            .buffer
            .as_ref()
            .ok_or(AccessError::Unsupported("write without buffer"))?;
        let codec: Codec = query.field.default_codec.parse()?;
        let bytes = format::write_block_bytes(buffer, codec)?;

        if query.aborted.is_aborted() {
            return Err(AccessError::Aborted);
        }

        let path = self.block_path(query);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_sibling(&path);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(blockid = query.blockid, path = %path.display(), "block written");
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mipstore_array::{DType, DTypeAtom};
    use mipstore_dataset::{DatasetConfig, FieldConfig, Timesteps};
    use mipstore_query::{Aborted, Mode};

    use super::*;

    fn dataset() -> Arc<Dataset> {
        Dataset::open(DatasetConfig {
            name: "disk".into(),
            bitmask: "V010101".parse().unwrap(),
            logic_box: None,
            bits_per_block: 2,
            fields: vec![FieldConfig::new("v", DType::scalar(DTypeAtom::U8))],
            timesteps: Timesteps::default(),
            default_access: None,
        })
        .unwrap()
    }

    fn block(ds: &Dataset, blockid: u64, mode: Mode) -> BlockQuery {
        BlockQuery::new(ds, ds.field("v").unwrap(), 0.0, blockid, mode, Aborted::new())
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0");
        assert_eq!(format_time(30.0), "30");
        assert_eq!(format_time(2.5), "2.5");
    }

    #[test]
    fn test_block_path_template() {
        let ds = dataset();
        let access = DiskAccess::new(&ds, "/data", None, "rw");
        let query = block(&ds, 5, Mode::Read);
        assert_eq!(
            access.block_path(&query),
            PathBuf::from("/data/v/0/0000000000000005.bin")
        );
    }

    #[tokio::test]
    async fn test_missing_block_is_not_found() {
        let ds = dataset();
        let dir = tempfile::tempdir().unwrap();
        let access = DiskAccess::new(&ds, dir.path(), None, "rw");
        let mut query = block(&ds, 3, Mode::Read);
        assert!(matches!(
            access.read_block(&mut query).await,
            Err(AccessError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let ds = dataset();
        let dir = tempfile::tempdir().unwrap();
        let access = DiskAccess::new(&ds, dir.path(), None, "rw");

        let mut write = block(&ds, 3, Mode::Write);
        write.allocate_buffer_if_needed();
        write.buffer.as_mut().unwrap().fill(9.0);
        access.write_block(&mut write).await.unwrap();

        let mut read = block(&ds, 3, Mode::Read);
        access.read_block(&mut read).await.unwrap();
        let buffer = read.buffer.unwrap();
        assert_eq!(buffer.layout(), write.buffer.as_ref().unwrap().layout());
        assert!(buffer.as_bytes().iter().all(|&b| b == 9));
    }

    #[tokio::test]
    async fn test_truncated_file_is_corrupt() {
        let ds = dataset();
        let dir = tempfile::tempdir().unwrap();
        let access = DiskAccess::new(&ds, dir.path(), None, "rw");

        let mut write = block(&ds, 1, Mode::Write);
        write.allocate_buffer_if_needed();
        access.write_block(&mut write).await.unwrap();

        let path = access.block_path(&block(&ds, 1, Mode::Read));
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let mut read = block(&ds, 1, Mode::Read);
        assert!(matches!(
            access.read_block(&mut read).await,
            Err(AccessError::Corrupt(_))
        ));
    }
}
