use std::sync::Arc;

use mipstore_array::Array;
use mipstore_dataset::{Dataset, Field, TiledDataset};
use mipstore_geom::{BoxN, LogicSamples, PointN};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{Aborted, BlockAccess, Mode, QueryStatus};

/// One pending read or write of a single hz-aligned block.
///
/// The geometry (`h`, `logic_samples`) is derived from the dataset at
/// construction; the buffer appears on read completion and must be present
/// up front for writes. Ownership of the whole query moves into the
/// dispatched task and comes back through its [`BlockHandle`].
#[derive(Debug)]
pub struct BlockQuery {
    pub blockid: u64,
    pub field: Field,
    pub time: f64,
    pub mode: Mode,
    pub aborted: Aborted,
    /// Resolution level of the block (block 0 spans levels `0..=bitsperblock`).
    pub h: i32,
    pub bits_per_block: i32,
    pub logic_samples: LogicSamples,
    pub buffer: Option<Array>,
    status: QueryStatus,
}

impl BlockQuery {
    pub fn new(
        dataset: &Dataset,
        field: Field,
        time: f64,
        blockid: u64,
        mode: Mode,
        aborted: Aborted,
    ) -> Self {
        Self {
            blockid,
            field,
            time,
            mode,
            aborted,
            h: dataset.block_resolution(blockid),
            bits_per_block: dataset.bits_per_block(),
            logic_samples: dataset.block_logic_samples(blockid),
            buffer: None,
            status: QueryStatus::Created,
        }
    }

    /// Block query against a tiled (full-res) dataset; one block is one tile.
    pub fn tiled(
        dataset: &TiledDataset,
        field: Field,
        time: f64,
        blockid: u64,
        mode: Mode,
        aborted: Aborted,
    ) -> Self {
        Self {
            blockid,
            field,
            time,
            mode,
            aborted,
            h: dataset.block_resolution(blockid),
            bits_per_block: dataset.bits_per_block(),
            logic_samples: dataset.block_logic_samples(blockid),
            buffer: None,
            status: QueryStatus::Created,
        }
    }

    /// A fresh write query with this query's identity and the given buffer.
    /// Caching layers use it to push a block they just fetched up the stack.
    pub fn for_write(&self, buffer: Array) -> BlockQuery {
        BlockQuery {
            blockid: self.blockid,
            field: self.field.clone(),
            time: self.time,
            mode: Mode::Write,
            aborted: self.aborted.clone(),
            h: self.h,
            bits_per_block: self.bits_per_block,
            logic_samples: self.logic_samples,
            buffer: Some(buffer),
            status: QueryStatus::Created,
        }
    }

    pub fn status(&self) -> &QueryStatus {
        &self.status
    }

    pub fn ok(&self) -> bool {
        self.status == QueryStatus::Ok
    }

    pub fn nsamples(&self) -> PointN {
        self.logic_samples.nsamples()
    }

    pub fn logic_box(&self) -> BoxN {
        self.logic_samples.logic_box
    }

    /// The hz address span `[from, to)` this block covers.
    pub fn address_range(&self) -> (u64, u64) {
        let from = self.blockid << self.bits_per_block;
        (from, from + (1u64 << self.bits_per_block))
    }

    /// Allocates a default-filled buffer in the field's block layout if none
    /// is attached yet.
    pub fn allocate_buffer_if_needed(&mut self) {
        if self.buffer.is_none() {
            self.buffer = Some(
                Array::filled(self.nsamples(), self.field.dtype, self.field.default_value)
                    .with_layout(self.field.default_layout),
            );
        }
    }

    pub(crate) fn set_running(&mut self) {
        debug_assert_eq!(self.status, QueryStatus::Created);
        self.status = QueryStatus::Running;
    }

    pub(crate) fn set_ok(&mut self) {
        self.status = QueryStatus::Ok;
    }

    pub(crate) fn set_failed(&mut self, reason: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = QueryStatus::Failed(reason.into());
        }
    }
}

/// Single-completion join handle of a dispatched block query.
///
/// Validation failures resolve immediately; everything else rides a spawned
/// task. Either way `join` yields the query back exactly once, always in a
/// terminal state.
#[derive(Debug)]
pub enum BlockHandle {
    Ready(Box<BlockQuery>),
    Task(JoinHandle<BlockQuery>),
}

impl BlockHandle {
    pub fn ready(query: BlockQuery) -> Self {
        Self::Ready(Box::new(query))
    }

    pub fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = BlockQuery> + Send + 'static,
    {
        Self::Task(tokio::spawn(future))
    }

    pub async fn join(self) -> BlockQuery {
        match self {
            Self::Ready(query) => *query,
            Self::Task(handle) => handle.await.expect("block i/o task panicked"),
        }
    }
}

/// Validates and dispatches one block query through an access backend.
///
/// The returned handle always resolves: an invalid query fails immediately
/// with a reason, a dispatched one lands in `Ok` or `Failed` when its task
/// finishes. Backend errors are block-scoped and only logged here.
pub fn execute_block_query(access: &Arc<dyn BlockAccess>, mut query: BlockQuery) -> BlockHandle {
    let failed = |mut query: BlockQuery, reason: &str| {
        debug!(blockid = query.blockid, reason, "block query rejected");
        query.set_failed(reason);
        BlockHandle::ready(query)
    };

    if !query.field.valid() {
        return failed(query, "field not valid");
    }
    if !query.logic_samples.valid() {
        return failed(query, "logic samples not valid");
    }
    if query.bits_per_block != access.bits_per_block() {
        return failed(query, "bits per block mismatch");
    }
    match query.mode {
        Mode::Read if !access.can_read() => return failed(query, "read not enabled"),
        Mode::Write if !access.can_write() => return failed(query, "write not enabled"),
        Mode::Write if query.buffer.is_none() => return failed(query, "no buffer to write"),
        _ => {}
    }

    // A field pinned to a time overrides the query's.
    if let Some(time) = query.field.time_override() {
        query.time = time;
    }

    query.set_running();
    let access = Arc::clone(access);
    BlockHandle::spawn(async move {
        let result = match query.mode {
            Mode::Read => access.read_block(&mut query).await,
            Mode::Write => access.write_block(&mut query).await,
        };
        match result {
            Ok(()) => {
                debug_assert!(query.mode == Mode::Write || query.buffer.is_some());
                query.set_ok();
            }
            Err(err) => {
                debug!(
                    blockid = query.blockid,
                    access = access.name(),
                    %err,
                    "block query failed"
                );
                query.set_failed(err.to_string());
            }
        }
        query
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use mipstore_array::{DType, DTypeAtom};
    use mipstore_dataset::{DatasetConfig, FieldConfig, Timesteps};
    use parking_lot::Mutex;

    use super::*;
    use crate::{AccessError, AccessResult, QueryStatus};

    /// Backend over a plain map, for exercising the dispatch path.
    #[derive(Debug, Default)]
    struct MapAccess {
        bits_per_block: i32,
        blocks: Mutex<HashMap<u64, Array>>,
    }

    #[async_trait]
    impl BlockAccess for MapAccess {
        fn name(&self) -> &str {
            "map"
        }

        fn bits_per_block(&self) -> i32 {
            self.bits_per_block
        }

        fn can_write(&self) -> bool {
            true
        }

        async fn read_block(&self, query: &mut BlockQuery) -> AccessResult<()> {
            match self.blocks.lock().get(&query.blockid) {
                Some(block) => {
                    query.buffer = Some(block.clone());
                    Ok(())
                }
                None => Err(AccessError::NotFound),
            }
        }

        async fn write_block(&self, query: &mut BlockQuery) -> AccessResult<()> {
            let buffer = query
                .buffer
                .as_ref()
                .ok_or(AccessError::Unsupported("write without buffer"))?;
            self.blocks.lock().insert(query.blockid, buffer.clone());
            Ok(())
        }
    }

    fn dataset() -> Arc<Dataset> {
        Dataset::open(DatasetConfig {
            name: "blocks".into(),
            bitmask: "V010101".parse().unwrap(),
            logic_box: None,
            bits_per_block: 2,
            fields: vec![FieldConfig::new("v", DType::scalar(DTypeAtom::U8))],
            timesteps: Timesteps::default(),
            default_access: None,
        })
        .unwrap()
    }

    fn map_access(dataset: &Dataset) -> Arc<dyn BlockAccess> {
        Arc::new(MapAccess {
            bits_per_block: dataset.bits_per_block(),
            blocks: Mutex::default(),
        })
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let ds = dataset();
        let access = map_access(&ds);
        let field = ds.field("v").unwrap();

        let mut write = BlockQuery::new(&ds, field.clone(), 0.0, 3, Mode::Write, Aborted::new());
        write.allocate_buffer_if_needed();
        write.buffer.as_mut().unwrap().fill(5.0);
        let done = execute_block_query(&access, write).join().await;
        assert!(done.ok());

        let read = BlockQuery::new(&ds, field, 0.0, 3, Mode::Read, Aborted::new());
        let done = execute_block_query(&access, read).join().await;
        assert!(done.ok());
        assert!(done.buffer.unwrap().as_bytes().iter().all(|&b| b == 5));
    }

    #[tokio::test]
    async fn test_missing_block_fails_but_resolves() {
        let ds = dataset();
        let access = map_access(&ds);
        let read = BlockQuery::new(&ds, ds.field("v").unwrap(), 0.0, 7, Mode::Read, Aborted::new());
        let done = execute_block_query(&access, read).join().await;
        assert!(matches!(done.status(), QueryStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_validation_rejections_resolve_immediately() {
        let ds = dataset();
        let access = map_access(&ds);
        let field = ds.field("v").unwrap();

        // Write without a buffer.
        let write = BlockQuery::new(&ds, field.clone(), 0.0, 1, Mode::Write, Aborted::new());
        let done = execute_block_query(&access, write).join().await;
        assert_eq!(
            *done.status(),
            QueryStatus::Failed("no buffer to write".to_owned())
        );

        // Backend with the wrong block size.
        let mismatched: Arc<dyn BlockAccess> = Arc::new(MapAccess {
            bits_per_block: ds.bits_per_block() + 1,
            blocks: Mutex::default(),
        });
        let read = BlockQuery::new(&ds, field, 0.0, 1, Mode::Read, Aborted::new());
        let done = execute_block_query(&mismatched, read).join().await;
        assert_eq!(
            *done.status(),
            QueryStatus::Failed("bits per block mismatch".to_owned())
        );
    }

    #[tokio::test]
    async fn test_field_time_override_applies() {
        let ds = dataset();
        let access = map_access(&ds);
        let field = ds.field("v?time=30").unwrap();

        let mut write = BlockQuery::new(&ds, field, 99.0, 0, Mode::Write, Aborted::new());
        write.allocate_buffer_if_needed();
        let done = execute_block_query(&access, write).join().await;
        assert!(done.ok());
        assert_eq!(done.time, 30.0);
    }
}
