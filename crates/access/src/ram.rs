use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use mipstore_array::Array;
use mipstore_dataset::Dataset;
use mipstore_query::{AccessError, AccessResult, BlockAccess, BlockQuery};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BlockKey {
    field: String,
    time_bits: u64,
    blockid: u64,
}

impl BlockKey {
    fn of(query: &BlockQuery) -> Self {
        Self {
            field: query.field.name.clone(),
            time_bits: query.time.to_bits(),
            blockid: query.blockid,
        }
    }
}

struct CacheState {
    entries: LruCache<BlockKey, Arc<Array>>,
    used_bytes: usize,
}

/// In-memory block cache bounded by a byte budget.
///
/// Reads that miss return `NotFound` (so a multiplex falls through to the
/// next backend); writes insert and evict least-recently-used entries until
/// the budget holds again. One mutex guards the map; block payloads are
/// shared out as `Arc` clones so eviction never invalidates a reader.
pub struct RamAccess {
    bits_per_block: i32,
    available_bytes: usize,
    can_read: bool,
    can_write: bool,
    state: Mutex<CacheState>,
}

impl RamAccess {
    pub fn new(dataset: &Dataset, available_bytes: usize, chmod: &str) -> Self {
        Self {
            bits_per_block: dataset.bits_per_block(),
            available_bytes,
            can_read: chmod.contains('r'),
            can_write: chmod.contains('w'),
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                used_bytes: 0,
            }),
        }
    }

    /// Blocks currently cached.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> usize {
        self.state.lock().used_bytes
    }
}

impl std::fmt::Debug for RamAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RamAccess")
            .field("available_bytes", &self.available_bytes)
            .field("used_bytes", &self.used_bytes())
            .finish()
    }
}

#[async_trait]
impl BlockAccess for RamAccess {
    fn name(&self) -> &str {
        "ram"
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
        let cached = {
            let mut state = self.state.lock();
            state.entries.get(&BlockKey::of(query)).cloned()
        };
        match cached {
            Some(block) => {
                query.buffer = Some((*block).clone());
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
        let bytes = buffer.as_bytes().len();
        if bytes > self.available_bytes {
            debug!(blockid = query.blockid, bytes, "block larger than cache budget");
            return Err(AccessError::Backend("block exceeds cache budget".to_owned()));
        }

        let mut state = self.state.lock();
        let key = BlockKey::of(query);
        if let Some(old) = state.entries.push(key, Arc::new(buffer.clone())) {
            state.used_bytes -= old.1.as_bytes().len();
        }
        state.used_bytes += bytes;
        while state.used_bytes > self.available_bytes {
            match state.entries.pop_lru() {
                Some((_, evicted)) => state.used_bytes -= evicted.as_bytes().len(),
                None => break,
            }
        }
        Ok(())
    }
}
