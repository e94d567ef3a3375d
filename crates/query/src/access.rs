use async_trait::async_trait;
use thiserror::Error;

use crate::BlockQuery;

pub type AccessResult<T> = Result<T, AccessError>;

/// Failures a block backend can report.
///
/// All of these are block-scoped: the box-query executor logs them and
/// leaves the block's region at the field's default fill. `Corrupt` covers
/// decoded payloads whose dtype or sample count disagree with the dataset.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("block not found")]
    NotFound,

    #[error("{0} not supported by this access")]
    Unsupported(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt block: {0}")]
    Corrupt(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("aborted")]
    Aborted,
}

/// The pluggable block backend.
///
/// A backend satisfies whole-block reads and writes, nothing finer. The
/// `begin_*`/`end_*` hooks bracket a batch of block operations so a backend
/// can amortize setup (open handles, reuse connections); the defaults do
/// nothing. `read_block` fills `query.buffer` on success; `write_block`
/// consumes it. Implementations must stay cheap to call concurrently: the
/// executor dispatches many blocks at once against one shared instance.
#[async_trait]
pub trait BlockAccess: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Block-size alignment this backend expects; must equal the dataset's.
    fn bits_per_block(&self) -> i32;

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        false
    }

    fn begin_read(&self) {}
    fn end_read(&self) {}
    fn begin_write(&self) {}
    fn end_write(&self) {}

    async fn read_block(&self, query: &mut BlockQuery) -> AccessResult<()>;

    async fn write_block(&self, query: &mut BlockQuery) -> AccessResult<()>;
}
