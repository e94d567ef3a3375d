use std::sync::Arc;

use async_trait::async_trait;
use mipstore_array::Array;
use mipstore_geom::LogicSamples;
use mipstore_query::{AccessResult, BlockAccess, BlockQuery};

/// Transform hook applied to block payloads around an inner backend.
///
/// This is the attachment point for wavelet-style filters that reconstruct
/// coarse levels from stored coefficients: `decode` runs after a block is
/// read, `encode` before it is written. The core ships only the identity;
/// real kernels come from the pipeline that owns the data.
pub trait BlockFilter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn decode(&self, samples: &LogicSamples, buffer: &mut Array) -> AccessResult<()>;

    fn encode(&self, samples: &LogicSamples, buffer: &mut Array) -> AccessResult<()>;
}

#[derive(Debug)]
pub struct IdentityFilter;

impl BlockFilter for IdentityFilter {
    fn name(&self) -> &str {
        "identity"
    }

    fn decode(&self, _samples: &LogicSamples, _buffer: &mut Array) -> AccessResult<()> {
        Ok(())
    }

    fn encode(&self, _samples: &LogicSamples, _buffer: &mut Array) -> AccessResult<()> {
        Ok(())
    }
}

/// Wraps another backend and runs a [`BlockFilter`] over every payload.
#[derive(Debug)]
pub struct FilterAccess {
    inner: Arc<dyn BlockAccess>,
    filter: Arc<dyn BlockFilter>,
}

impl FilterAccess {
    pub fn new(inner: Arc<dyn BlockAccess>, filter: Arc<dyn BlockFilter>) -> Self {
        Self { inner, filter }
    }
}

#[async_trait]
impl BlockAccess for FilterAccess {
    fn name(&self) -> &str {
        "filter"
    }

    fn bits_per_block(&self) -> i32 {
        self.inner.bits_per_block()
    }

    fn can_read(&self) -> bool {
        self.inner.can_read()
    }

    fn can_write(&self) -> bool {
        self.inner.can_write()
    }

    fn begin_read(&self) {
        self.inner.begin_read();
    }

    fn end_read(&self) {
        self.inner.end_read();
    }

    fn begin_write(&self) {
        self.inner.begin_write();
    }

    fn end_write(&self) {
        self.inner.end_write();
    }

    async fn read_block(&self, query: &mut BlockQuery) -> AccessResult<()> {
        self.inner.read_block(query).await?;
        if let Some(buffer) = query.buffer.as_mut() {
            self.filter.decode(&query.logic_samples, buffer)?;
        }
        Ok(())
    }

    async fn write_block(&self, query: &mut BlockQuery) -> AccessResult<()> {
        if let Some(buffer) = query.buffer.as_mut() {
            self.filter.encode(&query.logic_samples, buffer)?;
        }
        self.inner.write_block(query).await
    }
}
