use std::sync::Arc;

use async_trait::async_trait;
use mipstore_query::{AccessError, AccessResult, BlockAccess, BlockQuery};
use tracing::debug;

/// An ordered stack of backends.
///
/// Reads consult the children front to back and stop at the first success;
/// the fetched block is then written back into every *earlier* writable
/// child, which is what turns `[ram, disk]` or `[ram, network]` into a
/// caching hierarchy. Writes go to the configured sink child, or broadcast
/// to every writable child when no sink is set.
#[derive(Debug)]
pub struct MultiplexAccess {
    children: Vec<Arc<dyn BlockAccess>>,
    sink: Option<usize>,
    bits_per_block: i32,
}

impl MultiplexAccess {
    pub fn new(
        children: Vec<Arc<dyn BlockAccess>>,
        sink: Option<usize>,
    ) -> AccessResult<Self> {
        let Some(first) = children.first() else {
            return Err(AccessError::Backend("multiplex needs children".to_owned()));
        };
        let bits_per_block = first.bits_per_block();
        if children.iter().any(|c| c.bits_per_block() != bits_per_block) {
            return Err(AccessError::Backend(
                "multiplex children disagree on bits per block".to_owned(),
            ));
        }
        if let Some(sink) = sink {
            if sink >= children.len() {
                return Err(AccessError::Backend(format!(
                    "sink {sink} out of range for {} children",
                    children.len()
                )));
            }
        }
        Ok(Self {
            children,
            sink,
            bits_per_block,
        })
    }
}

#[async_trait]
impl BlockAccess for MultiplexAccess {
    fn name(&self) -> &str {
        "multiplex"
    }

    fn bits_per_block(&self) -> i32 {
        self.bits_per_block
    }

    fn can_read(&self) -> bool {
        self.children.iter().any(|c| c.can_read())
    }

    fn can_write(&self) -> bool {
        self.children.iter().any(|c| c.can_write())
    }

    fn begin_read(&self) {
        for child in &self.children {
            child.begin_read();
        }
    }

    fn end_read(&self) {
        for child in &self.children {
            child.end_read();
        }
    }

    fn begin_write(&self) {
        for child in &self.children {
            child.begin_write();
        }
    }

    fn end_write(&self) {
        for child in &self.children {
            child.end_write();
        }
    }

    async fn read_block(&self, query: &mut BlockQuery) -> AccessResult<()> {
        let mut last_error = AccessError::NotFound;
        for (depth, child) in self.children.iter().enumerate() {
            if !child.can_read() {
                continue;
            }
            if query.aborted.is_aborted() {
                return Err(AccessError::Aborted);
            }

            match child.read_block(query).await {
                Ok(()) => {
                    // Populate the faster layers in front of this one.
                    if let Some(buffer) = query.buffer.as_ref() {
                        for cache in self.children[..depth].iter().filter(|c| c.can_write()) {
                            let mut write = query.for_write(buffer.clone());
                            if let Err(err) = cache.write_block(&mut write).await {
                                debug!(
                                    blockid = query.blockid,
                                    cache = cache.name(),
                                    %err,
                                    "cache fill failed"
                                );
                            }
                        }
                    }
                    return Ok(());
                }
                Err(err) => {
                    if !matches!(err, AccessError::NotFound) {
                        debug!(blockid = query.blockid, child = child.name(), %err, "read fell through");
                    }
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn write_block(&self, query: &mut BlockQuery) -> AccessResult<()> {
        if let Some(sink) = self.sink {
            return self.children[sink].write_block(query).await;
        }

        let mut wrote = false;
        for child in self.children.iter().filter(|c| c.can_write()) {
            child.write_block(query).await?;
            wrote = true;
        }
        if wrote {
            Ok(())
        } else {
            Err(AccessError::Unsupported("no writable child"))
        }
    }
}
