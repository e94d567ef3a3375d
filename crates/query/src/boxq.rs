use std::sync::Arc;

use futures::{stream::FuturesUnordered, StreamExt};
use mipstore_array::Array;
use mipstore_dataset::{Dataset, Field};
use mipstore_geom::{BoxN, LogicSamples};
use tracing::{debug, warn};

use crate::{
    collect_blocks, execute_block_query, merge::merge_box_with_block, Aborted, BlockAccess,
    BlockQuery, Mode, QueryError, QueryStatus,
};

/// A progressive, resolution-staged box query.
///
/// Holds the user's request plus the per-pass state: the box aligned to the
/// current target level (`logic_samples`), the output buffer, and how far
/// the resolution ladder has been climbed. The dataset is not captured;
/// every operation takes it explicitly, which keeps queries plain data and
/// sidesteps back-reference lifetimes entirely.
#[derive(Debug)]
pub struct BoxQuery {
    pub logic_box: BoxN,
    pub field: Field,
    pub time: f64,
    pub mode: Mode,
    pub aborted: Aborted,
    pub start_resolution: i32,
    pub end_resolutions: Vec<i32>,
    end_resolution: i32,
    cur_resolution: i32,
    logic_samples: LogicSamples,
    pub buffer: Option<Array>,
    status: QueryStatus,
}

impl BoxQuery {
    pub fn new(logic_box: BoxN, field: Field, time: f64, mode: Mode, aborted: Aborted) -> Self {
        Self {
            logic_box,
            field,
            time,
            mode,
            aborted,
            start_resolution: 0,
            end_resolutions: Vec::new(),
            end_resolution: -1,
            cur_resolution: -1,
            logic_samples: LogicSamples::invalid(logic_box.pdim()),
            buffer: None,
            status: QueryStatus::Created,
        }
    }

    pub fn with_end_resolutions(mut self, end_resolutions: Vec<i32>) -> Self {
        self.end_resolutions = end_resolutions;
        self
    }

    pub fn with_start_resolution(mut self, start_resolution: i32) -> Self {
        self.start_resolution = start_resolution;
        self
    }

    pub fn status(&self) -> &QueryStatus {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == QueryStatus::Running
    }

    pub fn ok(&self) -> bool {
        self.status == QueryStatus::Ok
    }

    pub fn current_resolution(&self) -> i32 {
        self.cur_resolution
    }

    pub fn end_resolution(&self) -> i32 {
        self.end_resolution
    }

    /// The aligned lattice this query resolves at its current end
    /// resolution; meaningless before `begin_box_query`.
    pub fn logic_samples(&self) -> &LogicSamples {
        &self.logic_samples
    }

    pub(crate) fn set_running(&mut self) {
        self.status = QueryStatus::Running;
    }

    pub(crate) fn set_ok(&mut self) {
        self.status = QueryStatus::Ok;
    }

    /// Moves the query to `Failed`; terminal states stick.
    pub fn set_failed(&mut self, reason: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = QueryStatus::Failed(reason.into());
        }
    }

    pub(crate) fn set_logic_samples(&mut self, samples: LogicSamples, end_resolution: i32) {
        self.logic_samples = samples;
        self.end_resolution = end_resolution;
    }

    #[cfg(test)]
    pub(crate) fn set_current_resolution(&mut self, h: i32) {
        self.cur_resolution = h;
    }

    /// Records that a pass delivered resolution `h`. Executors (including
    /// out-of-crate ones like the remote box path) call this on success.
    pub fn advance_to(&mut self, h: i32) {
        debug_assert!(h > self.cur_resolution);
        self.cur_resolution = h;
    }

    /// Allocates the output buffer (row-major, default-filled) on first use
    /// and sanity-checks it on reuse. Write-mode callers use this to obtain
    /// the buffer they fill before executing.
    pub fn allocate_buffer_if_needed(&mut self) -> Result<(), QueryError> {
        let nsamples = self.logic_samples.nsamples();
        match &self.buffer {
            None => {
                self.buffer = Some(Array::filled(
                    nsamples,
                    self.field.dtype,
                    self.field.default_value,
                ));
                Ok(())
            }
            Some(buffer) => {
                if buffer.dims() != nsamples || buffer.dtype() != self.field.dtype {
                    return Err(QueryError::Internal(format!(
                        "buffer {:?} does not match query geometry {:?}",
                        buffer.dims(),
                        nsamples
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Aligns the query box to the lattice of samples resolved at
/// `end_resolution` (the union of levels up to it); fails (returning
/// `false`) when no such sample falls inside the box.
fn set_end_resolution(dataset: &Dataset, query: &mut BoxQuery, end_resolution: i32) -> bool {
    let user_box = query.logic_box.intersection(dataset.logic_box());
    let resolved = dataset.resolved_samples(end_resolution);
    let aligned = resolved.align_box(user_box);
    if !aligned.is_full_dim() {
        return false;
    }
    query.set_logic_samples(LogicSamples::new(aligned, resolved.delta), end_resolution);
    true
}

/// Validates a freshly created box query and arms it for its first pass.
pub fn begin_box_query(dataset: &Dataset, query: &mut BoxQuery) -> Result<(), QueryError> {
    if query.status != QueryStatus::Created {
        return Ok(());
    }

    let fail = |query: &mut BoxQuery, reason: &str| {
        query.set_failed(reason);
        Err(QueryError::InvalidArgument(reason.to_owned()))
    };

    if query.aborted.is_aborted() {
        query.set_failed("aborted");
        return Err(QueryError::Aborted);
    }
    if !query.field.valid() {
        return fail(query, "field not valid");
    }

    if let Some(time) = query.field.time_override() {
        query.time = time;
    }
    if !dataset.timesteps().contains(query.time) {
        return fail(query, "time not valid");
    }

    if !query.logic_box.is_full_dim()
        || !query.logic_box.strict_intersect(dataset.logic_box())
    {
        return fail(query, "query box does not intersect the dataset");
    }

    if query.end_resolutions.is_empty() {
        query.end_resolutions = vec![dataset.max_resolution()];
    }
    query.end_resolutions.sort_unstable();
    query.end_resolutions.dedup();
    if query
        .end_resolutions
        .iter()
        .any(|&h| h < 0 || h > dataset.max_resolution())
    {
        return fail(query, "end resolution out of range");
    }

    if query.start_resolution != 0
        && (query.end_resolutions.len() != 1
            || query.end_resolutions[0] != query.start_resolution)
    {
        return fail(
            query,
            "a non-zero start resolution requires a single equal end resolution",
        );
    }

    for i in 0..query.end_resolutions.len() {
        if set_end_resolution(dataset, query, query.end_resolutions[i]) {
            query.cur_resolution = query.start_resolution - 1;
            query.set_running();
            return Ok(());
        }
    }
    fail(query, "no end resolution selects any sample")
}

/// Runs one resolution pass: plans the block set, dispatches every block
/// through the access, merges completions, and advances the query's current
/// resolution. Block failures are absorbed; abortion fails the query.
pub async fn execute_box_query(
    dataset: &Dataset,
    access: &Arc<dyn BlockAccess>,
    query: &mut BoxQuery,
) -> Result<(), QueryError> {
    if !(query.is_running() && query.cur_resolution < query.end_resolution) {
        return Err(QueryError::InvalidArgument(
            "query is not running or already at its end resolution".to_owned(),
        ));
    }
    if query.aborted.is_aborted() {
        query.set_failed("aborted");
        return Err(QueryError::Aborted);
    }

    query.allocate_buffer_if_needed()?;

    let blocks = match collect_blocks(dataset, query) {
        Ok(blocks) => blocks,
        Err(err) => {
            query.set_failed(err.to_string());
            return Err(err);
        }
    };
    debug!(
        nblocks = blocks.len(),
        end_resolution = query.end_resolution,
        "executing box query pass"
    );

    let result = match query.mode {
        Mode::Read => execute_read_pass(dataset, access, query, &blocks).await,
        Mode::Write => execute_write_pass(dataset, access, query, &blocks).await,
    };
    match result {
        Ok(()) => {
            query.advance_to(query.end_resolution);
            Ok(())
        }
        Err(err) => {
            query.set_failed(err.to_string());
            Err(err)
        }
    }
}

async fn execute_read_pass(
    dataset: &Dataset,
    access: &Arc<dyn BlockAccess>,
    query: &mut BoxQuery,
    blocks: &[u64],
) -> Result<(), QueryError> {
    access.begin_read();
    let mut pending: FuturesUnordered<_> = blocks
        .iter()
        .map(|&blockid| {
            let block_query = BlockQuery::new(
                dataset,
                query.field.clone(),
                query.time,
                blockid,
                Mode::Read,
                query.aborted.clone(),
            );
            execute_block_query(access, block_query).join()
        })
        .collect();
    access.end_read();

    // Merge in completion order; regions are disjoint so order is moot.
    while let Some(mut block_query) = pending.next().await {
        if query.aborted.is_aborted() {
            return Err(QueryError::Aborted);
        }
        if !block_query.ok() {
            continue;
        }
        if let Err(err) = merge_box_with_block(dataset, query, &mut block_query) {
            warn!(blockid = block_query.blockid, %err, "merge failed, leaving default fill");
        }
    }

    if query.aborted.is_aborted() {
        return Err(QueryError::Aborted);
    }
    Ok(())
}

/// Write path: per block, read-modify-write so partial overlap never
/// clobbers samples of other levels sharing the block. Reads happen inline
/// (they feed the merge); the final writes overlap freely and are joined at
/// the end.
async fn execute_write_pass(
    dataset: &Dataset,
    access: &Arc<dyn BlockAccess>,
    query: &mut BoxQuery,
    blocks: &[u64],
) -> Result<(), QueryError> {
    if access.can_read() {
        access.begin_read();
    }
    access.begin_write();

    let mut writes = FuturesUnordered::new();
    for &blockid in blocks {
        if query.aborted.is_aborted() {
            break;
        }

        let mut block_query = BlockQuery::new(
            dataset,
            query.field.clone(),
            query.time,
            blockid,
            Mode::Write,
            query.aborted.clone(),
        );

        // Seed with the stored block when possible, else default fill.
        if access.can_read() {
            let read_query = BlockQuery::new(
                dataset,
                query.field.clone(),
                query.time,
                blockid,
                Mode::Read,
                query.aborted.clone(),
            );
            let done = execute_block_query(access, read_query).join().await;
            if done.ok() {
                block_query.buffer = done.buffer;
            }
        }
        block_query.allocate_buffer_if_needed();

        if let Err(err) = merge_box_with_block(dataset, query, &mut block_query) {
            warn!(blockid, %err, "write merge failed, skipping block");
            continue;
        }
        writes.push(execute_block_query(access, block_query).join());
    }

    if access.can_read() {
        access.end_read();
    }

    while let Some(done) = writes.next().await {
        if !done.ok() {
            warn!(blockid = done.blockid, status = ?done.status(), "block write failed");
        }
    }
    access.end_write();

    if query.aborted.is_aborted() {
        return Err(QueryError::Aborted);
    }
    Ok(())
}

/// Advances to the next target resolution, or completes the query when the
/// ladder is exhausted. Buffers are not carried across passes: each pass
/// re-reads every level up to its target.
pub fn next_box_query(dataset: &Dataset, query: &mut BoxQuery) -> Result<(), QueryError> {
    if !(query.is_running() && query.cur_resolution == query.end_resolution) {
        return Err(QueryError::InvalidArgument(
            "query is not running at a completed resolution".to_owned(),
        ));
    }

    if query.end_resolution == *query.end_resolutions.last().expect("non-empty") {
        query.set_ok();
        return Ok(());
    }

    let position = query
        .end_resolutions
        .iter()
        .position(|&h| h == query.end_resolution)
        .expect("current end resolution is in the ladder");
    let next = query.end_resolutions[position + 1];
    if !set_end_resolution(dataset, query, next) {
        query.set_failed("next end resolution selects no sample");
        return Err(QueryError::Internal(
            "next end resolution selects no sample".to_owned(),
        ));
    }

    // No cross-pass refinement: the buffer restarts from default fill and
    // the pass re-reads every level from scratch.
    query.cur_resolution = query.start_resolution - 1;
    query.buffer = None;
    Ok(())
}
