use std::sync::Arc;

use futures::{stream::FuturesUnordered, StreamExt};
use mipstore_dataset::TiledDataset;
use mipstore_geom::LogicSamples;
use tracing::{debug, warn};

use crate::{
    execute_block_query, insert_samples, BlockAccess, BlockQuery, BoxQuery, Mode, QueryError,
    QueryStatus,
};

fn set_end_resolution(dataset: &TiledDataset, query: &mut BoxQuery, value: i32) -> bool {
    let user_box = query.logic_box.intersection(dataset.logic_box());
    let level = dataset.level_samples(value);
    let aligned = level.align_box(user_box);
    if !aligned.is_full_dim() {
        return false;
    }
    query.set_logic_samples(LogicSamples::new(aligned, level.delta), value);
    true
}

/// Arms a box query against a tiled dataset. Target resolutions are rounded
/// to the even levels tiles exist at and clamped to `[bitsperblock, maxh]`;
/// writes are rejected.
pub fn begin_tiled_box_query(
    dataset: &TiledDataset,
    query: &mut BoxQuery,
) -> Result<(), QueryError> {
    if *query.status() != QueryStatus::Created {
        return Ok(());
    }

    let fail = |query: &mut BoxQuery, reason: &str| {
        query.set_failed(reason);
        Err(QueryError::InvalidArgument(reason.to_owned()))
    };

    if query.mode == Mode::Write {
        return fail(query, "tiled datasets are read-only");
    }
    if query.aborted.is_aborted() {
        query.set_failed("aborted");
        return Err(QueryError::Aborted);
    }
    if !query.logic_box.is_full_dim()
        || !query.logic_box.strict_intersect(dataset.logic_box())
    {
        return fail(query, "query box does not intersect the dataset");
    }
    if query.start_resolution != 0 {
        return fail(query, "tiled queries always start at resolution zero");
    }

    if query.end_resolutions.is_empty() {
        query.end_resolutions = vec![dataset.max_resolution()];
    }
    // Only even levels exist in a tile pyramid.
    for h in &mut query.end_resolutions {
        *h = ((*h >> 1) << 1).clamp(dataset.bits_per_block(), dataset.max_resolution());
    }
    query.end_resolutions.sort_unstable();
    query.end_resolutions.dedup();

    for i in 0..query.end_resolutions.len() {
        if set_end_resolution(dataset, query, query.end_resolutions[i]) {
            query.set_running();
            return Ok(());
        }
    }
    fail(query, "no end resolution selects any sample")
}

/// Runs one pass of a tiled box query: descends the tile quadtree to the
/// target level, fetches every overlapping tile, and pastes each one into
/// the buffer as it lands.
pub async fn execute_tiled_box_query(
    dataset: &TiledDataset,
    access: &Arc<dyn BlockAccess>,
    query: &mut BoxQuery,
) -> Result<(), QueryError> {
    if !(query.is_running() && query.current_resolution() < query.end_resolution()) {
        return Err(QueryError::InvalidArgument(
            "query is not running or already at its end resolution".to_owned(),
        ));
    }
    if query.aborted.is_aborted() {
        query.set_failed("aborted");
        return Err(QueryError::Aborted);
    }

    query.allocate_buffer_if_needed()?;

    let end_resolution = query.end_resolution();
    debug_assert!(end_resolution % 2 == 0);
    let bits_per_block = dataset.bits_per_block();
    let bitmask = dataset.bitmask();

    access.begin_read();
    let mut pending = FuturesUnordered::new();
    let mut stack = vec![(dataset.logic_box(), 1u64, bits_per_block)];
    while let Some((bounds, id, h)) = stack.pop() {
        if query.aborted.is_aborted() {
            break;
        }
        if !bounds.strict_intersect(query.logic_box) {
            continue;
        }

        if h == end_resolution {
            let block_query = BlockQuery::tiled(
                dataset,
                query.field.clone(),
                query.time,
                id - 1,
                Mode::Read,
                query.aborted.clone(),
            );
            pending.push(execute_block_query(access, block_query).join());
            continue;
        }

        let split_bit = bitmask.axis(1 + h - bits_per_block);
        let middle = (bounds.p1[split_bit] + bounds.p2[split_bit]) >> 1;
        let mut left = bounds;
        left.p2[split_bit] = middle;
        let mut right = bounds;
        right.p1[split_bit] = middle;

        stack.push((right, id * 2 + 1, h + 1));
        stack.push((left, id * 2, h + 1));
    }
    access.end_read();
    debug!(ntiles = pending.len(), end_resolution, "executing tiled pass");

    while let Some(block_query) = pending.next().await {
        if query.aborted.is_aborted() {
            break;
        }
        if !block_query.ok() {
            continue;
        }
        let Some(tile) = block_query.buffer.as_ref() else {
            continue;
        };
        let qsamples = *query.logic_samples();
        let aborted = query.aborted.clone();
        let buffer = query.buffer.as_mut().expect("allocated above");
        if let Err(err) = insert_samples(
            &qsamples,
            buffer,
            &block_query.logic_samples,
            tile,
            &aborted,
        ) {
            warn!(blockid = block_query.blockid, %err, "tile merge failed");
        }
    }

    if query.aborted.is_aborted() {
        query.set_failed("aborted");
        return Err(QueryError::Aborted);
    }
    query.advance_to(end_resolution);
    Ok(())
}

/// Advances to the next even target resolution, or completes the query.
pub fn next_tiled_box_query(
    dataset: &TiledDataset,
    query: &mut BoxQuery,
) -> Result<(), QueryError> {
    if !(query.is_running() && query.current_resolution() == query.end_resolution()) {
        return Err(QueryError::InvalidArgument(
            "query is not running at a completed resolution".to_owned(),
        ));
    }

    if query.end_resolution() == *query.end_resolutions.last().expect("non-empty") {
        query.set_ok();
        return Ok(());
    }

    let position = query
        .end_resolutions
        .iter()
        .position(|&h| h == query.end_resolution())
        .expect("current end resolution is in the ladder");
    let next = query.end_resolutions[position + 1];
    if !set_end_resolution(dataset, query, next) {
        query.set_failed("next end resolution selects no sample");
        return Err(QueryError::Internal(
            "next end resolution selects no sample".to_owned(),
        ));
    }

    // Tiles at the finer level carry all the data; start the buffer over.
    query.buffer = None;
    Ok(())
}
