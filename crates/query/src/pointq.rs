use std::{collections::BTreeMap, sync::Arc};

use futures::{stream::FuturesUnordered, StreamExt};
use mipstore_array::{Array, Layout};
use mipstore_dataset::{Dataset, Field};
use mipstore_geom::PointN;
use tracing::debug;

use crate::{
    execute_block_query, Aborted, BlockAccess, BlockQuery, Mode, QueryError, QueryStatus,
};

/// A read of arbitrary sample positions at one target resolution.
///
/// Positions are full-resolution logic coordinates; each is snapped down to
/// the nearest sample resolved at `end_resolution`, grouped by owning block,
/// and gathered as the blocks complete. Out-of-bounds positions keep the
/// field's default value. Point queries are read-only.
#[derive(Debug)]
pub struct PointQuery {
    pub points: Vec<PointN>,
    pub field: Field,
    pub time: f64,
    pub aborted: Aborted,
    pub end_resolution: i32,
    pub buffer: Option<Array>,
    status: QueryStatus,
}

impl PointQuery {
    pub fn new(
        points: Vec<PointN>,
        field: Field,
        time: f64,
        end_resolution: i32,
        aborted: Aborted,
    ) -> Self {
        Self {
            points,
            field,
            time,
            aborted,
            end_resolution,
            buffer: None,
            status: QueryStatus::Created,
        }
    }

    pub fn status(&self) -> &QueryStatus {
        &self.status
    }

    pub fn ok(&self) -> bool {
        self.status == QueryStatus::Ok
    }
}

/// Executes a point query in one pass.
///
/// The 3D fast path converts positions through the dataset's per-axis
/// tables; everything else goes through the direct interleave. Block
/// failures leave their points at default fill, like box queries.
pub async fn execute_point_query(
    dataset: &Dataset,
    access: &Arc<dyn BlockAccess>,
    query: &mut PointQuery,
) -> Result<(), QueryError> {
    if query.status.is_terminal() {
        return Err(QueryError::InvalidArgument("query already finished".to_owned()));
    }
    if query.aborted.is_aborted() {
        query.status = QueryStatus::Failed("aborted".to_owned());
        return Err(QueryError::Aborted);
    }
    let maxh = dataset.max_resolution();
    if query.end_resolution < 0 || query.end_resolution > maxh {
        let reason = "end resolution out of range";
        query.status = QueryStatus::Failed(reason.to_owned());
        return Err(QueryError::InvalidArgument(reason.to_owned()));
    }
    if let Some(time) = query.field.time_override() {
        query.time = time;
    }
    query.status = QueryStatus::Running;

    let npoints = PointN::from_slice(&[query.points.len() as i64]);
    let mut buffer = Array::filled(npoints, query.field.dtype, query.field.default_value);

    let hzorder = dataset.hzorder();
    let bounds = dataset.logic_box();
    let depth_mask = hzorder.resolution_mask(query.end_resolution);
    let bits_per_block = dataset.bits_per_block();
    let samples_per_block = dataset.samples_per_block();
    let pdim = dataset.pdim();
    let tables = dataset.point_tables();

    // blockid -> [(point index, offset of the sample within the block)]
    let mut blocks: BTreeMap<u64, Vec<(usize, usize)>> = BTreeMap::new();
    for (n, &point) in query.points.iter().enumerate() {
        if query.aborted.is_aborted() {
            query.status = QueryStatus::Failed("aborted".to_owned());
            return Err(QueryError::Aborted);
        }
        if !bounds.contains_point(point) {
            continue;
        }

        let mut snapped = point;
        for d in 0..pdim {
            snapped[d] &= depth_mask[d];
        }
        let hz = match tables {
            Some(tables) => tables.point_to_hz(snapped, maxh),
            None => hzorder.point_to_hz(snapped),
        };
        blocks
            .entry(hz >> bits_per_block)
            .or_default()
            .push((n, (hz % samples_per_block) as usize));
    }
    debug!(
        npoints = query.points.len(),
        nblocks = blocks.len(),
        "executing point query"
    );

    access.begin_read();
    let mut pending: FuturesUnordered<_> = blocks
        .into_iter()
        .map(|(blockid, offsets)| {
            let block_query = BlockQuery::new(
                dataset,
                query.field.clone(),
                query.time,
                blockid,
                Mode::Read,
                query.aborted.clone(),
            );
            let handle = execute_block_query(access, block_query);
            async move { (handle.join().await, offsets) }
        })
        .collect();
    access.end_read();

    while let Some((block_query, offsets)) = pending.next().await {
        if query.aborted.is_aborted() {
            query.status = QueryStatus::Failed("aborted".to_owned());
            return Err(QueryError::Aborted);
        }
        if !block_query.ok() {
            continue;
        }
        if let Err(err) = gather(&mut buffer, &query.points, &depth_mask, &block_query, &offsets) {
            debug!(blockid = block_query.blockid, %err, "point gather failed");
        }
    }

    query.buffer = Some(buffer);
    query.status = QueryStatus::Ok;
    Ok(())
}

/// Scatters one completed block into the point buffer.
fn gather(
    buffer: &mut Array,
    points: &[PointN],
    depth_mask: &PointN,
    block_query: &BlockQuery,
    offsets: &[(usize, usize)],
) -> Result<(), QueryError> {
    let block_buffer = block_query
        .buffer
        .as_ref()
        .ok_or_else(|| QueryError::Internal("completed block without buffer".to_owned()))?;
    let sample = buffer.sample_size();
    if block_buffer.sample_size() != sample {
        return Err(QueryError::Internal("block dtype mismatch".to_owned()));
    }

    match block_buffer.layout() {
        // hz layout: the precomputed within-block offset is the sample index.
        Layout::Hz => {
            for &(n, offset) in offsets {
                let src = block_buffer.sample(offset);
                buffer.set_sample(n, src);
            }
        }
        // Row-major block: recompute the pixel position from the point.
        Layout::RowMajor => {
            let samples = &block_query.logic_samples;
            let stride = block_buffer.dims().stride();
            let pdim = samples.pdim();
            for &(n, _) in offsets {
                let mut snapped = points[n];
                for d in 0..pdim {
                    snapped[d] &= depth_mask[d];
                }
                let pixel = samples.logic_to_pixel(snapped);
                let index = stride.dot(pixel) as usize;
                let src = block_buffer.sample(index);
                buffer.set_sample(n, src);
            }
        }
    }
    Ok(())
}
