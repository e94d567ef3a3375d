use bytemuck::Pod;
use mipstore_array::Layout;
use mipstore_dataset::Dataset;
use mipstore_geom::{BoxN, LogicSamples};

use crate::{insert_samples, Aborted, BlockQuery, BoxQuery, Mode, QueryError};

/// Copies samples between a completed block and the box query buffer.
///
/// Row-major blocks go through the generic lattice merge; hz-laid-out
/// blocks through the curve walk below. Reads pull block samples into the
/// query buffer, writes push query samples into the block buffer.
pub(crate) fn merge_box_with_block(
    dataset: &Dataset,
    query: &mut BoxQuery,
    block: &mut BlockQuery,
) -> Result<bool, QueryError> {
    query.allocate_buffer_if_needed()?;

    let layout = match &block.buffer {
        Some(buffer) => buffer.layout(),
        None => {
            return Err(QueryError::Internal(format!(
                "merging block {} without a buffer",
                block.blockid
            )))
        }
    };

    match layout {
        Layout::RowMajor => {
            let qsamples = *query.logic_samples();
            let bsamples = block.logic_samples;
            let aborted = query.aborted.clone();
            match query.mode {
                Mode::Read => insert_samples(
                    &qsamples,
                    query.buffer.as_mut().expect("allocated above"),
                    &bsamples,
                    block.buffer.as_ref().expect("checked above"),
                    &aborted,
                ),
                Mode::Write => insert_samples(
                    &bsamples,
                    block.buffer.as_mut().expect("checked above"),
                    &qsamples,
                    query.buffer.as_ref().expect("allocated above"),
                    &aborted,
                ),
            }
        }
        Layout::Hz => merge_hz(dataset, query, block),
    }
}

struct WalkCtx<'a> {
    dataset: &'a Dataset,
    qsamples: LogicSamples,
    aborted: Aborted,
    hstart: i32,
    hend: i32,
    hz_from: u64,
    samples_per_block: usize,
    block_box: BoxN,
}

/// hz-layout merge: walks the curve inside the block level by level and
/// copies each run of lattice points contained in the query box.
fn merge_hz(
    dataset: &Dataset,
    query: &mut BoxQuery,
    block: &mut BlockQuery,
) -> Result<bool, QueryError> {
    let dtype = query.field.dtype;
    {
        let buffer = block.buffer.as_ref().expect("caller checked");
        if buffer.dtype() != dtype {
            return Err(QueryError::Internal(format!(
                "block {} dtype {:?} does not match field {:?}",
                block.blockid,
                buffer.dtype(),
                dtype
            )));
        }
        if buffer.nsamples() as u64 != 1u64 << block.bits_per_block {
            return Err(QueryError::Internal(format!(
                "hz block {} holds {} samples",
                block.blockid,
                buffer.nsamples()
            )));
        }
    }
    if !block.logic_samples.valid() {
        return Err(QueryError::Internal("block logic samples invalid".into()));
    }

    let (hz_from, _) = block.address_range();
    let ctx = WalkCtx {
        dataset,
        qsamples: *query.logic_samples(),
        aborted: query.aborted.clone(),
        hstart: (query.current_resolution() + 1).max(if block.blockid == 0 { 0 } else { block.h }),
        hend: query.end_resolution().min(block.h),
        hz_from,
        samples_per_block: 1usize << block.bits_per_block,
        block_box: block.logic_samples.logic_box,
    };
    // Any block past block 0 lives inside exactly one level.
    debug_assert!(ctx.hz_from == 0 || ctx.hstart == ctx.hend);

    let dst_is_hz = query.mode == Mode::Write;
    let (dst, src) = if dst_is_hz {
        (
            block.buffer.as_mut().expect("caller checked"),
            query.buffer.as_ref().expect("allocated above"),
        )
    } else {
        (
            query.buffer.as_mut().expect("allocated above"),
            block.buffer.as_ref().expect("caller checked"),
        )
    };

    let size = dtype.sample_bytes();
    let dst_bytes = dst.as_bytes_mut();
    let src_bytes = src.as_bytes();

    // Word-sized views when the allocation allows it; otherwise samples move
    // as byte chunks.
    let attempted = match size {
        1 => typed_walk::<u8>(&ctx, &mut *dst_bytes, src_bytes, dst_is_hz),
        2 => typed_walk::<u16>(&ctx, &mut *dst_bytes, src_bytes, dst_is_hz),
        4 => typed_walk::<u32>(&ctx, &mut *dst_bytes, src_bytes, dst_is_hz),
        8 => typed_walk::<u64>(&ctx, &mut *dst_bytes, src_bytes, dst_is_hz),
        16 => typed_walk::<u128>(&ctx, &mut *dst_bytes, src_bytes, dst_is_hz),
        _ => None,
    };
    if let Some(result) = attempted {
        return result;
    }
    walk(
        &ctx,
        &mut Bytes {
            dst: dst_bytes,
            src: src_bytes,
            size,
            dst_is_hz,
        },
    )
}

fn typed_walk<T: Pod>(
    ctx: &WalkCtx<'_>,
    dst: &mut [u8],
    src: &[u8],
    dst_is_hz: bool,
) -> Option<Result<bool, QueryError>> {
    let dst = bytemuck::try_cast_slice_mut::<u8, T>(dst).ok()?;
    let src = bytemuck::try_cast_slice::<u8, T>(src).ok()?;
    Some(walk(ctx, &mut Typed { dst, src, dst_is_hz }))
}

/// Moves one sample per call; monomorphized per sample width so the hot
/// loop is a plain indexed store.
trait SampleCopier {
    /// `hz_index` addresses the hz-side buffer, `box_index` the row-major
    /// query buffer; which one is the destination is fixed per query mode.
    fn copy(&mut self, hz_index: usize, box_index: usize);
}

struct Typed<'a, T> {
    dst: &'a mut [T],
    src: &'a [T],
    dst_is_hz: bool,
}

impl<T: Pod> SampleCopier for Typed<'_, T> {
    #[inline]
    fn copy(&mut self, hz_index: usize, box_index: usize) {
        if self.dst_is_hz {
            self.dst[hz_index] = self.src[box_index];
        } else {
            self.dst[box_index] = self.src[hz_index];
        }
    }
}

/// Fallback for sample widths without a machine-word view (e.g. `uint8[3]`).
struct Bytes<'a> {
    dst: &'a mut [u8],
    src: &'a [u8],
    size: usize,
    dst_is_hz: bool,
}

impl SampleCopier for Bytes<'_> {
    #[inline]
    fn copy(&mut self, hz_index: usize, box_index: usize) {
        let (d, s) = if self.dst_is_hz {
            (hz_index, box_index)
        } else {
            (box_index, hz_index)
        };
        self.dst[d * self.size..(d + 1) * self.size]
            .copy_from_slice(&self.src[s * self.size..(s + 1) * self.size]);
    }
}

fn walk<C: SampleCopier>(ctx: &WalkCtx<'_>, copier: &mut C) -> Result<bool, QueryError> {
    let dataset = ctx.dataset;
    let hzorder = dataset.hzorder();
    let bitmask = dataset.bitmask();
    let bits_per_block = dataset.bits_per_block();

    let query_box = ctx.qsamples.logic_box;
    let query_p1 = query_box.p1;
    let stride = ctx.qsamples.nsamples().stride();
    let qshift = ctx.qsamples.shift;
    let pdim = query_box.pdim();

    let mut used = 0usize;

    for h in ctx.hstart..=ctx.hend {
        if ctx.aborted.is_aborted() {
            return Err(QueryError::Aborted);
        }

        let level = dataset.level_samples(h);
        let lshift = level.shift;

        // Block 0 walks each whole level; other blocks walk their own box.
        let zbox = if ctx.hz_from != 0 {
            ctx.block_box
        } else {
            level.logic_box
        };
        let mut hz_addr = hzorder.point_to_hz(zbox.p1);

        let target = level.align_box(query_box.intersection(zbox));
        if !target.is_full_dim() {
            continue;
        }

        let steps = dataset.hz_steps(h);
        let deltas = steps.deltas();
        let cachable = steps.num().min(ctx.samples_per_block);

        // Pixel step per unscaled curve delta: level units down to buffer
        // units.
        let shift = lshift - qshift;

        let mut stack: Vec<(i32, BoxN)> = Vec::with_capacity(64);
        stack.push((if h > 0 { (h - bits_per_block).max(1) } else { 0 }, zbox));

        while let Some((item_h, item_box)) = stack.pop() {
            if ctx.aborted.is_aborted() {
                return Err(QueryError::Aborted);
            }

            if !item_box.strict_intersect(target) {
                hz_addr += 1u64 << (h - item_h);
                continue;
            }

            let numpoints = 1u64 << (h - item_h);
            if numpoints as usize <= cachable && target.contains_box(item_box) {
                // A full run: every sample of this subtree lands in the
                // query box, so stream it with the cached step deltas.
                let mut hz_index = (hz_addr - ctx.hz_from) as usize;
                let n = numpoints as usize;
                let mut from = stride.dot((item_box.p1 - query_p1).right_shift(qshift));
                used += 1;

                match pdim {
                    2 => {
                        let (s0, s1) = (stride[0], stride[1]);
                        let (h0, h1) = (shift[0], shift[1]);
                        for cc in &deltas[..n] {
                            copier.copy(hz_index, from as usize);
                            from += s0 * (cc[0] << h0) + s1 * (cc[1] << h1);
                            hz_index += 1;
                        }
                    }
                    3 => {
                        let (s0, s1, s2) = (stride[0], stride[1], stride[2]);
                        let (h0, h1, h2) = (shift[0], shift[1], shift[2]);
                        for cc in &deltas[..n] {
                            copier.copy(hz_index, from as usize);
                            from +=
                                s0 * (cc[0] << h0) + s1 * (cc[1] << h1) + s2 * (cc[2] << h2);
                            hz_index += 1;
                        }
                    }
                    _ => {
                        for cc in &deltas[..n] {
                            copier.copy(hz_index, from as usize);
                            for d in 0..pdim {
                                from += stride[d] * (cc[d] << shift[d]);
                            }
                            hz_index += 1;
                        }
                    }
                }

                hz_addr += numpoints;
                continue;
            }

            // kd split along this depth's axis.
            let bit = bitmask.axis(item_h);
            let delta = dataset.kd_split_delta(item_h);

            let mut upper = item_box;
            upper.p1[bit] += delta;
            stack.push((item_h + 1, upper));

            let mut lower = item_box;
            lower.p2[bit] -= delta;
            stack.push((item_h + 1, lower));
        }
    }

    Ok(used > 0)
}
