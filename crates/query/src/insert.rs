use mipstore_array::Array;
use mipstore_geom::{align_right, is_aligned, lcm, LogicSamples, PointN};

use crate::{Aborted, QueryError};

/// Copies every sample two row-major lattices have in common from `rbuffer`
/// into `wbuffer`.
///
/// The lattices may disagree in origin and spacing: per axis the merge walks
/// with `lcm(wdelta, rdelta)` starting at the first coordinate congruent to
/// both origins. If the intersection holds no such coordinate (possible
/// within one lcm period) there is nothing to merge and `Ok(false)` comes
/// back. The actual copy is a clipped strided walk, contiguous when both
/// inner strides collapse to one.
pub fn insert_samples(
    wsamples: &LogicSamples,
    wbuffer: &mut Array,
    rsamples: &LogicSamples,
    rbuffer: &Array,
    aborted: &Aborted,
) -> Result<bool, QueryError> {
    if !wsamples.logic_box.is_full_dim() || !rsamples.logic_box.is_full_dim() {
        return Ok(false);
    }
    if wbuffer.dtype() != rbuffer.dtype()
        || wbuffer.dims() != wsamples.nsamples()
        || rbuffer.dims() != rsamples.nsamples()
    {
        return Err(QueryError::Internal(
            "insert_samples: buffers disagree with their lattices".to_owned(),
        ));
    }

    let pdim = wsamples.pdim();
    let mut bounds = wsamples.logic_box.intersection(rsamples.logic_box);
    if !bounds.is_full_dim() {
        return Ok(false);
    }

    // Per axis: find the first coordinate aligned to both lattices and the
    // combined step. Alternately aligning right to each lattice converges
    // within one lcm period or proves there is no common sample.
    let mut delta = PointN::zero(pdim);
    for d in 0..pdim {
        let step = lcm(rsamples.delta[d], wsamples.delta[d]);
        let mut p1 = bounds.p1[d];
        let p2 = bounds.p2[d];

        while !is_aligned(p1, wsamples.logic_box.p1[d], wsamples.delta[d])
            || !is_aligned(p1, rsamples.logic_box.p1[d], rsamples.delta[d])
        {
            p1 = align_right(p1, wsamples.logic_box.p1[d], wsamples.delta[d]);
            p1 = align_right(p1, rsamples.logic_box.p1[d], rsamples.delta[d]);

            if p1 >= p2 {
                return Ok(false);
            }
            if p1 - bounds.p1[d] >= step {
                return Ok(false);
            }
        }

        delta[d] = step;
        bounds.p1[d] = p1;
        bounds.p2[d] = align_right(p2, p1, step);
    }

    let wfrom = wsamples.logic_to_pixel(bounds.p1);
    let rfrom = rsamples.logic_to_pixel(bounds.p1);
    let mut wstep = PointN::zero(pdim);
    let mut rstep = PointN::zero(pdim);
    for d in 0..pdim {
        wstep[d] = delta[d] / wsamples.delta[d];
        rstep[d] = delta[d] / rsamples.delta[d];
    }

    // Sample count per axis, clipped to what both buffers can hold.
    let mut counts = PointN::zero(pdim);
    for d in 0..pdim {
        let n = (bounds.p2[d] - bounds.p1[d]) / delta[d];
        let wmax = (wbuffer.dims()[d] - wfrom[d] + wstep[d] - 1) / wstep[d];
        let rmax = (rbuffer.dims()[d] - rfrom[d] + rstep[d] - 1) / rstep[d];
        counts[d] = n.min(wmax).min(rmax);
        if counts[d] <= 0 {
            return Ok(false);
        }
    }

    let sample = wbuffer.sample_size();
    let wstride = wbuffer.dims().stride();
    let rstride = rbuffer.dims().stride();
    let contiguous = wstep[0] == 1 && rstep[0] == 1;

    let inner = counts[0];
    let rows: i64 = (1..pdim).map(|d| counts[d]).product();
    let mut index = [0i64; mipstore_geom::MAX_POINT_DIM];

    let wbytes = wbuffer.as_bytes_mut();
    let rbytes = rbuffer.as_bytes();

    for _ in 0..rows {
        if aborted.is_aborted() {
            return Err(QueryError::Aborted);
        }

        let mut wrow = wfrom[0] * wstride[0];
        let mut rrow = rfrom[0] * rstride[0];
        for d in 1..pdim {
            wrow += (wfrom[d] + index[d] * wstep[d]) * wstride[d];
            rrow += (rfrom[d] + index[d] * rstep[d]) * rstride[d];
        }

        if contiguous {
            let w = wrow as usize * sample;
            let r = rrow as usize * sample;
            let len = inner as usize * sample;
            wbytes[w..w + len].copy_from_slice(&rbytes[r..r + len]);
        } else {
            for k in 0..inner {
                let w = (wrow + k * wstep[0]) as usize * sample;
                let r = (rrow + k * rstep[0]) as usize * sample;
                wbytes[w..w + sample].copy_from_slice(&rbytes[r..r + sample]);
            }
        }

        for d in 1..pdim {
            index[d] += 1;
            if index[d] < counts[d] {
                break;
            }
            index[d] = 0;
        }
    }

    Ok(true)
}
