use mipstore_geom::{HzOrder, PointN};

/// Per-level step table for the HZ ⇄ row-major conversion kernel.
///
/// Within one resolution level, consecutive hz addresses walk a smaller HZ
/// curve over the bitmask prefix `[1, h-1]`. This table caches the point
/// delta between each pair of consecutive addresses of that curve (unscaled;
/// the kernel shifts by the level delta), so the hot loop advances through a
/// block with one table lookup per sample instead of a deinterleave.
#[derive(Debug)]
pub struct LevelSteps {
    deltas: Vec<PointN>,
}

/// Default table depth: `2^10` cached steps per level.
pub(crate) const DEFAULT_STEP_BITS: u32 = 10;

impl LevelSteps {
    pub fn new(hz: &HzOrder, h: i32, step_bits: u32) -> Self {
        // The within-level curve spans h-1 splits.
        let prefix = (h - 1).max(0);
        let bits = step_bits.min(prefix as u32);
        let num = 1usize << bits;

        let mut deltas = Vec::with_capacity(num);
        let mut cur = hz.deinterleave_prefix(0, prefix);
        for z in 1..num as u64 {
            let next = hz.deinterleave_prefix(z, prefix);
            deltas.push(next - cur);
            cur = next;
        }
        // Terminal entry, never applied.
        deltas.push(PointN::zero(cur.pdim()));

        Self { deltas }
    }

    /// Number of samples the kernel may copy in one cached run.
    pub fn num(&self) -> usize {
        self.deltas.len()
    }

    pub fn deltas(&self) -> &[PointN] {
        &self.deltas
    }
}

/// Per-axis hz lookup tables for point queries.
///
/// For a coordinate value `v` on axis `d`, `loc[d][v]` holds that
/// coordinate's contribution to the interleaved z address and the hz
/// downshift it implies. A point's hz address is then three ORs and one
/// shift instead of a full interleave. Built for 3D datasets only; 2D point
/// queries take the direct conversion path.
#[derive(Debug)]
pub struct PointTables {
    loc: Vec<Vec<(u64, u32)>>,
}

impl PointTables {
    pub fn new(hz: &HzOrder, pow2_dims: PointN) -> Self {
        let pdim = pow2_dims.pdim();
        let top = 1u64 << hz.max_resolution();

        let mut loc = Vec::with_capacity(pdim);
        for d in 0..pdim {
            let mut axis = Vec::with_capacity(pow2_dims[d] as usize);
            for v in 0..pow2_dims[d] {
                let z = hz.interleave(PointN::zero(pdim).with(d, v));
                axis.push((z, (z | top).trailing_zeros() + 1));
            }
            loc.push(axis);
        }
        Self { loc }
    }

    pub fn axis(&self, d: usize) -> &[(u64, u32)] {
        &self.loc[d]
    }

    /// hz address of a point via the tables.
    pub fn point_to_hz(&self, p: PointN, maxh: i32) -> u64 {
        let top = 1u64 << maxh;
        let mut z = 0u64;
        let mut shift = u32::MAX;
        for d in 0..p.pdim() {
            let (zpart, s) = self.loc[d][p[d] as usize];
            z |= zpart;
            shift = shift.min(s);
        }
        (z | top) >> shift
    }
}
