use crate::{Bitmask, BoxN, LogicSamples, PointN, MAX_POINT_DIM};

/// The HZ space-filling curve of a [`Bitmask`].
///
/// Samples are addressed two ways: the *z* address bit-interleaves the point
/// coordinates following the mask's split schedule, and the *hz* address
/// re-packs z so that all samples of one resolution level are contiguous.
/// Level `H` owns the addresses whose most significant set bit sits at
/// position `H - 1` (level 0 owns address 0 alone), so coarse levels come
/// first and each level `H >= 1` holds `2^(H-1)` samples.
#[derive(Clone, Debug)]
pub struct HzOrder {
    bitmask: Bitmask,
}

impl HzOrder {
    pub fn new(bitmask: &Bitmask) -> Self {
        Self {
            bitmask: bitmask.clone(),
        }
    }

    pub fn max_resolution(&self) -> i32 {
        self.bitmask.max_resolution()
    }

    /// Bit-interleaves a point of the pow-2 box into its z address.
    /// The finest level contributes the lowest z bit.
    pub fn interleave(&self, p: PointN) -> u64 {
        let maxh = self.max_resolution();
        let mut z = 0u64;
        let mut shift = [0u32; MAX_POINT_DIM];
        for n in (1..=maxh).rev() {
            let axis = self.bitmask.axis(n);
            z |= (((p[axis] >> shift[axis]) & 1) as u64) << (maxh - n);
            shift[axis] += 1;
        }
        z
    }

    /// Inverse of [`HzOrder::interleave`].
    pub fn deinterleave(&self, z: u64) -> PointN {
        self.deinterleave_prefix(z, self.max_resolution())
    }

    /// Deinterleaves a z address of the curve truncated to its first
    /// `levels` splits. Used by the per-level step tables and by tiled
    /// datasets to turn a within-level index back into coordinates.
    pub fn deinterleave_prefix(&self, z: u64, levels: i32) -> PointN {
        let mut p = PointN::zero(self.bitmask.pdim());
        let mut shift = [0u32; MAX_POINT_DIM];
        for n in (1..=levels).rev() {
            let axis = self.bitmask.axis(n);
            p[axis] |= (((z >> (levels - n)) & 1) as i64) << shift[axis];
            shift[axis] += 1;
        }
        p
    }

    /// Maps a lattice point of the pow-2 box to its hz address.
    pub fn point_to_hz(&self, p: PointN) -> u64 {
        let top = 1u64 << self.max_resolution();
        let t = self.interleave(p) | top;
        t >> (t.trailing_zeros() + 1)
    }

    /// Inverse of [`HzOrder::point_to_hz`].
    pub fn hz_to_point(&self, hz: u64) -> PointN {
        if hz == 0 {
            return PointN::zero(self.bitmask.pdim());
        }
        let maxh = self.max_resolution() as u32;
        let h = Self::address_resolution(hz) as u32;
        let tz = maxh - h;
        let z = ((hz << (tz + 1)) | (1u64 << tz)) & !(1u64 << maxh);
        self.deinterleave(z)
    }

    /// Resolution level owning an hz address.
    pub fn address_resolution(hz: u64) -> i32 {
        if hz == 0 {
            0
        } else {
            (64 - hz.leading_zeros()) as i32
        }
    }

    /// Sample spacing of level `h` (levels 0 and 1 both span the whole box).
    pub fn level_delta(&self, h: i32) -> PointN {
        let maxh = self.max_resolution();
        let mut delta = PointN::one(self.bitmask.pdim());
        for d in 0..self.bitmask.pdim() {
            delta[d] = 1i64 << self.bitmask.count_axis(d, h.max(1), maxh);
        }
        delta
    }

    /// Sample spacing of the union lattice of levels `0..=h`: every sample
    /// resolved once level `h` has been read.
    pub fn union_delta(&self, h: i32) -> PointN {
        let maxh = self.max_resolution();
        let mut delta = PointN::one(self.bitmask.pdim());
        for d in 0..self.bitmask.pdim() {
            delta[d] = 1i64 << self.bitmask.count_axis(d, h + 1, maxh);
        }
        delta
    }

    /// Per-axis coordinate mask that snaps a full-resolution point down to
    /// the nearest sample resolved at resolution `h`.
    pub fn resolution_mask(&self, h: i32) -> PointN {
        let delta = self.union_delta(h);
        let mut mask = PointN::zero(self.bitmask.pdim());
        for d in 0..self.bitmask.pdim() {
            mask[d] = !(delta[d] - 1);
        }
        mask
    }

    /// Lattice of all samples belonging to level `h`.
    ///
    /// Level 0 is the single sample at the origin. Each level `h >= 1` is
    /// offset by half its delta along its split axis: those are exactly the
    /// points new to that level.
    pub fn level_samples(&self, h: i32) -> LogicSamples {
        let pow2 = self.bitmask.pow2_dims();
        if h == 0 {
            return LogicSamples::new(BoxN::from_dims(pow2), pow2);
        }
        let delta = self.level_delta(h);
        let axis = self.bitmask.axis(h);
        let origin = PointN::zero(self.bitmask.pdim()).with(axis, delta[axis] >> 1);
        LogicSamples::new(BoxN::new(origin, origin + pow2), delta)
    }

    /// First hz address of level `h`.
    pub fn level_first_hz(h: i32) -> u64 {
        if h == 0 {
            0
        } else {
            1u64 << (h - 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn order(mask: &str) -> HzOrder {
        HzOrder::new(&mask.parse::<Bitmask>().unwrap())
    }

    #[test]
    fn test_level_layout_v0101() {
        let hz = order("V0101");
        // Coarse-to-fine walk of the first addresses.
        assert_eq!(hz.hz_to_point(0), PointN::xy(0, 0));
        assert_eq!(hz.hz_to_point(1), PointN::xy(2, 0));
        assert_eq!(hz.hz_to_point(2), PointN::xy(0, 2));
        assert_eq!(hz.hz_to_point(3), PointN::xy(2, 2));
        assert_eq!(hz.hz_to_point(4), PointN::xy(1, 0));
        assert_eq!(HzOrder::address_resolution(0), 0);
        assert_eq!(HzOrder::address_resolution(1), 1);
        assert_eq!(HzOrder::address_resolution(3), 2);
        assert_eq!(HzOrder::address_resolution(4), 3);
    }

    #[test]
    fn test_roundtrip_all_points_v0101() {
        let hz = order("V0101");
        let mut seen = vec![false; 16];
        for x in 0..4 {
            for y in 0..4 {
                let p = PointN::xy(x, y);
                let addr = hz.point_to_hz(p);
                assert_eq!(hz.hz_to_point(addr), p, "hz {addr}");
                assert!(!seen[addr as usize], "duplicate address {addr}");
                seen[addr as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_level_samples_population() {
        let hz = order("V010011");
        let maxh = hz.max_resolution();
        for h in 0..=maxh {
            let samples = hz.level_samples(h);
            let expect = if h == 0 { 1 } else { 1i64 << (h - 1) };
            assert_eq!(samples.nsamples().inner_product(), expect, "level {h}");

            // Every address of the level deinterleaves into the level lattice.
            let lo = HzOrder::level_first_hz(h);
            let hi = if h == 0 { 1 } else { 1u64 << h };
            for addr in lo..hi {
                let p = hz.hz_to_point(addr);
                assert!(samples.logic_box.contains_point(p), "level {h} addr {addr}");
                assert_eq!(
                    samples.logic_to_pixel(p).left_shift(samples.shift) + samples.logic_box.p1,
                    p
                );
            }
        }
    }

    #[test]
    fn test_resolution_mask_snaps_down() {
        let hz = order("V0101");
        // After level 2 the resolved lattice is delta (2, 2).
        assert_eq!(hz.union_delta(2), PointN::xy(2, 2));
        let mask = hz.resolution_mask(2);
        let snapped = PointN::xy(3 & mask[0], 1 & mask[1]);
        assert_eq!(snapped, PointN::xy(2, 0));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_random_masks(raw in proptest::collection::vec(0usize..3, 1..14), seed in any::<u64>()) {
            let mask: String = std::iter::once('V')
                .chain(raw.iter().map(|&a| char::from_digit(a as u32, 10).unwrap()))
                .collect();
            let bitmask: Bitmask = mask.parse().unwrap();
            let hz = HzOrder::new(&bitmask);
            let dims = bitmask.pow2_dims();

            // A deterministic pseudo-random point inside the pow-2 box.
            let mut p = PointN::zero(bitmask.pdim());
            let mut state = seed;
            for d in 0..bitmask.pdim() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                p[d] = (state % dims[d] as u64) as i64;
            }

            prop_assert_eq!(hz.hz_to_point(hz.point_to_hz(p)), p);
            prop_assert_eq!(hz.deinterleave(hz.interleave(p)), p);
        }
    }
}
