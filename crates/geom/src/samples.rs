use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{align_right, BoxN, PointN};

/// A regular axis-aligned lattice inside a box.
///
/// Describes exactly the integer points `logic_box.p1 + k * delta` that fall
/// inside `logic_box`. Every lattice the hz machinery produces has
/// power-of-two deltas (`valid()`); the generic sample merge also accepts
/// arbitrary positive spacings, for which `shift` is meaningless and the
/// divide-based accessors must be used.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicSamples {
    pub logic_box: BoxN,
    pub delta: PointN,
    /// `log2(delta)` per axis; only meaningful when `valid()`.
    pub shift: PointN,
}

impl LogicSamples {
    /// Builds a lattice; every `delta` component must be positive and must
    /// divide the box extent on its axis.
    pub fn new(logic_box: BoxN, delta: PointN) -> Self {
        let mut shift = PointN::zero(delta.pdim());
        for d in 0..delta.pdim() {
            assert!(delta[d] > 0, "delta must be positive on axis {d}");
            shift[d] = if delta[d] & (delta[d] - 1) == 0 {
                delta[d].trailing_zeros() as i64
            } else {
                0
            };
            debug_assert!(
                !logic_box.is_full_dim() || (logic_box.p2[d] - logic_box.p1[d]) % delta[d] == 0,
                "box extent not a multiple of delta on axis {d}"
            );
        }
        Self {
            logic_box,
            delta,
            shift,
        }
    }

    /// A deliberately-invalid placeholder (empty box).
    pub fn invalid(pdim: usize) -> Self {
        Self {
            logic_box: BoxN::new(PointN::zero(pdim), PointN::zero(pdim)),
            delta: PointN::one(pdim),
            shift: PointN::zero(pdim),
        }
    }

    pub fn valid(&self) -> bool {
        self.logic_box.is_full_dim()
            && (0..self.pdim()).all(|d| {
                let delta = self.delta[d];
                delta > 0 && (delta & (delta - 1)) == 0
            })
    }

    pub fn pdim(&self) -> usize {
        self.delta.pdim()
    }

    /// Lattice point count per axis.
    pub fn nsamples(&self) -> PointN {
        let mut n = self.logic_box.size();
        for d in 0..self.pdim() {
            n[d] /= self.delta[d];
        }
        n
    }

    /// Pixel (buffer) coordinate to logic coordinate.
    pub fn pixel_to_logic(&self, pixel: PointN) -> PointN {
        let mut logic = self.logic_box.p1;
        for d in 0..self.pdim() {
            logic[d] += pixel[d] * self.delta[d];
        }
        logic
    }

    /// Logic coordinate to pixel (buffer) coordinate. The caller is expected
    /// to pass lattice-aligned coordinates; the remainder is discarded.
    pub fn logic_to_pixel(&self, logic: PointN) -> PointN {
        let mut pixel = logic - self.logic_box.p1;
        for d in 0..self.pdim() {
            pixel[d] /= self.delta[d];
        }
        pixel
    }

    /// Shrinks `b` to the lattice: both corners are aligned up relative to
    /// this lattice's origin, so the result spans exactly the lattice points
    /// inside `b`. May come back empty (not full-dim).
    pub fn align_box(&self, b: BoxN) -> BoxN {
        let mut aligned = b;
        for d in 0..self.pdim() {
            aligned.p1[d] = align_right(b.p1[d], self.logic_box.p1[d], self.delta[d]);
            aligned.p2[d] = align_right(b.p2[d], self.logic_box.p1[d], self.delta[d]);
        }
        aligned
    }
}

impl fmt::Debug for LogicSamples {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LogicSamples {{ box: {:?}, delta: {:?} }}",
            self.logic_box, self.delta
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(p1: [i64; 2], p2: [i64; 2], delta: [i64; 2]) -> LogicSamples {
        LogicSamples::new(
            BoxN::new(PointN::from_slice(&p1), PointN::from_slice(&p2)),
            PointN::from_slice(&delta),
        )
    }

    #[test]
    fn test_nsamples() {
        let s = samples([0, 2], [4, 6], [2, 4]);
        assert_eq!(s.nsamples(), PointN::xy(2, 1));
        assert!(s.valid());
    }

    #[test]
    fn test_pixel_logic_roundtrip() {
        let s = samples([8, 4], [16, 8], [4, 2]);
        let pixel = PointN::xy(1, 1);
        assert_eq!(s.pixel_to_logic(pixel), PointN::xy(12, 6));
        assert_eq!(s.logic_to_pixel(PointN::xy(12, 6)), pixel);
    }

    #[test]
    fn test_align_box_shrinks_to_lattice() {
        let s = samples([0, 0], [16, 16], [4, 4]);
        let b = BoxN::new(PointN::xy(1, 4), PointN::xy(9, 5));
        let aligned = s.align_box(b);
        // x in {4, 8}, y in {4}.
        assert_eq!(aligned, BoxN::new(PointN::xy(4, 4), PointN::xy(12, 8)));
    }

    #[test]
    fn test_align_box_can_be_empty() {
        let s = samples([0, 0], [16, 16], [4, 4]);
        let b = BoxN::new(PointN::xy(1, 1), PointN::xy(4, 4));
        assert!(!s.align_box(b).is_full_dim());
    }

    #[test]
    fn test_align_box_with_offset_origin() {
        // Lattice origin at (2, 0), delta 4: points x in {2, 6, 10, ...}.
        let s = samples([2, 0], [18, 16], [4, 4]);
        let b = BoxN::new(PointN::xy(3, 0), PointN::xy(11, 16));
        let aligned = s.align_box(b);
        assert_eq!(aligned.p1[0], 6);
        assert_eq!(aligned.p2[0], 14);
    }
}
