use std::fmt;

use serde::{Deserialize, Serialize};

use crate::PointN;

/// An axis-aligned integer box `[p1, p2)`.
///
/// Empty boxes (any axis with `p2 <= p1`) are representable; most operations
/// return them rather than failing, and callers test with [`BoxN::is_full_dim`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoxN {
    pub p1: PointN,
    pub p2: PointN,
}

impl BoxN {
    pub fn new(p1: PointN, p2: PointN) -> Self {
        debug_assert_eq!(p1.pdim(), p2.pdim());
        Self { p1, p2 }
    }

    /// The box `[0, dims)`.
    pub fn from_dims(dims: PointN) -> Self {
        Self::new(PointN::zero(dims.pdim()), dims)
    }

    pub fn pdim(&self) -> usize {
        self.p1.pdim()
    }

    pub fn size(&self) -> PointN {
        self.p2 - self.p1
    }

    /// True when the box has positive extent on every axis.
    pub fn is_full_dim(&self) -> bool {
        (0..self.pdim()).all(|d| self.p2[d] > self.p1[d])
    }

    pub fn intersection(&self, other: BoxN) -> BoxN {
        BoxN::new(self.p1.max(other.p1), self.p2.min(other.p2))
    }

    /// True when the two boxes overlap with positive measure.
    pub fn strict_intersect(&self, other: BoxN) -> bool {
        self.intersection(other).is_full_dim()
    }

    pub fn contains_box(&self, other: BoxN) -> bool {
        other.p1.all_ge(self.p1) && self.p2.all_ge(other.p2)
    }

    pub fn contains_point(&self, p: PointN) -> bool {
        (0..self.pdim()).all(|d| p[d] >= self.p1[d] && p[d] < self.p2[d])
    }

    pub fn translate(&self, offset: PointN) -> BoxN {
        BoxN::new(self.p1 + offset, self.p2 + offset)
    }

    /// The `2^pdim` corners; corner `i` takes `p2` on axis `a` iff bit `a`
    /// of `i` is set. `p2` here is treated as the far corner (inclusive end
    /// is the caller's concern; the guesser only needs extents).
    pub fn corners(&self) -> Vec<PointN> {
        let pdim = self.pdim();
        (0..1usize << pdim)
            .map(|i| {
                let mut c = self.p1;
                for d in 0..pdim {
                    if i & (1 << d) != 0 {
                        c[d] = self.p2[d];
                    }
                }
                c
            })
            .collect()
    }

    /// Edges as `(corner_index, corner_index, axis)` triples, matching the
    /// indexing of [`BoxN::corners`].
    pub fn edges(pdim: usize) -> Vec<(usize, usize, usize)> {
        let mut out = Vec::new();
        for i in 0..1usize << pdim {
            for d in 0..pdim {
                if i & (1 << d) == 0 {
                    out.push((i, i | (1 << d), d));
                }
            }
        }
        out
    }
}

impl fmt::Debug for BoxN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}..{:?})", self.p1, self.p2)
    }
}

impl fmt::Display for BoxN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.p1, self.p2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection() {
        let a = BoxN::new(PointN::xy(0, 0), PointN::xy(10, 10));
        let b = BoxN::new(PointN::xy(5, -5), PointN::xy(15, 5));
        let i = a.intersection(b);
        assert_eq!(i, BoxN::new(PointN::xy(5, 0), PointN::xy(10, 5)));
        assert!(a.strict_intersect(b));
    }

    #[test]
    fn test_empty_intersection_is_not_full_dim() {
        let a = BoxN::new(PointN::xy(0, 0), PointN::xy(4, 4));
        let b = BoxN::new(PointN::xy(4, 0), PointN::xy(8, 4));
        assert!(!a.strict_intersect(b));
    }

    #[test]
    fn test_contains() {
        let a = BoxN::new(PointN::xy(0, 0), PointN::xy(8, 8));
        let b = BoxN::new(PointN::xy(2, 2), PointN::xy(8, 4));
        assert!(a.contains_box(b));
        assert!(!b.contains_box(a));
        assert!(a.contains_point(PointN::xy(7, 0)));
        assert!(!a.contains_point(PointN::xy(8, 0)));
    }

    #[test]
    fn test_corner_and_edge_counts() {
        let a = BoxN::new(PointN::xyz(0, 0, 0), PointN::xyz(1, 2, 3));
        assert_eq!(a.corners().len(), 8);
        assert_eq!(BoxN::edges(3).len(), 12);
    }
}
