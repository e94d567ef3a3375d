use std::{
    fmt,
    ops::{Add, Index, IndexMut, Sub},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Highest point dimension the engine supports.
pub const MAX_POINT_DIM: usize = 5;

/// An N-dimensional integer point with runtime dimension (`pdim <= 5`).
///
/// Coordinates are `i64`; all datasets fit 64-bit logic coordinates. The
/// backing storage is a fixed array so points stay `Copy` and never allocate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointN {
    v: [i64; MAX_POINT_DIM],
    pdim: usize,
}

impl PointN {
    /// The origin of a `pdim`-dimensional space.
    pub fn zero(pdim: usize) -> Self {
        assert!(pdim >= 1 && pdim <= MAX_POINT_DIM, "bad pdim {pdim}");
        Self {
            v: [0; MAX_POINT_DIM],
            pdim,
        }
    }

    /// All-ones point.
    pub fn one(pdim: usize) -> Self {
        Self::splat(pdim, 1)
    }

    /// Point with every coordinate set to `value`.
    pub fn splat(pdim: usize, value: i64) -> Self {
        let mut p = Self::zero(pdim);
        for d in 0..pdim {
            p.v[d] = value;
        }
        p
    }

    pub fn from_slice(coords: &[i64]) -> Self {
        let mut p = Self::zero(coords.len());
        p.v[..coords.len()].copy_from_slice(coords);
        p
    }

    /// Convenience 2D constructor.
    pub fn xy(x: i64, y: i64) -> Self {
        Self::from_slice(&[x, y])
    }

    /// Convenience 3D constructor.
    pub fn xyz(x: i64, y: i64, z: i64) -> Self {
        Self::from_slice(&[x, y, z])
    }

    pub fn pdim(&self) -> usize {
        self.pdim
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.v[..self.pdim]
    }

    /// Copy with one coordinate replaced.
    pub fn with(mut self, axis: usize, value: i64) -> Self {
        self.v[axis] = value;
        self
    }

    /// Per-axis left shift.
    pub fn left_shift(&self, shift: PointN) -> Self {
        self.map2(shift, |a, s| a << s)
    }

    /// Per-axis arithmetic right shift.
    pub fn right_shift(&self, shift: PointN) -> Self {
        self.map2(shift, |a, s| a >> s)
    }

    /// Row-major strides for a buffer with these dimensions (axis 0 fastest).
    pub fn stride(&self) -> Self {
        let mut s = Self::zero(self.pdim);
        let mut acc = 1i64;
        for d in 0..self.pdim {
            s.v[d] = acc;
            acc *= self.v[d];
        }
        s
    }

    /// Product of all coordinates.
    pub fn inner_product(&self) -> i64 {
        self.as_slice().iter().product()
    }

    pub fn dot(&self, other: PointN) -> i64 {
        debug_assert_eq!(self.pdim, other.pdim);
        (0..self.pdim).map(|d| self.v[d] * other.v[d]).sum()
    }

    pub fn min(&self, other: PointN) -> Self {
        self.map2(other, i64::min)
    }

    pub fn max(&self, other: PointN) -> Self {
        self.map2(other, i64::max)
    }

    /// True if every coordinate of `self` is `>=` the matching one of `other`.
    pub fn all_ge(&self, other: PointN) -> bool {
        (0..self.pdim).all(|d| self.v[d] >= other.v[d])
    }

    fn map2(&self, other: PointN, f: impl Fn(i64, i64) -> i64) -> Self {
        debug_assert_eq!(self.pdim, other.pdim);
        let mut r = Self::zero(self.pdim);
        for d in 0..self.pdim {
            r.v[d] = f(self.v[d], other.v[d]);
        }
        r
    }
}

impl Index<usize> for PointN {
    type Output = i64;

    fn index(&self, axis: usize) -> &i64 {
        debug_assert!(axis < self.pdim);
        &self.v[axis]
    }
}

impl IndexMut<usize> for PointN {
    fn index_mut(&mut self, axis: usize) -> &mut i64 {
        debug_assert!(axis < self.pdim);
        &mut self.v[axis]
    }
}

impl Add for PointN {
    type Output = PointN;

    fn add(self, rhs: PointN) -> PointN {
        self.map2(rhs, |a, b| a + b)
    }
}

impl Sub for PointN {
    type Output = PointN;

    fn sub(self, rhs: PointN) -> PointN {
        self.map2(rhs, |a, b| a - b)
    }
}

impl fmt::Debug for PointN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_slice())
    }
}

impl fmt::Display for PointN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (d, c) in self.as_slice().iter().enumerate() {
            if d > 0 {
                write!(f, " ")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl Serialize for PointN {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PointN {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let coords = Vec::<i64>::deserialize(deserializer)?;
        if coords.is_empty() || coords.len() > MAX_POINT_DIM {
            return Err(serde::de::Error::custom(format!(
                "point dimension {} out of range",
                coords.len()
            )));
        }
        Ok(Self::from_slice(&coords))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_is_axis0_fastest() {
        let dims = PointN::xyz(4, 8, 2);
        assert_eq!(dims.stride(), PointN::xyz(1, 4, 32));
    }

    #[test]
    fn test_shift_ops() {
        let p = PointN::xy(3, 5);
        let s = PointN::xy(1, 2);
        assert_eq!(p.left_shift(s), PointN::xy(6, 20));
        assert_eq!(p.left_shift(s).right_shift(s), p);
    }

    #[test]
    fn test_display() {
        assert_eq!(PointN::xyz(1, 2, 3).to_string(), "1 2 3");
    }
}
