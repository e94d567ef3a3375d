use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::{PointN, MAX_POINT_DIM};

/// The axis-split schedule of an HZ curve.
///
/// Written as a string `V<a1><a2>...<aMaxH>` where each `<ai>` is an axis
/// digit: the symbol at position `h` names the axis that level `h` splits.
/// The power-of-two bounding box has, on axis `a`, size `2^(count of a)`.
/// `MaxH` is the string length minus one. A bitmask fully determines the
/// curve and all per-level geometry.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Bitmask {
    // axes[0] is unused (the root 'V'); axes[h] is the split axis of level h.
    axes: Vec<u8>,
    pdim: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitmaskParseError {
    #[error("bitmask must start with 'V'")]
    MissingRoot,

    #[error("bitmask has no levels")]
    Empty,

    #[error("bad axis symbol {0:?}")]
    BadSymbol(char),

    #[error("bitmask resolution {0} too deep for 64-bit addresses")]
    TooDeep(usize),
}

/// Addresses are `u64`; one bit is reserved for the interleave top marker.
pub(crate) const MAX_RESOLUTION: usize = 62;

impl Bitmask {
    /// Highest resolution level described by this mask.
    pub fn max_resolution(&self) -> i32 {
        (self.axes.len() - 1) as i32
    }

    /// Number of axes the mask mentions.
    pub fn pdim(&self) -> usize {
        self.pdim
    }

    /// Split axis of level `h`, `1 <= h <= max_resolution`.
    pub fn axis(&self, h: i32) -> usize {
        self.axes[h as usize] as usize
    }

    /// Occurrences of `axis` among levels `lo..=hi` (clamped to the mask).
    pub fn count_axis(&self, axis: usize, lo: i32, hi: i32) -> u32 {
        let lo = lo.max(1);
        let hi = hi.min(self.max_resolution());
        if lo > hi {
            return 0;
        }
        self.axes[lo as usize..=hi as usize]
            .iter()
            .filter(|&&a| a as usize == axis)
            .count() as u32
    }

    /// Size of the power-of-two bounding box: `2^(count of a)` per axis.
    pub fn pow2_dims(&self) -> PointN {
        let mut dims = PointN::one(self.pdim);
        for d in 0..self.pdim {
            dims[d] = 1i64 << self.count_axis(d, 1, self.max_resolution());
        }
        dims
    }

    /// Builds a mask for concrete dimensions (rounded up to powers of two).
    /// Finer levels split the larger axes, so the finest level always halves
    /// a largest remaining dimension.
    pub fn guess(dims: PointN) -> Result<Self, BitmaskParseError> {
        let pdim = dims.pdim();
        let mut left: Vec<i64> = (0..pdim)
            .map(|d| (dims[d].max(1) as u64).next_power_of_two() as i64)
            .collect();

        let mut rev = Vec::new();
        loop {
            // Largest remaining dimension; ties go to the highest axis so
            // that equal dims interleave as V0101... coarse-to-fine.
            let (axis, &size) = left
                .iter()
                .enumerate()
                .max_by_key(|&(d, &s)| (s, d))
                .expect("pdim >= 1");
            if size <= 1 {
                break;
            }
            rev.push(axis as u8);
            left[axis] >>= 1;
        }
        if rev.is_empty() {
            return Err(BitmaskParseError::Empty);
        }
        if rev.len() > MAX_RESOLUTION {
            return Err(BitmaskParseError::TooDeep(rev.len()));
        }

        let mut axes = vec![0u8];
        axes.extend(rev.iter().rev());
        Ok(Self { axes, pdim })
    }
}

impl FromStr for Bitmask {
    type Err = BitmaskParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        if chars.next() != Some('V') {
            return Err(BitmaskParseError::MissingRoot);
        }

        let mut axes = vec![0u8];
        let mut pdim = 0usize;
        for c in chars {
            let axis = c
                .to_digit(10)
                .filter(|&a| (a as usize) < MAX_POINT_DIM)
                .ok_or(BitmaskParseError::BadSymbol(c))? as usize;
            pdim = pdim.max(axis + 1);
            axes.push(axis as u8);
        }
        if axes.len() == 1 {
            return Err(BitmaskParseError::Empty);
        }
        if axes.len() - 1 > MAX_RESOLUTION {
            return Err(BitmaskParseError::TooDeep(axes.len() - 1));
        }
        Ok(Self { axes, pdim })
    }
}

impl fmt::Display for Bitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V")?;
        for &a in &self.axes[1..] {
            write!(f, "{a}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Bitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmask({self})")
    }
}

impl Serialize for Bitmask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Bitmask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let mask: Bitmask = "V0101".parse().unwrap();
        assert_eq!(mask.max_resolution(), 4);
        assert_eq!(mask.pdim(), 2);
        assert_eq!(mask.axis(1), 0);
        assert_eq!(mask.axis(2), 1);
        assert_eq!(mask.to_string(), "V0101");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("0101".parse::<Bitmask>(), Err(BitmaskParseError::MissingRoot));
        assert_eq!("V".parse::<Bitmask>(), Err(BitmaskParseError::Empty));
        assert_eq!(
            "V0x1".parse::<Bitmask>(),
            Err(BitmaskParseError::BadSymbol('x'))
        );
        assert_eq!(
            "V9".parse::<Bitmask>(),
            Err(BitmaskParseError::BadSymbol('9'))
        );
    }

    #[test]
    fn test_pow2_dims() {
        let mask: Bitmask = "V00101".parse().unwrap();
        assert_eq!(mask.pow2_dims(), PointN::xy(8, 4));
    }

    #[test]
    fn test_count_axis_clamps() {
        let mask: Bitmask = "V0101".parse().unwrap();
        assert_eq!(mask.count_axis(0, 1, 4), 2);
        assert_eq!(mask.count_axis(1, 3, 99), 1);
        assert_eq!(mask.count_axis(0, 4, 3), 0);
    }

    #[test]
    fn test_guess_square() {
        let mask = Bitmask::guess(PointN::xy(1024, 1024)).unwrap();
        assert_eq!(mask.pow2_dims(), PointN::xy(1024, 1024));
        assert_eq!(mask.max_resolution(), 20);
    }

    #[test]
    fn test_guess_rounds_up_and_splits_largest_last() {
        let mask = Bitmask::guess(PointN::xy(6, 2)).unwrap();
        assert_eq!(mask.pow2_dims(), PointN::xy(8, 2));
        // The finest level must split the largest axis.
        assert_eq!(mask.axis(mask.max_resolution()), 0);
    }
}
