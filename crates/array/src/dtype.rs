use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Scalar element type of a sample component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DTypeAtom {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl DTypeAtom {
    pub fn bytes(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::I8 => "int8",
            Self::U16 => "uint16",
            Self::I16 => "int16",
            Self::U32 => "uint32",
            Self::I32 => "int32",
            Self::U64 => "uint64",
            Self::I64 => "int64",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }

    /// Encodes an `f64` as this atom's native bytes, saturating integer
    /// targets. Used to materialize a field's default fill value.
    pub fn encode_f64(self, value: f64, out: &mut Vec<u8>) {
        match self {
            Self::U8 => out.extend((value as u8).to_ne_bytes()),
            Self::I8 => out.extend((value as i8).to_ne_bytes()),
            Self::U16 => out.extend((value as u16).to_ne_bytes()),
            Self::I16 => out.extend((value as i16).to_ne_bytes()),
            Self::U32 => out.extend((value as u32).to_ne_bytes()),
            Self::I32 => out.extend((value as i32).to_ne_bytes()),
            Self::U64 => out.extend((value as u64).to_ne_bytes()),
            Self::I64 => out.extend((value as i64).to_ne_bytes()),
            Self::F32 => out.extend((value as f32).to_ne_bytes()),
            Self::F64 => out.extend(value.to_ne_bytes()),
        }
    }
}

/// Element type of one sample: an atom and a component count
/// (e.g. `uint8[3]` for RGB).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DType {
    atom: DTypeAtom,
    ncomp: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DTypeParseError {
    #[error("unknown dtype {0:?}")]
    Unknown(String),

    #[error("bad component count in {0:?}")]
    BadComponents(String),
}

impl DType {
    pub fn scalar(atom: DTypeAtom) -> Self {
        Self { atom, ncomp: 1 }
    }

    pub fn vector(atom: DTypeAtom, ncomp: u8) -> Self {
        assert!(ncomp >= 1, "component count must be positive");
        Self { atom, ncomp }
    }

    pub fn atom(&self) -> DTypeAtom {
        self.atom
    }

    pub fn ncomponents(&self) -> usize {
        self.ncomp as usize
    }

    /// Bytes per sample (all components).
    pub fn sample_bytes(&self) -> usize {
        self.atom.bytes() * self.ncomp as usize
    }

    /// One sample's worth of a scalar fill value, repeated per component.
    pub fn fill_sample(&self, value: f64) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.sample_bytes());
        for _ in 0..self.ncomp {
            self.atom.encode_f64(value, &mut out);
        }
        out
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ncomp == 1 {
            write!(f, "{}", self.atom.name())
        } else {
            write!(f, "{}[{}]", self.atom.name(), self.ncomp)
        }
    }
}

impl fmt::Debug for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DType({self})")
    }
}

impl FromStr for DType {
    type Err = DTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, ncomp) = match s.split_once('[') {
            None => (s, 1u8),
            Some((name, rest)) => {
                let digits = rest
                    .strip_suffix(']')
                    .ok_or_else(|| DTypeParseError::BadComponents(s.to_owned()))?;
                let n: u8 = digits
                    .parse()
                    .map_err(|_| DTypeParseError::BadComponents(s.to_owned()))?;
                if n == 0 {
                    return Err(DTypeParseError::BadComponents(s.to_owned()));
                }
                (name, n)
            }
        };

        let atom = match name {
            "uint8" => DTypeAtom::U8,
            "int8" => DTypeAtom::I8,
            "uint16" => DTypeAtom::U16,
            "int16" => DTypeAtom::I16,
            "uint32" => DTypeAtom::U32,
            "int32" => DTypeAtom::I32,
            "uint64" => DTypeAtom::U64,
            "int64" => DTypeAtom::I64,
            "float32" => DTypeAtom::F32,
            "float64" => DTypeAtom::F64,
            _ => return Err(DTypeParseError::Unknown(s.to_owned())),
        };
        Ok(Self { atom, ncomp })
    }
}

impl Serialize for DType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
