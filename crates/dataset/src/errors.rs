use mipstore_geom::BitmaskParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("bitmask: {0}")]
    Bitmask(#[from] BitmaskParseError),

    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("dataset has no fields")]
    NoFields,

    #[error("duplicate field {0:?}")]
    DuplicateField(String),

    #[error("bits per block {bits} out of range for max resolution {maxh}")]
    BadBitsPerBlock { bits: i32, maxh: i32 },

    #[error("logic box {0} does not fit the pow-2 box {1}")]
    BadLogicBox(String, String),

    #[error("timestep {0} is not declared by the dataset")]
    BadTimestep(f64),

    #[error("manifest: {0}")]
    Manifest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
