use mipstore_array::{Array, DType, Layout};
use mipstore_geom::PointN;
use mipstore_query::{AccessError, AccessResult};
use serde::{Deserialize, Serialize};

use crate::Codec;

pub const BLOCK_FORMAT_VERSION: u16 = 1;

const BLOCK_MAGIC: [u8; 4] = *b"MIPB";

/// Self-describing header in front of every stored block payload, so a
/// reader can verify what it got before trusting the bytes.
#[derive(Debug, Serialize, Deserialize)]
struct BlockFileHeader {
    magic: [u8; 4],
    version: u16,
    dtype: DType,
    nsamples: PointN,
    layout: Layout,
    codec: Codec,
}

/// Serializes a block buffer: `u32` header length, bincode header, encoded
/// payload.
pub fn write_block_bytes(array: &Array, codec: Codec) -> AccessResult<Vec<u8>> {
    let header = BlockFileHeader {
        magic: BLOCK_MAGIC,
        version: BLOCK_FORMAT_VERSION,
        dtype: array.dtype(),
        nsamples: array.dims(),
        layout: array.layout(),
        codec,
    };
    let header_bytes = bincode::serialize(&header)
        .map_err(|e| AccessError::Backend(format!("header encode: {e}")))?;

    let payload = codec.encode(array)?;
    let mut out = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parses stored block bytes, verifying the header against what the dataset
/// expects. Any disagreement is `Corrupt` (demoted to default fill by the
/// query layer).
pub fn read_block_bytes(
    bytes: &[u8],
    expect_nsamples: PointN,
    expect_dtype: DType,
) -> AccessResult<Array> {
    if bytes.len() < 4 {
        return Err(AccessError::Corrupt("short block file".to_owned()));
    }
    let header_len = u32::from_le_bytes(bytes[..4].try_into().expect("4 bytes")) as usize;
    if bytes.len() < 4 + header_len {
        return Err(AccessError::Corrupt("truncated block header".to_owned()));
    }

    let header: BlockFileHeader = bincode::deserialize(&bytes[4..4 + header_len])
        .map_err(|e| AccessError::Corrupt(format!("header decode: {e}")))?;
    if header.magic != BLOCK_MAGIC {
        return Err(AccessError::Corrupt("bad magic".to_owned()));
    }
    if header.version != BLOCK_FORMAT_VERSION {
        return Err(AccessError::Corrupt(format!(
            "unsupported block version {}",
            header.version
        )));
    }
    if header.dtype != expect_dtype {
        return Err(AccessError::Corrupt(format!(
            "block dtype {} where the field stores {}",
            header.dtype, expect_dtype
        )));
    }
    if header.nsamples != expect_nsamples {
        return Err(AccessError::Corrupt(format!(
            "block holds {:?} samples, geometry wants {:?}",
            header.nsamples, expect_nsamples
        )));
    }

    header
        .codec
        .decode(&bytes[4 + header_len..], header.nsamples, header.dtype, header.layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Array {
        let mut arr = Array::zeroed(PointN::xy(8, 4), "uint16".parse().unwrap());
        for (i, w) in arr.as_typed_mut::<u16>().unwrap().iter_mut().enumerate() {
            *w = i as u16;
        }
        arr.with_layout(Layout::Hz)
    }

    #[test]
    fn test_block_file_roundtrip() {
        let arr = block();
        for codec in [Codec::Raw, Codec::Zip, Codec::Lz4] {
            let bytes = write_block_bytes(&arr, codec).unwrap();
            let back = read_block_bytes(&bytes, arr.dims(), arr.dtype()).unwrap();
            assert_eq!(back.as_bytes(), arr.as_bytes());
            assert_eq!(back.layout(), Layout::Hz);
        }
    }

    #[test]
    fn test_mismatches_are_corrupt() {
        let arr = block();
        let bytes = write_block_bytes(&arr, Codec::Raw).unwrap();

        let wrong_dims = read_block_bytes(&bytes, PointN::xy(4, 4), arr.dtype());
        assert!(matches!(wrong_dims, Err(AccessError::Corrupt(_))));

        let wrong_dtype = read_block_bytes(&bytes, arr.dims(), "float32".parse().unwrap());
        assert!(matches!(wrong_dtype, Err(AccessError::Corrupt(_))));

        let garbage = read_block_bytes(&[1, 2, 3], arr.dims(), arr.dtype());
        assert!(matches!(garbage, Err(AccessError::Corrupt(_))));
    }
}
