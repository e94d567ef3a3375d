use std::{fmt, io::Read, str::FromStr};

use image::{ExtendedColorType, ImageFormat};
use mipstore_array::{Array, DType, DTypeAtom, Layout};
use mipstore_geom::PointN;
use mipstore_query::{AccessError, AccessResult};
use serde::{Deserialize, Serialize};

/// Block payload codec.
///
/// `Jpg` and `Png` only apply to image-shaped blocks: 2D, row-major, `uint8`
/// with one or three components. Everything else uses the byte codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Raw,
    Zip,
    Lz4,
    Jpg,
    Png,
}

impl Codec {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Zip => "zip",
            Self::Lz4 => "lz4",
            Self::Jpg => "jpg",
            Self::Png => "png",
        }
    }

    /// Encodes a buffer's bytes into a block payload.
    pub fn encode(self, array: &Array) -> AccessResult<Vec<u8>> {
        match self {
            Self::Raw => Ok(array.as_bytes().to_vec()),
            Self::Zip => {
                let mut encoder = flate2::read::ZlibEncoder::new(
                    array.as_bytes(),
                    flate2::Compression::default(),
                );
                let mut out = Vec::new();
                encoder.read_to_end(&mut out)?;
                Ok(out)
            }
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(array.as_bytes())),
            Self::Jpg | Self::Png => encode_image(self, array),
        }
    }

    /// Decodes a block payload into a buffer of the expected shape. The
    /// caller still verifies dims/dtype against the dataset.
    pub fn decode(
        self,
        payload: &[u8],
        dims: PointN,
        dtype: DType,
        layout: Layout,
    ) -> AccessResult<Array> {
        let bytes = match self {
            Self::Raw => payload.to_vec(),
            Self::Zip => {
                let mut decoder = flate2::read::ZlibDecoder::new(payload);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                out
            }
            Self::Lz4 => lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| AccessError::Corrupt(format!("lz4: {e}")))?,
            Self::Jpg | Self::Png => decode_image(self, payload, dims, dtype)?,
        };
        Array::from_bytes(dims, dtype, layout, bytes)
            .map_err(|e| AccessError::Corrupt(e.to_string()))
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Codec {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "raw" => Ok(Self::Raw),
            "zip" => Ok(Self::Zip),
            "lz4" => Ok(Self::Lz4),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "png" => Ok(Self::Png),
            other => Err(AccessError::Backend(format!("unknown codec {other:?}"))),
        }
    }
}

fn image_shape(dims: PointN, dtype: DType) -> AccessResult<(u32, u32, ExtendedColorType)> {
    if dims.pdim() != 2 || dtype.atom() != DTypeAtom::U8 {
        return Err(AccessError::Backend(format!(
            "image codecs need 2D uint8 blocks, got {dims:?} of {dtype}"
        )));
    }
    let color = match dtype.ncomponents() {
        1 => ExtendedColorType::L8,
        3 => ExtendedColorType::Rgb8,
        n => {
            return Err(AccessError::Backend(format!(
                "image codecs support 1 or 3 components, got {n}"
            )))
        }
    };
    Ok((dims[0] as u32, dims[1] as u32, color))
}

fn encode_image(codec: Codec, array: &Array) -> AccessResult<Vec<u8>> {
    if array.layout() != Layout::RowMajor {
        return Err(AccessError::Backend(
            "image codecs need row-major buffers".to_owned(),
        ));
    }
    let (width, height, color) = image_shape(array.dims(), array.dtype())?;

    let mut out = std::io::Cursor::new(Vec::new());
    let format = if codec == Codec::Jpg {
        ImageFormat::Jpeg
    } else {
        ImageFormat::Png
    };
    image::write_buffer_with_format(&mut out, array.as_bytes(), width, height, color, format)
        .map_err(|e| AccessError::Backend(format!("image encode: {e}")))?;
    Ok(out.into_inner())
}

fn decode_image(
    codec: Codec,
    payload: &[u8],
    dims: PointN,
    dtype: DType,
) -> AccessResult<Vec<u8>> {
    let (width, height, color) = image_shape(dims, dtype)?;
    let format = if codec == Codec::Jpg {
        ImageFormat::Jpeg
    } else {
        ImageFormat::Png
    };
    let decoded = image::load_from_memory_with_format(payload, format)
        .map_err(|e| AccessError::Corrupt(format!("image decode: {e}")))?;
    if decoded.width() != width || decoded.height() != height {
        return Err(AccessError::Corrupt(format!(
            "image is {}x{}, block wants {width}x{height}",
            decoded.width(),
            decoded.height()
        )));
    }
    Ok(match color {
        ExtendedColorType::L8 => decoded.into_luma8().into_raw(),
        _ => decoded.into_rgb8().into_raw(),
    })
}
