use std::sync::Arc;

use mipstore_array::{DType, DTypeAtom};
use mipstore_geom::{Bitmask, BoxN, Frustum, HzOrder, LogicSamples, PointN};
use serde::{Deserialize, Serialize};

use crate::{
    errors::DatasetError,
    guess::{guess_end_resolutions, GuessParams},
    Field, Timesteps,
};

/// A web-map style tile pyramid exposed through the block interface.
///
/// Unlike the hz-packed dataset, every level stores the *full* image at its
/// resolution (full-res mode): level `H = bits_per_block + 2*zoom` holds
/// `2^H` samples and only even levels exist. One block is one tile, row
/// major, fetched over HTTP; writes are not supported.
#[derive(Debug)]
pub struct TiledDataset {
    name: String,
    bitmask: Bitmask,
    hzorder: HzOrder,
    logic_box: BoxN,
    bits_per_block: i32,
    tile_dims: PointN,
    field: Field,
    timesteps: Timesteps,
    tiles_url: String,
    compression: String,
}

/// Manifest for a tiled dataset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TiledConfig {
    pub name: String,
    /// Tile server endpoint; `x`, `y`, `z` are appended as query parameters.
    pub tiles: String,
    #[serde(default = "default_tile_size")]
    pub tile_width: i64,
    #[serde(default = "default_tile_size")]
    pub tile_height: i64,
    #[serde(default = "default_nlevels")]
    pub nlevels: i32,
    #[serde(default = "default_tile_compression")]
    pub compression: String,
    #[serde(default = "default_tile_dtype")]
    pub dtype: DType,
}

fn default_tile_size() -> i64 {
    256
}

fn default_nlevels() -> i32 {
    22
}

fn default_tile_compression() -> String {
    "jpg".to_owned()
}

fn default_tile_dtype() -> DType {
    DType::vector(DTypeAtom::U8, 3)
}

impl TiledDataset {
    pub fn open(config: TiledConfig) -> Result<Arc<Self>, DatasetError> {
        let TiledConfig {
            name,
            tiles,
            tile_width,
            tile_height,
            nlevels,
            compression,
            dtype,
        } = config;

        if tile_width <= 0
            || tile_height <= 0
            || tile_width & (tile_width - 1) != 0
            || tile_height & (tile_height - 1) != 0
        {
            return Err(DatasetError::Manifest(format!(
                "tile dims {tile_width}x{tile_height} must be positive powers of two"
            )));
        }

        // Every zoom level doubles both axes.
        let w = tile_width << nlevels;
        let h = tile_height << nlevels;
        let bitmask = Bitmask::guess(PointN::xy(w, h))?;
        let hzorder = HzOrder::new(&bitmask);
        let bits_per_block =
            (tile_width * tile_height).trailing_zeros() as i32;

        let field = Field::new("DATA", dtype)
            .with_layout(mipstore_array::Layout::RowMajor)
            .with_codec(compression.clone());

        Ok(Arc::new(Self {
            name,
            bitmask,
            hzorder,
            logic_box: BoxN::new(PointN::xy(0, 0), PointN::xy(w, h)),
            bits_per_block,
            tile_dims: PointN::xy(tile_width, tile_height),
            field,
            timesteps: Timesteps::default(),
            tiles_url: tiles,
            compression,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bitmask(&self) -> &Bitmask {
        &self.bitmask
    }

    pub fn logic_box(&self) -> BoxN {
        self.logic_box
    }

    pub fn bits_per_block(&self) -> i32 {
        self.bits_per_block
    }

    pub fn max_resolution(&self) -> i32 {
        self.bitmask.max_resolution()
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn timesteps(&self) -> &Timesteps {
        &self.timesteps
    }

    pub fn tiles_url(&self) -> &str {
        &self.tiles_url
    }

    pub fn compression(&self) -> &str {
        &self.compression
    }

    pub fn tile_dims(&self) -> PointN {
        self.tile_dims
    }

    /// Resolution level of a block in full-res mode.
    pub fn block_resolution(&self, blockid: u64) -> i32 {
        self.bits_per_block + (63 - (1 + blockid).leading_zeros()) as i32
    }

    /// Maps a block id to its `(x, y, zoom)` tile coordinate.
    pub fn block_to_tile(&self, blockid: u64) -> (i64, i64, i32) {
        let h = self.block_resolution(blockid);
        debug_assert!(h % 2 == 0, "tiled datasets have no odd levels");

        let zoom_levels = h - self.bits_per_block;
        let first_block_in_level = (1u64 << zoom_levels) - 1;
        let coord = self
            .hzorder
            .deinterleave_prefix(blockid - first_block_in_level, zoom_levels);
        (coord[0], coord[1], zoom_levels >> 1)
    }

    /// Full-lattice samples of an (even) level: the whole image at that
    /// resolution.
    pub fn level_samples(&self, h: i32) -> LogicSamples {
        debug_assert!(h % 2 == 0 && h >= self.bits_per_block);
        let zoom = (h - self.bits_per_block) >> 1;

        let span_x = self.logic_box.p2[0] >> zoom;
        let span_y = self.logic_box.p2[1] >> zoom;
        let delta = PointN::xy(span_x / self.tile_dims[0], span_y / self.tile_dims[1]);
        LogicSamples::new(self.logic_box, delta)
    }

    /// Sample lattice of one tile.
    pub fn block_logic_samples(&self, blockid: u64) -> LogicSamples {
        if self.block_resolution(blockid) > self.max_resolution() {
            return LogicSamples::invalid(2);
        }
        let (x, y, zoom) = self.block_to_tile(blockid);
        let span_x = self.logic_box.p2[0] >> zoom;
        let span_y = self.logic_box.p2[1] >> zoom;
        let delta = PointN::xy(span_x / self.tile_dims[0], span_y / self.tile_dims[1]);
        let p1 = PointN::xy(span_x * x, span_y * y);
        let p2 = PointN::xy(span_x * (x + 1), span_y * (y + 1));
        LogicSamples::new(BoxN::new(p1, p2), delta)
    }

    /// View-dependent pick of progressive target resolutions; entries are
    /// rounded to even levels and clamped to `[bits_per_block, maxh]`.
    pub fn guess_end_resolutions(
        &self,
        logic_to_screen: Option<&Frustum>,
        logic_box: BoxN,
        params: GuessParams,
    ) -> Vec<i32> {
        guess_end_resolutions(
            &self.bitmask,
            logic_to_screen,
            logic_box,
            params,
            true,
            self.bits_per_block,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> Arc<TiledDataset> {
        // 4x4 tiles, 2 zoom levels: a 16x16 image, bits_per_block 4.
        TiledDataset::open(TiledConfig {
            name: "tiles".into(),
            tiles: "http://tiles.test/layer".into(),
            tile_width: 4,
            tile_height: 4,
            nlevels: 2,
            compression: "png".into(),
            dtype: DType::scalar(DTypeAtom::U8),
        })
        .unwrap()
    }

    #[test]
    fn test_block_resolution_walk() {
        let ds = tiny();
        // Ids follow the binary subdivision tree; only even levels hold
        // tiles: block 0 at zoom 0, blocks 3..=6 at zoom 1, 15..=30 at 2.
        assert_eq!(ds.block_resolution(0), 4);
        assert_eq!(ds.block_resolution(3), 6);
        assert_eq!(ds.block_resolution(6), 6);
        assert_eq!(ds.block_resolution(15), 8);
        assert_eq!(ds.block_resolution(30), 8);
        assert_eq!(ds.block_to_tile(0), (0, 0, 0));
        assert_eq!(ds.block_to_tile(3), (0, 0, 1));
        assert_eq!(ds.block_to_tile(6), (1, 1, 1));
    }

    #[test]
    fn test_level_holds_full_image() {
        let ds = tiny();
        for h in [4, 6, 8] {
            let samples = ds.level_samples(h);
            assert_eq!(
                samples.nsamples().inner_product(),
                1i64 << h,
                "full-res level {h}"
            );
            assert_eq!(samples.logic_box, ds.logic_box());
        }
    }

    #[test]
    fn test_tiles_partition_the_level() {
        let ds = tiny();
        // Zoom 1: blocks 3..=6 tile the 16x16 box in 8x8 footprints.
        let mut seen = Vec::new();
        for blockid in 3..=6u64 {
            let samples = ds.block_logic_samples(blockid);
            assert_eq!(samples.nsamples(), PointN::xy(4, 4));
            assert_eq!(samples.logic_box.size(), PointN::xy(8, 8));
            seen.push(samples.logic_box);
        }
        for a in 0..seen.len() {
            for b in a + 1..seen.len() {
                assert!(!seen[a].strict_intersect(seen[b]));
            }
        }
    }
}
