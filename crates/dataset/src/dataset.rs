use std::sync::Arc;

use mipstore_geom::{Bitmask, BoxN, Frustum, HzOrder, LogicSamples, PointN};
use tracing::debug;

use crate::{
    errors::DatasetError,
    field::split_params,
    guess::{guess_end_resolutions, GuessParams},
    hzconv::{LevelSteps, PointTables, DEFAULT_STEP_BITS},
    manifest::DatasetConfig,
    Field, Timesteps,
};

/// Point tables are only worth their memory on 3D volumes of moderate
/// per-axis extent (a slice query hits one table entry per coordinate).
const POINT_TABLE_DIM_LIMIT: i64 = 1 << 16;

/// An opened multi-resolution dataset.
///
/// Construction precomputes every piece of geometry the query paths need:
/// the full-level lattices (`level_samples`), the canonical one-block
/// lattices (`block_samples`), the per-level step tables for the HZ merge
/// kernel, and (for 3D) the per-axis point-query tables. All of it is
/// immutable afterwards; datasets are shared as `Arc<Dataset>`.
#[derive(Debug)]
pub struct Dataset {
    name: String,
    bitmask: Bitmask,
    hzorder: HzOrder,
    logic_box: BoxN,
    bits_per_block: i32,
    fields: Vec<Field>,
    timesteps: Timesteps,
    level_samples: Vec<LogicSamples>,
    resolved_samples: Vec<LogicSamples>,
    block_samples: Vec<LogicSamples>,
    hz_steps: Vec<Arc<LevelSteps>>,
    point_tables: Option<Arc<PointTables>>,
    default_access: Option<serde_json::Value>,
}

impl Dataset {
    pub fn open(config: DatasetConfig) -> Result<Arc<Self>, DatasetError> {
        let bitmask: Bitmask = config.bitmask;
        let maxh = bitmask.max_resolution();
        let pow2_box = BoxN::from_dims(bitmask.pow2_dims());

        let bits_per_block = config.bits_per_block;
        if bits_per_block < 1 || bits_per_block > maxh {
            return Err(DatasetError::BadBitsPerBlock {
                bits: bits_per_block,
                maxh,
            });
        }

        let logic_box = config.logic_box.unwrap_or(pow2_box);
        if !logic_box.is_full_dim() || !pow2_box.contains_box(logic_box) {
            return Err(DatasetError::BadLogicBox(
                logic_box.to_string(),
                pow2_box.to_string(),
            ));
        }

        let fields: Vec<Field> = config.fields.into_iter().map(Field::from).collect();
        if fields.is_empty() {
            return Err(DatasetError::NoFields);
        }
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(DatasetError::DuplicateField(field.name.clone()));
            }
        }

        let hzorder = HzOrder::new(&bitmask);

        let level_samples: Vec<_> = (0..=maxh).map(|h| hzorder.level_samples(h)).collect();
        let resolved_samples: Vec<_> = (0..=maxh)
            .map(|h| LogicSamples::new(pow2_box, hzorder.union_delta(h)))
            .collect();
        let block_samples: Vec<_> = (0..=maxh)
            .map(|h| canonical_block_samples(&bitmask, &hzorder, h, bits_per_block))
            .collect();
        let hz_steps: Vec<_> = (0..=maxh)
            .map(|h| Arc::new(LevelSteps::new(&hzorder, h, DEFAULT_STEP_BITS)))
            .collect();

        let pow2_dims = bitmask.pow2_dims();
        let point_tables = if bitmask.pdim() == 3
            && (0..3).all(|d| pow2_dims[d] <= POINT_TABLE_DIM_LIMIT)
        {
            Some(Arc::new(PointTables::new(&hzorder, pow2_dims)))
        } else {
            if bitmask.pdim() == 3 {
                debug!(dataset = %config.name, "skipping point tables, dims too large");
            }
            None
        };

        Ok(Arc::new(Self {
            name: config.name,
            bitmask,
            hzorder,
            logic_box,
            bits_per_block,
            fields,
            timesteps: config.timesteps,
            level_samples,
            resolved_samples,
            block_samples,
            hz_steps,
            point_tables,
            default_access: config.default_access,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bitmask(&self) -> &Bitmask {
        &self.bitmask
    }

    pub fn hzorder(&self) -> &HzOrder {
        &self.hzorder
    }

    pub fn pdim(&self) -> usize {
        self.bitmask.pdim()
    }

    pub fn max_resolution(&self) -> i32 {
        self.bitmask.max_resolution()
    }

    pub fn bits_per_block(&self) -> i32 {
        self.bits_per_block
    }

    pub fn samples_per_block(&self) -> u64 {
        1u64 << self.bits_per_block
    }

    /// The sampled region; a sub-box of the pow-2 bounding box.
    pub fn logic_box(&self) -> BoxN {
        self.logic_box
    }

    pub fn timesteps(&self) -> &Timesteps {
        &self.timesteps
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn default_field(&self) -> &Field {
        &self.fields[0]
    }

    /// Resolves a field by name. The name may carry query parameters
    /// (`"temperature?time=30"`); they come back attached to the returned
    /// copy and do not participate in the lookup.
    pub fn field(&self, name: &str) -> Result<Field, DatasetError> {
        let (bare, params) = split_params(name);
        let mut field = self
            .fields
            .iter()
            .find(|f| f.name == bare)
            .cloned()
            .ok_or_else(|| DatasetError::UnknownField(name.to_owned()))?;
        field.params = params;
        Ok(field)
    }

    /// Lattice of all samples of level `h`.
    pub fn level_samples(&self, h: i32) -> &LogicSamples {
        &self.level_samples[h as usize]
    }

    /// Lattice of every sample *resolved* once level `h` has been read: the
    /// union of levels `0..=h`, anchored at the origin. This is the lattice a
    /// box query's buffer holds at end resolution `h`.
    pub fn resolved_samples(&self, h: i32) -> &LogicSamples {
        &self.resolved_samples[h as usize]
    }

    /// Canonical (origin-anchored) lattice of one block at level `h`.
    pub fn block_samples(&self, h: i32) -> &LogicSamples {
        &self.block_samples[h as usize]
    }

    pub fn hz_steps(&self, h: i32) -> &Arc<LevelSteps> {
        &self.hz_steps[h as usize]
    }

    pub fn point_tables(&self) -> Option<&Arc<PointTables>> {
        self.point_tables.as_ref()
    }

    /// Raw access configuration from the manifest, if it declared one.
    pub fn default_access(&self) -> Option<&serde_json::Value> {
        self.default_access.as_ref()
    }

    /// Resolution level of a block: block 0 packs every level up to
    /// `bits_per_block`; past it each doubling of the id steps one level.
    pub fn block_resolution(&self, blockid: u64) -> i32 {
        if blockid == 0 {
            self.bits_per_block
        } else {
            self.bits_per_block + 1 + (63 - blockid.leading_zeros()) as i32
        }
    }

    /// First hz address covered by a block.
    pub fn block_first_address(&self, blockid: u64) -> u64 {
        blockid << self.bits_per_block
    }

    /// Number of blocks that exist at `maxh`, i.e. the id one past the last.
    pub fn total_blocks(&self) -> u64 {
        1u64 << (self.max_resolution() - self.bits_per_block).max(0)
    }

    /// The concrete sample lattice of a block.
    ///
    /// Block 0 is special: it holds every level `0..=bits_per_block`, so its
    /// lattice is the level-`bits_per_block` one with the delta halved along
    /// that level's split axis, anchored at the origin over the whole pow-2
    /// box. Every other block covers a contiguous run inside one level.
    pub fn block_logic_samples(&self, blockid: u64) -> LogicSamples {
        let h = self.block_resolution(blockid);
        if h > self.max_resolution() {
            // Past the last block; block queries reject the invalid lattice.
            return LogicSamples::invalid(self.pdim());
        }
        if blockid == 0 {
            let axis = self.bitmask.axis(h);
            let mut delta = self.hzorder.level_delta(h);
            delta[axis] >>= 1;
            return LogicSamples::new(BoxN::from_dims(self.bitmask.pow2_dims()), delta);
        }

        let delta = self.hzorder.level_delta(h);
        let nsamples = self.block_samples[h as usize].nsamples();
        let p1 = self.hzorder.hz_to_point(self.block_first_address(blockid));
        let mut p2 = p1;
        for d in 0..self.pdim() {
            p2[d] += nsamples[d] * delta[d];
        }
        LogicSamples::new(BoxN::new(p1, p2), delta)
    }

    /// kd split step at descent depth `h`: half the level delta along that
    /// level's split axis.
    pub fn kd_split_delta(&self, h: i32) -> i64 {
        if h == 0 {
            0
        } else {
            self.level_samples[h as usize].delta[self.bitmask.axis(h)] >> 1
        }
    }

    /// View-dependent pick of progressive target resolutions.
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
            false,
            0,
        )
    }
}

/// Origin-anchored lattice of one block at level `h` (invariant: its sample
/// count is `2^min(h, bits_per_block)`).
fn canonical_block_samples(
    bitmask: &Bitmask,
    hzorder: &HzOrder,
    h: i32,
    bits_per_block: i32,
) -> LogicSamples {
    let pdim = bitmask.pdim();
    let (delta, lo, hi) = if h <= bits_per_block {
        // Block 0 territory: the union lattice of levels 0..=h.
        (hzorder.union_delta(h), 1, h)
    } else {
        // The bitmask entries a block's intra-level run varies over.
        (hzorder.level_delta(h), h - bits_per_block, h - 1)
    };

    let mut dims = PointN::one(pdim);
    for d in 0..pdim {
        dims[d] = 1i64 << bitmask.count_axis(d, lo, hi);
    }
    let mut p2 = PointN::zero(pdim);
    for d in 0..pdim {
        p2[d] = dims[d] * delta[d];
    }
    LogicSamples::new(BoxN::new(PointN::zero(pdim), p2), delta)
}

#[cfg(test)]
mod tests {
    use mipstore_array::{DType, DTypeAtom};

    use super::*;
    use crate::manifest::FieldConfig;

    fn small_dataset(mask: &str, bits_per_block: i32) -> Arc<Dataset> {
        Dataset::open(DatasetConfig {
            name: "test".into(),
            bitmask: mask.parse().unwrap(),
            logic_box: None,
            bits_per_block,
            fields: vec![FieldConfig::new("v", DType::scalar(DTypeAtom::U8))],
            timesteps: Timesteps::default(),
            default_access: None,
        })
        .unwrap()
    }

    #[test]
    fn test_block_resolution() {
        let ds = small_dataset("V0101010101", 4);
        assert_eq!(ds.block_resolution(0), 4);
        assert_eq!(ds.block_resolution(1), 5);
        assert_eq!(ds.block_resolution(2), 6);
        assert_eq!(ds.block_resolution(3), 6);
        assert_eq!(ds.block_resolution(4), 7);
    }

    #[test]
    fn test_block_sample_counts() {
        // Invariant: one block at level h >= bitsperblock holds 2^bitsperblock
        // samples; below it, 2^h.
        let ds = small_dataset("V010011010", 4);
        for h in 0..=ds.max_resolution() {
            let expect = 1i64 << h.min(ds.bits_per_block());
            assert_eq!(
                ds.block_samples(h).nsamples().inner_product(),
                expect,
                "level {h}"
            );
        }
    }

    #[test]
    fn test_level_sample_counts() {
        let ds = small_dataset("V0101010101", 4);
        for h in 0..=ds.max_resolution() {
            let expect = if h == 0 { 1 } else { 1i64 << (h - 1) };
            assert_eq!(
                ds.level_samples(h).nsamples().inner_product(),
                expect,
                "level {h}"
            );
        }
    }

    #[test]
    fn test_block_logic_samples_cover_their_addresses() {
        let ds = small_dataset("V010101", 2);
        let hz = ds.hzorder();
        for blockid in 0..ds.total_blocks() {
            let samples = ds.block_logic_samples(blockid);
            let first = ds.block_first_address(blockid);
            for addr in first..first + ds.samples_per_block() {
                let p = hz.hz_to_point(addr);
                assert!(
                    samples.logic_box.contains_point(p),
                    "block {blockid} addr {addr} point {p:?} outside {samples:?}"
                );
            }
            assert_eq!(
                samples.nsamples().inner_product() as u64,
                ds.samples_per_block(),
                "block {blockid}"
            );
        }
    }

    #[test]
    fn test_field_lookup_with_params() {
        let ds = small_dataset("V0101", 2);
        let field = ds.field("v?time=7").unwrap();
        assert_eq!(field.name, "v");
        assert_eq!(field.time_override(), Some(7.0));
        assert!(ds.field("nope").is_err());
    }

    proptest::proptest! {
        /// Block lattices hold exactly `2^min(h, bitsperblock)` samples and
        /// every concrete block's addresses fall inside its lattice box, for
        /// arbitrary split schedules.
        #[test]
        fn prop_block_geometry_consistent(
            raw in proptest::collection::vec(0usize..3, 2..10),
            bits in 1i32..5,
        ) {
            let mask: String = std::iter::once('V')
                .chain(raw.iter().map(|&a| char::from_digit(a as u32, 10).unwrap()))
                .collect();
            let maxh = raw.len() as i32;
            proptest::prop_assume!(bits <= maxh);

            let ds = small_dataset(&mask, bits);
            for h in 0..=maxh {
                let expect = 1i64 << h.min(bits);
                proptest::prop_assert_eq!(
                    ds.block_samples(h).nsamples().inner_product(),
                    expect
                );
            }
            for blockid in 0..ds.total_blocks() {
                let samples = ds.block_logic_samples(blockid);
                proptest::prop_assert_eq!(
                    samples.nsamples().inner_product() as u64,
                    ds.samples_per_block()
                );
                let first = ds.block_first_address(blockid);
                let p = ds.hzorder().hz_to_point(first);
                proptest::prop_assert!(samples.logic_box.contains_point(p));
            }
        }
    }

    #[test]
    fn test_open_rejects_bad_bits_per_block() {
        let result = Dataset::open(DatasetConfig {
            name: "bad".into(),
            bitmask: "V01".parse().unwrap(),
            logic_box: None,
            bits_per_block: 5,
            fields: vec![FieldConfig::new("v", DType::scalar(DTypeAtom::U8))],
            timesteps: Timesteps::default(),
            default_access: None,
        });
        assert!(matches!(
            result,
            Err(DatasetError::BadBitsPerBlock { .. })
        ));
    }
}
