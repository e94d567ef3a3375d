//! Progressive multi-resolution storage for large N-dimensional sampled
//! fields.
//!
//! A dataset orders its samples along an HZ curve so that any axis-aligned
//! box can be answered at a chosen resolution by touching only a handful of
//! spatially-local blocks, and progressively: a coarse pass answers fast,
//! each further pass refines it.
//!
//! ```no_run
//! use mipstore::{
//!     begin_box_query, create_access, execute_box_query, next_box_query,
//!     AccessConfig, Aborted, BoxN, BoxQuery, Mode, PointN,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let dataset = mipstore::open_dataset("/data/volume".as_ref())?;
//! let access = create_access(
//!     &dataset,
//!     &serde_json::from_str::<AccessConfig>(r#"{"type":"disk","path":"/data/volume/blocks"}"#)?,
//! )?;
//!
//! let mut query = BoxQuery::new(
//!     BoxN::new(PointN::xy(0, 0), PointN::xy(512, 512)),
//!     dataset.field("temperature")?,
//!     0.0,
//!     Mode::Read,
//!     Aborted::new(),
//! )
//! .with_end_resolutions(vec![12, 16, dataset.max_resolution()]);
//!
//! begin_box_query(&dataset, &mut query)?;
//! loop {
//!     execute_box_query(&dataset, &access, &mut query).await?;
//!     // query.buffer now holds this resolution's samples.
//!     next_box_query(&dataset, &mut query)?;
//!     if query.ok() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::{path::Path, sync::Arc};

pub use mipstore_access::{
    create_access, create_access_from_value, create_tile_access, execute_box_query_on_server,
    read_block_bytes, write_block_bytes, AccessConfig, BlockFilter, Codec, DiskAccess,
    FilterAccess, IdentityFilter, MultiplexAccess, NetworkAccess, RamAccess, TileAccess,
};
pub use mipstore_array::{Array, ArrayError, DType, DTypeAtom, DTypeParseError, Layout};
pub use mipstore_dataset::{
    Dataset, DatasetConfig, DatasetError, Field, FieldConfig, GuessParams, TiledConfig,
    TiledDataset, Timesteps,
};
pub use mipstore_geom::{
    Bitmask, BitmaskParseError, BoxN, Frustum, HzOrder, LogicSamples, PointN, MAX_POINT_DIM,
};
pub use mipstore_query::{
    begin_box_query, begin_tiled_box_query, collect_blocks, execute_block_query,
    execute_box_query, execute_point_query, execute_tiled_box_query, insert_samples,
    next_box_query, next_tiled_box_query, Aborted, AccessError, AccessResult, BlockAccess,
    BlockHandle, BlockQuery, BoxQuery, Mode, PointQuery, QueryError, QueryStatus,
};

/// Name of the manifest file inside a dataset directory.
pub const MANIFEST_NAME: &str = "dataset.json";

/// Opens the dataset stored in `dir` (reads its `dataset.json`).
pub fn open_dataset(dir: &Path) -> Result<Arc<Dataset>, DatasetError> {
    let config = DatasetConfig::load(&dir.join(MANIFEST_NAME))?;
    Dataset::open(config)
}

/// Creates a dataset directory: writes the manifest and opens it.
pub fn create_dataset(dir: &Path, config: DatasetConfig) -> Result<Arc<Dataset>, DatasetError> {
    std::fs::create_dir_all(dir)?;
    config.save(&dir.join(MANIFEST_NAME))?;
    Dataset::open(config)
}

/// The backend a dataset asks for: its manifest's `default_access` if
/// declared, otherwise plain block files under `<dir>/blocks`.
pub fn create_default_access(
    dataset: &Arc<Dataset>,
    dir: &Path,
) -> AccessResult<Arc<dyn BlockAccess>> {
    match dataset.default_access() {
        Some(value) => create_access_from_value(dataset, value),
        None => create_access(
            dataset,
            &AccessConfig::Disk {
                path: dir.join("blocks"),
                path_template: None,
                chmod: "rw".to_owned(),
            },
        ),
    }
}

/// Builds a box query with the field resolved by name (which may carry
/// `?key=value` parameters).
pub fn create_box_query(
    dataset: &Dataset,
    logic_box: BoxN,
    field_name: &str,
    time: f64,
    mode: Mode,
    aborted: Aborted,
) -> Result<BoxQuery, DatasetError> {
    let field = dataset.field(field_name)?;
    Ok(BoxQuery::new(logic_box, field, time, mode, aborted))
}
