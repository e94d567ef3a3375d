//! The dataset model.
//!
//! A [`Dataset`] owns everything that is fixed once a volume is opened: the
//! HZ [`Bitmask`](mipstore_geom::Bitmask), the field set, the time axis, and
//! the precomputed per-level and per-block sample geometry that query
//! planning leans on. Datasets are immutable after open and shared as
//! `Arc<Dataset>` across query and I/O threads.

mod dataset;
mod errors;
mod field;
mod guess;
mod hzconv;
mod manifest;
mod tiled;
mod timesteps;

pub use dataset::Dataset;
pub use errors::DatasetError;
pub use field::Field;
pub use guess::GuessParams;
pub use hzconv::{LevelSteps, PointTables};
pub use manifest::{DatasetConfig, FieldConfig};
pub use tiled::{TiledConfig, TiledDataset};
pub use timesteps::Timesteps;
