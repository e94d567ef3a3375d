//! Query execution for mipstore datasets.
//!
//! The pieces fit together like this: a [`BoxQuery`] describes what the user
//! wants (a box, a field, a time, a ladder of target resolutions). Beginning
//! it aligns the box to the first target level; executing it asks the
//! planner which blocks that level range touches, dispatches a
//! [`BlockQuery`] per block through a [`BlockAccess`] backend, and merges
//! every completed block into the query buffer. Advancing it moves to the
//! next target resolution and runs again. Everything polls a shared
//! [`Aborted`] token so a stale query can be dropped mid-flight.

mod abort;
mod access;
mod block;
mod boxq;
mod errors;
mod insert;
mod merge;
mod planner;
mod pointq;
mod status;
mod tiled;

pub use abort::Aborted;
pub use access::{AccessError, AccessResult, BlockAccess};
pub use block::{execute_block_query, BlockHandle, BlockQuery};
pub use boxq::{begin_box_query, execute_box_query, next_box_query, BoxQuery};
pub use errors::QueryError;
pub use insert::insert_samples;
pub use planner::collect_blocks;
pub use pointq::{execute_point_query, PointQuery};
pub use status::{Mode, QueryStatus};
pub use tiled::{begin_tiled_box_query, execute_tiled_box_query, next_tiled_box_query};
