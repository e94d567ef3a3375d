//! Integer geometry and HZ-curve addressing.
//!
//! Everything a multi-resolution dataset needs to reason about *where*
//! samples live: N-dimensional integer points and boxes, the split-schedule
//! [`Bitmask`], the [`HzOrder`] space-filling curve built from it, and
//! [`LogicSamples`] lattices describing which points of a box a resolution
//! level actually holds. No I/O happens here; datasets and queries build on
//! these types.

mod bitmask;
mod boxn;
mod frustum;
mod hzorder;
mod point;
mod samples;
mod util;

pub use bitmask::{Bitmask, BitmaskParseError};
pub use boxn::BoxN;
pub use frustum::Frustum;
pub use hzorder::HzOrder;
pub use point::{PointN, MAX_POINT_DIM};
pub use samples::LogicSamples;
pub use util::{align_right, is_aligned, lcm, log2};
