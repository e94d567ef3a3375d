//! Concrete block backends and their configuration.
//!
//! Everything here implements (or composes) the
//! [`BlockAccess`](mipstore_query::BlockAccess) contract: plain block files
//! on disk, a byte-budgeted RAM LRU, a remote block service client, an
//! ordered multiplex of any of those, and a filter wrapper exposing the
//! transform hook coarse-level pipelines attach to. [`create_access`] builds
//! any of them from a tagged config tree.

mod codec;
mod config;
mod disk;
mod filter;
mod format;
mod multiplex;
mod net;
mod ram;

pub use codec::Codec;
pub use config::{create_access, create_access_from_value, AccessConfig};
pub use disk::DiskAccess;
pub use filter::{BlockFilter, FilterAccess, IdentityFilter};
pub use format::{read_block_bytes, write_block_bytes, BLOCK_FORMAT_VERSION};
pub use multiplex::MultiplexAccess;
pub use net::{create_tile_access, execute_box_query_on_server, NetworkAccess, TileAccess};
pub use ram::RamAccess;
