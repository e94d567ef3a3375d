//! Command line arguments for `miptool`.

use std::path::PathBuf;

use argh::FromArgs;
use mipstore::{BoxN, PointN};

/// Create and inspect mipstore datasets.
#[derive(FromArgs)]
pub(crate) struct Args {
    #[argh(subcommand)]
    pub(crate) subc: Subcommand,
}

#[derive(FromArgs)]
#[argh(subcommand)]
pub(crate) enum Subcommand {
    Create(CreateArgs),
    Write(WriteArgs),
    Read(ReadArgs),
    Blocks(BlocksArgs),
}

/// Create an empty dataset directory.
#[derive(FromArgs)]
#[argh(subcommand, name = "create")]
pub(crate) struct CreateArgs {
    #[argh(positional, description = "dataset directory")]
    pub(crate) dir: PathBuf,

    #[argh(option, description = "per-axis sample counts, e.g. 1024,1024")]
    pub(crate) dims: String,

    #[argh(option, description = "field name", default = "String::from(\"data\")")]
    pub(crate) field: String,

    #[argh(option, description = "field dtype (default uint8)", default = "String::from(\"uint8\")")]
    pub(crate) dtype: String,

    #[argh(option, description = "log2 of samples per block", default = "16")]
    pub(crate) bitsperblock: i32,
}

/// Fill a box with a constant value at full resolution.
#[derive(FromArgs)]
#[argh(subcommand, name = "write")]
pub(crate) struct WriteArgs {
    #[argh(positional, description = "dataset directory")]
    pub(crate) dir: PathBuf,

    #[argh(option, description = "box as x1,x2,y1,y2[,z1,z2] (exclusive upper)")]
    pub(crate) bounds: String,

    #[argh(option, description = "sample value to store")]
    pub(crate) value: f64,

    #[argh(option, description = "field name (default: first field)")]
    pub(crate) field: Option<String>,

    #[argh(option, description = "timestep", default = "0.0")]
    pub(crate) time: f64,
}

/// Read a box and summarize (or dump) its samples.
#[derive(FromArgs)]
#[argh(subcommand, name = "read")]
pub(crate) struct ReadArgs {
    #[argh(positional, description = "dataset directory")]
    pub(crate) dir: PathBuf,

    #[argh(option, description = "box as x1,x2,y1,y2[,z1,z2] (exclusive upper)")]
    pub(crate) bounds: String,

    #[argh(option, description = "target resolution (default: max)")]
    pub(crate) resolution: Option<i32>,

    #[argh(option, description = "field name (default: first field)")]
    pub(crate) field: Option<String>,

    #[argh(option, description = "timestep", default = "0.0")]
    pub(crate) time: f64,

    #[argh(option, description = "write the raw sample bytes to this file")]
    pub(crate) output: Option<PathBuf>,
}

/// List the blocks a box query would touch.
#[derive(FromArgs)]
#[argh(subcommand, name = "blocks")]
pub(crate) struct BlocksArgs {
    #[argh(positional, description = "dataset directory")]
    pub(crate) dir: PathBuf,

    #[argh(option, description = "box as x1,x2,y1,y2[,z1,z2] (exclusive upper)")]
    pub(crate) bounds: String,

    #[argh(option, description = "target resolution (default: max)")]
    pub(crate) resolution: Option<i32>,
}

pub(crate) fn parse_dims(text: &str) -> anyhow::Result<PointN> {
    let coords: Vec<i64> = text
        .split(',')
        .map(|part| part.trim().parse())
        .collect::<Result<_, _>>()?;
    anyhow::ensure!(
        !coords.is_empty() && coords.len() <= mipstore::MAX_POINT_DIM,
        "dims need 1..={} axes",
        mipstore::MAX_POINT_DIM
    );
    Ok(PointN::from_slice(&coords))
}

pub(crate) fn parse_box(text: &str) -> anyhow::Result<BoxN> {
    let coords: Vec<i64> = text
        .split(',')
        .map(|part| part.trim().parse())
        .collect::<Result<_, _>>()?;
    anyhow::ensure!(
        coords.len() % 2 == 0 && !coords.is_empty() && coords.len() / 2 <= mipstore::MAX_POINT_DIM,
        "box needs x1,x2 pairs per axis"
    );
    let pdim = coords.len() / 2;
    let mut p1 = PointN::zero(pdim);
    let mut p2 = PointN::zero(pdim);
    for d in 0..pdim {
        p1[d] = coords[2 * d];
        p2[d] = coords[2 * d + 1];
    }
    Ok(BoxN::new(p1, p2))
}
