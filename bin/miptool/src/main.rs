//! Command line tool for creating and inspecting mipstore datasets.

mod args;

use anyhow::Context;
use args::{Args, BlocksArgs, CreateArgs, ReadArgs, Subcommand, WriteArgs};
use mipstore::{
    begin_box_query, collect_blocks, execute_box_query, Aborted, Bitmask, BoxQuery,
    DatasetConfig, FieldConfig, Mode, Timesteps,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Args = argh::from_env();
    let inner = || -> anyhow::Result<()> {
        match args.subc {
            Subcommand::Create(subc) => create(subc),
            Subcommand::Write(subc) => write(subc),
            Subcommand::Read(subc) => read(subc),
            Subcommand::Blocks(subc) => blocks(subc),
        }
    };
    if let Err(e) = inner() {
        eprintln!("ERROR\n{e:?}");
        std::process::exit(1);
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

fn create(subc: CreateArgs) -> anyhow::Result<()> {
    let dims = args::parse_dims(&subc.dims)?;
    let bitmask = Bitmask::guess(dims)?;
    let config = DatasetConfig {
        name: subc
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_owned()),
        bitmask,
        logic_box: None,
        bits_per_block: subc.bitsperblock,
        fields: vec![FieldConfig::new(subc.field, subc.dtype.parse()?)],
        timesteps: Timesteps::default(),
        default_access: None,
    };
    let dataset = mipstore::create_dataset(&subc.dir, config)?;
    println!(
        "created {} ({} maxh={} bitsperblock={})",
        subc.dir.display(),
        dataset.bitmask(),
        dataset.max_resolution(),
        dataset.bits_per_block()
    );
    Ok(())
}

fn open(dir: &std::path::Path, field: Option<&str>) -> anyhow::Result<(std::sync::Arc<mipstore::Dataset>, mipstore::Field)> {
    let dataset = mipstore::open_dataset(dir)
        .with_context(|| format!("opening dataset at {}", dir.display()))?;
    let field = match field {
        Some(name) => dataset.field(name)?,
        None => dataset.default_field().clone(),
    };
    Ok((dataset, field))
}

fn write(subc: WriteArgs) -> anyhow::Result<()> {
    let (dataset, field) = open(&subc.dir, subc.field.as_deref())?;
    let access = mipstore::create_default_access(&dataset, &subc.dir)?;
    let bounds = args::parse_box(&subc.bounds)?;

    let mut query = BoxQuery::new(bounds, field, subc.time, Mode::Write, Aborted::new());
    begin_box_query(&dataset, &mut query)?;
    query.allocate_buffer_if_needed()?;
    query
        .buffer
        .as_mut()
        .expect("just allocated")
        .fill(subc.value);

    runtime()?.block_on(execute_box_query(&dataset, &access, &mut query))?;
    println!(
        "wrote {} samples = {}",
        query.logic_samples().nsamples().inner_product(),
        subc.value
    );
    Ok(())
}

fn read(subc: ReadArgs) -> anyhow::Result<()> {
    let (dataset, field) = open(&subc.dir, subc.field.as_deref())?;
    let access = mipstore::create_default_access(&dataset, &subc.dir)?;
    let bounds = args::parse_box(&subc.bounds)?;
    let resolution = subc.resolution.unwrap_or_else(|| dataset.max_resolution());

    let mut query = BoxQuery::new(bounds, field, subc.time, Mode::Read, Aborted::new())
        .with_end_resolutions(vec![resolution]);
    begin_box_query(&dataset, &mut query)?;
    runtime()?.block_on(execute_box_query(&dataset, &access, &mut query))?;

    let buffer = query.buffer.as_ref().expect("read pass allocated");
    println!(
        "resolution {} nsamples {} ({} bytes, dtype {})",
        query.current_resolution(),
        buffer.dims(),
        buffer.as_bytes().len(),
        buffer.dtype()
    );
    if let Some(output) = subc.output {
        std::fs::write(&output, buffer.as_bytes())?;
        println!("raw samples -> {}", output.display());
    }
    Ok(())
}

fn blocks(subc: BlocksArgs) -> anyhow::Result<()> {
    let (dataset, field) = open(&subc.dir, None)?;
    let bounds = args::parse_box(&subc.bounds)?;
    let resolution = subc.resolution.unwrap_or_else(|| dataset.max_resolution());

    let mut query = BoxQuery::new(bounds, field, 0.0, Mode::Read, Aborted::new())
        .with_end_resolutions(vec![resolution]);
    begin_box_query(&dataset, &mut query)?;

    let blocks = collect_blocks(&dataset, &query)?;
    println!("{} blocks up to resolution {resolution}", blocks.len());
    for blockid in blocks {
        let samples = dataset.block_logic_samples(blockid);
        println!(
            "  block {blockid:>8}  h={:<2} box {}",
            dataset.block_resolution(blockid),
            samples.logic_box
        );
    }
    Ok(())
}
