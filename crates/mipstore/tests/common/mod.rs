#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use mipstore::{
    create_access, Aborted, AccessConfig, BlockAccess, BoxN, BoxQuery, Dataset, DatasetConfig,
    DType, DTypeAtom, FieldConfig, Mode, PointN, Timesteps,
};

/// 1024x1024 `uint8` dataset with hz-packed blocks of 2^10 samples.
pub fn dataset_1k(name: &str) -> Arc<Dataset> {
    let bitmask = format!("V{}", "01".repeat(10));
    Dataset::open(DatasetConfig {
        name: name.into(),
        bitmask: bitmask.parse().unwrap(),
        logic_box: None,
        bits_per_block: 10,
        fields: vec![FieldConfig::new("v", DType::scalar(DTypeAtom::U8))],
        timesteps: Timesteps::default(),
        default_access: None,
    })
    .unwrap()
}

/// Small 16x16 dataset for block-level tests.
pub fn dataset_16(name: &str, bits_per_block: i32) -> Arc<Dataset> {
    Dataset::open(DatasetConfig {
        name: name.into(),
        bitmask: "V01010101".parse().unwrap(),
        logic_box: None,
        bits_per_block,
        fields: vec![FieldConfig::new("v", DType::scalar(DTypeAtom::U8))],
        timesteps: Timesteps::default(),
        default_access: None,
    })
    .unwrap()
}

pub fn disk_access(dataset: &Arc<Dataset>, dir: &Path) -> Arc<dyn BlockAccess> {
    create_access(
        dataset,
        &AccessConfig::Disk {
            path: dir.join("blocks"),
            path_template: None,
            chmod: "rw".to_owned(),
        },
    )
    .unwrap()
}

pub fn box_2d(p1: [i64; 2], p2: [i64; 2]) -> BoxN {
    BoxN::new(PointN::from_slice(&p1), PointN::from_slice(&p2))
}

pub fn read_query(dataset: &Dataset, bounds: BoxN, end_resolutions: Vec<i32>) -> BoxQuery {
    BoxQuery::new(
        bounds,
        dataset.field("v").unwrap(),
        0.0,
        Mode::Read,
        Aborted::new(),
    )
    .with_end_resolutions(end_resolutions)
}

pub fn write_query(dataset: &Dataset, bounds: BoxN, value: f64) -> BoxQuery {
    let mut query = BoxQuery::new(
        bounds,
        dataset.field("v").unwrap(),
        0.0,
        Mode::Write,
        Aborted::new(),
    );
    mipstore::begin_box_query(dataset, &mut query).unwrap();
    query.allocate_buffer_if_needed().unwrap();
    query.buffer.as_mut().unwrap().fill(value);
    query
}
