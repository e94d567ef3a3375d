use mipstore_dataset::Dataset;
use mipstore_geom::BoxN;

use crate::{BoxQuery, QueryError};

#[derive(Clone, Copy)]
struct StackItem {
    h: i32,
    bounds: BoxN,
}

/// Enumerates the blocks a box query must touch to advance from its current
/// resolution to its end resolution.
///
/// For each level in `(current, end]` the pow-2 box is descended kd-style:
/// depth `h` splits along `bitmask[h]`, halving the box, until the remaining
/// subtree fits inside one block, whose id is emitted if its footprint
/// overlaps the aligned query box. The running hz address tracks the
/// traversal so skipped subtrees just advance it. Block 0 collapses the walk:
/// it covers every level up to `bitsperblock` at once, so after emitting it
/// the level loop jumps straight past them.
pub fn collect_blocks(dataset: &Dataset, query: &BoxQuery) -> Result<Vec<u64>, QueryError> {
    let bits_per_block = dataset.bits_per_block();
    let hzorder = dataset.hzorder();
    let bitmask = dataset.bitmask();

    let mut blocks = Vec::new();

    let mut h = query.current_resolution() + 1;
    while h <= query.end_resolution() {
        if query.aborted.is_aborted() {
            return Err(QueryError::Aborted);
        }

        let level = dataset.level_samples(h);
        let aligned = level.align_box(query.logic_samples().logic_box);
        if !aligned.is_full_dim() {
            h += 1;
            continue;
        }

        let mut hz = hzorder.point_to_hz(level.logic_box.p1);
        let mut stack = vec![StackItem {
            h: if h > 0 { 1 } else { 0 },
            bounds: level.logic_box,
        }];

        while let Some(mut item) = stack.pop() {
            if !item.bounds.strict_intersect(aligned) {
                hz += 1u64 << (h - item.h);
                continue;
            }

            // The subtree fits in one block: emit it.
            if h - item.h <= bits_per_block {
                let blockid = hz >> bits_per_block;
                blocks.push(blockid);

                if blockid == 0 {
                    // Block 0 covers all of levels [0, bitsperblock].
                    h = bits_per_block;
                    break;
                }

                hz += 1u64 << (h - item.h);
                continue;
            }

            let bit = bitmask.axis(item.h);
            let delta = dataset.kd_split_delta(item.h);
            item.h += 1;

            // Push the upper half first so the lower half pops first and
            // addresses stay ascending.
            item.bounds.p1[bit] += delta;
            stack.push(item);
            item.bounds.p1[bit] -= delta;
            item.bounds.p2[bit] -= delta;
            stack.push(item);
        }

        h += 1;
    }

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use mipstore_array::{DType, DTypeAtom};
    use mipstore_dataset::{DatasetConfig, FieldConfig, Timesteps};
    use mipstore_geom::PointN;

    use super::*;
    use crate::{begin_box_query, Aborted, Mode};

    fn dataset(mask: &str, bits_per_block: i32) -> std::sync::Arc<Dataset> {
        Dataset::open(DatasetConfig {
            name: "planner".into(),
            bitmask: mask.parse().unwrap(),
            logic_box: None,
            bits_per_block,
            fields: vec![FieldConfig::new("v", DType::scalar(DTypeAtom::U8))],
            timesteps: Timesteps::default(),
            default_access: None,
        })
        .unwrap()
    }

    fn query_at(
        ds: &Dataset,
        p1: [i64; 2],
        p2: [i64; 2],
        end_resolution: i32,
    ) -> BoxQuery {
        let mut q = BoxQuery::new(
            BoxN::new(PointN::from_slice(&p1), PointN::from_slice(&p2)),
            ds.field("v").unwrap(),
            0.0,
            Mode::Read,
            Aborted::new(),
        )
        .with_end_resolutions(vec![end_resolution]);
        begin_box_query(ds, &mut q).unwrap();
        q
    }

    #[test]
    fn test_full_box_touches_every_block() {
        let ds = dataset("V01010101", 4);
        let q = query_at(&ds, [0, 0], [16, 16], ds.max_resolution());
        let mut blocks = collect_blocks(&ds, &q).unwrap();
        blocks.sort_unstable();
        blocks.dedup();
        // 256 samples / 16 per block.
        assert_eq!(blocks, (0..16).collect::<Vec<u64>>());
    }

    #[test]
    fn test_small_box_touches_few_blocks() {
        let ds = dataset("V0101010101", 4);
        let full = collect_blocks(&ds, &query_at(&ds, [0, 0], [32, 32], 10)).unwrap();
        let corner = collect_blocks(&ds, &query_at(&ds, [0, 0], [4, 4], 10)).unwrap();
        assert!(corner.len() < full.len());
        // Every corner block also shows up in the full sweep.
        for b in &corner {
            assert!(full.contains(b));
        }
    }

    #[test]
    fn test_coarse_query_stops_at_block_zero() {
        let ds = dataset("V01010101", 4);
        let q = query_at(&ds, [0, 0], [16, 16], 3);
        assert_eq!(collect_blocks(&ds, &q).unwrap(), vec![0]);
    }

    #[test]
    fn test_resume_excludes_done_levels() {
        let ds = dataset("V01010101", 4);
        let mut q = query_at(&ds, [0, 0], [16, 16], ds.max_resolution());
        // Pretend the coarse pass already ran.
        q.set_current_resolution(6);
        let blocks = collect_blocks(&ds, &q).unwrap();
        assert!(!blocks.contains(&0));
        for &b in &blocks {
            assert!(ds.block_resolution(b) > 6);
        }
    }

    #[test]
    fn test_aborted_planner_bails() {
        let ds = dataset("V01010101", 4);
        let q = query_at(&ds, [0, 0], [16, 16], 8);
        q.aborted.abort();
        assert!(matches!(collect_blocks(&ds, &q), Err(QueryError::Aborted)));
    }
}
