use mipstore_geom::{Bitmask, BoxN, Frustum};

/// Caller knobs for [`guess_end_resolutions`].
#[derive(Clone, Copy, Debug, Default)]
pub struct GuessParams {
    /// Signed bias applied to the guessed final resolution.
    pub quality: i32,
    /// How many levels below the final resolution the first pass starts.
    pub progression: i32,
}

const MAX_3D_TEXTURE_SIZE: f64 = 2048.0;

/// Maps a view onto an ascending list of target resolutions.
///
/// Projects the box corners to screen space, measures the on-screen extent
/// per axis, and walks the resolution down while the dataset would deliver
/// more than one sample per pixel (geometric mean of the two densest axes).
/// 3D volumes are additionally capped to the largest texture a GPU upload
/// can take. The result always ends at the chosen resolution, stepping by
/// `pdim` from `progression` levels below it.
pub fn guess_end_resolutions(
    bitmask: &Bitmask,
    logic_to_screen: Option<&Frustum>,
    logic_box: BoxN,
    params: GuessParams,
    even_levels: bool,
    min_resolution: i32,
) -> Vec<i32> {
    let maxh = bitmask.max_resolution();
    let pdim = bitmask.pdim();
    let mut endh = maxh;

    if let Some(map) = logic_to_screen {
        if logic_box.is_full_dim() {
            let screen: Vec<_> = logic_box
                .corners()
                .into_iter()
                .map(|c| {
                    let mut v = [0.0f64; 3];
                    for d in 0..pdim.min(3) {
                        v[d] = c[d] as f64;
                    }
                    map.project(v)
                })
                .collect();

            // Longest projected edge per axis.
            let mut screen_distance = vec![0.0f64; pdim];
            for (i0, i1, axis) in BoxN::edges(pdim) {
                if let (Some(a), Some(b)) = (screen[i0], screen[i1]) {
                    let d = ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
                    screen_distance[axis] = screen_distance[axis].max(d);
                }
            }

            let mut nsamples: Vec<f64> = (0..pdim).map(|d| logic_box.size()[d] as f64).collect();
            while endh > 0 {
                let mut spp: Vec<f64> = (0..pdim)
                    .map(|d| {
                        if screen_distance[d] > 0.0 {
                            nsamples[d] / screen_distance[d]
                        } else {
                            f64::INFINITY
                        }
                    })
                    .collect();
                spp.sort_by(f64::total_cmp);

                let density = if pdim >= 2 {
                    (spp[0] * spp[1]).sqrt()
                } else {
                    spp[0]
                };
                let mut good = density < 1.0;
                if pdim == 3 && good {
                    good = nsamples.iter().all(|&n| n <= MAX_3D_TEXTURE_SIZE);
                }
                if good {
                    break;
                }

                // Dropping one level halves the samples along its split axis.
                nsamples[bitmask.axis(endh)] *= 0.5;
                endh -= 1;
            }
        }
    }

    endh = (endh + params.quality).clamp(0, maxh);

    let mut ret = vec![(endh - params.progression).clamp(0, maxh)];
    loop {
        let last = *ret.last().expect("non-empty");
        if last >= endh {
            break;
        }
        ret.push((last + pdim as i32).clamp(0, endh));
    }

    if even_levels {
        for r in &mut ret {
            *r = (*r >> 1) << 1;
        }
    }
    for r in &mut ret {
        *r = (*r).clamp(min_resolution, maxh);
    }
    ret.dedup();
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmask(mask: &str) -> Bitmask {
        mask.parse().unwrap()
    }

    #[test]
    fn test_no_view_defaults_to_maxh() {
        let mask = bitmask("V01010101");
        let box_ = BoxN::from_dims(mask.pow2_dims());
        assert_eq!(
            guess_end_resolutions(&mask, None, box_, GuessParams::default(), false, 0),
            vec![8]
        );
    }

    #[test]
    fn test_progression_builds_ascending_list() {
        let mask = bitmask("V01010101");
        let box_ = BoxN::from_dims(mask.pow2_dims());
        let params = GuessParams {
            quality: 0,
            progression: 4,
        };
        assert_eq!(
            guess_end_resolutions(&mask, None, box_, params, false, 0),
            vec![4, 6, 8]
        );
    }

    #[test]
    fn test_small_viewport_lowers_resolution() {
        // 256x256 dataset drawn on ~16x16 pixels: the walk stops one level
        // past parity (strictly less than one sample per pixel).
        let mask = bitmask("V0101010101010101");
        let box_ = BoxN::from_dims(mask.pow2_dims());
        let view = Frustum::scaling(16.0 / 256.0, 16.0 / 256.0);
        let got = guess_end_resolutions(&mask, Some(&view), box_, GuessParams::default(), false, 0);
        assert_eq!(got, vec![7]);
    }

    #[test]
    fn test_quality_bias_and_clamp() {
        let mask = bitmask("V0101");
        let box_ = BoxN::from_dims(mask.pow2_dims());
        let params = GuessParams {
            quality: 10,
            progression: 0,
        };
        assert_eq!(
            guess_end_resolutions(&mask, None, box_, params, false, 0),
            vec![4]
        );
    }

    #[test]
    fn test_even_rounding() {
        let mask = bitmask("V01010101");
        let box_ = BoxN::from_dims(mask.pow2_dims());
        let params = GuessParams {
            quality: -1,
            progression: 4,
        };
        // Raw list would be [3, 5, 7]; rounded down to even and deduped.
        assert_eq!(
            guess_end_resolutions(&mask, None, box_, params, true, 0),
            vec![2, 4, 6]
        );
    }
}
