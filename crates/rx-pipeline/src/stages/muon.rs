//! Muon candidate selection over reconstructed PFP tracks.

use rx_core::{Result, SampleOrigin};
use rx_frame::{Column, Node, Table};

use crate::catalogue::{MuonTrack, is_muon_candidate, transform_by_mask};
use crate::stage::{Stage, constant_bool, constant_i32, define_or_replace, lists_or_empty};

/// Per-candidate projections: `(output, track column)`.
pub const MUON_FEATURES: [(&str, &str); 10] = [
    ("muon_trk_score_v", "track_shower_scores"),
    ("muon_trk_llr_pid_v", "trk_llr_pid_v"),
    ("muon_trk_start_x_v", "track_start_x"),
    ("muon_trk_start_y_v", "track_start_y"),
    ("muon_trk_start_z_v", "track_start_z"),
    ("muon_trk_end_x_v", "track_end_x"),
    ("muon_trk_end_y_v", "track_end_y"),
    ("muon_trk_end_z_v", "track_end_z"),
    ("muon_trk_length_v", "track_length"),
    ("muon_trk_distance_v", "track_distance_to_vertex"),
];

/// Columns read by the candidate mask.
pub const MUON_MASK_INPUTS: [&str; 14] = [
    "track_shower_scores",
    "trk_llr_pid_v",
    "track_length",
    "track_distance_to_vertex",
    "pfp_generations",
    "pfp_num_plane_hits_U",
    "pfp_num_plane_hits_V",
    "pfp_num_plane_hits_Y",
    "track_start_x",
    "track_start_y",
    "track_start_z",
    "track_end_x",
    "track_end_y",
    "track_end_z",
];

fn candidate_mask(t: &Table) -> Result<Vec<Vec<bool>>> {
    let lists: Vec<Vec<Vec<f64>>> =
        MUON_MASK_INPUTS.iter().map(|c| lists_or_empty(t, c)).collect::<Result<_>>()?;
    let at = |k: usize, i: usize, j: usize| lists[k][i].get(j).copied().unwrap_or(f64::NAN);
    Ok((0..t.num_rows())
        .map(|i| {
            (0..lists[0][i].len())
                .map(|j| {
                    let track = MuonTrack {
                        score: at(0, i, j) as f32,
                        llr: at(1, i, j) as f32,
                        length: at(2, i, j) as f32,
                        distance: at(3, i, j) as f32,
                        generation: lists[4][i].get(j).map_or(0, |g| *g as u32),
                        hits_u: lists[5][i].get(j).map_or(0, |h| *h as i32),
                        hits_v: lists[6][i].get(j).map_or(0, |h| *h as i32),
                        hits_y: lists[7][i].get(j).map_or(0, |h| *h as i32),
                        start: [at(8, i, j) as f32, at(9, i, j) as f32, at(10, i, j) as f32],
                        end: [at(11, i, j) as f32, at(12, i, j) as f32, at(13, i, j) as f32],
                    };
                    is_muon_candidate(&track)
                })
                .collect()
        })
        .collect())
}

/// Defines `muon_mask`, the masked per-candidate features,
/// `muon_track_costheta`, `n_muons_tot` and `has_muon`.
///
/// Without `track_shower_scores` there are no candidates: `n_muons_tot` is 0
/// and `has_muon` false.
#[derive(Debug, Clone, Copy, Default)]
pub struct MuonSelectionStage;

impl Stage for MuonSelectionStage {
    fn name(&self) -> &'static str {
        "muon"
    }

    fn process(&self, node: Node, _origin: SampleOrigin) -> Result<Node> {
        if !node.has_column("track_shower_scores") {
            let node = define_or_replace(&node, "n_muons_tot", &[], constant_i32(0))?;
            return define_or_replace(&node, "has_muon", &[], constant_bool(false));
        }

        let mut node = define_or_replace(&node, "muon_mask", &["track_shower_scores"], |t: &Table| {
            Ok(Column::ListBool(candidate_mask(t)?))
        })?;
        for (output, source) in MUON_FEATURES {
            if !node.has_column(source) {
                continue;
            }
            let src = source.to_string();
            node = define_or_replace(&node, output, &["muon_mask", source], move |t: &Table| {
                let mask = bool_lists(t, "muon_mask")?;
                let values = t.f64_lists(&src)?;
                Ok(Column::ListF32(
                    values.iter().zip(&mask).map(|(v, m)| transform_by_mask(v, m, |x| *x as f32)).collect(),
                ))
            })?;
        }
        if node.has_column("pfp_generations") {
            node = define_or_replace(&node, "muon_pfp_generation_v", &["muon_mask", "pfp_generations"], |t: &Table| {
                let mask = bool_lists(t, "muon_mask")?;
                let gens = t.f64_lists("pfp_generations")?;
                Ok(Column::ListU32(
                    gens.iter().zip(&mask).map(|(g, m)| transform_by_mask(g, m, |x| *x as u32)).collect(),
                ))
            })?;
        }
        node = define_or_replace(&node, "muon_track_costheta", &["muon_mask"], |t: &Table| {
            let mask = bool_lists(t, "muon_mask")?;
            let theta = lists_or_empty(t, "track_theta")?;
            Ok(Column::ListF32(
                theta.iter().zip(&mask).map(|(th, m)| transform_by_mask(th, m, |x| x.cos() as f32)).collect(),
            ))
        })?;
        node = define_or_replace(&node, "n_muons_tot", &["muon_mask"], |t: &Table| {
            let mask = bool_lists(t, "muon_mask")?;
            Ok(Column::I32(mask.iter().map(|m| m.iter().filter(|keep| **keep).count() as i32).collect()))
        })?;
        define_or_replace(&node, "has_muon", &["n_muons_tot"], |t: &Table| {
            Ok(Column::Bool(t.i64s("n_muons_tot")?.into_iter().map(|n| n > 0).collect()))
        })
    }
}

fn bool_lists(t: &Table, name: &str) -> Result<Vec<Vec<bool>>> {
    Ok(t.f64_lists(name)?.into_iter().map(|l| l.into_iter().map(|v| v != 0.0).collect()).collect())
}
