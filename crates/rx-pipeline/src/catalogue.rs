//! Selection catalogue: fiducial volume, optical and slice gates, muon
//! candidate cuts and the software-trigger run boundary.
//!
//! Everything here is a pure function of scalar inputs; the stages vectorise
//! them over columns. Cuts compare in `f32`, the precision the inputs are
//! stored in.

use rx_core::{Error, Result, SampleOrigin};
use rx_frame::Node;

// ---------------------------------------------------------------------------
// Fiducial volume
// ---------------------------------------------------------------------------

/// Lower and upper `x` bound of the fiducial volume (cm).
pub const FIDUCIAL_X: (f32, f32) = (5.0, 251.0);
/// Lower and upper `y` bound of the fiducial volume (cm).
pub const FIDUCIAL_Y: (f32, f32) = (-110.0, 110.0);
/// Lower and upper `z` bound of the fiducial volume (cm).
pub const FIDUCIAL_Z: (f32, f32) = (20.0, 986.0);
/// Dead-wire region excluded by [`in_fiducial_volume_with_gap`]. Both edges
/// stay inside the volume.
pub const FIDUCIAL_GAP_Z: (f32, f32) = (675.0, 775.0);

/// Box containment with inclusive bounds. NaN coordinates are outside.
pub fn in_fiducial_volume(x: f32, y: f32, z: f32) -> bool {
    x >= FIDUCIAL_X.0
        && x <= FIDUCIAL_X.1
        && y >= FIDUCIAL_Y.0
        && y <= FIDUCIAL_Y.1
        && z >= FIDUCIAL_Z.0
        && z <= FIDUCIAL_Z.1
}

/// [`in_fiducial_volume`] minus the open interval `675 < z < 775`.
pub fn in_fiducial_volume_with_gap(x: f32, y: f32, z: f32) -> bool {
    in_fiducial_volume(x, y, z) && (z <= FIDUCIAL_GAP_Z.0 || z >= FIDUCIAL_GAP_Z.1)
}

// ---------------------------------------------------------------------------
// Event-level gates
// ---------------------------------------------------------------------------

/// Optical filter: beam-window light strictly above this.
pub const MIN_PE_BEAM: f32 = 0.0;
/// Optical filter: veto light strictly below this.
pub const MAX_PE_VETO: f32 = 20.0;
/// Minimum topological score of the selected slice (exclusive).
pub const MIN_TOPOLOGICAL_SCORE: f32 = 0.06;
/// Minimum fraction of slice hits contained in the volume.
pub const MIN_CONTAINED_FRACTION: f32 = 0.7;
/// Minimum fraction of slice hits clustered into PFPs.
pub const MIN_CLUSTER_FRACTION: f32 = 0.5;

/// Optical dataset gate.
///
/// Beam-on and external data always pass. With `only_mc` the light cuts
/// apply to overlay simulation only; otherwise to every simulated origin.
pub fn passes_dataset_gate(origin: SampleOrigin, pe_beam: f32, pe_veto: f32, only_mc: bool) -> bool {
    let gated = if only_mc {
        origin == SampleOrigin::MonteCarlo
    } else {
        !matches!(origin, SampleOrigin::Data | SampleOrigin::External)
    };
    !gated || (pe_beam > MIN_PE_BEAM && pe_veto < MAX_PE_VETO)
}

/// Exactly one reconstructed slice with a usable topological score.
pub fn is_single_good_slice(num_slices: i64, topological_score: f32) -> bool {
    num_slices == 1 && topological_score > MIN_TOPOLOGICAL_SCORE
}

/// Containment and clustering quality of the selected slice.
pub fn passes_slice_quality(contained_fraction: f32, cluster_fraction: f32) -> bool {
    contained_fraction >= MIN_CONTAINED_FRACTION && cluster_fraction >= MIN_CLUSTER_FRACTION
}

/// Runs before this one read the pre-scale software trigger counter.
pub const SOFTWARE_TRIGGER_RUN_BOUNDARY: i64 = 16880;

/// Whether a simulated event fired the software trigger.
pub fn software_trigger_for_run(run: i64, pre: i64, post: i64) -> bool {
    if run < SOFTWARE_TRIGGER_RUN_BOUNDARY { pre > 0 } else { post > 0 }
}

// ---------------------------------------------------------------------------
// Muon candidates
// ---------------------------------------------------------------------------

/// Track-vs-shower score above which a PFP is track-like.
pub const MUON_MIN_TRACK_SCORE: f32 = 0.8;
/// Minimum log-likelihood-ratio PID score.
pub const MUON_MIN_LLR: f32 = 0.2;
/// Minimum track length (cm).
pub const MUON_MIN_LENGTH: f32 = 10.0;
/// Maximum start distance from the reconstructed vertex (cm).
pub const MUON_MAX_VERTEX_DISTANCE: f32 = 4.0;
/// PFP hierarchy generation of a primary daughter.
pub const MUON_GENERATION: u32 = 2;

/// Per-PFP inputs of the muon candidate cut.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[allow(missing_docs)]
pub struct MuonTrack {
    pub score: f32,
    pub llr: f32,
    pub length: f32,
    pub distance: f32,
    pub generation: u32,
    pub hits_u: i32,
    pub hits_v: i32,
    pub hits_y: i32,
    pub start: [f32; 3],
    pub end: [f32; 3],
}

/// Identification cuts; all thresholds are strict.
pub fn passes_muon_id(track: &MuonTrack) -> bool {
    track.score > MUON_MIN_TRACK_SCORE
        && track.llr > MUON_MIN_LLR
        && track.length > MUON_MIN_LENGTH
        && track.distance < MUON_MAX_VERTEX_DISTANCE
        && track.generation == MUON_GENERATION
}

/// Hits on every plane, start and end inside the fiducial volume.
pub fn is_fiducial_track(track: &MuonTrack) -> bool {
    track.hits_u > 0
        && track.hits_v > 0
        && track.hits_y > 0
        && in_fiducial_volume(track.start[0], track.start[1], track.start[2])
        && in_fiducial_volume(track.end[0], track.end[1], track.end[2])
}

/// Full muon candidate cut.
pub fn is_muon_candidate(track: &MuonTrack) -> bool {
    passes_muon_id(track) && is_fiducial_track(track)
}

// ---------------------------------------------------------------------------
// Masked list helpers
// ---------------------------------------------------------------------------

/// Keep the elements whose mask entry is true. A short mask drops the tail.
pub fn compact<T: Clone>(values: &[T], mask: &[bool]) -> Vec<T> {
    values.iter().zip(mask).filter(|(_, keep)| **keep).map(|(v, _)| v.clone()).collect()
}

/// [`compact`] followed by an element-wise map.
pub fn transform_by_mask<T, U>(values: &[T], mask: &[bool], f: impl Fn(&T) -> U) -> Vec<U> {
    values.iter().zip(mask).filter(|(_, keep)| **keep).map(|(v, _)| f(v)).collect()
}

// ---------------------------------------------------------------------------
// Named selections
// ---------------------------------------------------------------------------

/// Inclusive νμ CC selection over the processed flags.
pub const NUMU_CC_SELECTION: &str = "quality_event && software_trigger && has_muon";

/// The νμ CC selection expression, provided every node defines its inputs.
pub fn numu_cc_selection<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Result<String> {
    const INPUTS: [&str; 3] = ["quality_event", "software_trigger", "has_muon"];
    for node in nodes {
        if let Some(missing) = INPUTS.iter().find(|c| !node.has_column(c)) {
            return Err(Error::Column(format!(
                "selection input '{missing}' is not defined for {}",
                node.describe()
            )));
        }
    }
    Ok(NUMU_CC_SELECTION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rx_frame::{Column, Table};

    #[test]
    fn fiducial_bounds_are_inclusive() {
        assert!(in_fiducial_volume(5.0, -110.0, 20.0));
        assert!(in_fiducial_volume(251.0, 110.0, 986.0));
        assert!(!in_fiducial_volume(4.99, 0.0, 500.0));
        assert!(!in_fiducial_volume(100.0, 0.0, 986.5));
        assert!(!in_fiducial_volume(f32::NAN, 0.0, 500.0));
    }

    #[test]
    fn gap_excludes_only_its_interior() {
        assert!(in_fiducial_volume(100.0, 0.0, 700.0));
        assert!(!in_fiducial_volume_with_gap(100.0, 0.0, 700.0));
        assert!(in_fiducial_volume_with_gap(100.0, 0.0, 675.0));
        assert!(in_fiducial_volume_with_gap(100.0, 0.0, 775.0));
        assert!(!in_fiducial_volume_with_gap(100.0, 0.0, 675.5));
    }

    #[test]
    fn dataset_gate_by_origin() {
        assert!(passes_dataset_gate(SampleOrigin::Data, 0.0, 100.0, false));
        assert!(passes_dataset_gate(SampleOrigin::External, 0.0, 100.0, false));
        assert!(!passes_dataset_gate(SampleOrigin::Dirt, 0.0, 100.0, false));
        assert!(passes_dataset_gate(SampleOrigin::Dirt, 0.0, 100.0, true));
        assert!(passes_dataset_gate(SampleOrigin::MonteCarlo, 1.0, 19.9, true));
        assert!(!passes_dataset_gate(SampleOrigin::MonteCarlo, 1.0, 20.0, true));
    }

    #[test]
    fn slice_gates() {
        assert!(is_single_good_slice(1, 0.07));
        assert!(!is_single_good_slice(1, 0.06));
        assert!(!is_single_good_slice(2, 0.9));
        assert!(passes_slice_quality(0.7, 0.5));
        assert!(!passes_slice_quality(0.69, 0.9));
    }

    #[test]
    fn software_trigger_switches_at_boundary() {
        assert!(software_trigger_for_run(16879, 1, 0));
        assert!(!software_trigger_for_run(16880, 1, 0));
        assert!(software_trigger_for_run(16880, 0, 1));
    }

    fn good_track() -> MuonTrack {
        MuonTrack {
            score: 0.9,
            llr: 0.5,
            length: 50.0,
            distance: 1.0,
            generation: 2,
            hits_u: 10,
            hits_v: 10,
            hits_y: 10,
            start: [100.0, 0.0, 100.0],
            end: [120.0, 0.0, 140.0],
        }
    }

    #[test]
    fn muon_cuts_are_strict() {
        assert!(is_muon_candidate(&good_track()));
        assert!(!is_muon_candidate(&MuonTrack { length: 10.0, ..good_track() }));
        assert!(!is_muon_candidate(&MuonTrack { llr: 0.2, ..good_track() }));
        assert!(!is_muon_candidate(&MuonTrack { distance: 4.0, ..good_track() }));
        assert!(!is_muon_candidate(&MuonTrack { generation: 3, ..good_track() }));
        assert!(!is_muon_candidate(&MuonTrack { hits_v: 0, ..good_track() }));
        assert!(!is_muon_candidate(&MuonTrack { end: [300.0, 0.0, 140.0], ..good_track() }));
    }

    #[test]
    fn masked_helpers() {
        let mask = [true, false, true];
        assert_eq!(compact(&[1, 2, 3], &mask), vec![1, 3]);
        assert_eq!(transform_by_mask(&[1.0f64, 2.0, 3.0], &mask, |v| v.cos()), vec![1.0f64.cos(), 3.0f64.cos()]);
        assert!(compact::<i32>(&[], &[]).is_empty());
    }

    #[test]
    fn selection_requires_processed_flags() {
        let t = Table::from_columns(vec![
            ("quality_event".into(), Column::Bool(vec![true])),
            ("software_trigger".into(), Column::Bool(vec![true])),
        ])
        .unwrap();
        let partial = Node::from_table(t);
        assert!(numu_cc_selection([&partial]).is_err());
        let full = partial.define("has_muon", &[], |t| Ok(Column::Bool(vec![true; t.num_rows()]))).unwrap();
        assert_eq!(numu_cc_selection([&full]).unwrap(), NUMU_CC_SELECTION);
    }
}
