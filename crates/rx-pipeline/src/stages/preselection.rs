//! Preselection flags.

use rx_core::{Result, SampleOrigin};
use rx_frame::{Column, Node, Table};

use crate::catalogue::{
    in_fiducial_volume_with_gap, is_single_good_slice, passes_dataset_gate, passes_slice_quality,
};
use crate::stage::{Stage, define_or_replace, f32s_or, i64s_or, xyz};
use crate::stages::reco::{RECO_VERTEX, ensure_generation_count, ensure_software_trigger};

/// The preselection sub-flags, in cutflow order.
pub const PRESELECTION_FLAGS: [&str; 5] = ["pass_pre", "pass_flash", "pass_fv", "pass_mu", "pass_topo"];

/// Defines `pass_pre`, `pass_flash`, `pass_fv`, `pass_mu`, `pass_topo` and
/// their conjunction `pass_final`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreselectionStage;

impl Stage for PreselectionStage {
    fn name(&self) -> &'static str {
        "preselection"
    }

    fn process(&self, node: Node, origin: SampleOrigin) -> Result<Node> {
        let node = ensure_generation_count(node, "n_pfps_gen2", 2)?;
        let node = ensure_software_trigger(node, origin)?;

        let node = define_or_replace(&node, "pass_pre", &["software_trigger"], move |t: &Table| {
            let pe_beam = f32s_or(t, "optical_filter_pe_beam", 0.0)?;
            let pe_veto = f32s_or(t, "optical_filter_pe_veto", f32::INFINITY)?;
            let swtrig = t.bools("software_trigger")?;
            Ok(Column::Bool(
                (0..t.num_rows())
                    .map(|i| passes_dataset_gate(origin, pe_beam[i], pe_veto[i], false) && swtrig[i])
                    .collect(),
            ))
        })?;
        let node = define_or_replace(&node, "pass_flash", &["n_pfps_gen2"], |t: &Table| {
            let slices = i64s_or(t, "num_slices", 0)?;
            let topo = f32s_or(t, "topological_score", 0.0)?;
            let gen2 = t.i64s("n_pfps_gen2")?;
            Ok(Column::Bool(
                (0..t.num_rows()).map(|i| is_single_good_slice(slices[i], topo[i]) && gen2[i] > 1).collect(),
            ))
        })?;
        let node = define_or_replace(&node, "pass_fv", &[], |t: &Table| {
            let [x, y, z] = xyz(t, RECO_VERTEX)?;
            Ok(Column::Bool((0..t.num_rows()).map(|i| in_fiducial_volume_with_gap(x[i], y[i], z[i])).collect()))
        })?;
        let node = define_or_replace(&node, "pass_mu", &[], |t: &Table| {
            let n = i64s_or(t, "n_muons_tot", 0)?;
            Ok(Column::Bool(n.into_iter().map(|v| v > 0).collect()))
        })?;
        let node = define_or_replace(&node, "pass_topo", &[], |t: &Table| {
            let contained = f32s_or(t, "contained_fraction", 0.0)?;
            let cluster = f32s_or(t, "slice_cluster_fraction", 0.0)?;
            Ok(Column::Bool((0..t.num_rows()).map(|i| passes_slice_quality(contained[i], cluster[i])).collect()))
        })?;
        define_or_replace(&node, "pass_final", &PRESELECTION_FLAGS, |t: &Table| {
            let mut all = vec![true; t.num_rows()];
            for flag in PRESELECTION_FLAGS {
                for (acc, v) in all.iter_mut().zip(t.bools(flag)?) {
                    *acc &= v;
                }
            }
            Ok(Column::Bool(all))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Five events, each failing one more flag than the one before.
    fn events() -> Table {
        Table::from_columns(vec![
            ("optical_filter_pe_beam".into(), Column::F32(vec![50.0, 0.0, 50.0, 50.0, 50.0])),
            ("optical_filter_pe_veto".into(), Column::F32(vec![1.0; 5])),
            ("num_slices".into(), Column::I32(vec![1, 1, 2, 1, 1])),
            ("topological_score".into(), Column::F32(vec![0.5; 5])),
            ("pfp_generations".into(), Column::ListU32(vec![vec![2, 2]; 5])),
            ("reco_neutrino_vertex_sce_x".into(), Column::F32(vec![100.0; 5])),
            ("reco_neutrino_vertex_sce_y".into(), Column::F32(vec![0.0; 5])),
            ("reco_neutrino_vertex_sce_z".into(), Column::F32(vec![500.0, 500.0, 500.0, 700.0, 500.0])),
            ("n_muons_tot".into(), Column::I32(vec![1, 1, 1, 1, 0])),
            ("contained_fraction".into(), Column::F32(vec![0.9; 5])),
            ("slice_cluster_fraction".into(), Column::F32(vec![0.9; 5])),
        ])
        .unwrap()
    }

    #[test]
    fn flags_and_conjunction() {
        let t = PreselectionStage
            .process(Node::from_table(events()), SampleOrigin::MonteCarlo)
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(t.bools("pass_pre").unwrap(), vec![true, false, true, true, true]);
        assert_eq!(t.bools("pass_flash").unwrap(), vec![true, true, false, true, true]);
        assert_eq!(t.bools("pass_fv").unwrap(), vec![true, true, true, false, true]);
        assert_eq!(t.bools("pass_mu").unwrap(), vec![true, true, true, true, false]);
        assert_eq!(t.bools("pass_final").unwrap(), vec![true, false, false, false, false]);
    }

    #[test]
    fn beam_off_data_skips_optical_gate() {
        let t = PreselectionStage
            .process(Node::from_table(events()), SampleOrigin::External)
            .unwrap()
            .collect()
            .unwrap();
        assert!(t.bools("pass_pre").unwrap().into_iter().all(|v| v));
    }
}
