//! Reconstruction-level event flags.

use rx_core::{Result, SampleOrigin};
use rx_frame::{Column, Node, Table};

use crate::catalogue::{
    in_fiducial_volume_with_gap, is_single_good_slice, passes_dataset_gate, passes_slice_quality,
    software_trigger_for_run,
};
use crate::stage::{Stage, bools_or, constant_bool, define_if_absent, define_or_replace, f32s_or, i64s_or, xyz};

/// Prefix of the space-charge-corrected reconstructed vertex.
pub const RECO_VERTEX: &str = "reco_neutrino_vertex_sce";

/// Count PFPs of one hierarchy generation into `name`, unless already present.
///
/// Without `pfp_generations` the count is 0.
pub fn ensure_generation_count(node: Node, name: &str, generation: u32) -> Result<Node> {
    define_if_absent(node, name, &[], move |t: &Table| {
        let gens = crate::stage::lists_or_empty(t, "pfp_generations")?;
        Ok(Column::I32(
            gens.iter().map(|g| g.iter().filter(|v| **v as u32 == generation).count() as i32).collect(),
        ))
    })
}

/// Resolve `software_trigger` to a boolean column.
///
/// Simulation reads the pre/post-scale counters (`software_trigger_pre_ext`
/// and `_post_ext` first, then `_pre` and `_post`) and switches at the run
/// boundary. Otherwise an existing `software_trigger` becomes `!= 0`, and a
/// sample without one passes.
pub fn ensure_software_trigger(node: Node, origin: SampleOrigin) -> Result<Node> {
    if origin == SampleOrigin::MonteCarlo {
        let counters = [
            ("software_trigger_pre_ext", "software_trigger_post_ext"),
            ("software_trigger_pre", "software_trigger_post"),
        ];
        if let Some((pre, post)) = counters.into_iter().find(|(pre, post)| node.has_column(pre) && node.has_column(post)) {
            return define_or_replace(&node, "software_trigger", &[pre, post], move |t: &Table| {
                let run = i64s_or(t, "run", 0)?;
                let pre = t.i64s(pre)?;
                let post = t.i64s(post)?;
                Ok(Column::Bool((0..t.num_rows()).map(|i| software_trigger_for_run(run[i], pre[i], post[i])).collect()))
            });
        }
    }
    if node.has_column("software_trigger") {
        node.redefine("software_trigger", &["software_trigger"], |t: &Table| {
            Ok(Column::Bool(t.i64s("software_trigger")?.into_iter().map(|v| v != 0).collect()))
        })
    } else {
        node.define("software_trigger", &[], constant_bool(true))
    }
}

/// Defines `in_reco_fiducial`, `n_pfps_gen2`, `n_pfps_gen3`, the resolved
/// `software_trigger` and the `quality_event` conjunction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconstructionStage;

impl Stage for ReconstructionStage {
    fn name(&self) -> &'static str {
        "reconstruction"
    }

    fn process(&self, node: Node, origin: SampleOrigin) -> Result<Node> {
        let node = define_or_replace(&node, "in_reco_fiducial", &[], |t: &Table| {
            let [x, y, z] = xyz(t, RECO_VERTEX)?;
            Ok(Column::Bool((0..t.num_rows()).map(|i| in_fiducial_volume_with_gap(x[i], y[i], z[i])).collect()))
        })?;
        let node = ensure_generation_count(node, "n_pfps_gen2", 2)?;
        let node = ensure_generation_count(node, "n_pfps_gen3", 3)?;
        let node = ensure_software_trigger(node, origin)?;
        define_or_replace(&node, "quality_event", &["in_reco_fiducial", "n_pfps_gen2"], move |t: &Table| {
            let pe_beam = f32s_or(t, "optical_filter_pe_beam", 0.0)?;
            let pe_veto = f32s_or(t, "optical_filter_pe_veto", f32::INFINITY)?;
            let slices = i64s_or(t, "num_slices", 0)?;
            let topo = f32s_or(t, "topological_score", 0.0)?;
            let contained = f32s_or(t, "contained_fraction", 0.0)?;
            let cluster = f32s_or(t, "slice_cluster_fraction", 0.0)?;
            let fv = bools_or(t, "in_reco_fiducial", false)?;
            let gen2 = t.i64s("n_pfps_gen2")?;
            Ok(Column::Bool(
                (0..t.num_rows())
                    .map(|i| {
                        passes_dataset_gate(origin, pe_beam[i], pe_veto[i], true)
                            && is_single_good_slice(slices[i], topo[i])
                            && gen2[i] > 1
                            && fv[i]
                            && passes_slice_quality(contained[i], cluster[i])
                    })
                    .collect(),
            ))
        })
    }
}
