//! Column requirements per sample origin.
//!
//! A [`VariableRegistry`] combines the built-in event variables (the columns
//! every processed sample is expected to carry) with columns registered by the
//! caller, either for every origin or for one. [`VariableRegistry::column_plan_for`]
//! resolves them into a [`ColumnPlan`] of required and optional columns.

use std::collections::{BTreeMap, HashSet};

use rx_core::SampleOrigin;

/// Required and optional columns for one origin, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnPlan {
    /// Missing ones are fatal for simulated origins.
    pub required: Vec<String>,
    /// Missing ones are reported only when optional reporting is on.
    pub optional: Vec<String>,
}

/// Generator knobs: `(name, up column, down column)`.
pub const KNOB_VARIATIONS: [(&str, &str, &str); 11] = [
    ("RPA", "knobRPAup", "knobRPAdn"),
    ("CCMEC", "knobCCMECup", "knobCCMECdn"),
    ("AxFFCCQE", "knobAxFFCCQEup", "knobAxFFCCQEdn"),
    ("VecFFCCQE", "knobVecFFCCQEup", "knobVecFFCCQEdn"),
    ("DecayAngMEC", "knobDecayAngMECup", "knobDecayAngMECdn"),
    ("ThetaDelta2Npi", "knobThetaDelta2Npiup", "knobThetaDelta2Npidn"),
    ("ThetaDelta2NRad", "knobThetaDelta2NRadup", "knobThetaDelta2NRaddn"),
    ("NormCCCOH", "knobNormCCCOHup", "knobNormCCCOHdn"),
    ("NormNCCOH", "knobNormNCCOHup", "knobNormNCCOHdn"),
    ("xsr_scc_Fv3", "knobxsr_scc_Fv3up", "knobxsr_scc_Fv3dn"),
    ("xsr_scc_Fa3", "knobxsr_scc_Fa3up", "knobxsr_scc_Fa3dn"),
];

/// Multi-universe weight vectors and their universe count.
pub const MULTI_UNIVERSE_VARIATIONS: [(&str, u32); 4] =
    [("weightsGenie", 500), ("weightsFlux", 500), ("weightsReint", 500), ("weightsPPFX", 500)];

/// Single-knob weight column.
pub const SINGLE_KNOB: &str = "RootinoFix";

const BASE: &[&str] = &["run", "sub", "evt"];

const RECO_EVENT: &[&str] = &[
    "reco_neutrino_vertex_sce_x",
    "reco_neutrino_vertex_sce_y",
    "reco_neutrino_vertex_sce_z",
    "num_slices",
    "slice_num_hits",
    "selection_pass",
    "slice_id",
    "optical_filter_pe_beam",
    "optical_filter_pe_veto",
    "num_pfps",
    "num_tracks",
    "num_showers",
    "event_total_hits",
    "crt_veto",
    "crt_hit_pe",
    "pfp_slice_indices",
    "backtracked_pdg_codes",
    "backtracked_energies",
    "backtracked_track_ids",
    "backtracked_purities",
    "backtracked_completenesses",
    "backtracked_overlay_purities",
    "backtracked_momentum_x",
    "backtracked_momentum_y",
    "backtracked_momentum_z",
    "backtracked_start_x",
    "backtracked_start_y",
    "backtracked_start_z",
    "backtracked_start_time",
    "backtracked_start_wire_U",
    "backtracked_start_wire_V",
    "backtracked_start_wire_Y",
    "backtracked_sce_start_x",
    "backtracked_sce_start_y",
    "backtracked_sce_start_z",
    "backtracked_sce_start_wire_U",
    "backtracked_sce_start_wire_V",
    "backtracked_sce_start_wire_Y",
    "software_trigger",
    "software_trigger_pre",
    "software_trigger_post",
    "software_trigger_pre_ext",
    "software_trigger_post_ext",
    "slice_pdg",
    "pfp_generations",
    "pfp_track_daughters",
    "pfp_shower_daughters",
    "pfp_num_descendents",
    "pfp_vertex_x",
    "pfp_vertex_y",
    "pfp_vertex_z",
    "track_shower_scores",
    "pfp_pdg_codes",
    "pfp_num_hits",
    "pfp_num_plane_hits_U",
    "pfp_num_plane_hits_V",
    "pfp_num_plane_hits_Y",
    "pfp_num_subclusters_U",
    "pfp_num_subclusters_V",
    "pfp_num_subclusters_Y",
    "pfp_max_subhit_fraction_U",
    "pfp_max_subhit_fraction_V",
    "pfp_max_subhit_fraction_Y",
    "total_hits_U",
    "total_hits_V",
    "total_hits_Y",
    "slice_topological_scores",
    "topological_score",
    "slice_cluster_fraction",
    "contained_fraction",
];

const RECO_TRACK: &[&str] = &[
    "track_shower_scores",
    "trk_llr_pid_v",
    "track_length",
    "track_distance_to_vertex",
    "track_start_x",
    "track_start_y",
    "track_start_z",
    "track_end_x",
    "track_end_y",
    "track_end_z",
    "track_theta",
    "track_phi",
    "track_calo_energy_u",
    "track_calo_energy_v",
    "track_calo_energy_y",
];

const PROCESSED: &[&str] = &[
    "in_reco_fiducial",
    "n_pfps_gen2",
    "n_pfps_gen3",
    "quality_event",
    "n_muons_tot",
    "has_muon",
    "muon_trk_score_v",
    "muon_trk_llr_pid_v",
    "muon_trk_start_x_v",
    "muon_trk_start_y_v",
    "muon_trk_start_z_v",
    "muon_trk_end_x_v",
    "muon_trk_end_y_v",
    "muon_trk_end_z_v",
    "muon_trk_length_v",
    "muon_trk_distance_v",
    "muon_pfp_generation_v",
    "muon_track_costheta",
    "base_event_weight",
    "nominal_event_weight",
    "in_fiducial",
    "mc_n_strange",
    "mc_n_pion",
    "mc_n_proton",
    "interaction_mode_category",
    "inclusive_strange_channel_category",
    "exclusive_strange_channel_category",
    "channel_definition_category",
    "is_truth_signal",
    "pure_slice_signal",
    "pass_pre",
    "pass_flash",
    "pass_fv",
    "pass_mu",
    "pass_topo",
    "pass_final",
];

const BLIP: &[&str] = &[
    "blip_id",
    "blip_is_valid",
    "blip_tpc",
    "blip_n_planes",
    "blip_max_wire_span",
    "blip_energy",
    "blip_energy_estar",
    "blip_time",
    "blip_prox_trk_dist",
    "blip_prox_trk_id",
    "blip_in_cylinder",
    "blip_x",
    "blip_y",
    "blip_z",
    "blip_sigma_yz",
    "blip_dx",
    "blip_dyz",
    "blip_charge",
    "blip_lead_g4_id",
    "blip_pdg",
    "blip_process",
    "blip_process_code",
    "blip_vx",
    "blip_vy",
    "blip_vz",
    "blip_e",
    "blip_mass",
    "blip_trk_id",
    "blip_distance_to_vertex",
];

const IMAGE: &[&str] = &[
    "reco_neutrino_vertex_x",
    "reco_neutrino_vertex_y",
    "reco_neutrino_vertex_z",
    "detector_image_u",
    "detector_image_v",
    "detector_image_w",
    "semantic_image_u",
    "semantic_image_v",
    "semantic_image_w",
    "event_detector_image_u",
    "event_detector_image_v",
    "event_detector_image_w",
    "event_semantic_image_u",
    "event_semantic_image_v",
    "event_semantic_image_w",
    "event_adc_u",
    "event_adc_v",
    "event_adc_w",
    "slice_semantic_counts_u",
    "slice_semantic_counts_v",
    "slice_semantic_counts_w",
    "event_semantic_counts_u",
    "event_semantic_counts_v",
    "event_semantic_counts_w",
    "is_vtx_in_image_u",
    "is_vtx_in_image_v",
    "is_vtx_in_image_w",
    "inference_score",
];

const FLASH: &[&str] = &[
    "t0",
    "flash_match_score",
    "flash_total_pe",
    "flash_time",
    "flash_z_centre",
    "flash_z_width",
    "slice_charge",
    "slice_z_centre",
    "charge_light_ratio",
    "flash_slice_z_dist",
    "flash_pe_per_charge",
];

const ENERGY: &[&str] = &[
    "neutrino_energy_0",
    "neutrino_energy_1",
    "neutrino_energy_2",
    "slice_calo_energy_0",
    "slice_calo_energy_1",
    "slice_calo_energy_2",
];

const SLICE: &[&str] = &[
    "original_event_neutrino_hits",
    "event_neutrino_hits",
    "event_muon_hits",
    "event_electron_hits",
    "event_proton_hits",
    "event_charged_pion_hits",
    "event_neutral_pion_hits",
    "event_neutron_hits",
    "event_gamma_hits",
    "event_other_hits",
    "event_charged_kaon_hits",
    "event_neutral_kaon_hits",
    "event_lambda_hits",
    "event_charged_sigma_hits",
    "event_sigma_zero_hits",
    "event_cosmic_hits",
    "slice_neutrino_hits",
    "slice_muon_hits",
    "slice_electron_hits",
    "slice_proton_hits",
    "slice_charged_pion_hits",
    "slice_neutral_pion_hits",
    "slice_neutron_hits",
    "slice_gamma_hits",
    "slice_other_hits",
    "slice_charged_kaon_hits",
    "slice_neutral_kaon_hits",
    "slice_lambda_hits",
    "slice_charged_sigma_hits",
    "slice_sigma_zero_hits",
    "slice_cosmic_hits",
    "pfp_neutrino_hits",
    "pfp_muon_hits",
    "pfp_electron_hits",
    "pfp_proton_hits",
    "pfp_charged_pion_hits",
    "pfp_neutral_pion_hits",
    "pfp_neutron_hits",
    "pfp_gamma_hits",
    "pfp_other_hits",
    "pfp_charged_kaon_hits",
    "pfp_neutral_kaon_hits",
    "pfp_lambda_hits",
    "pfp_charged_sigma_hits",
    "pfp_sigma_zero_hits",
    "pfp_cosmic_hits",
    "neutrino_completeness_from_pfp",
    "neutrino_purity_from_pfp",
];

const TRUTH: &[&str] = &[
    "neutrino_pdg",
    "interaction_ccnc",
    "interaction_mode",
    "interaction_type",
    "neutrino_energy",
    "neutrino_theta",
    "neutrino_pt",
    "target_nucleus_pdg",
    "hit_nucleon_pdg",
    "kinematic_W",
    "kinematic_X",
    "kinematic_Y",
    "kinematic_Q_squared",
    "neutrino_momentum_x",
    "neutrino_momentum_y",
    "neutrino_momentum_z",
    "neutrino_vertex_x",
    "neutrino_vertex_y",
    "neutrino_vertex_z",
    "neutrino_vertex_wire_u",
    "neutrino_vertex_wire_v",
    "neutrino_vertex_wire_w",
    "neutrino_vertex_time",
    "neutrino_sce_vertex_x",
    "neutrino_sce_vertex_y",
    "neutrino_sce_vertex_z",
    "lepton_energy",
    "true_neutrino_momentum_x",
    "true_neutrino_momentum_y",
    "true_neutrino_momentum_z",
    "flux_path_length",
    "flux_parent_pdg",
    "flux_hadron_pdg",
    "flux_decay_mode",
    "flux_decay_vtx_x",
    "flux_decay_vtx_y",
    "flux_decay_vtx_z",
    "flux_decay_mom_x",
    "flux_decay_mom_y",
    "flux_decay_mom_z",
    "numi_baseline",
    "numi_off_axis_angle",
    "bnb_baseline",
    "bnb_off_axis_angle",
    "is_vertex_in_fiducial",
    "count_mu_minus",
    "count_mu_plus",
    "count_e_minus",
    "count_e_plus",
    "count_pi_zero",
    "count_pi_plus",
    "count_pi_minus",
    "count_kaon_plus",
    "count_kaon_minus",
    "count_kaon_zero",
    "count_proton",
    "count_neutron",
    "count_gamma",
    "count_lambda",
    "count_sigma_plus",
    "count_sigma_zero",
    "count_sigma_minus",
    "mc_particle_pdg",
    "mc_particle_trackid",
    "mc_particle_energy",
    "mc_elastic_scatters",
    "mc_inelastic_scatters",
    "mc_momentum_x",
    "mc_momentum_y",
    "mc_momentum_z",
    "mc_end_momentum",
    "mc_start_vertex_x",
    "mc_start_vertex_y",
    "mc_start_vertex_z",
    "mc_end_vertex_x",
    "mc_end_vertex_y",
    "mc_end_vertex_z",
    "mc_particle_final_state",
    "mc_completeness",
    "mc_purity",
    "mc_daughter_pdg",
    "mc_daughter_energy",
    "mc_daughter_process_flat",
    "mc_daughter_process_idx",
    "mc_daughter_mom_x",
    "mc_daughter_mom_y",
    "mc_daughter_mom_z",
    "mc_daughter_vtx_x",
    "mc_daughter_vtx_y",
    "mc_daughter_vtx_z",
    "mc_allchain_primary_index",
    "mc_allchain_trackid",
    "mc_allchain_pdg",
    "mc_allchain_energy",
    "mc_allchain_elastic_scatters",
    "mc_allchain_inelastic_scatters",
    "mc_allchain_momentum_x",
    "mc_allchain_momentum_y",
    "mc_allchain_momentum_z",
    "mc_allchain_end_momentum",
    "mc_allchain_start_vertex_x",
    "mc_allchain_start_vertex_y",
    "mc_allchain_start_vertex_z",
    "mc_allchain_end_vertex_x",
    "mc_allchain_end_vertex_y",
    "mc_allchain_end_vertex_z",
    "mc_allchain_parent_trackid",
    "mc_allchain_process",
    "mc_allchain_final_state",
    "mc_allchain_completeness",
    "mc_allchain_purity",
    "true_transverse_momentum",
    "true_visible_transverse_momentum",
    "true_total_momentum",
    "true_visible_total_momentum",
    "true_visible_energy",
    "neutrino_completeness_from_pfp",
    "neutrino_purity_from_pfp",
    "backtracked_pdg_codes",
    "blip_pdg",
];

/// Append `items` to `out`, skipping anything already in `seen`.
fn extend_unique<'a>(out: &mut Vec<String>, seen: &mut HashSet<String>, items: impl IntoIterator<Item = &'a str>) {
    for item in items {
        if seen.insert(item.to_string()) {
            out.push(item.to_string());
        }
    }
}

/// Registry of per-origin column requirements.
#[derive(Debug, Clone)]
pub struct VariableRegistry {
    builtin: bool,
    report_optional: bool,
    common_required: Vec<String>,
    common_optional: Vec<String>,
    origin_plans: BTreeMap<SampleOrigin, ColumnPlan>,
}

impl Default for VariableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableRegistry {
    /// Registry starting from the built-in event variables.
    pub fn new() -> Self {
        Self { builtin: true, ..Self::empty() }
    }

    /// Registry with no built-in requirements.
    pub fn empty() -> Self {
        Self {
            builtin: false,
            report_optional: false,
            common_required: Vec::new(),
            common_optional: Vec::new(),
            origin_plans: BTreeMap::new(),
        }
    }

    /// Report missing optional columns (off by default).
    pub fn with_optional_reporting(mut self, on: bool) -> Self {
        self.report_optional = on;
        self
    }

    /// Whether missing optional columns are reported.
    pub fn reports_optional(&self) -> bool {
        self.report_optional
    }

    /// Require a column for every origin.
    pub fn include_common_column(&mut self, column: impl Into<String>) {
        self.common_required.push(column.into());
    }

    /// Require columns for every origin.
    pub fn include_common_columns<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.common_required.extend(columns.into_iter().map(Into::into));
    }

    /// Optional column for every origin.
    pub fn include_common_optional_column(&mut self, column: impl Into<String>) {
        self.common_optional.push(column.into());
    }

    /// Optional columns for every origin.
    pub fn include_common_optional_columns<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.common_optional.extend(columns.into_iter().map(Into::into));
    }

    /// Require a column for one origin.
    pub fn include_required_column(&mut self, origin: SampleOrigin, column: impl Into<String>) {
        self.origin_plans.entry(origin).or_default().required.push(column.into());
    }

    /// Require columns for one origin.
    pub fn include_required_columns<I, S>(&mut self, origin: SampleOrigin, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origin_plans.entry(origin).or_default().required.extend(columns.into_iter().map(Into::into));
    }

    /// Optional column for one origin.
    pub fn include_optional_column(&mut self, origin: SampleOrigin, column: impl Into<String>) {
        self.origin_plans.entry(origin).or_default().optional.push(column.into());
    }

    /// Optional columns for one origin.
    pub fn include_optional_columns<I, S>(&mut self, origin: SampleOrigin, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origin_plans.entry(origin).or_default().optional.extend(columns.into_iter().map(Into::into));
    }

    /// Built-in event variables of an origin, deduplicated in group order.
    ///
    /// Simulated origins add the truth group, the knob columns, the
    /// multi-universe vectors and the generator weights.
    pub fn event_variables(origin: SampleOrigin) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for group in [BASE, RECO_EVENT, RECO_TRACK, PROCESSED, BLIP, IMAGE, FLASH, ENERGY, SLICE] {
            extend_unique(&mut out, &mut seen, group.iter().copied());
        }
        if origin.is_simulated() {
            extend_unique(&mut out, &mut seen, TRUTH.iter().copied());
            extend_unique(&mut out, &mut seen, KNOB_VARIATIONS.iter().flat_map(|(_, up, dn)| [*up, *dn]));
            extend_unique(&mut out, &mut seen, MULTI_UNIVERSE_VARIATIONS.iter().map(|(name, _)| *name));
            extend_unique(&mut out, &mut seen, [SINGLE_KNOB, "weightSpline", "weightTune"]);
        }
        out
    }

    /// Resolve the plan of an origin.
    ///
    /// Required: built-in event variables, then common required, then the
    /// origin's required. Optional: common optional, then the origin's
    /// optional, minus anything required. Both lists are deduplicated.
    pub fn column_plan_for(&self, origin: SampleOrigin) -> ColumnPlan {
        let mut plan = ColumnPlan::default();
        let mut required_seen = HashSet::new();
        if self.builtin {
            let builtin = Self::event_variables(origin);
            extend_unique(&mut plan.required, &mut required_seen, builtin.iter().map(String::as_str));
        }
        extend_unique(&mut plan.required, &mut required_seen, self.common_required.iter().map(String::as_str));
        let origin_plan = self.origin_plans.get(&origin);
        if let Some(p) = origin_plan {
            extend_unique(&mut plan.required, &mut required_seen, p.required.iter().map(String::as_str));
        }

        let mut optional_seen = required_seen.clone();
        let origin_optional = origin_plan.map(|p| p.optional.as_slice()).unwrap_or_default();
        extend_unique(
            &mut plan.optional,
            &mut optional_seen,
            self.common_optional.iter().chain(origin_optional).map(String::as_str),
        );
        plan
    }

    /// Required then optional columns of an origin.
    pub fn columns_for(&self, origin: SampleOrigin) -> Vec<String> {
        let plan = self.column_plan_for(origin);
        plan.required.into_iter().chain(plan.optional).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_orders_and_deduplicates() {
        let mut reg = VariableRegistry::empty();
        reg.include_common_columns(["a", "b"]);
        reg.include_required_columns(SampleOrigin::MonteCarlo, ["b", "c"]);
        reg.include_common_optional_columns(["c", "d", "d"]);
        reg.include_optional_column(SampleOrigin::MonteCarlo, "e");
        reg.include_optional_column(SampleOrigin::Data, "f");

        let plan = reg.column_plan_for(SampleOrigin::MonteCarlo);
        assert_eq!(plan.required, vec!["a", "b", "c"]);
        assert_eq!(plan.optional, vec!["d", "e"]);
        assert_eq!(reg.columns_for(SampleOrigin::Data), vec!["a", "b", "c", "d", "f"]);
    }

    #[test]
    fn builtins_depend_on_origin() {
        let data = VariableRegistry::event_variables(SampleOrigin::Data);
        let mc = VariableRegistry::event_variables(SampleOrigin::MonteCarlo);
        assert_eq!(&data[..3], &["run", "sub", "evt"]);
        assert!(!data.iter().any(|c| c == "neutrino_pdg"));
        assert!(mc.iter().any(|c| c == "knobRPAdn"));
        assert!(mc.iter().any(|c| c == "weightsPPFX"));
        assert!(mc.iter().any(|c| c == SINGLE_KNOB));
        let unique: HashSet<_> = mc.iter().collect();
        assert_eq!(unique.len(), mc.len());
        assert_eq!(VariableRegistry::event_variables(SampleOrigin::Dirt), mc);
    }

    #[test]
    fn new_includes_builtins_empty_does_not() {
        assert!(VariableRegistry::empty().column_plan_for(SampleOrigin::Data).required.is_empty());
        assert!(VariableRegistry::new().column_plan_for(SampleOrigin::Data).required.len() > 100);
    }
}
