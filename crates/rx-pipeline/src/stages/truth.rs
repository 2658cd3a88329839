//! Truth-level classification of simulated events.
//!
//! Overlay simulation gets fiducial containment, final-state hadron counts,
//! the interaction-mode category and three channel categorisations. Every
//! other origin gets the same columns filled with stub values, so downstream
//! code never branches on column presence.

use rx_core::{Result, SampleOrigin};
use rx_frame::{Column, Node, Table};

use crate::catalogue::in_fiducial_volume;
use crate::stage::{Stage, bools_or, constant_bool, constant_i32, define_or_replace, f32s_or, i64s_or, xyz};

/// Truth flavour and final-state counts of one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct TruthEvent {
    pub in_fiducial: bool,
    pub nu_pdg: i64,
    /// 0 = charged current, 1 = neutral current.
    pub ccnc: i64,
    pub n_strange: i64,
    pub n_proton: i64,
    pub n_pion: i64,
    pub n_pi_zero: i64,
    pub n_gamma: i64,
    pub kaon_plus: i64,
    pub kaon_minus: i64,
    pub kaon_zero: i64,
    pub lambda: i64,
    pub sigma_plus: i64,
    pub sigma_zero: i64,
    pub sigma_minus: i64,
}

impl TruthEvent {
    fn is_cc(&self) -> bool {
        self.ccnc == 0
    }

    fn is_nc(&self) -> bool {
        self.ccnc == 1
    }

    fn is_numu(&self) -> bool {
        self.nu_pdg.abs() == 14
    }

    fn is_nue(&self) -> bool {
        self.nu_pdg.abs() == 12
    }
}

/// Strange hadrons counted in `mc_n_strange`.
pub const STRANGE_COUNTS: [&str; 7] = [
    "count_kaon_plus",
    "count_kaon_minus",
    "count_kaon_zero",
    "count_lambda",
    "count_sigma_plus",
    "count_sigma_zero",
    "count_sigma_minus",
];

/// Legacy and short names of the truth columns.
pub const TRUTH_ALIASES: [(&str, &str); 7] = [
    ("inclusive_strange_channels", "inclusive_strange_channel_category"),
    ("exclusive_strange_channels", "exclusive_strange_channel_category"),
    ("channel_definitions", "channel_definition_category"),
    ("genie_int_mode", "interaction_mode_category"),
    ("incl_channel", "inclusive_strange_channel_category"),
    ("excl_channel", "exclusive_strange_channel_category"),
    ("channel_def", "channel_definition_category"),
];

/// Generator modes kept as-is; anything else maps to -1.
pub fn interaction_mode_category(mode: i64) -> i32 {
    match mode {
        0 | 1 | 2 | 3 | 10 => mode as i32,
        _ => -1,
    }
}

/// Coarse strangeness categorisation.
pub fn inclusive_category(e: &TruthEvent) -> i32 {
    if !e.in_fiducial {
        return 98;
    }
    if e.is_nc() {
        return 31;
    }
    if e.is_cc() && e.is_nue() {
        return 30;
    }
    if e.is_cc() && e.is_numu() {
        return match (e.n_strange, e.n_proton, e.n_pion) {
            (1, _, _) => 10,
            (s, _, _) if s > 1 => 11,
            (_, np, 0) if np >= 1 => 20,
            (_, 0, npi) if npi >= 1 => 21,
            (_, np, npi) if np >= 1 && npi >= 1 => 22,
            _ => 23,
        };
    }
    99
}

/// Strange-hadron content of νμ CC events.
pub fn exclusive_category(e: &TruthEvent) -> i32 {
    if !e.in_fiducial {
        return 98;
    }
    if e.is_nc() {
        return 31;
    }
    if e.is_cc() && e.is_nue() {
        return 30;
    }
    if !(e.is_cc() && e.is_numu()) {
        return 99;
    }
    let s = e.n_strange;
    let charged_kaon = e.kaon_plus == 1 || e.kaon_minus == 1;
    let charged_sigma = e.sigma_plus == 1 || e.sigma_minus == 1;
    match s {
        0 => 32,
        1 if charged_kaon => 50,
        1 if e.kaon_zero == 1 => 51,
        1 if e.lambda == 1 => 52,
        1 if charged_sigma => 53,
        2 if e.lambda == 1 && charged_kaon => 54,
        2 if charged_sigma && e.kaon_zero == 1 => 55,
        2 if charged_sigma && charged_kaon => 56,
        2 if e.lambda == 1 && e.kaon_zero == 1 => 57,
        2 if e.kaon_plus == 1 && e.kaon_minus == 1 => 58,
        1 if e.sigma_zero == 1 => 59,
        2 if e.sigma_zero == 1 && e.kaon_plus == 1 => 60,
        _ => 61,
    }
}

/// Analysis channel definition; 15 and 16 are the signal.
pub fn channel_definition(e: &TruthEvent) -> i32 {
    if !e.in_fiducial {
        return if e.nu_pdg == 0 { 1 } else { 2 };
    }
    if e.is_nc() {
        return 14;
    }
    if e.is_cc() && e.is_numu() && e.n_strange > 0 {
        return if e.n_strange == 1 { 15 } else { 16 };
    }
    if e.is_cc() && e.is_nue() {
        return 17;
    }
    if e.is_cc() && e.is_numu() {
        return if e.n_pion == 0 && e.n_proton > 0 {
            10
        } else if e.n_pion == 1 && e.n_pi_zero == 0 {
            11
        } else if e.n_pi_zero > 0 || e.n_gamma >= 2 {
            12
        } else if e.n_pion > 1 {
            13
        } else {
            18
        };
    }
    99
}

/// Signal channels of [`channel_definition`].
pub fn is_signal_channel(channel: i32) -> bool {
    matches!(channel, 15 | 16)
}

/// Minimum slice purity of a pure signal slice (exclusive).
pub const MIN_SIGNAL_PURITY: f32 = 0.5;
/// Minimum slice completeness of a pure signal slice (exclusive).
pub const MIN_SIGNAL_COMPLETENESS: f32 = 0.1;

/// Per-row truth records; missing count columns read as zero.
fn truth_events(t: &Table) -> Result<Vec<TruthEvent>> {
    let n = t.num_rows();
    let fv = bools_or(t, "in_fiducial", false)?;
    let pdg = i64s_or(t, "neutrino_pdg", 0)?;
    let ccnc = i64s_or(t, "interaction_ccnc", -1)?;
    let count = |name: &str| i64s_or(t, name, 0);
    let [kp, km, k0, lam, sp, s0, sm] = [
        count("count_kaon_plus")?,
        count("count_kaon_minus")?,
        count("count_kaon_zero")?,
        count("count_lambda")?,
        count("count_sigma_plus")?,
        count("count_sigma_zero")?,
        count("count_sigma_minus")?,
    ];
    let proton = count("count_proton")?;
    let pi_plus = count("count_pi_plus")?;
    let pi_minus = count("count_pi_minus")?;
    let pi_zero = count("count_pi_zero")?;
    let gamma = count("count_gamma")?;
    Ok((0..n)
        .map(|i| TruthEvent {
            in_fiducial: fv[i],
            nu_pdg: pdg[i],
            ccnc: ccnc[i],
            n_strange: kp[i] + km[i] + k0[i] + lam[i] + sp[i] + s0[i] + sm[i],
            n_proton: proton[i],
            n_pion: pi_plus[i] + pi_minus[i],
            n_pi_zero: pi_zero[i],
            n_gamma: gamma[i],
            kaon_plus: kp[i],
            kaon_minus: km[i],
            kaon_zero: k0[i],
            lambda: lam[i],
            sigma_plus: sp[i],
            sigma_zero: s0[i],
            sigma_minus: sm[i],
        })
        .collect())
}

fn category_column(f: fn(&TruthEvent) -> i32) -> impl Fn(&Table) -> Result<Column> + Send + Sync + 'static {
    move |t: &Table| Ok(Column::I32(truth_events(t)?.iter().map(f).collect()))
}

/// Stub category for origins without generator truth.
fn stub_coarse(origin: SampleOrigin) -> i32 {
    match origin {
        SampleOrigin::Data => 0,
        SampleOrigin::External => 1,
        SampleOrigin::Dirt => 2,
        _ => 99,
    }
}

fn stub_channel(origin: SampleOrigin) -> i32 {
    match origin {
        SampleOrigin::Data => 0,
        SampleOrigin::External | SampleOrigin::Dirt => 1,
        _ => 99,
    }
}

/// Truth classification stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct TruthStage;

impl TruthStage {
    fn simulated(node: Node) -> Result<Node> {
        if !node.has_column("neutrino_vertex_x") {
            tracing::debug!(source = %node.describe(), "no truth vertex; every event is outside the fiducial volume");
        }
        let mut node = define_or_replace(&node, "in_fiducial", &[], |t: &Table| {
            let [x, y, z] = xyz(t, "neutrino_vertex")?;
            Ok(Column::Bool((0..t.num_rows()).map(|i| in_fiducial_volume(x[i], y[i], z[i])).collect()))
        })?;
        node = define_or_replace(&node, "mc_n_strange", &[], |t: &Table| {
            let mut total = vec![0i64; t.num_rows()];
            for name in STRANGE_COUNTS {
                for (acc, v) in total.iter_mut().zip(i64s_or(t, name, 0)?) {
                    *acc += v;
                }
            }
            Ok(Column::I32(total.into_iter().map(|v| v as i32).collect()))
        })?;
        node = define_or_replace(&node, "mc_n_pion", &[], |t: &Table| {
            let plus = i64s_or(t, "count_pi_plus", 0)?;
            let minus = i64s_or(t, "count_pi_minus", 0)?;
            Ok(Column::I32(plus.iter().zip(&minus).map(|(a, b)| (a + b) as i32).collect()))
        })?;
        node = define_or_replace(&node, "mc_n_proton", &[], |t: &Table| {
            Ok(Column::I32(i64s_or(t, "count_proton", 0)?.into_iter().map(|v| v as i32).collect()))
        })?;
        node = define_or_replace(&node, "interaction_mode_category", &[], |t: &Table| {
            let mode = i64s_or(t, "interaction_mode", -1)?;
            Ok(Column::I32(mode.into_iter().map(interaction_mode_category).collect()))
        })?;
        node = define_or_replace(
            &node,
            "inclusive_strange_channel_category",
            &["in_fiducial"],
            category_column(inclusive_category),
        )?;
        node = define_or_replace(
            &node,
            "exclusive_strange_channel_category",
            &["in_fiducial"],
            category_column(exclusive_category),
        )?;
        node = define_or_replace(
            &node,
            "channel_definition_category",
            &["in_fiducial"],
            category_column(channel_definition),
        )?;
        node = define_or_replace(&node, "is_truth_signal", &["channel_definition_category"], |t: &Table| {
            let ch = t.i64s("channel_definition_category")?;
            Ok(Column::Bool(ch.into_iter().map(|c| is_signal_channel(c as i32)).collect()))
        })?;
        define_or_replace(&node, "pure_slice_signal", &["is_truth_signal"], |t: &Table| {
            let signal = t.bools("is_truth_signal")?;
            let purity = f32s_or(t, "neutrino_purity_from_pfp", 0.0)?;
            let completeness = f32s_or(t, "neutrino_completeness_from_pfp", 0.0)?;
            Ok(Column::Bool(
                (0..t.num_rows())
                    .map(|i| signal[i] && purity[i] > MIN_SIGNAL_PURITY && completeness[i] > MIN_SIGNAL_COMPLETENESS)
                    .collect(),
            ))
        })
    }

    fn stub(node: Node, origin: SampleOrigin) -> Result<Node> {
        let mut node = define_or_replace(&node, "in_fiducial", &[], constant_bool(false))?;
        for name in ["mc_n_strange", "mc_n_pion", "mc_n_proton"] {
            node = define_or_replace(&node, name, &[], constant_i32(0))?;
        }
        node = define_or_replace(&node, "interaction_mode_category", &[], constant_i32(-1))?;
        let coarse = stub_coarse(origin);
        node = define_or_replace(&node, "inclusive_strange_channel_category", &[], constant_i32(coarse))?;
        node = define_or_replace(&node, "exclusive_strange_channel_category", &[], constant_i32(coarse))?;
        node = define_or_replace(&node, "channel_definition_category", &[], constant_i32(stub_channel(origin)))?;
        node = define_or_replace(&node, "is_truth_signal", &[], constant_bool(false))?;
        define_or_replace(&node, "pure_slice_signal", &[], constant_bool(false))
    }
}

impl Stage for TruthStage {
    fn name(&self) -> &'static str {
        "truth"
    }

    fn process(&self, node: Node, origin: SampleOrigin) -> Result<Node> {
        let mut node = match origin {
            SampleOrigin::MonteCarlo => Self::simulated(node)?,
            other => Self::stub(node, other)?,
        };
        for (alias, source) in TRUTH_ALIASES {
            if !node.has_column(alias) {
                node = node.alias(alias, source)?;
            }
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numu_cc() -> TruthEvent {
        TruthEvent { in_fiducial: true, nu_pdg: 14, ccnc: 0, ..TruthEvent::default() }
    }

    #[test]
    fn inclusive_ordering() {
        assert_eq!(inclusive_category(&TruthEvent { in_fiducial: false, ..numu_cc() }), 98);
        assert_eq!(inclusive_category(&TruthEvent { ccnc: 1, ..numu_cc() }), 31);
        assert_eq!(inclusive_category(&TruthEvent { nu_pdg: -12, ..numu_cc() }), 30);
        assert_eq!(inclusive_category(&TruthEvent { n_strange: 1, ..numu_cc() }), 10);
        assert_eq!(inclusive_category(&TruthEvent { n_strange: 3, ..numu_cc() }), 11);
        assert_eq!(inclusive_category(&TruthEvent { n_proton: 2, ..numu_cc() }), 20);
        assert_eq!(inclusive_category(&TruthEvent { n_pion: 1, ..numu_cc() }), 21);
        assert_eq!(inclusive_category(&TruthEvent { n_proton: 1, n_pion: 1, ..numu_cc() }), 22);
        assert_eq!(inclusive_category(&numu_cc()), 23);
        assert_eq!(inclusive_category(&TruthEvent { nu_pdg: 16, ..numu_cc() }), 99);
    }

    #[test]
    fn exclusive_hadron_content() {
        let one = |e: TruthEvent| exclusive_category(&TruthEvent { n_strange: 1, ..e });
        let two = |e: TruthEvent| exclusive_category(&TruthEvent { n_strange: 2, ..e });
        assert_eq!(exclusive_category(&numu_cc()), 32);
        assert_eq!(one(TruthEvent { kaon_minus: 1, ..numu_cc() }), 50);
        assert_eq!(one(TruthEvent { kaon_zero: 1, ..numu_cc() }), 51);
        assert_eq!(one(TruthEvent { lambda: 1, ..numu_cc() }), 52);
        assert_eq!(one(TruthEvent { sigma_plus: 1, ..numu_cc() }), 53);
        assert_eq!(two(TruthEvent { lambda: 1, kaon_plus: 1, ..numu_cc() }), 54);
        assert_eq!(two(TruthEvent { sigma_minus: 1, kaon_zero: 1, ..numu_cc() }), 55);
        assert_eq!(two(TruthEvent { sigma_plus: 1, kaon_minus: 1, ..numu_cc() }), 56);
        assert_eq!(two(TruthEvent { lambda: 1, kaon_zero: 1, ..numu_cc() }), 57);
        assert_eq!(two(TruthEvent { kaon_plus: 1, kaon_minus: 1, ..numu_cc() }), 58);
        assert_eq!(one(TruthEvent { sigma_zero: 1, ..numu_cc() }), 59);
        assert_eq!(two(TruthEvent { sigma_zero: 1, kaon_plus: 1, ..numu_cc() }), 60);
        assert_eq!(exclusive_category(&TruthEvent { n_strange: 4, ..numu_cc() }), 61);
        assert_eq!(exclusive_category(&TruthEvent { nu_pdg: 16, ..numu_cc() }), 99);
    }

    #[test]
    fn channel_definitions() {
        assert_eq!(channel_definition(&TruthEvent { in_fiducial: false, nu_pdg: 0, ..numu_cc() }), 1);
        assert_eq!(channel_definition(&TruthEvent { in_fiducial: false, ..numu_cc() }), 2);
        assert_eq!(channel_definition(&TruthEvent { ccnc: 1, n_strange: 1, ..numu_cc() }), 14);
        assert_eq!(channel_definition(&TruthEvent { n_strange: 1, ..numu_cc() }), 15);
        assert_eq!(channel_definition(&TruthEvent { n_strange: 2, ..numu_cc() }), 16);
        assert_eq!(channel_definition(&TruthEvent { nu_pdg: 12, ..numu_cc() }), 17);
        assert_eq!(channel_definition(&TruthEvent { n_proton: 1, ..numu_cc() }), 10);
        assert_eq!(channel_definition(&TruthEvent { n_pion: 1, ..numu_cc() }), 11);
        assert_eq!(channel_definition(&TruthEvent { n_pion: 1, n_pi_zero: 1, ..numu_cc() }), 12);
        assert_eq!(channel_definition(&TruthEvent { n_gamma: 2, ..numu_cc() }), 12);
        assert_eq!(channel_definition(&TruthEvent { n_pion: 2, ..numu_cc() }), 13);
        assert_eq!(channel_definition(&numu_cc()), 18);
        assert_eq!(channel_definition(&TruthEvent { ccnc: 2, ..numu_cc() }), 99);
    }

    #[test]
    fn interaction_modes() {
        assert_eq!(interaction_mode_category(10), 10);
        assert_eq!(interaction_mode_category(5), -1);
    }

    fn mc_node() -> Node {
        Node::from_table(
            Table::from_columns(vec![
                ("neutrino_vertex_x".into(), Column::F32(vec![100.0, 100.0])),
                ("neutrino_vertex_y".into(), Column::F32(vec![0.0, 0.0])),
                ("neutrino_vertex_z".into(), Column::F32(vec![500.0, 1500.0])),
                ("neutrino_pdg".into(), Column::I32(vec![14, 14])),
                ("interaction_ccnc".into(), Column::I32(vec![0, 0])),
                ("interaction_mode".into(), Column::I32(vec![1, 1])),
                ("count_kaon_plus".into(), Column::I32(vec![1, 1])),
                ("neutrino_purity_from_pfp".into(), Column::F32(vec![0.9, 0.9])),
                ("neutrino_completeness_from_pfp".into(), Column::F32(vec![0.8, 0.8])),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn simulated_rows_are_classified() {
        let t = TruthStage.process(mc_node(), SampleOrigin::MonteCarlo).unwrap().collect().unwrap();
        assert_eq!(t.bools("in_fiducial").unwrap(), vec![true, false]);
        assert_eq!(t.i64s("mc_n_strange").unwrap(), vec![1, 1]);
        assert_eq!(t.i64s("inclusive_strange_channel_category").unwrap(), vec![10, 98]);
        assert_eq!(t.i64s("exclusive_strange_channel_category").unwrap(), vec![50, 98]);
        assert_eq!(t.i64s("channel_definition_category").unwrap(), vec![15, 2]);
        assert_eq!(t.bools("is_truth_signal").unwrap(), vec![true, false]);
        assert_eq!(t.bools("pure_slice_signal").unwrap(), vec![true, false]);
        assert_eq!(t.i64s("genie_int_mode").unwrap(), vec![1, 1]);
        assert_eq!(t.i64s("channel_def").unwrap(), vec![15, 2]);
    }

    #[test]
    fn other_origins_get_stubs() {
        let t = Table::from_columns(vec![("run".into(), Column::I32(vec![1, 2]))]).unwrap();
        for (origin, coarse, channel) in
            [(SampleOrigin::Data, 0, 0), (SampleOrigin::External, 1, 1), (SampleOrigin::Dirt, 2, 1)]
        {
            let out = TruthStage.process(Node::from_table(t.clone()), origin).unwrap().collect().unwrap();
            assert_eq!(out.bools("in_fiducial").unwrap(), vec![false, false]);
            assert_eq!(out.i64s("mc_n_strange").unwrap(), vec![0, 0]);
            assert_eq!(out.i64s("incl_channel").unwrap(), vec![coarse; 2]);
            assert_eq!(out.i64s("excl_channel").unwrap(), vec![coarse; 2]);
            assert_eq!(out.i64s("channel_def").unwrap(), vec![channel; 2]);
            assert_eq!(out.i64s("interaction_mode_category").unwrap(), vec![-1, -1]);
            assert_eq!(out.bools("pure_slice_signal").unwrap(), vec![false, false]);
        }
    }
}
