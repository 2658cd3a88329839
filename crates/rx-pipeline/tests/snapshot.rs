use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use approx::assert_relative_eq;
use rx_core::SampleOrigin;
use rx_frame::{Column, Table, WriteOptions, read_table, write_table};
use rx_hub::meta::{read_cutflow, read_dictionary, read_totals};
use rx_hub::{EventsTree, HubDataFrame, HubLayout};
use rx_pipeline::{
    BeamPeriodRegistry, CatalogueFile, SnapshotOptions, SnapshotPipelineBuilder, VariableRegistry,
};

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("rarexsec_pipeline_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn write_input(path: &Path, cols: Vec<(&str, Column)>) {
    let table = Table::from_columns(cols.into_iter().map(|(n, c)| (n.to_string(), c)).collect()).unwrap();
    write_table(path, &table, &WriteOptions::tree("nuselection/EventSelectionFilter")).unwrap();
}

fn ids(n: usize, run: i32) -> Vec<(&'static str, Column)> {
    vec![
        ("run", Column::I32(vec![run; n])),
        ("sub", Column::I32(vec![3; n])),
        ("evt", Column::I32((0..n as i32).map(|e| 42 + e).collect())),
    ]
}

fn registry(json: serde_json::Value) -> BeamPeriodRegistry {
    let mut reg = BeamPeriodRegistry::new();
    CatalogueFile::from_json_str(&json.to_string()).unwrap().register(&mut reg).unwrap();
    reg
}

fn fast() -> SnapshotOptions {
    SnapshotOptions { batch_pause: Duration::ZERO, ..SnapshotOptions::default() }
}

fn run1() -> Vec<String> {
    vec!["run1".to_string()]
}

fn events(out: &Path) -> Table {
    let parts = EventsTree::partitions(&HubLayout::new(out).events_dir()).unwrap();
    let tables: Vec<Table> = parts.iter().map(|p| read_table(p).unwrap()).collect();
    Table::concat(&tables).unwrap()
}

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[test]
fn single_mc_sample_without_filter() {
    let base = tmp_dir("single_mc");
    let mut cols = ids(1, 12001);
    cols.extend([
        ("interaction_mode", Column::I32(vec![1])),
        ("interaction_ccnc", Column::I32(vec![0])),
        ("neutrino_pdg", Column::I32(vec![14])),
        ("count_kaon_plus", Column::I32(vec![1])),
        ("neutrino_vertex_x", Column::F32(vec![100.0])),
        ("neutrino_vertex_y", Column::F32(vec![0.0])),
        ("neutrino_vertex_z", Column::F32(vec![500.0])),
    ]);
    write_input(&base.join("mc.parquet"), cols);
    let reg = registry(serde_json::json!({
        "run_configurations": { "test-beam": { "run1": {
            "nominal_pot": 2.0,
            "samples": [{ "sample_key": "mc", "sample_type": "mc", "relative_path": "mc.parquet", "pot": 1.0 }]
        }}}
    }));

    let builder =
        SnapshotPipelineBuilder::new(&reg, VariableRegistry::empty(), "test-beam", &run1(), &base, false)
            .unwrap()
            .with_options(fast());
    let out = base.join("out.hub");
    let columns = strings(&[
        "base_event_weight",
        "nominal_event_weight",
        "inclusive_strange_channel_category",
        "channel_definition_category",
        "is_truth_signal",
    ]);
    let summary = builder.snapshot("", &out, &columns).unwrap();
    assert_eq!((summary.datasets, summary.partitions, summary.events), (1, 1, 1));

    let t = events(&out);
    assert_eq!(t.num_rows(), 1);
    let layout = HubLayout::new(&out);
    let variations = read_dictionary(&layout, "variations").unwrap();
    let nominal_id = variations.iter().find(|(_, n)| n == "nominal").unwrap().0;
    let origins = read_dictionary(&layout, "origins").unwrap();
    let mc_id = origins.iter().find(|(_, n)| n == "mc").unwrap().0;

    assert_eq!(t.u64s("sample_id").unwrap(), vec![0]);
    assert_eq!(t.u64s("variation_id").unwrap(), vec![nominal_id]);
    assert_eq!(t.u64s("origin_id").unwrap(), vec![mc_id]);
    assert_relative_eq!(t.f64s("base_event_weight").unwrap()[0], 2.0);
    assert_relative_eq!(t.f64s("nominal_event_weight").unwrap()[0], 2.0);
    assert_eq!(t.i64s("inclusive_strange_channel_category").unwrap(), vec![10]);
    assert_eq!(t.i64s("channel_definition_category").unwrap(), vec![15]);
    assert_eq!(t.bools("is_truth_signal").unwrap(), vec![true]);
    assert_eq!(t.u64s("event_uid").unwrap(), vec![(12001u64 << 42) | (3 << 21) | 42]);
    assert_eq!(t.u64s("rsub_key").unwrap(), vec![(12001u64 << 20) | 3]);
    assert_eq!(read_totals(&layout).unwrap(), (2.0, 0));

    let hub = HubDataFrame::open(&out).unwrap();
    assert_eq!(hub.query("test-beam", "run1", "nominal", "", "").unwrap().count().unwrap(), 1);
    assert!(hub.query("test-beam", "run2", "", "", "").is_err());
    assert_eq!(hub.catalog()[0].friend_tree, "meta");
    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn external_sample_scales_by_triggers() {
    let base = tmp_dir("ext");
    write_input(&base.join("ext.parquet"), ids(2, 7000));
    let reg = registry(serde_json::json!({
        "run_configurations": { "test-beam": { "run1": {
            "nominal_triggers": 50,
            "samples": [{ "sample_key": "ext", "sample_type": "ext", "relative_path": "ext.parquet", "triggers": 20 }]
        }}}
    }));
    let builder =
        SnapshotPipelineBuilder::new(&reg, VariableRegistry::empty(), "test-beam", &run1(), &base, false)
            .unwrap()
            .with_options(fast());
    let out = base.join("ext.hub");
    builder.snapshot("", &out, &strings(&["base_event_weight", "nominal_event_weight"])).unwrap();

    let t = events(&out);
    assert_eq!(t.f64s("base_event_weight").unwrap(), vec![2.5, 2.5]);
    assert_eq!(t.f64s("nominal_event_weight").unwrap(), vec![2.5, 2.5]);
    assert_eq!(t.f64s("w_nom").unwrap(), vec![2.5, 2.5]);
    let origins = read_dictionary(&HubLayout::new(&out), "origins").unwrap();
    let ext_id = origins.iter().find(|(_, n)| n == "external").unwrap().0;
    assert_eq!(t.u64s("origin_id").unwrap(), vec![ext_id, ext_id]);
    assert_eq!(t.bools("is_mc").unwrap(), vec![false, false]);

    // The catalogue keeps the short label; both spellings parse to the same origin.
    let hub = HubDataFrame::open(&out).unwrap();
    let entry = &hub.catalog()[0];
    assert_eq!(entry.origin, "ext");
    assert_eq!(SampleOrigin::from_label(&entry.origin), SampleOrigin::External);
    assert_eq!(SampleOrigin::from_label("external"), SampleOrigin::External);
    assert_eq!(entry.origin_id as u64, ext_id);
    std::fs::remove_dir_all(&base).ok();
}

fn preselection_input() -> Vec<(&'static str, Column)> {
    let n = 5;
    let f = |v: f32| Column::F32(vec![v; n]);
    let tracks = |v: f32| Column::ListF32(vec![vec![v, v]; n]);
    let mut cols = ids(n, 20000);
    cols.extend([
        ("optical_filter_pe_beam", Column::F32(vec![50.0, 0.0, 50.0, 50.0, 50.0])),
        ("optical_filter_pe_veto", f(1.0)),
        ("software_trigger", Column::I32(vec![1; n])),
        ("num_slices", Column::I32(vec![1, 1, 2, 1, 1])),
        ("topological_score", f(0.5)),
        ("reco_neutrino_vertex_sce_x", f(100.0)),
        ("reco_neutrino_vertex_sce_y", f(0.0)),
        ("reco_neutrino_vertex_sce_z", Column::F32(vec![300.0, 300.0, 300.0, 700.0, 300.0])),
        ("contained_fraction", Column::F32(vec![0.9, 0.9, 0.9, 0.9, 0.5])),
        ("slice_cluster_fraction", f(0.9)),
        ("pfp_generations", Column::ListU32(vec![vec![2, 2]; n])),
        ("track_shower_scores", tracks(0.9)),
        ("trk_llr_pid_v", tracks(0.5)),
        ("track_length", tracks(50.0)),
        ("track_distance_to_vertex", tracks(1.0)),
        ("pfp_num_plane_hits_U", Column::ListI32(vec![vec![10, 10]; n])),
        ("pfp_num_plane_hits_V", Column::ListI32(vec![vec![10, 10]; n])),
        ("pfp_num_plane_hits_Y", Column::ListI32(vec![vec![10, 10]; n])),
        ("track_start_x", tracks(100.0)),
        ("track_start_y", tracks(0.0)),
        ("track_start_z", tracks(100.0)),
        ("track_end_x", tracks(100.0)),
        ("track_end_y", tracks(0.0)),
        ("track_end_z", tracks(300.0)),
        ("neutrino_pdg", Column::I32(vec![14, 0, 14, 0, 0])),
        ("interaction_ccnc", Column::I32(vec![0; n])),
        ("count_kaon_plus", Column::I32(vec![1; n])),
        ("neutrino_vertex_x", f(100.0)),
        ("neutrino_vertex_y", f(0.0)),
        ("neutrino_vertex_z", f(300.0)),
        ("neutrino_purity_from_pfp", f(0.9)),
        ("neutrino_completeness_from_pfp", f(0.9)),
    ]);
    cols
}

#[test]
fn preselection_gates_and_cutflow() {
    let base = tmp_dir("presel");
    write_input(&base.join("mc.parquet"), preselection_input());
    let reg = registry(serde_json::json!({
        "run_configurations": { "test-beam": { "run1": {
            "nominal_pot": 1.0,
            "samples": [{ "sample_key": "mc", "sample_type": "mc", "relative_path": "mc.parquet", "pot": 1.0 }]
        }}}
    }));
    let builder =
        SnapshotPipelineBuilder::new(&reg, VariableRegistry::empty(), "test-beam", &run1(), &base, false)
            .unwrap()
            .with_options(fast());
    let out = base.join("presel.hub");
    builder.snapshot("", &out, &strings(&["pass_final", "pure_slice_signal", "n_muons_tot"])).unwrap();

    let t = events(&out);
    assert_eq!(t.bools("pass_final").unwrap(), vec![true, false, false, false, false]);
    assert_eq!(t.i64s("n_muons_tot").unwrap(), vec![2; 5]);
    let pure = t.bools("pure_slice_signal").unwrap();
    assert_eq!(t.bools("base_sel").unwrap(), pure);

    let cutflow = read_cutflow(&HubLayout::new(&out)).unwrap();
    assert_eq!(cutflow.len(), 1);
    assert_eq!(cutflow[0].n_total, 5);
    assert_eq!(cutflow[0].n_base, pure.iter().filter(|&&b| b).count() as u64);
    assert_eq!(cutflow[0].n_base, 2);

    let filtered = base.join("filtered.hub");
    let summary = builder.snapshot("pass_final", &filtered, &strings(&["pass_final"])).unwrap();
    assert_eq!(summary.events, 1);
    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn detector_variations_get_their_own_datasets() {
    let base = tmp_dir("vars");
    for name in ["nom", "cv", "lyd"] {
        write_input(&base.join(format!("{name}.parquet")), ids(3, 9000));
    }
    let reg = registry(serde_json::json!({
        "run_configurations": { "test-beam": { "run1": {
            "nominal_pot": 4.0,
            "samples": [{
                "sample_key": "mc", "sample_type": "mc", "relative_path": "nom.parquet", "pot": 2.0,
                "stage_name": "sel",
                "detector_variations": [
                    { "sample_key": "mc_cv", "variation_type": "cv", "relative_path": "cv.parquet", "pot": 1.0 },
                    { "sample_key": "mc_lyd", "variation_type": "lydown", "relative_path": "lyd.parquet", "pot": 1.0 }
                ]
            }]
        }}}
    }));
    let builder =
        SnapshotPipelineBuilder::new(&reg, VariableRegistry::empty(), "test-beam", &run1(), &base, false)
            .unwrap()
            .with_options(SnapshotOptions { batch_size: 2, ..fast() });
    let out = base.join("vars.hub");
    let summary = builder.snapshot("", &out, &[]).unwrap();
    assert_eq!(summary.datasets, 3);

    let layout = HubLayout::new(&out);
    let cutflow = read_cutflow(&layout).unwrap();
    let labels: Vec<&str> = cutflow.iter().map(|r| r.variation.as_str()).collect();
    assert_eq!(labels, vec!["nominal", "CV", "LYDown"]);
    let mut var_ids: Vec<u16> = cutflow.iter().map(|r| r.variation_id).collect();
    var_ids.dedup();
    assert_eq!(var_ids.len(), 3);
    assert!(cutflow.iter().all(|r| r.n_total == 3 && r.sample_id == 0));

    let t = events(&out);
    assert_eq!(t.num_rows(), 9);
    let nominal = t.bools("is_nominal").unwrap();
    let vids = t.u64s("variation_id").unwrap();
    let uids = t.u64s("sampvar_uid").unwrap();
    for i in 0..t.num_rows() {
        assert_eq!(nominal[i], vids[i] == u64::from(cutflow[0].variation_id));
        assert_eq!(uids[i], vids[i]);
    }
    let mut distinct = uids.clone();
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct.len(), 3);

    let hub = HubDataFrame::open(&out).unwrap();
    assert_eq!(hub.get_variation("test-beam", "run1", "LYDown", "", "").unwrap().count().unwrap(), 3);
    assert_eq!(hub.catalog().len(), 3);
    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn events_only_mode_and_rerun_replace() {
    let base = tmp_dir("events_only");
    write_input(&base.join("a.parquet"), ids(4, 100));
    write_input(&base.join("d.parquet"), ids(2, 100));
    let reg = registry(serde_json::json!({
        "run_configurations": { "test-beam": { "run1": {
            "nominal_pot": 1.0, "nominal_triggers": 10,
            "samples": [
                { "sample_key": "a", "sample_type": "mc", "relative_path": "a.parquet", "pot": 1.0 },
                { "sample_key": "d", "sample_type": "data", "relative_path": "d.parquet", "triggers": 10 },
                { "sample_key": "off", "sample_type": "mc", "relative_path": "missing.parquet", "pot": 1.0, "active": false }
            ]
        }}}
    }));
    let out = base.join("events_only");
    let layout = HubLayout::new(&out);
    let hub = SnapshotPipelineBuilder::new(&reg, VariableRegistry::empty(), "test-beam", &run1(), &base, false)
        .unwrap()
        .with_options(fast());
    hub.snapshot("", &out, &strings(&["run"])).unwrap();
    assert!(layout.entries_path().exists());
    assert!(layout.hub_meta_path().exists());

    // An events-only run over an existing hub leaves no stale catalogue behind.
    let options = SnapshotOptions { write_catalog: false, ..fast() };
    let builder =
        SnapshotPipelineBuilder::new(&reg, VariableRegistry::empty(), "test-beam", &run1(), &base, false)
            .unwrap()
            .with_options(options.clone());
    assert_eq!(builder.sample_frames().len(), 2);

    builder.snapshot("", &out, &strings(&["run"])).unwrap();
    builder.snapshot("", &out, &strings(&["run"])).unwrap();
    assert!(!layout.entries_path().exists());
    assert!(!layout.entry_friends_path().exists());
    assert!(!layout.hub_meta_path().exists());
    assert!(!layout.friends_dir().exists());
    assert!(layout.index_path().exists());
    assert_eq!(EventsTree::partitions(&layout.events_dir()).unwrap().len(), 2);
    assert_eq!(events(&out).num_rows(), 6);

    let blind = SnapshotPipelineBuilder::new(&reg, VariableRegistry::empty(), "test-beam", &run1(), &base, true)
        .unwrap();
    assert_eq!(blind.sample_frames().len(), 1);
    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn ext_beam_periods_join_the_totals() {
    let base = tmp_dir("ext_beam");
    write_input(&base.join("mc.parquet"), ids(1, 5));
    write_input(&base.join("ext.parquet"), ids(1, 5));
    let reg = registry(serde_json::json!({
        "run_configurations": {
            "numi-fhc": { "run1": {
                "nominal_pot": 3.0,
                "samples": [{ "sample_key": "mc", "sample_type": "mc", "relative_path": "mc.parquet", "pot": 1.0 }]
            }},
            "NuMI_EXT": { "run1": {
                "nominal_triggers": 8,
                "samples": [{ "sample_key": "ext", "sample_type": "ext", "relative_path": "ext.parquet", "triggers": 4 }]
            }}
        }
    }));
    let builder =
        SnapshotPipelineBuilder::new(&reg, VariableRegistry::empty(), "numi-fhc", &run1(), &base, false).unwrap();
    assert_relative_eq!(builder.total_pot(), 3.0);
    assert_eq!(builder.total_triggers(), 8);
    assert_eq!(builder.sample_frames().len(), 2);
    std::fs::remove_dir_all(&base).ok();
}
