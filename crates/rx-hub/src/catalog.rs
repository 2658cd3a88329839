//! Entry catalogue of a hub: `entries`, `entry_friends` and `hub_meta`.
//!
//! The catalogue is held in memory while open and written on [`HubCatalog::finalize`]
//! (or drop). Appends are mutex-guarded so parallel emitters may share one catalogue.

use std::path::Path;
use std::sync::Mutex;

use rx_core::{Error, Result};
use rx_frame::{Column, Table, WriteOptions, read_table, write_table};
use serde::{Deserialize, Serialize};

use crate::archive::{DEFAULT_FRIEND_TREE, EVENTS_TREE, HUB_VERSION, HubLayout};
use crate::provenance::ProvenanceDicts;

/// One dataset partition registered in the hub.
#[derive(Debug, Clone, Default, PartialEq)]
#[allow(missing_docs)]
pub struct HubEntry {
    /// Catalogue id. 0 is reserved on input: [`HubCatalog::add_entry`]
    /// replaces it with the next free id, so an entry can only carry id 0
    /// when it is the first one assigned.
    pub entry_id: u32,
    pub sample_id: u32,
    pub beam_id: u16,
    pub period_id: u16,
    pub variation_id: u16,
    pub stage_id: u16,
    pub origin_id: u8,

    pub dataset_path: String,
    pub dataset_tree: String,
    pub friend_path: String,
    pub friend_tree: String,

    pub n_events: u64,
    pub first_event_uid: u64,
    pub last_event_uid: u64,
    pub sum_weights: f64,
    pub pot: f64,
    pub triggers: i64,

    pub sample_key: String,
    pub beam: String,
    pub period: String,
    pub variation: String,
    /// Short origin label (`SampleOrigin::as_str`, e.g. `ext`). The
    /// `meta/origins` dictionary spells external samples `external`; both
    /// parse back through `SampleOrigin::from_label`. `origin_id` indexes
    /// the dictionary.
    pub origin: String,
    pub stage: String,
}

/// An additional friend table attached to one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct HubFriend {
    pub entry_id: u32,
    pub label: String,
    pub tree: String,
    pub path: String,
}

/// The `summary` row of `hub_meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSummary {
    /// Summed exposure of the processed configurations.
    #[serde(default)]
    pub total_pot: f64,
    /// Summed external triggers.
    #[serde(default)]
    pub total_triggers: i64,
    /// Directory the source ntuples were read from.
    #[serde(default)]
    pub base_directory: String,
    /// Default friend tree name.
    #[serde(default)]
    pub friend_tree: String,
    /// Base that relative `dataset_path`s resolve against (relative to the hub).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_base: Option<String>,
}

impl Default for HubSummary {
    fn default() -> Self {
        Self {
            total_pot: 0.0,
            total_triggers: 0,
            base_directory: String::new(),
            friend_tree: DEFAULT_FRIEND_TREE.to_string(),
            dataset_base: None,
        }
    }
}

/// How the catalogue is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read only; appends fail.
    Read,
    /// Load existing rows and append.
    Update,
    /// Start from empty trees.
    Recreate,
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<HubEntry>,
    friends: Vec<HubFriend>,
    meta: Vec<(String, String)>,
    next_entry_id: u32,
    finalized: bool,
}

impl State {
    fn set_meta(&mut self, key: &str, value: String) {
        match self.meta.iter_mut().find(|(k, _)| k == key) {
            Some(row) => row.1 = value,
            None => self.meta.push((key.to_string(), value)),
        }
    }
}

/// Catalogue of a hub directory.
#[derive(Debug)]
pub struct HubCatalog {
    layout: HubLayout,
    mode: OpenMode,
    state: Mutex<State>,
}

impl HubCatalog {
    /// Open the catalogue of the hub at `root`.
    pub fn open(root: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let layout = HubLayout::new(root.as_ref());
        let mut state = State::default();
        match mode {
            OpenMode::Recreate => {
                std::fs::create_dir_all(layout.root())?;
                state.meta.push(("hub_version".to_string(), HUB_VERSION.to_string()));
            }
            OpenMode::Update | OpenMode::Read => {
                if !layout.exists() {
                    return Err(Error::NotFound(format!(
                        "hub directory {} does not exist",
                        layout.root().display()
                    )));
                }
                state.entries = read_entries(&layout)?;
                state.friends = read_entry_friends(&layout)?;
                state.meta = read_hub_meta(&layout)?;
                if !state.meta.iter().any(|(k, _)| k == "hub_version") {
                    state.meta.insert(0, ("hub_version".to_string(), HUB_VERSION.to_string()));
                }
                state.next_entry_id =
                    state.entries.iter().map(|e| e.entry_id.saturating_add(1)).max().unwrap_or(0);
            }
        }
        Ok(Self { layout, mode, state: Mutex::new(state) })
    }

    /// Layout of the underlying hub.
    pub fn layout(&self) -> &HubLayout {
        &self.layout
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| Error::Computation("hub catalogue lock poisoned".into()))
    }

    fn writable(&self, state: &State) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Err(Error::Validation("hub catalogue is open read-only".into()));
        }
        if state.finalized {
            return Err(Error::Validation("hub catalogue is already finalized".into()));
        }
        Ok(())
    }

    /// Append an entry and return its id.
    ///
    /// An `entry_id` of 0 takes the next free id, so 0 cannot be requested
    /// explicitly; any other id is kept and the counter advances past it.
    pub fn add_entry(&self, mut entry: HubEntry) -> Result<u32> {
        let mut state = self.lock()?;
        self.writable(&state)?;
        if entry.entry_id == 0 {
            entry.entry_id = state.next_entry_id;
            state.next_entry_id = state.next_entry_id.saturating_add(1);
        } else {
            state.next_entry_id = state.next_entry_id.max(entry.entry_id.saturating_add(1));
        }
        let id = entry.entry_id;
        state.entries.push(entry);
        Ok(id)
    }

    /// Append several entries in order.
    pub fn add_entries(&self, entries: impl IntoIterator<Item = HubEntry>) -> Result<Vec<u32>> {
        entries.into_iter().map(|e| self.add_entry(e)).collect()
    }

    /// Append one `entry_friends` row.
    pub fn add_friend(&self, friend: HubFriend) -> Result<()> {
        let mut state = self.lock()?;
        self.writable(&state)?;
        state.friends.push(friend);
        Ok(())
    }

    /// Record the provenance dictionaries.
    pub fn write_dictionaries(&self, dicts: &ProvenanceDicts) -> Result<()> {
        let mut state = self.lock()?;
        self.writable(&state)?;
        state.set_meta("provenance_dicts", dicts.to_json().to_string());
        Ok(())
    }

    /// Record the summary row.
    pub fn write_summary(&self, summary: &HubSummary) -> Result<()> {
        let json = serde_json::to_string(summary)?;
        let mut state = self.lock()?;
        self.writable(&state)?;
        state.set_meta("summary", json);
        Ok(())
    }

    /// Snapshot of the current entries.
    pub fn entries(&self) -> Result<Vec<HubEntry>> {
        Ok(self.lock()?.entries.clone())
    }

    /// Snapshot of the current friend rows.
    pub fn friends(&self) -> Result<Vec<HubFriend>> {
        Ok(self.lock()?.friends.clone())
    }

    /// Write every tree to disk. Further calls are no-ops.
    pub fn finalize(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.finalized || self.mode == OpenMode::Read {
            state.finalized = true;
            return Ok(());
        }
        write_entries(&self.layout, &state.entries)?;
        write_entry_friends(&self.layout, &state.friends)?;
        write_hub_meta(&self.layout, &state.meta)?;
        state.finalized = true;
        tracing::debug!(
            hub = %self.layout.root().display(),
            entries = state.entries.len(),
            friends = state.friends.len(),
            "hub catalogue written"
        );
        Ok(())
    }
}

impl Drop for HubCatalog {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            tracing::warn!(hub = %self.layout.root().display(), error = %e, "failed to finalize hub catalogue");
        }
    }
}

// ---------------------------------------------------------------------------
// Tree (de)serialisation
// ---------------------------------------------------------------------------

fn opt_u64s(t: &Table, name: &str) -> Result<Vec<u64>> {
    if t.has_column(name) { t.u64s(name) } else { Ok(vec![0; t.num_rows()]) }
}

fn opt_i64s(t: &Table, name: &str) -> Result<Vec<i64>> {
    if t.has_column(name) { t.i64s(name) } else { Ok(vec![0; t.num_rows()]) }
}

fn opt_f64s(t: &Table, name: &str) -> Result<Vec<f64>> {
    if t.has_column(name) { t.f64s(name) } else { Ok(vec![0.0; t.num_rows()]) }
}

fn opt_strs(t: &Table, name: &str) -> Result<Vec<String>> {
    if t.has_column(name) { Ok(t.strs(name)?.to_vec()) } else { Ok(vec![String::new(); t.num_rows()]) }
}

/// Read the `entries` tree; a hub without one has no entries.
///
/// An empty `dataset_tree` reads as `events`; an empty `friend_tree` stays empty.
pub fn read_entries(layout: &HubLayout) -> Result<Vec<HubEntry>> {
    let path = layout.entries_path();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let t = read_table(&path)?;
    let n = t.num_rows();
    let entry_ids = if t.has_column("entry_id") { t.u64s("entry_id")? } else { (0..n as u64).collect() };
    let sample_ids = opt_u64s(&t, "sample_id")?;
    let beam_ids = opt_u64s(&t, "beam_id")?;
    let period_ids = opt_u64s(&t, "period_id")?;
    let variation_ids = opt_u64s(&t, "variation_id")?;
    let stage_ids = opt_u64s(&t, "stage_id")?;
    let origin_ids = opt_u64s(&t, "origin_id")?;
    let dataset_paths = opt_strs(&t, "dataset_path")?;
    let dataset_trees = opt_strs(&t, "dataset_tree")?;
    let friend_paths = opt_strs(&t, "friend_path")?;
    let friend_trees = opt_strs(&t, "friend_tree")?;
    let n_events = opt_u64s(&t, "n_events")?;
    let first = opt_u64s(&t, "first_event_uid")?;
    let last = opt_u64s(&t, "last_event_uid")?;
    let sum_weights = opt_f64s(&t, "sum_weights")?;
    let pot = opt_f64s(&t, "pot")?;
    let triggers = opt_i64s(&t, "triggers")?;
    let sample_keys = opt_strs(&t, "sample_key")?;
    let beams = opt_strs(&t, "beam")?;
    let periods = opt_strs(&t, "period")?;
    let variations = opt_strs(&t, "variation")?;
    let origins = opt_strs(&t, "origin")?;
    let stages = opt_strs(&t, "stage")?;

    Ok((0..n)
        .map(|i| HubEntry {
            entry_id: entry_ids[i] as u32,
            sample_id: sample_ids[i] as u32,
            beam_id: beam_ids[i] as u16,
            period_id: period_ids[i] as u16,
            variation_id: variation_ids[i] as u16,
            stage_id: stage_ids[i] as u16,
            origin_id: origin_ids[i] as u8,
            dataset_path: dataset_paths[i].clone(),
            dataset_tree: if dataset_trees[i].is_empty() {
                EVENTS_TREE.to_string()
            } else {
                dataset_trees[i].clone()
            },
            friend_path: friend_paths[i].clone(),
            friend_tree: friend_trees[i].clone(),
            n_events: n_events[i],
            first_event_uid: first[i],
            last_event_uid: last[i],
            sum_weights: sum_weights[i],
            pot: pot[i],
            triggers: triggers[i],
            sample_key: sample_keys[i].clone(),
            beam: beams[i].clone(),
            period: periods[i].clone(),
            variation: variations[i].clone(),
            origin: origins[i].clone(),
            stage: stages[i].clone(),
        })
        .collect())
}

fn strs<T>(rows: &[T], f: impl Fn(&T) -> &String) -> Column {
    Column::Str(rows.iter().map(|r| f(r).clone()).collect())
}

/// Rewrite the `entries` tree (atomically).
pub fn write_entries(layout: &HubLayout, entries: &[HubEntry]) -> Result<()> {
    let e = entries;
    let t = Table::from_columns(vec![
        ("entry_id".into(), Column::U32(e.iter().map(|x| x.entry_id).collect())),
        ("sample_id".into(), Column::U32(e.iter().map(|x| x.sample_id).collect())),
        ("beam_id".into(), Column::U16(e.iter().map(|x| x.beam_id).collect())),
        ("period_id".into(), Column::U16(e.iter().map(|x| x.period_id).collect())),
        ("variation_id".into(), Column::U16(e.iter().map(|x| x.variation_id).collect())),
        ("stage_id".into(), Column::U16(e.iter().map(|x| x.stage_id).collect())),
        ("origin_id".into(), Column::U8(e.iter().map(|x| x.origin_id).collect())),
        ("dataset_path".into(), strs(e, |x| &x.dataset_path)),
        ("dataset_tree".into(), strs(e, |x| &x.dataset_tree)),
        ("friend_path".into(), strs(e, |x| &x.friend_path)),
        ("friend_tree".into(), strs(e, |x| &x.friend_tree)),
        ("n_events".into(), Column::U64(e.iter().map(|x| x.n_events).collect())),
        ("first_event_uid".into(), Column::U64(e.iter().map(|x| x.first_event_uid).collect())),
        ("last_event_uid".into(), Column::U64(e.iter().map(|x| x.last_event_uid).collect())),
        ("sum_weights".into(), Column::F64(e.iter().map(|x| x.sum_weights).collect())),
        ("pot".into(), Column::F64(e.iter().map(|x| x.pot).collect())),
        ("triggers".into(), Column::I64(e.iter().map(|x| x.triggers).collect())),
        ("sample_key".into(), strs(e, |x| &x.sample_key)),
        ("beam".into(), strs(e, |x| &x.beam)),
        ("period".into(), strs(e, |x| &x.period)),
        ("variation".into(), strs(e, |x| &x.variation)),
        ("origin".into(), strs(e, |x| &x.origin)),
        ("stage".into(), strs(e, |x| &x.stage)),
    ])?;
    write_table(&layout.entries_path(), &t, &WriteOptions::tree("entries"))
}

/// Read `entry_friends`; missing tree means no friends.
pub fn read_entry_friends(layout: &HubLayout) -> Result<Vec<HubFriend>> {
    let path = layout.entry_friends_path();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let t = read_table(&path)?;
    let ids = t.u64s("entry_id")?;
    let labels = t.strs("label")?;
    let trees = t.strs("tree")?;
    let paths = t.strs("path")?;
    Ok((0..t.num_rows())
        .map(|i| HubFriend {
            entry_id: ids[i] as u32,
            label: labels[i].clone(),
            tree: trees[i].clone(),
            path: paths[i].clone(),
        })
        .collect())
}

/// Rewrite `entry_friends` (atomically).
pub fn write_entry_friends(layout: &HubLayout, friends: &[HubFriend]) -> Result<()> {
    let t = Table::from_columns(vec![
        ("entry_id".into(), Column::U32(friends.iter().map(|f| f.entry_id).collect())),
        ("label".into(), strs(friends, |f| &f.label)),
        ("tree".into(), strs(friends, |f| &f.tree)),
        ("path".into(), strs(friends, |f| &f.path)),
    ])?;
    write_table(&layout.entry_friends_path(), &t, &WriteOptions::tree("entry_friends"))
}

/// Read `hub_meta` as ordered key/value rows.
pub fn read_hub_meta(layout: &HubLayout) -> Result<Vec<(String, String)>> {
    let path = layout.hub_meta_path();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let t = read_table(&path)?;
    let keys = t.strs("key")?;
    let values = t.strs("value")?;
    Ok(keys.iter().cloned().zip(values.iter().cloned()).collect())
}

/// Rewrite `hub_meta` (atomically).
pub fn write_hub_meta(layout: &HubLayout, rows: &[(String, String)]) -> Result<()> {
    let t = Table::from_columns(vec![
        ("key".into(), Column::Str(rows.iter().map(|(k, _)| k.clone()).collect())),
        ("value".into(), Column::Str(rows.iter().map(|(_, v)| v.clone()).collect())),
    ])?;
    write_table(&layout.hub_meta_path(), &t, &WriteOptions::tree("hub_meta"))
}

/// The last value recorded under `key`.
pub fn meta_value<'a>(rows: &'a [(String, String)], key: &str) -> Option<&'a str> {
    rows.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_hub(tag: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("rx_hub_catalog_{tag}_{}_{nanos}.hub", std::process::id()))
    }

    fn entry(key: &str) -> HubEntry {
        HubEntry {
            sample_key: key.into(),
            beam: "numi-fhc".into(),
            period: "run1".into(),
            variation: "nominal".into(),
            origin: "mc".into(),
            stage: "numi_fhc".into(),
            dataset_path: format!("events/{key}.parquet"),
            dataset_tree: EVENTS_TREE.into(),
            n_events: 3,
            ..HubEntry::default()
        }
    }

    #[test]
    fn ids_are_dense_and_respect_explicit_ids() {
        let root = tmp_hub("ids");
        let cat = HubCatalog::open(&root, OpenMode::Recreate).unwrap();
        assert_eq!(cat.add_entry(entry("a")).unwrap(), 0);
        assert_eq!(cat.add_entry(entry("b")).unwrap(), 1);
        let explicit = HubEntry { entry_id: 7, ..entry("c") };
        assert_eq!(cat.add_entry(explicit).unwrap(), 7);
        assert_eq!(cat.add_entry(entry("d")).unwrap(), 8);
        let zero = HubEntry { entry_id: 0, ..entry("z") };
        assert_eq!(cat.add_entry(zero).unwrap(), 9);
        cat.finalize().unwrap();
        cat.finalize().unwrap();
        assert!(cat.add_entry(entry("e")).is_err());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn update_appends_after_existing_rows() {
        let root = tmp_hub("update");
        {
            let cat = HubCatalog::open(&root, OpenMode::Recreate).unwrap();
            cat.add_entry(entry("a")).unwrap();
            cat.write_summary(&HubSummary { total_pot: 2.0, ..HubSummary::default() }).unwrap();
        }
        let cat = HubCatalog::open(&root, OpenMode::Update).unwrap();
        assert_eq!(cat.add_entry(entry("b")).unwrap(), 1);
        cat.add_friend(HubFriend { entry_id: 1, label: "cnn".into(), tree: "cnn".into(), path: "f.parquet".into() })
            .unwrap();
        cat.finalize().unwrap();

        let layout = HubLayout::new(&root);
        let entries = read_entries(&layout).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sample_key, "b");
        assert_eq!(read_entry_friends(&layout).unwrap().len(), 1);
        let meta = read_hub_meta(&layout).unwrap();
        assert_eq!(meta_value(&meta, "hub_version"), Some("1"));
        let summary: HubSummary = serde_json::from_str(meta_value(&meta, "summary").unwrap()).unwrap();
        assert_eq!(summary.total_pot, 2.0);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn read_mode_rejects_writes_and_missing_hub() {
        let root = tmp_hub("read");
        assert!(HubCatalog::open(&root, OpenMode::Read).is_err());
        HubCatalog::open(&root, OpenMode::Recreate).unwrap().finalize().unwrap();
        let cat = HubCatalog::open(&root, OpenMode::Read).unwrap();
        assert!(cat.add_entry(entry("a")).is_err());
        std::fs::remove_dir_all(&root).ok();
    }
}
