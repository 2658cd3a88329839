//! Reading a hub back as lazy dataframes.
//!
//! [`HubDataFrame`] loads the catalogue once and turns selections over
//! (sample, beam, period, variation, origin, stage) into [`Node`]s over the
//! matching `events` partitions, with friend tables joined row by row.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use rx_core::{Error, Result};
use rx_frame::{
    Node, ParquetSource, Table, TableSource, is_implicit_mt_enabled, read_schema, read_table_columns,
};

use crate::archive::{
    DEFAULT_FRIEND_TREE, EVENTS_TREE, HubLayout, absolutize, normalize_lexically, relative_to,
};
use crate::catalog::{self, HubEntry, HubFriend, HubSummary};
use crate::provenance::ProvenanceDicts;

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Optional constraints on catalogue fields. Unset fields match anything.
///
/// A fresh selection asks for the `nominal` variation only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    sample: Option<String>,
    beam: Option<String>,
    period: Option<String>,
    variation: Option<String>,
    origin: Option<String>,
    stage: Option<String>,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            sample: None,
            beam: None,
            period: None,
            variation: Some("nominal".to_string()),
            origin: None,
            stage: None,
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn matches(selector: &Option<String>, value: &str) -> bool {
    selector.as_deref().map_or(true, |s| s == value)
}

macro_rules! selection_field {
    ($field:ident, $clear:ident) => {
        #[doc = concat!("Require `", stringify!($field), "`; an empty value lifts the constraint.")]
        pub fn $field(mut self, value: &str) -> Self {
            self.$field = non_empty(value);
            self
        }

        #[doc = concat!("Lift the `", stringify!($field), "` constraint.")]
        pub fn $clear(mut self) -> Self {
            self.$field = None;
            self
        }
    };
}

impl Selection {
    selection_field!(sample, clear_sample);
    selection_field!(beam, clear_beam);
    selection_field!(period, clear_period);
    selection_field!(variation, clear_variation);
    selection_field!(origin, clear_origin);
    selection_field!(stage, clear_stage);

    /// True if the entry satisfies every set constraint.
    pub fn matches(&self, entry: &HubEntry) -> bool {
        matches(&self.sample, &entry.sample_key)
            && matches(&self.beam, &entry.beam)
            && matches(&self.period, &entry.period)
            && matches(&self.variation, &entry.variation)
            && matches(&self.origin, &entry.origin)
            && matches(&self.stage, &entry.stage)
    }

    fn describe(&self) -> String {
        let f = |name: &str, v: &Option<String>| v.as_ref().map(|v| format!("{name}={v}"));
        let parts: Vec<String> = [
            f("sample", &self.sample),
            f("beam", &self.beam),
            f("period", &self.period),
            f("variation", &self.variation),
            f("origin", &self.origin),
            f("stage", &self.stage),
        ]
        .into_iter()
        .flatten()
        .collect();
        if parts.is_empty() { "all entries".to_string() } else { parts.join(" ") }
    }
}

/// One distinct provenance tuple present in the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub struct Combination {
    pub sample_key: String,
    pub beam: String,
    pub period: String,
    pub variation: String,
    pub origin: String,
    pub stage: String,
}

// ---------------------------------------------------------------------------
// Chained source with friends
// ---------------------------------------------------------------------------

/// Friend columns contributed by one label across every part of a chain.
#[derive(Debug, Clone)]
struct FriendGroup {
    prefix: String,
    columns: Vec<String>,
    /// Names each column is exposed under (prefixed, plus the bare name if free).
    exposed: Vec<Vec<String>>,
}

#[derive(Debug, Clone)]
struct ChainPart {
    dataset: PathBuf,
    friends: Vec<PathBuf>,
}

/// Dataset partitions read as one table, each joined row-wise with its friends.
#[derive(Debug, Clone)]
struct HubChainSource {
    parts: Vec<ChainPart>,
    dataset_columns: Vec<String>,
    groups: Vec<FriendGroup>,
    names: Vec<String>,
}

impl HubChainSource {
    fn new(parts: Vec<ChainPart>, groups: Vec<(String, Vec<String>)>) -> Result<Self> {
        let datasets: Vec<PathBuf> = parts.iter().map(|p| p.dataset.clone()).collect();
        let dataset_columns = ParquetSource::open_many(datasets)?.columns().to_vec();

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (_, cols) in &groups {
            for c in cols {
                *seen.entry(c.as_str()).or_default() += 1;
            }
        }
        let mut names = dataset_columns.clone();
        let mut friend_groups = Vec::with_capacity(groups.len());
        for (prefix, cols) in &groups {
            let mut exposed = Vec::with_capacity(cols.len());
            for c in cols {
                let mut as_names = vec![format!("{prefix}.{c}")];
                if seen.get(c.as_str()) == Some(&1) && !dataset_columns.contains(c) {
                    as_names.push(c.clone());
                }
                names.extend(as_names.iter().cloned());
                exposed.push(as_names);
            }
            friend_groups.push(FriendGroup { prefix: prefix.clone(), columns: cols.clone(), exposed });
        }
        Ok(Self { parts, dataset_columns, groups: friend_groups, names })
    }

    fn load_part(&self, part: &ChainPart) -> Result<Table> {
        let mut table = read_table_columns(&part.dataset, &self.dataset_columns)?;
        let uids = if table.has_column("event_uid") { Some(table.u64s("event_uid")?) } else { None };
        for (group, path) in self.groups.iter().zip(&part.friends) {
            let friend = read_table_columns(path, &group.columns)?;
            if friend.num_rows() != table.num_rows() {
                return Err(Error::Validation(format!(
                    "friend '{}' at {} has {} rows but dataset {} has {}",
                    group.prefix,
                    path.display(),
                    friend.num_rows(),
                    part.dataset.display(),
                    table.num_rows()
                )));
            }
            if let Some(uids) = &uids {
                if friend.has_column("event_uid") && &friend.u64s("event_uid")? != uids {
                    return Err(Error::Validation(format!(
                        "friend '{}' at {} is not aligned with {} on event_uid",
                        group.prefix,
                        path.display(),
                        part.dataset.display()
                    )));
                }
            }
            for (col, as_names) in group.columns.iter().zip(&group.exposed) {
                let values = friend.column(col)?;
                for name in as_names {
                    table.insert(name.clone(), values.clone())?;
                }
            }
        }
        Ok(table)
    }
}

impl TableSource for HubChainSource {
    fn columns(&self) -> &[String] {
        &self.names
    }

    fn load(&self) -> Result<Table> {
        let parts: Vec<Table> = if is_implicit_mt_enabled() && self.parts.len() > 1 {
            self.parts.par_iter().map(|p| self.load_part(p)).collect::<Result<_>>()?
        } else {
            self.parts.iter().map(|p| self.load_part(p)).collect::<Result<_>>()?
        };
        Table::concat(&parts)
    }

    fn describe(&self) -> String {
        format!(
            "hub chain of {} partition(s) with {} friend(s)",
            self.parts.len(),
            self.groups.len()
        )
    }
}

// ---------------------------------------------------------------------------
// HubDataFrame
// ---------------------------------------------------------------------------

/// A hub opened for reading.
#[derive(Debug, Clone)]
pub struct HubDataFrame {
    layout: HubLayout,
    hub_dir: PathBuf,
    summary: HubSummary,
    provenance: ProvenanceDicts,
    entries: Vec<HubEntry>,
    friends: Vec<HubFriend>,
    resolved_base: Option<PathBuf>,
    base_override: Option<PathBuf>,
}

impl HubDataFrame {
    /// Open the hub at `path` and load its catalogue.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let hub_dir = absolutize(path.as_ref())?;
        let layout = HubLayout::new(&hub_dir);
        if !layout.exists() {
            return Err(Error::NotFound(format!("hub {} does not exist", hub_dir.display())));
        }

        let meta = catalog::read_hub_meta(&layout)?;
        let mut summary = match catalog::meta_value(&meta, "summary") {
            Some(json) => serde_json::from_str::<HubSummary>(json).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to parse hub summary metadata");
                HubSummary::default()
            }),
            None => HubSummary::default(),
        };
        if summary.friend_tree.is_empty() {
            summary.friend_tree = DEFAULT_FRIEND_TREE.to_string();
        }
        let provenance = match catalog::meta_value(&meta, "provenance_dicts") {
            Some(json) => serde_json::from_str::<serde_json::Value>(json)
                .map_err(Error::from)
                .and_then(|v| ProvenanceDicts::from_json(&v))
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "failed to parse provenance dictionaries");
                    ProvenanceDicts::new()
                }),
            None => ProvenanceDicts::new(),
        };

        let mut entries = catalog::read_entries(&layout)?;
        for e in &mut entries {
            if e.friend_tree.is_empty() {
                e.friend_tree = summary.friend_tree.clone();
            }
        }
        let friends = catalog::read_entry_friends(&layout)?;

        let base = summary
            .dataset_base
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| Some(summary.base_directory.as_str()).filter(|s| !s.is_empty()));
        let resolved_base = base.map(|b| {
            let p = Path::new(b);
            if p.is_absolute() { normalize_lexically(p) } else { layout.resolve(b) }
        });

        tracing::debug!(hub = %hub_dir.display(), entries = entries.len(), friends = friends.len(), "hub opened");
        Ok(Self {
            layout,
            hub_dir,
            summary,
            provenance,
            entries,
            friends,
            resolved_base,
            base_override: None,
        })
    }

    /// Absolute hub directory.
    pub fn hub_path(&self) -> &Path {
        &self.hub_dir
    }

    /// The `summary` row.
    pub fn summary(&self) -> &HubSummary {
        &self.summary
    }

    /// Provenance dictionaries recorded in the hub.
    pub fn provenance(&self) -> &ProvenanceDicts {
        &self.provenance
    }

    /// Every catalogue entry.
    pub fn catalog(&self) -> &[HubEntry] {
        &self.entries
    }

    /// Every `entry_friends` row.
    pub fn friends(&self) -> &[HubFriend] {
        &self.friends
    }

    /// Redirect dataset paths to another base directory. `None` clears the override.
    pub fn set_base_directory_override(&mut self, path: Option<&Path>) -> Result<()> {
        self.base_override = match path {
            Some(p) if !p.as_os_str().is_empty() => Some(absolutize(p)?),
            _ => None,
        };
        Ok(())
    }

    /// Directory relative dataset paths currently resolve against.
    pub fn resolved_base_directory(&self) -> &Path {
        self.base_override.as_deref().or(self.resolved_base.as_deref()).unwrap_or(&self.hub_dir)
    }

    /// A selection with default constraints (nominal variation only).
    pub fn select(&self) -> Selection {
        Selection::default()
    }

    /// Entries satisfying a selection, in catalogue order.
    pub fn entries_for(&self, selection: &Selection) -> Vec<&HubEntry> {
        self.entries.iter().filter(|e| selection.matches(e)).collect()
    }

    /// Lazy node over the entries satisfying a selection.
    pub fn load(&self, selection: &Selection) -> Result<Node> {
        let matched = self.entries_for(selection);
        if matched.is_empty() {
            return Err(Error::NotFound(format!(
                "no hub entries matched the requested selection ({})",
                selection.describe()
            )));
        }
        self.build_node(&matched)
    }

    /// Beam and period must match exactly; variation, origin and stage only
    /// constrain when non-empty.
    pub fn query(&self, beam: &str, period: &str, variation: &str, origin: &str, stage: &str) -> Result<Node> {
        let mut sel = Selection::default().variation(variation).origin(origin).stage(stage);
        sel.beam = Some(beam.to_string());
        sel.period = Some(period.to_string());
        self.load(&sel)
    }

    /// Nominal entries of a beam/period, optionally restricted to a stage.
    pub fn get_nominal(&self, beam: &str, period: &str, stage: &str) -> Result<Node> {
        self.query(beam, period, "nominal", "", stage)
    }

    /// Entries of one variation of a beam/period.
    pub fn get_variation(
        &self,
        beam: &str,
        period: &str,
        variation: &str,
        stage: &str,
        origin: &str,
    ) -> Result<Node> {
        self.query(beam, period, variation, origin, stage)
    }

    /// Distinct beams.
    pub fn beams(&self) -> Vec<String> {
        self.distinct(|_| true, |e| &e.beam)
    }

    /// Distinct periods, optionally of one beam.
    pub fn periods(&self, beam: Option<&str>) -> Vec<String> {
        self.distinct(|e| opt_eq(beam, &e.beam), |e| &e.period)
    }

    /// Distinct origins.
    pub fn origins(&self, beam: Option<&str>, period: Option<&str>, stage: Option<&str>) -> Vec<String> {
        self.distinct(
            |e| opt_eq(beam, &e.beam) && opt_eq(period, &e.period) && opt_eq(stage, &e.stage),
            |e| &e.origin,
        )
    }

    /// Distinct stages.
    pub fn stages(&self, beam: Option<&str>, period: Option<&str>) -> Vec<String> {
        self.distinct(|e| opt_eq(beam, &e.beam) && opt_eq(period, &e.period), |e| &e.stage)
    }

    /// Distinct variations.
    pub fn variations(
        &self,
        beam: Option<&str>,
        period: Option<&str>,
        origin: Option<&str>,
        stage: Option<&str>,
    ) -> Vec<String> {
        self.distinct(
            |e| {
                opt_eq(beam, &e.beam)
                    && opt_eq(period, &e.period)
                    && opt_eq(origin, &e.origin)
                    && opt_eq(stage, &e.stage)
            },
            |e| &e.variation,
        )
    }

    /// Distinct sample keys.
    pub fn sample_keys(
        &self,
        beam: Option<&str>,
        period: Option<&str>,
        stage: Option<&str>,
        variation: Option<&str>,
    ) -> Vec<String> {
        self.distinct(
            |e| {
                opt_eq(beam, &e.beam)
                    && opt_eq(period, &e.period)
                    && opt_eq(stage, &e.stage)
                    && opt_eq(variation, &e.variation)
            },
            |e| &e.sample_key,
        )
    }

    /// Distinct provenance tuples, sorted.
    pub fn combinations(&self) -> Vec<Combination> {
        let set: BTreeSet<Combination> = self
            .entries
            .iter()
            .map(|e| Combination {
                sample_key: e.sample_key.clone(),
                beam: e.beam.clone(),
                period: e.period.clone(),
                variation: e.variation.clone(),
                origin: e.origin.clone(),
                stage: e.stage.clone(),
            })
            .collect();
        set.into_iter().collect()
    }

    fn distinct(&self, keep: impl Fn(&HubEntry) -> bool, field: impl Fn(&HubEntry) -> &String) -> Vec<String> {
        let set: BTreeSet<&String> = self.entries.iter().filter(|e| keep(e)).map(field).collect();
        set.into_iter().cloned().collect()
    }

    /// Where the partition of an entry lives on disk.
    pub fn resolve_dataset_path(&self, entry: &HubEntry) -> PathBuf {
        let stored = Path::new(&entry.dataset_path);
        if stored.is_absolute() {
            if let (Some(over), Some(base)) = (&self.base_override, &self.resolved_base) {
                match relative_to(&normalize_lexically(stored), base) {
                    Some(rel) => return over.join(rel),
                    None => tracing::warn!(
                        path = %stored.display(),
                        "unable to rebase dataset path onto the override base directory"
                    ),
                }
            }
            return stored.to_path_buf();
        }
        self.resolved_base_directory().join(stored)
    }

    /// Lazy node over the partition of one entry, without friends.
    pub fn entry_node(&self, entry: &HubEntry) -> Result<Node> {
        Ok(Node::from_source(ParquetSource::open(self.resolve_dataset_path(entry))?))
    }

    /// Where a friend path stored in the catalogue lives on disk.
    pub fn resolve_friend_path(&self, stored: &str) -> PathBuf {
        self.layout.resolve(stored)
    }

    fn build_node(&self, matched: &[&HubEntry]) -> Result<Node> {
        let first = matched[0];
        let dataset_tree = if first.dataset_tree.is_empty() { EVENTS_TREE } else { &first.dataset_tree };
        if matched.iter().any(|e| !e.dataset_tree.is_empty() && e.dataset_tree != dataset_tree) {
            tracing::warn!(tree = %dataset_tree, "hub catalogue lists mixed dataset tree names; using the first");
        }

        let mut parts: Vec<ChainPart> = matched
            .iter()
            .map(|e| ChainPart { dataset: self.resolve_dataset_path(e), friends: Vec::new() })
            .collect();
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();

        // Friend recorded on the entry itself.
        let with_friend = matched.iter().filter(|e| !e.friend_path.is_empty()).count();
        if with_friend == matched.len() {
            let tree = &first.friend_tree;
            if matched.iter().any(|e| &e.friend_tree != tree) {
                tracing::warn!(tree = %tree, "hub catalogue lists mixed friend tree names; using the first");
            }
            let paths: Vec<PathBuf> = matched.iter().map(|e| self.resolve_friend_path(&e.friend_path)).collect();
            groups.push((tree.clone(), friend_columns(&paths[0])?));
            for (part, p) in parts.iter_mut().zip(paths) {
                part.friends.push(p);
            }
        } else if with_friend > 0 {
            tracing::warn!(
                with_friend,
                entries = matched.len(),
                "only some matched entries record a friend; skipping the entry friend"
            );
        } else {
            tracing::debug!("no entry friend for selection");
        }

        // Extra labelled friends.
        let mut by_label: BTreeMap<&str, HashMap<u32, &HubFriend>> = BTreeMap::new();
        for f in &self.friends {
            by_label.entry(f.label.as_str()).or_default().insert(f.entry_id, f);
        }
        for (label, rows) in by_label {
            let found: Vec<Option<&&HubFriend>> = matched.iter().map(|e| rows.get(&e.entry_id)).collect();
            if found.iter().all(Option::is_none) {
                continue;
            }
            if found.iter().any(Option::is_none) {
                tracing::warn!(label, "friend label missing for some matched entries; skipping it");
                continue;
            }
            if groups.iter().any(|(p, _)| p == label) {
                tracing::warn!(label, "friend label clashes with the entry friend tree; skipping it");
                continue;
            }
            let paths: Vec<PathBuf> =
                found.iter().flatten().map(|f| self.resolve_friend_path(&f.path)).collect();
            groups.push((label.to_string(), friend_columns(&paths[0])?));
            for (part, p) in parts.iter_mut().zip(paths) {
                part.friends.push(p);
            }
        }

        let source = HubChainSource::new(parts, groups)?;
        tracing::info!(
            entries = matched.len(),
            beam = %first.beam,
            period = %first.period,
            variation = %first.variation,
            origin = %first.origin,
            stage = %first.stage,
            "loaded hub selection"
        );
        Ok(Node::from_shared(Arc::new(source)))
    }
}

fn opt_eq(selector: Option<&str>, value: &str) -> bool {
    selector.map_or(true, |s| s == value)
}

fn friend_columns(path: &Path) -> Result<Vec<String>> {
    let (schema, _) = read_schema(path)?;
    Ok(schema.into_iter().map(|(n, _)| n).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sample: &str, variation: &str, stage: &str) -> HubEntry {
        HubEntry {
            sample_key: sample.into(),
            beam: "numi-fhc".into(),
            period: "run1".into(),
            variation: variation.into(),
            origin: "mc".into(),
            stage: stage.into(),
            ..HubEntry::default()
        }
    }

    #[test]
    fn selection_defaults_to_nominal() {
        let sel = Selection::default();
        assert!(sel.matches(&entry("a", "nominal", "s")));
        assert!(!sel.matches(&entry("a", "LYDown", "s")));
        let any = sel.clone().clear_variation();
        assert!(any.matches(&entry("a", "LYDown", "s")));
        let empty_means_any = Selection::default().variation("");
        assert!(empty_means_any.matches(&entry("a", "LYDown", "s")));
    }

    #[test]
    fn selection_constrains_each_field() {
        let sel = Selection::default().sample("a").stage("s1");
        assert!(sel.matches(&entry("a", "nominal", "s1")));
        assert!(!sel.matches(&entry("b", "nominal", "s1")));
        assert!(!sel.matches(&entry("a", "nominal", "s2")));
        assert!(sel.clear_stage().clear_sample().matches(&entry("b", "nominal", "s2")));
    }
}
