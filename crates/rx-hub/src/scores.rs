//! Attaching an external per-event score table to a hub as friend shards.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use rx_core::{Error, Result};
use rx_frame::{Column, DType, read_schema, read_table_columns, read_tree_name};

use crate::archive::{HubLayout, absolutize, sanitize};
use crate::catalog::{HubCatalog, HubEntry, HubFriend, OpenMode};
use crate::frame::HubDataFrame;
use crate::friend::{FriendConfig, FriendWriter};

/// Inputs of a score attachment.
#[derive(Debug, Clone, Default)]
pub struct ScoreAttachOptions {
    /// Hub directory.
    pub hub: PathBuf,
    /// Parquet file with the scores.
    pub scores: PathBuf,
    /// Tree name the score file must carry (when it records one).
    pub tree: String,
    /// Friend label; sanitised before use.
    pub label: String,
    /// Friend tree name; defaults to the label.
    pub friend_tree: Option<String>,
    /// Shard directory; relative paths resolve against the hub.
    pub output_dir: Option<PathBuf>,
    /// `(input, output)` column pairs; empty selects every scalar numeric column.
    pub columns: Vec<(String, String)>,
}

/// What an attachment did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachReport {
    /// Rows read from the score table.
    pub score_rows: usize,
    /// Distinct `event_uid`s among them.
    pub unique_events: usize,
    /// Rows that replaced an earlier row with the same `event_uid`.
    pub duplicates: usize,
    /// Entries a shard was written for.
    pub updated_entries: usize,
    /// `entry_friends` rows added.
    pub new_friends: usize,
    /// Output column names, in order.
    pub columns: Vec<String>,
    /// Shard files written.
    pub shards: Vec<PathBuf>,
}

/// Parse `a,b:c` into `[(a, a), (b, c)]`.
pub fn parse_column_overrides(list: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.split_once(':') {
            None => out.push((token.to_string(), token.to_string())),
            Some((input, output)) => {
                let (input, output) = (input.trim(), output.trim());
                if input.is_empty() || output.is_empty() {
                    return Err(Error::Config(format!("column override '{token}' must not be empty")));
                }
                out.push((input.to_string(), output.to_string()));
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone)]
struct ScoreColumn {
    input: String,
    output: String,
    float32: bool,
}

#[derive(Debug, Default)]
struct ScoreTable {
    columns: Vec<ScoreColumn>,
    values: HashMap<u64, Vec<f64>>,
    total_rows: usize,
    duplicates: usize,
}

fn is_score_type(dt: DType) -> bool {
    dt.is_scalar_numeric()
}

fn select_columns(schema: &[(String, DType)], overrides: &[(String, String)]) -> Result<Vec<ScoreColumn>> {
    let mut seen = HashSet::new();
    if overrides.is_empty() {
        return Ok(schema
            .iter()
            .filter(|(n, dt)| n != "event_uid" && is_score_type(*dt))
            .filter(|(n, _)| seen.insert(n.clone()))
            .map(|(n, dt)| ScoreColumn { input: n.clone(), output: n.clone(), float32: *dt == DType::F32 })
            .collect());
    }
    let mut out = Vec::with_capacity(overrides.len());
    for (input, output) in overrides {
        if input == "event_uid" {
            return Err(Error::Config(
                "event_uid is attached automatically and must not be listed in the columns".into(),
            ));
        }
        let Some((_, dt)) = schema.iter().find(|(n, _)| n == input) else {
            return Err(Error::Column(format!("score column '{input}' was not found")));
        };
        if !is_score_type(*dt) {
            return Err(Error::Column(format!("score column '{input}' is not a flat numeric column")));
        }
        if !seen.insert(output.clone()) {
            return Err(Error::Config(format!("duplicate output column name '{output}' requested")));
        }
        out.push(ScoreColumn { input: input.clone(), output: output.clone(), float32: *dt == DType::F32 });
    }
    Ok(out)
}

fn load_scores(opts: &ScoreAttachOptions) -> Result<ScoreTable> {
    if let Some(tree) = read_tree_name(&opts.scores)? {
        if !opts.tree.is_empty() && tree != opts.tree {
            return Err(Error::NotFound(format!(
                "score tree '{}' was not found in {} (it holds '{tree}')",
                opts.tree,
                opts.scores.display()
            )));
        }
    }
    let (schema, _) = read_schema(&opts.scores)?;
    match schema.iter().find(|(n, _)| n == "event_uid") {
        Some((_, DType::U64 | DType::I64 | DType::U32 | DType::I32)) => {}
        Some((_, other)) => {
            return Err(Error::Column(format!("unsupported type {other:?} for event_uid")));
        }
        None => return Err(Error::Column("score table is missing the event_uid column".into())),
    }
    let columns = select_columns(&schema, &opts.columns)?;
    if columns.is_empty() {
        return Err(Error::Validation("no score columns were selected for attachment".into()));
    }

    let mut names = vec!["event_uid".to_string()];
    names.extend(columns.iter().map(|c| c.input.clone()));
    let raw = read_table_columns(&opts.scores, &names)?;
    let uids = raw.u64s("event_uid")?;
    let data: Vec<Vec<f64>> = columns.iter().map(|c| raw.f64s(&c.input)).collect::<Result<_>>()?;

    let mut table = ScoreTable { columns, ..ScoreTable::default() };
    table.values.reserve(uids.len());
    for (row, uid) in uids.into_iter().enumerate() {
        let values = data.iter().map(|col| col[row]).collect();
        if table.values.insert(uid, values).is_some() {
            table.duplicates += 1;
        }
        table.total_rows += 1;
    }
    Ok(table)
}

fn sample_prefix(entry: &HubEntry) -> String {
    let sample = if entry.sample_key.is_empty() { "sample" } else { entry.sample_key.as_str() };
    let mut parts = vec![sanitize(sample)];
    for s in [&entry.beam, &entry.period, &entry.stage, &entry.origin] {
        if !s.is_empty() {
            parts.push(sanitize(s));
        }
    }
    parts.join("_")
}

fn variation_tag(entry: &HubEntry, label: &str) -> String {
    let variation = if entry.variation.is_empty() { "nominal" } else { entry.variation.as_str() };
    format!("{}_{label}", sanitize(variation))
}

/// Write one friend shard per non-empty entry with the score columns looked
/// up by `event_uid` (NaN when absent) and register new shards in the catalogue.
pub fn attach_scores(opts: &ScoreAttachOptions) -> Result<AttachReport> {
    if opts.hub.as_os_str().is_empty()
        || opts.scores.as_os_str().is_empty()
        || opts.tree.is_empty()
        || opts.label.is_empty()
    {
        return Err(Error::Config("hub, scores, tree and label are required".into()));
    }
    let hub = HubDataFrame::open(&opts.hub)?;
    let hub_dir = hub.hub_path().to_path_buf();
    let layout = HubLayout::new(&hub_dir);

    let label = sanitize(&opts.label);
    if label != opts.label {
        tracing::info!(label = %label, "friend label normalised");
    }
    let friend_tree = match opts.friend_tree.as_deref().filter(|t| !t.is_empty()) {
        Some(t) => {
            let s = sanitize(t);
            if s != t {
                tracing::info!(tree = %s, "friend tree name normalised");
            }
            s
        }
        None => label.clone(),
    };
    let output_dir = match &opts.output_dir {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() { d.clone() } else { absolutize(&hub_dir.join(d))? }
        }
        _ => hub_dir.join("friends").join(&label),
    };

    tracing::info!(scores = %opts.scores.display(), tree = %opts.tree, "loading score table");
    let scores = load_scores(opts)?;
    tracing::info!(rows = scores.total_rows, unique = scores.values.len(), "score table loaded");
    if scores.duplicates > 0 {
        tracing::warn!(
            duplicates = scores.duplicates,
            "duplicate event_uid entries were replaced by the most recent values"
        );
    }
    if scores.values.is_empty() {
        return Err(Error::Validation("score table is empty; nothing to attach".into()));
    }

    let mut report = AttachReport {
        score_rows: scores.total_rows,
        unique_events: scores.values.len(),
        duplicates: scores.duplicates,
        columns: scores.columns.iter().map(|c| c.output.clone()).collect(),
        ..AttachReport::default()
    };
    let mut friend_columns = vec!["event_uid".to_string()];
    friend_columns.extend(report.columns.iter().cloned());
    let lookup = Arc::new(scores.values);

    let mut new_friends = Vec::new();
    for entry in hub.catalog().iter().filter(|e| e.n_events > 0) {
        let existing = hub.friends().iter().find(|f| f.entry_id == entry.entry_id && f.label == label);
        let tree = existing.map(|f| f.tree.clone()).filter(|t| !t.is_empty()).unwrap_or_else(|| friend_tree.clone());
        let existing_path = existing.filter(|f| !f.path.is_empty()).map(|f| hub.resolve_friend_path(&f.path));

        let mut node = hub.entry_node(entry)?;
        for (idx, col) in scores.columns.iter().enumerate() {
            let lookup = Arc::clone(&lookup);
            let float32 = col.float32;
            node = node.define(&col.output, &["event_uid"], move |t| {
                let uids = t.u64s("event_uid")?;
                let values = uids
                    .iter()
                    .map(|uid| lookup.get(uid).and_then(|row| row.get(idx).copied()).unwrap_or(f64::NAN));
                Ok(if float32 {
                    Column::F32(values.map(|v| v as f32).collect())
                } else {
                    Column::F64(values.collect())
                })
            })?;
        }

        let writer = FriendWriter::new(FriendConfig {
            output_dir: output_dir.clone(),
            tree_name: tree.clone(),
            ..FriendConfig::default()
        });
        let written = match &existing_path {
            Some(path) => {
                writer.write_friend_to_path(&node, path, &friend_columns)?;
                path.clone()
            }
            None => writer.write_friend(&node, &sample_prefix(entry), &variation_tag(entry, &label), &friend_columns)?,
        };
        tracing::info!(
            label = %label,
            sample = %entry.sample_key,
            variation = %entry.variation,
            path = %written.display(),
            "attached scores"
        );
        report.updated_entries += 1;

        if existing_path.is_none() {
            new_friends.push(HubFriend {
                entry_id: entry.entry_id,
                label: label.clone(),
                tree,
                path: layout.store(&written, true)?,
            });
        }
        report.shards.push(written);
    }

    if !new_friends.is_empty() {
        tracing::info!(count = new_friends.len(), "registering new friend metadata entries");
        report.new_friends = new_friends.len();
        let catalog = HubCatalog::open(&hub_dir, OpenMode::Update)?;
        for f in new_friends {
            catalog.add_friend(f)?;
        }
        catalog.finalize()?;
    }
    tracing::info!(entries = report.updated_entries, label = %label, "hub entries updated with scores");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_parse_and_trim() {
        let parsed = parse_column_overrides(" a , b:c ,, d : e").unwrap();
        assert_eq!(
            parsed,
            vec![
                ("a".to_string(), "a".to_string()),
                ("b".to_string(), "c".to_string()),
                ("d".to_string(), "e".to_string()),
            ]
        );
        assert!(parse_column_overrides("a:").is_err());
        assert!(parse_column_overrides(":b").is_err());
        assert!(parse_column_overrides("").unwrap().is_empty());
    }

    #[test]
    fn column_selection_rules() {
        let schema = vec![
            ("event_uid".to_string(), DType::U64),
            ("score".to_string(), DType::F32),
            ("aux".to_string(), DType::F64),
            ("tag".to_string(), DType::Str),
            ("hits".to_string(), DType::ListF32),
        ];
        let auto = select_columns(&schema, &[]).unwrap();
        let names: Vec<&str> = auto.iter().map(|c| c.output.as_str()).collect();
        assert_eq!(names, vec!["score", "aux"]);
        assert!(auto[0].float32);
        assert!(!auto[1].float32);

        let o = |a: &str, b: &str| (a.to_string(), b.to_string());
        assert!(select_columns(&schema, &[o("event_uid", "x")]).is_err());
        assert!(select_columns(&schema, &[o("missing", "x")]).is_err());
        assert!(select_columns(&schema, &[o("hits", "x")]).is_err());
        assert!(select_columns(&schema, &[o("score", "x"), o("aux", "x")]).is_err());
        let renamed = select_columns(&schema, &[o("score", "cnn_score")]).unwrap();
        assert_eq!(renamed[0].input, "score");
        assert_eq!(renamed[0].output, "cnn_score");
    }

    #[test]
    fn shard_naming_components() {
        let entry = HubEntry {
            sample_key: "numi fhc".into(),
            beam: "numi-fhc".into(),
            period: "run1".into(),
            stage: "s".into(),
            origin: "mc".into(),
            ..HubEntry::default()
        };
        assert_eq!(sample_prefix(&entry), "numi_fhc_numi-fhc_run1_s_mc");
        assert_eq!(variation_tag(&entry, "cnn"), "nominal_cnn");
    }
}
