//! Pointing catalogue entries at externally produced friend files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rx_core::{Error, Result};
use rx_frame::{Column, Node, Table, WriteOptions, read_table};

use crate::archive::{HubLayout, absolutize, normalize_lexically};
use crate::catalog::{self, HubEntry};

/// Where the friends come from and how entries should record them.
#[derive(Debug, Clone)]
pub struct FriendLinkOptions {
    /// Hub directory.
    pub hub: PathBuf,
    /// One friend file shared by every entry.
    pub friend_file: Option<PathBuf>,
    /// Directory holding one friend per entry.
    pub friend_directory: Option<PathBuf>,
    /// Appended to the stem of each per-entry friend name.
    pub filename_suffix: String,
    /// Replacement extension (with or without the dot); empty drops it.
    pub filename_extension: Option<String>,
    /// New friend tree name for entries whose friend is present.
    pub friend_tree: Option<String>,
    /// Keep an entry unchanged instead of failing when its friend is missing.
    pub allow_missing: bool,
    /// Mirror the dataset path below the friend directory instead of using
    /// only its file name.
    pub mirror_structure: bool,
    /// Store paths relative to the hub when possible.
    pub make_relative: bool,
}

impl Default for FriendLinkOptions {
    fn default() -> Self {
        Self {
            hub: PathBuf::new(),
            friend_file: None,
            friend_directory: None,
            filename_suffix: String::new(),
            filename_extension: None,
            friend_tree: None,
            allow_missing: false,
            mirror_structure: false,
            make_relative: true,
        }
    }
}

/// What a link pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkReport {
    /// Entries whose friend path changed.
    pub updated_paths: usize,
    /// Entries whose friend tree changed.
    pub updated_trees: usize,
    /// Entries whose friend file was missing.
    pub missing: usize,
    /// Entries left exactly as they were.
    pub unchanged: usize,
}

fn resolve_against(path: &Path, hub_dir: &Path) -> PathBuf {
    if path.is_absolute() { normalize_lexically(path) } else { normalize_lexically(&hub_dir.join(path)) }
}

fn extension_for(over: &Option<String>, candidate: &Path) -> String {
    match over.as_deref() {
        None => candidate.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default(),
        Some("") => String::new(),
        Some(e) if e.starts_with('.') => e.to_string(),
        Some(e) => format!(".{e}"),
    }
}

/// Candidate friend path of one entry below `dir`.
fn shard_path(entry: &HubEntry, opts: &FriendLinkOptions, dir: &Path) -> PathBuf {
    let dataset = Path::new(&entry.dataset_path);
    let component = if opts.mirror_structure {
        dataset.to_path_buf()
    } else {
        dataset.file_name().map(PathBuf::from).unwrap_or_else(|| dataset.to_path_buf())
    };
    let candidate = dir.join(component);
    let ext = extension_for(&opts.filename_extension, &candidate);
    let stem = candidate.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = format!("{stem}{}{ext}", opts.filename_suffix);
    let parent = candidate.parent().map(Path::to_path_buf).unwrap_or_default();
    normalize_lexically(&parent.join(name))
}

/// Rewrite `friend_path`/`friend_tree` of every entry of a hub.
///
/// The `entries` tree is replaced as a whole; a failure leaves the previous one intact.
pub fn link_friends(opts: &FriendLinkOptions) -> Result<LinkReport> {
    if opts.hub.as_os_str().is_empty() {
        return Err(Error::Config("hub path must not be empty".into()));
    }
    match (&opts.friend_file, &opts.friend_directory) {
        (None, None) => {
            return Err(Error::Config("specify either a friend file or a friend directory".into()));
        }
        (Some(_), Some(_)) => {
            return Err(Error::Config("provide only one of a friend file or a friend directory".into()));
        }
        _ => {}
    }
    let hub_dir = absolutize(&opts.hub)?;
    let layout = HubLayout::new(&hub_dir);
    if !layout.exists() {
        return Err(Error::NotFound(format!("hub {} does not exist", hub_dir.display())));
    }

    let entries = catalog::read_entries(&layout)?;
    let mut report = LinkReport::default();
    if entries.is_empty() {
        tracing::info!(hub = %hub_dir.display(), "no entries found in hub");
        return Ok(report);
    }

    let single = match &opts.friend_file {
        Some(f) => {
            let resolved = resolve_against(f, &hub_dir);
            let present = resolved.exists();
            if !present && !opts.allow_missing {
                return Err(Error::NotFound(format!("friend file {}", resolved.display())));
            }
            Some((resolved, present))
        }
        None => None,
    };
    let dir = match &opts.friend_directory {
        Some(d) => {
            let resolved = resolve_against(d, &hub_dir);
            if !resolved.is_dir() {
                return Err(Error::NotFound(format!("friend directory {}", resolved.display())));
            }
            Some(resolved)
        }
        None => None,
    };

    let mut paths: HashMap<u64, String> = HashMap::with_capacity(entries.len());
    let mut trees: HashMap<u64, String> = HashMap::with_capacity(entries.len());
    for entry in &entries {
        let candidate = match (&single, &dir) {
            (Some((file, true)), _) => Some(file.clone()),
            (Some((_, false)), _) => None,
            (None, Some(dir)) => {
                let c = shard_path(entry, opts, dir);
                if c.exists() {
                    Some(c)
                } else if opts.allow_missing {
                    None
                } else {
                    return Err(Error::NotFound(format!(
                        "friend shard missing for entry {} ({})",
                        entry.sample_key,
                        c.display()
                    )));
                }
            }
            (None, None) => None,
        };

        let mut new_path = entry.friend_path.clone();
        let mut new_tree = entry.friend_tree.clone();
        match candidate {
            Some(c) => {
                new_path = layout.store(&c, opts.make_relative)?;
                if let Some(tree) = &opts.friend_tree {
                    new_tree = tree.clone();
                }
            }
            None => report.missing += 1,
        }
        let path_changed = new_path != entry.friend_path;
        let tree_changed = new_tree != entry.friend_tree;
        report.updated_paths += usize::from(path_changed);
        report.updated_trees += usize::from(tree_changed);
        report.unchanged += usize::from(!path_changed && !tree_changed);
        paths.insert(u64::from(entry.entry_id), new_path);
        trees.insert(u64::from(entry.entry_id), new_tree);
    }

    rewrite_entries(&layout, Arc::new(paths), Arc::new(trees))?;

    if let Some(tree) = &opts.friend_tree {
        update_summary_friend_tree(&layout, tree)?;
    }

    tracing::info!(updated = report.updated_paths, "hub entries with new friend paths");
    if let Some(tree) = &opts.friend_tree {
        tracing::info!(tree = %tree, entries = report.updated_trees, "friend tree set");
    }
    if report.missing > 0 {
        tracing::warn!(missing = report.missing, "friend files were missing; those entries were left unchanged");
    }
    tracing::debug!(unchanged = report.unchanged, "entries left as they were");
    Ok(report)
}

fn lookup(map: &HashMap<u64, String>, ids: &[u64], what: &str) -> Result<Column> {
    ids.iter()
        .map(|id| {
            map.get(id).cloned().ok_or_else(|| {
                Error::Validation(format!("missing {what} mapping for entry id {id}"))
            })
        })
        .collect::<Result<Vec<String>>>()
        .map(Column::Str)
}

fn rewrite_entries(
    layout: &HubLayout,
    paths: Arc<HashMap<u64, String>>,
    trees: Arc<HashMap<u64, String>>,
) -> Result<()> {
    let mut raw: Table = read_table(&layout.entries_path())?;
    for col in ["friend_path", "friend_tree"] {
        if !raw.has_column(col) {
            raw.insert(col, Column::Str(vec![String::new(); raw.num_rows()]))?;
        }
    }
    let columns = raw.column_names().to_vec();
    let node = Node::from_table(raw)
        .redefine("friend_path", &["entry_id"], move |t| lookup(&paths, &t.u64s("entry_id")?, "friend_path"))?
        .redefine("friend_tree", &["entry_id"], move |t| lookup(&trees, &t.u64s("entry_id")?, "friend_tree"))?;
    node.snapshot(&layout.entries_path(), &columns, &WriteOptions::tree("entries"))?;
    Ok(())
}

fn update_summary_friend_tree(layout: &HubLayout, tree: &str) -> Result<()> {
    let mut rows = catalog::read_hub_meta(layout)?;
    let mut updated = false;
    for (key, value) in rows.iter_mut().filter(|(k, _)| k == "summary") {
        match serde_json::from_str::<serde_json::Value>(value) {
            Ok(mut json) => {
                json["friend_tree"] = serde_json::Value::String(tree.to_string());
                *value = json.to_string();
                updated = true;
            }
            Err(e) => tracing::warn!(key = %key, error = %e, "failed to update summary metadata"),
        }
    }
    if updated {
        catalog::write_hub_meta(layout, &rows)
    } else {
        tracing::warn!("hub metadata has no summary row; friend tree name was not updated");
        Ok(())
    }
}
