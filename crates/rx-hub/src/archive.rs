//! On-disk layout of a hub and path helpers shared by its writers and readers.

use std::path::{Component, Path, PathBuf};

use rx_core::{Error, Result};

/// Logical tree name of the payload partitions.
pub const EVENTS_TREE: &str = "events";
/// Default friend tree name for builder-written friends.
pub const DEFAULT_FRIEND_TREE: &str = "meta";
/// Value of the `hub_version` key in `hub_meta`.
pub const HUB_VERSION: &str = "1";

/// How a writer treats an existing tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Discard what is there and start over.
    Recreate,
    /// Append to what is there.
    Update,
}

/// Paths of every tree inside a hub directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubLayout {
    root: PathBuf,
}

impl HubLayout {
    /// Layout rooted at `root` (the hub directory).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Hub directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if the hub directory exists.
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Directory of `events` partitions.
    pub fn events_dir(&self) -> PathBuf {
        self.root.join(EVENTS_TREE)
    }

    /// Secondary index over `(rsub_key, evt)`.
    pub fn index_path(&self) -> PathBuf {
        self.root.join("events.index.parquet")
    }

    /// Directory of metadata tables.
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }

    /// One metadata table, e.g. `meta_table("cutflow")`.
    pub fn meta_table(&self, name: &str) -> PathBuf {
        self.meta_dir().join(format!("{name}.parquet"))
    }

    /// Entry catalogue.
    pub fn entries_path(&self) -> PathBuf {
        self.root.join("entries.parquet")
    }

    /// Extra friends attached to entries.
    pub fn entry_friends_path(&self) -> PathBuf {
        self.root.join("entry_friends.parquet")
    }

    /// Key/value hub metadata.
    pub fn hub_meta_path(&self) -> PathBuf {
        self.root.join("hub_meta.parquet")
    }

    /// Default directory for friend shards.
    pub fn friends_dir(&self) -> PathBuf {
        self.root.join("friends")
    }

    /// Remove the catalogue trees and the default friend directory, leaving
    /// events and metadata in place. Missing pieces are skipped.
    pub fn clear_catalog(&self) -> Result<()> {
        for path in [self.entries_path(), self.entry_friends_path(), self.hub_meta_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        let friends = self.friends_dir();
        if friends.is_dir() {
            std::fs::remove_dir_all(&friends)?;
        }
        Ok(())
    }

    /// Resolve a path stored in the catalogue against the hub directory.
    pub fn resolve(&self, stored: &str) -> PathBuf {
        let p = Path::new(stored);
        if p.is_absolute() { normalize_lexically(p) } else { normalize_lexically(&self.root.join(p)) }
    }

    /// Path to store in the catalogue: relative to the hub when possible.
    pub fn store(&self, path: &Path, make_relative: bool) -> Result<String> {
        let abs = absolutize(path)?;
        if make_relative {
            let root = absolutize(&self.root)?;
            if let Some(rel) = relative_to(&abs, &root) {
                return Ok(rel.to_string_lossy().into_owned());
            }
        }
        Ok(abs.to_string_lossy().into_owned())
    }
}

/// Keep `[A-Za-z0-9_-]`, replace everything else with `_`. Empty input gives `none`.
pub fn sanitize(s: &str) -> String {
    if s.is_empty() {
        return "none".to_string();
    }
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Resolve `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute, lexically normalised form of `path`.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize_lexically(path));
    }
    let cwd = std::env::current_dir()
        .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("current directory: {e}"))))?;
    Ok(normalize_lexically(&cwd.join(path)))
}

/// Lexical relative path from `base` to `path`. Both must be absolute and
/// normalised; `None` when they do not share a root.
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    let p: Vec<Component> = path.components().collect();
    let b: Vec<Component> = base.components().collect();
    if p.first() != b.first() {
        return None;
    }
    let common = p.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let mut out = PathBuf::new();
    for _ in common..b.len() {
        out.push("..");
    }
    for c in &p[common..] {
        out.push(c.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_specials() {
        assert_eq!(sanitize("numi-fhc/run1 v2"), "numi-fhc_run1_v2");
        assert_eq!(sanitize(""), "none");
        assert_eq!(sanitize("cnn_score"), "cnn_score");
    }

    #[test]
    fn lexical_normalisation() {
        assert_eq!(normalize_lexically(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_lexically(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(normalize_lexically(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn relative_paths() {
        let rel = relative_to(Path::new("/data/hub/friends/a.parquet"), Path::new("/data/hub")).unwrap();
        assert_eq!(rel, PathBuf::from("friends/a.parquet"));
        let up = relative_to(Path::new("/data/scores/a.parquet"), Path::new("/data/hub")).unwrap();
        assert_eq!(up, PathBuf::from("../scores/a.parquet"));
        assert_eq!(relative_to(Path::new("/data"), Path::new("/data")).unwrap(), PathBuf::from("."));
    }

    #[test]
    fn clear_catalog_keeps_events_and_meta() {
        let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let root = std::env::temp_dir().join(format!("rx_hub_clear_{}_{nanos}.hub", std::process::id()));
        let layout = HubLayout::new(root);
        std::fs::create_dir_all(layout.events_dir()).unwrap();
        std::fs::create_dir_all(layout.meta_dir()).unwrap();
        std::fs::create_dir_all(layout.friends_dir().join("cnn")).unwrap();
        for p in [layout.entries_path(), layout.hub_meta_path(), layout.meta_table("cutflow")] {
            std::fs::write(p, b"x").unwrap();
        }
        std::fs::write(layout.friends_dir().join("cnn").join("a.parquet"), b"x").unwrap();

        layout.clear_catalog().unwrap();
        assert!(!layout.entries_path().exists());
        assert!(!layout.hub_meta_path().exists());
        assert!(!layout.friends_dir().exists());
        assert!(layout.events_dir().is_dir());
        assert!(layout.meta_table("cutflow").exists());

        // Nothing left to remove.
        layout.clear_catalog().unwrap();
        std::fs::remove_dir_all(layout.root()).ok();
    }

    #[test]
    fn layout_resolves_relative_to_root() {
        let layout = HubLayout::new("/tmp/x.hub");
        assert_eq!(layout.resolve("events/00000_a.parquet"), PathBuf::from("/tmp/x.hub/events/00000_a.parquet"));
        assert_eq!(layout.resolve("/abs/f.parquet"), PathBuf::from("/abs/f.parquet"));
        assert_eq!(layout.store(Path::new("/tmp/x.hub/friends/f.parquet"), true).unwrap(), "friends/f.parquet");
        assert_eq!(layout.store(Path::new("/tmp/x.hub/friends/f.parquet"), false).unwrap(), "/tmp/x.hub/friends/f.parquet");
    }
}
