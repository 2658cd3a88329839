//! Writing per-dataset friend tables.

use std::path::{Path, PathBuf};

use rx_core::{Error, Result};
use rx_frame::{Node, Table, WriteOptions, write_table};

use crate::archive::{DEFAULT_FRIEND_TREE, sanitize};

/// Friend output policy.
#[derive(Debug, Clone)]
pub struct FriendConfig {
    /// Directory generated paths are placed in.
    pub output_dir: PathBuf,
    /// ZSTD level.
    pub compression_level: i32,
    /// Tree name recorded in every friend file.
    pub tree_name: String,
    /// Replace an existing file at the target path.
    pub overwrite: bool,
    /// Upper bound on rows per row group.
    pub max_row_group_rows: usize,
}

impl Default for FriendConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("friends"),
            compression_level: 4,
            tree_name: DEFAULT_FRIEND_TREE.to_string(),
            overwrite: true,
            max_row_group_rows: 64 * 1024,
        }
    }
}

/// Writes friend tables.
#[derive(Debug, Clone, Default)]
pub struct FriendWriter {
    config: FriendConfig,
}

impl FriendWriter {
    /// Writer with the given policy.
    pub fn new(config: FriendConfig) -> Self {
        Self { config }
    }

    /// The active policy.
    pub fn config(&self) -> &FriendConfig {
        &self.config
    }

    /// `{output_dir}/{sample_key}_{variation}_friend.parquet`.
    pub fn default_path(&self, sample_key: &str, variation: &str) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}_{}_friend.parquet", sanitize(sample_key), sanitize(variation)))
    }

    /// Write the named columns of `node` to the generated path.
    pub fn write_friend(
        &self,
        node: &Node,
        sample_key: &str,
        variation: &str,
        columns: &[String],
    ) -> Result<PathBuf> {
        let path = self.default_path(sample_key, variation);
        self.write_friend_to_path(node, &path, columns)?;
        Ok(path)
    }

    /// Write the named columns of `node` to an explicit path.
    pub fn write_friend_to_path(&self, node: &Node, path: &Path, columns: &[String]) -> Result<()> {
        let table = node.collect_columns(columns)?;
        self.write_table(&table, path)
    }

    /// Write an already materialised friend table.
    pub fn write_table(&self, table: &Table, path: &Path) -> Result<()> {
        if !self.config.overwrite && path.exists() {
            return Err(Error::Validation(format!(
                "friend file {} exists and overwriting is disabled",
                path.display()
            )));
        }
        let opts = WriteOptions::tree(self.config.tree_name.clone())
            .with_compression_level(self.config.compression_level)
            .with_max_row_group_rows(self.config.max_row_group_rows);
        write_table(path, table, &opts)?;
        tracing::debug!(path = %path.display(), rows = table.num_rows(), tree = %self.config.tree_name, "friend written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rx_frame::{Column, read_tree_name};

    #[test]
    fn writes_generated_path_with_tree_name() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("rx_hub_friend_{}_{nanos}", std::process::id()));
        let writer = FriendWriter::new(FriendConfig { output_dir: dir.join("nested"), ..FriendConfig::default() });
        let node = Node::from_table(
            Table::from_columns(vec![
                ("event_uid".into(), Column::U64(vec![1, 2])),
                ("w_nom".into(), Column::F64(vec![1.0, 2.0])),
                ("other".into(), Column::I32(vec![0, 0])),
            ])
            .unwrap(),
        );
        let cols = vec!["event_uid".to_string(), "w_nom".to_string()];
        let path = writer.write_friend(&node, "numi fhc", "nominal", &cols).unwrap();
        assert!(path.ends_with("numi_fhc_nominal_friend.parquet"));
        assert_eq!(read_tree_name(&path).unwrap().as_deref(), Some("meta"));

        let strict = FriendWriter::new(FriendConfig { overwrite: false, ..writer.config().clone() });
        assert!(strict.write_friend(&node, "numi fhc", "nominal", &cols).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
