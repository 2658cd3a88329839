//! Writing `events` partitions.

use std::path::{Path, PathBuf};

use rx_core::{Error, Result};
use rx_frame::{Table, WriteOptions, write_table};

use crate::archive::{EVENTS_TREE, WriteMode, sanitize};

/// Compression and row-group policy for payload partitions.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// ZSTD level.
    pub compression_level: i32,
    /// Upper bound on rows per row group.
    pub max_row_group_rows: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self { compression_level: 3, max_row_group_rows: 64 * 1024 }
    }
}

/// Summary of a written partition.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShardStats {
    /// Rows written.
    pub n_events: u64,
    /// Smallest `event_uid` (0 without the column).
    pub first_event_uid: u64,
    /// Largest `event_uid` (0 without the column).
    pub last_event_uid: u64,
    /// Sum of `w_nom` (0 without the column).
    pub sum_weights: f64,
}

impl ShardStats {
    /// Compute the summary of a table.
    pub fn of(table: &Table) -> Result<Self> {
        let mut stats = ShardStats { n_events: table.num_rows() as u64, ..Self::default() };
        if table.has_column("event_uid") {
            let uids = table.u64s("event_uid")?;
            stats.first_event_uid = uids.iter().copied().min().unwrap_or(0);
            stats.last_event_uid = uids.iter().copied().max().unwrap_or(0);
        }
        if table.has_column("w_nom") {
            stats.sum_weights = table.f64s("w_nom")?.iter().sum();
        }
        Ok(stats)
    }
}

/// Writes one table as one partition file.
#[derive(Debug, Clone, Default)]
pub struct ShardWriter {
    config: ShardConfig,
}

impl ShardWriter {
    /// Writer with the given policy.
    pub fn new(config: ShardConfig) -> Self {
        Self { config }
    }

    /// Write `table` under `tree`. Empty tables produce no file and `None`.
    pub fn write(&self, table: &Table, path: &Path, tree: &str) -> Result<Option<ShardStats>> {
        if table.num_rows() == 0 {
            return Ok(None);
        }
        let stats = ShardStats::of(table)?;
        let opts = WriteOptions::tree(tree)
            .with_compression_level(self.config.compression_level)
            .with_max_row_group_rows(self.config.max_row_group_rows);
        write_table(path, table, &opts)?;
        Ok(Some(stats))
    }
}

/// The partitioned `events` tree of a hub.
///
/// Partitions are named `{index:05}_{sample}_{variation}.parquet`; the index
/// fixes their order in the logical tree.
#[derive(Debug)]
pub struct EventsTree {
    dir: PathBuf,
    next_index: usize,
    writer: ShardWriter,
}

impl EventsTree {
    /// Open the tree in `dir`. `Recreate` removes existing partitions.
    pub fn open(dir: impl Into<PathBuf>, mode: WriteMode, config: ShardConfig) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let existing = Self::partitions(&dir)?;
        let next_index = match mode {
            WriteMode::Recreate => {
                for p in &existing {
                    std::fs::remove_file(p)?;
                }
                0
            }
            WriteMode::Update => existing
                .iter()
                .filter_map(|p| partition_index(p))
                .max()
                .map_or(0, |i| i + 1),
        };
        Ok(Self { dir, next_index, writer: ShardWriter::new(config) })
    }

    /// Partition files of a tree directory, in tree order.
    pub fn partitions(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| partition_index(p).is_some())
            .collect();
        out.sort();
        Ok(out)
    }

    /// Directory of the tree.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one partition. Empty tables are skipped and return `None`.
    pub fn append(
        &mut self,
        sample_key: &str,
        variation: &str,
        table: &Table,
    ) -> Result<Option<(PathBuf, ShardStats)>> {
        if table.num_rows() == 0 {
            return Ok(None);
        }
        let name = format!("{:05}_{}_{}.parquet", self.next_index, sanitize(sample_key), sanitize(variation));
        let path = self.dir.join(name);
        let stats = self
            .writer
            .write(table, &path, EVENTS_TREE)?
            .ok_or_else(|| Error::Computation("non-empty partition produced no file".into()))?;
        self.next_index += 1;
        Ok(Some((path, stats)))
    }
}

fn partition_index(path: &Path) -> Option<usize> {
    if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') {
        return None;
    }
    name.split('_').next()?.parse().ok()
}
