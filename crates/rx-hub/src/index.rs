//! Secondary index over `(rsub_key, evt)` on the `events` tree.

use rx_core::{Error, Result};
use rx_frame::{Column, Table, WriteOptions, read_schema, read_table, read_table_columns, write_table};

use crate::archive::HubLayout;
use crate::shard::EventsTree;

const EVT_MASK: u64 = (1 << 21) - 1;

/// Build `events.index.parquet` for the hub and return the number of indexed rows.
///
/// Every partition must carry `rsub_key`. A partition without an `evt`
/// column takes it from the low 21 bits of `event_uid`. Rows are sorted by
/// `(rsub_key, evt)` and then by position, so duplicate keys keep tree order.
pub fn build_event_index(layout: &HubLayout) -> Result<usize> {
    let partitions = EventsTree::partitions(&layout.events_dir())?;
    let mut rows: Vec<(u64, u64, u32, u64)> = Vec::new();
    for (p, path) in partitions.iter().enumerate() {
        let part = u32::try_from(p)
            .map_err(|_| Error::Validation("too many partitions to index".into()))?;
        let (schema, _) = read_schema(path)?;
        let has_evt = schema.iter().any(|(n, _)| n == "evt");
        let evt_source = if has_evt { "evt" } else { "event_uid" };
        let t = read_table_columns(path, &["rsub_key".to_string(), evt_source.to_string()])?;
        let rsub = t.u64s("rsub_key")?;
        let evt: Vec<u64> = if has_evt {
            t.u64s("evt")?
        } else {
            t.u64s("event_uid")?.into_iter().map(|uid| uid & EVT_MASK).collect()
        };
        rows.extend(rsub.into_iter().zip(evt).enumerate().map(|(r, (k, e))| (k, e, part, r as u64)));
    }
    rows.sort_unstable();

    let n = rows.len();
    let table = Table::from_columns(vec![
        ("rsub_key".into(), Column::U64(rows.iter().map(|r| r.0).collect())),
        ("evt".into(), Column::U64(rows.iter().map(|r| r.1).collect())),
        ("partition".into(), Column::U32(rows.iter().map(|r| r.2).collect())),
        ("row".into(), Column::U64(rows.iter().map(|r| r.3).collect())),
    ])?;
    write_table(&layout.index_path(), &table, &WriteOptions::tree("events.index"))?;
    tracing::debug!(rows = n, partitions = partitions.len(), "event index built");
    Ok(n)
}

/// Loaded secondary index.
#[derive(Debug, Clone, Default)]
pub struct EventIndex {
    keys: Vec<(u64, u64)>,
    positions: Vec<(u32, u64)>,
}

impl EventIndex {
    /// Read the index of a hub.
    pub fn open(layout: &HubLayout) -> Result<Self> {
        let path = layout.index_path();
        if !path.exists() {
            return Err(Error::NotFound(format!("event index {}", path.display())));
        }
        let t = read_table(&path)?;
        let rsub = t.u64s("rsub_key")?;
        let evt = t.u64s("evt")?;
        let part = t.u64s("partition")?;
        let row = t.u64s("row")?;
        Ok(Self {
            keys: rsub.into_iter().zip(evt).collect(),
            positions: part.into_iter().map(|p| p as u32).zip(row).collect(),
        })
    }

    /// `(partition, row)` of the first event with this key.
    pub fn lookup(&self, rsub_key: u64, evt: u64) -> Option<(u32, u64)> {
        let i = self.keys.partition_point(|k| *k < (rsub_key, evt));
        (self.keys.get(i) == Some(&(rsub_key, evt))).then(|| self.positions[i])
    }

    /// Indexed rows.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in index order.
    pub fn keys(&self) -> &[(u64, u64)] {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::WriteMode;
    use crate::shard::ShardConfig;

    #[test]
    fn index_is_sorted_and_covers_every_row() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let root = std::env::temp_dir().join(format!("rx_hub_index_{}_{nanos}.hub", std::process::id()));
        let layout = HubLayout::new(&root);
        let mut tree = EventsTree::open(layout.events_dir(), WriteMode::Recreate, ShardConfig::default()).unwrap();
        let part = |rsub: Vec<u64>, evt: Vec<u64>| {
            Table::from_columns(vec![("rsub_key".into(), Column::U64(rsub)), ("evt".into(), Column::U64(evt))])
                .unwrap()
        };
        tree.append("a", "nominal", &part(vec![5, 1], vec![2, 9])).unwrap();
        tree.append("b", "nominal", &part(vec![1, 3], vec![1, 0])).unwrap();

        assert_eq!(build_event_index(&layout).unwrap(), 4);
        let idx = EventIndex::open(&layout).unwrap();
        assert_eq!(idx.len(), 4);
        assert_eq!(idx.keys(), &[(1, 1), (1, 9), (3, 0), (5, 2)]);
        assert_eq!(idx.lookup(1, 9), Some((0, 1)));
        assert_eq!(idx.lookup(3, 0), Some((1, 1)));
        assert_eq!(idx.lookup(4, 0), None);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn evt_falls_back_to_event_uid_bits() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let root = std::env::temp_dir().join(format!("rx_hub_index_uid_{}_{nanos}.hub", std::process::id()));
        let layout = HubLayout::new(&root);
        let mut tree = EventsTree::open(layout.events_dir(), WriteMode::Recreate, ShardConfig::default()).unwrap();
        let uid = (7u64 << 42) | (3 << 21) | 11;
        let t = Table::from_columns(vec![
            ("rsub_key".into(), Column::U64(vec![(7 << 20) | 3])),
            ("event_uid".into(), Column::U64(vec![uid])),
        ])
        .unwrap();
        tree.append("a", "nominal", &t).unwrap();

        build_event_index(&layout).unwrap();
        let idx = EventIndex::open(&layout).unwrap();
        assert_eq!(idx.lookup((7 << 20) | 3, 11), Some((0, 0)));
        std::fs::remove_dir_all(&root).ok();
    }
}
