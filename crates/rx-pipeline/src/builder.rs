//! Building a snapshot archive from every sample of a beam and its periods.
//!
//! Construction loads the catalogue in two passes. The first sums the
//! exposure of every processed `beam:period` (including the matching periods
//! of the beam-off beam). The second builds one [`SamplePipeline`] per active
//! sample with a [`StageChain`] weighted against those totals.
//!
//! [`SnapshotPipelineBuilder::snapshot`] then annotates every nominal and
//! variation node with provenance ids and analysis aliases and writes them as
//! `events` partitions in fixed-size batches. After the payload it builds the
//! `(rsub_key, evt)` index and `meta/`, and in hub mode also writes friend
//! shards and the entry catalogue.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rayon::prelude::*;

use rx_core::{Error, Result, SampleKey, SampleOrigin};
use rx_frame::{Column, ImplicitMtGuard, Node, Table, is_implicit_mt_enabled};
use rx_hub::archive::{DEFAULT_FRIEND_TREE, EVENTS_TREE};
use rx_hub::{
    CutflowRow, EventsTree, ExposureRow, FriendConfig, FriendWriter, HubCatalog, HubEntry, HubLayout,
    HubSummary, MetaContent, OpenMode, ProvenanceDicts, ShardConfig, WriteMode, build_event_index,
    write_meta,
};

use crate::descriptor::SampleDescriptor;
use crate::names::canonicalise_beam;
use crate::registry::{BeamPeriodConfig, BeamPeriodRegistry};
use crate::sample::SamplePipeline;
use crate::stage::{StageChain, define_or_replace};
use crate::stages::WeightStage;
use crate::variables::VariableRegistry;

/// Variation label of nominal datasets.
pub const NOMINAL_LABEL: &str = "nominal";

/// Columns added to every written row.
pub const SNAPSHOT_COLUMNS: [&str; 15] = [
    "sample_id",
    "beam_id",
    "period_id",
    "stage_id",
    "variation_id",
    "origin_id",
    "event_uid",
    "rsub_key",
    "base_sel",
    "w_nom",
    "is_mc",
    "is_nominal",
    "sampvar_uid",
    "sample_pot",
    "sample_triggers",
];

/// Columns of the per-dataset friend shards written in hub mode.
pub const FRIEND_COLUMNS: [&str; 5] = ["event_uid", "w_nom", "base_sel", "is_mc", "sampvar_uid"];

/// Write policy of [`SnapshotPipelineBuilder::snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Datasets materialised per batch.
    pub batch_size: usize,
    /// Sleep between batches.
    pub batch_pause: Duration,
    /// Write the entry catalogue and friend shards (hub mode).
    pub write_catalog: bool,
    /// Payload partition policy.
    pub shard: ShardConfig,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_pause: Duration::from_millis(10),
            write_catalog: true,
            shard: ShardConfig::default(),
        }
    }
}

/// What a snapshot wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSummary {
    /// Datasets (sample, variation) processed, empty ones included.
    pub datasets: usize,
    /// Non-empty partitions written.
    pub partitions: usize,
    /// Rows written.
    pub events: u64,
    /// Archive directory.
    pub output: PathBuf,
}

#[derive(Debug, Clone, Copy)]
struct DatasetIds {
    sample_id: u32,
    beam_id: u16,
    period_id: u16,
    stage_id: u16,
    variation_id: u16,
    origin_id: u8,
}

impl DatasetIds {
    fn sampvar_uid(&self) -> u64 {
        (u64::from(self.sample_id) << 16) | u64::from(self.variation_id)
    }
}

/// One (sample, variation) node ready to be written.
struct Dataset {
    node: Node,
    ids: DatasetIds,
    origin: SampleOrigin,
    sample_key: String,
    variation: String,
    beam: String,
    period: String,
    stage: String,
    relative_path: String,
    pot: f64,
    triggers: i64,
}

struct Materialised {
    table: Table,
    n_total: u64,
    n_base: u64,
}

impl Dataset {
    fn materialise(&self, columns: &[String]) -> Result<Materialised> {
        let full = self.node.collect()?;
        let n_base = full.bools("base_sel")?.iter().filter(|&&b| b).count() as u64;
        let n_total = full.num_rows() as u64;
        Ok(Materialised { table: full.select(columns)?, n_total, n_base })
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.sample_key, self.variation)
    }
}

/// Combines the samples of one beam and a set of periods.
pub struct SnapshotPipelineBuilder<'a> {
    registry: &'a BeamPeriodRegistry,
    variables: VariableRegistry,
    beam: String,
    periods: Vec<String>,
    base_dir: PathBuf,
    blind: bool,
    total_pot: f64,
    total_triggers: i64,
    frames: BTreeMap<SampleKey, SamplePipeline>,
    configs: BTreeMap<SampleKey, &'a BeamPeriodConfig>,
    options: SnapshotOptions,
}

impl std::fmt::Debug for SnapshotPipelineBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPipelineBuilder")
            .field("beam", &self.beam)
            .field("periods", &self.periods)
            .field("samples", &self.frames.len())
            .field("total_pot", &self.total_pot)
            .field("total_triggers", &self.total_triggers)
            .finish()
    }
}

impl<'a> SnapshotPipelineBuilder<'a> {
    /// Load every active sample of `beam` for `periods`.
    ///
    /// With `blind` set, data samples are left out.
    pub fn new(
        registry: &'a BeamPeriodRegistry,
        variables: VariableRegistry,
        beam: &str,
        periods: &[String],
        base_dir: impl Into<PathBuf>,
        blind: bool,
    ) -> Result<Self> {
        let mut builder = Self {
            registry,
            variables,
            beam: beam.to_string(),
            periods: periods.to_vec(),
            base_dir: base_dir.into(),
            blind,
            total_pot: 0.0,
            total_triggers: 0,
            frames: BTreeMap::new(),
            configs: BTreeMap::new(),
            options: SnapshotOptions::default(),
        };
        builder.load_all()?;
        Ok(builder)
    }

    /// Replace the write policy.
    pub fn with_options(mut self, options: SnapshotOptions) -> Self {
        self.options = options;
        self
    }

    /// Active write policy.
    pub fn options(&self) -> &SnapshotOptions {
        &self.options
    }

    /// Summed exposure of the processed configurations.
    pub fn total_pot(&self) -> f64 {
        self.total_pot
    }

    /// Summed trigger count of the processed configurations.
    pub fn total_triggers(&self) -> i64 {
        self.total_triggers
    }

    /// Loaded samples by key.
    pub fn sample_frames(&self) -> &BTreeMap<SampleKey, SamplePipeline> {
        &self.frames
    }

    /// Configuration a sample or variation key was loaded from.
    pub fn config_for(&self, key: &SampleKey) -> Option<&'a BeamPeriodConfig> {
        self.configs.get(key).copied()
    }

    fn selected_configs(&self) -> Result<Vec<&'a BeamPeriodConfig>> {
        let ext_beam = self.registry.ext_beam().filter(|b| canonicalise_beam(b) != canonicalise_beam(&self.beam));
        let mut out = Vec::new();
        for period in &self.periods {
            out.push(self.registry.get(&self.beam, period)?);
            if let Some(ext) = &ext_beam {
                if self.registry.contains(ext, period) {
                    out.push(self.registry.get(ext, period)?);
                }
            }
        }
        Ok(out)
    }

    fn load_all(&mut self) -> Result<()> {
        let configs = self.selected_configs()?;
        self.total_pot = configs.iter().map(|c| c.nominal_pot()).sum();
        self.total_triggers = configs.iter().map(|c| c.nominal_triggers()).sum();
        tracing::info!(
            beam = %self.beam,
            periods = %self.periods.join(","),
            configurations = configs.len(),
            total_pot = self.total_pot,
            total_triggers = self.total_triggers,
            "exposure totals"
        );

        for config in configs {
            let peers: Vec<SampleDescriptor> = config.samples().iter().map(SampleDescriptor::from).collect();
            for (cfg, descriptor) in config.samples().iter().zip(&peers) {
                if !cfg.active {
                    tracing::debug!(sample = %descriptor.sample_key, "skipping inactive sample");
                    continue;
                }
                if self.blind && descriptor.origin == SampleOrigin::Data {
                    tracing::info!(sample = %descriptor.sample_key, "blind mode: skipping data sample");
                    continue;
                }
                if self.frames.contains_key(&descriptor.sample_key) {
                    return Err(Error::Config(format!(
                        "duplicate sample key '{}' in {}",
                        descriptor.sample_key,
                        config.label()
                    )));
                }
                let chain = StageChain::standard(WeightStage::new(
                    descriptor.pot,
                    descriptor.triggers,
                    self.total_pot,
                    self.total_triggers,
                ));
                let pipeline = SamplePipeline::new(descriptor, &peers, &self.base_dir, &self.variables, &chain)?;
                self.configs.insert(descriptor.sample_key.clone(), config);
                for var in &descriptor.variations {
                    self.configs.insert(var.sample_key.clone(), config);
                }
                self.frames.insert(descriptor.sample_key.clone(), pipeline);
            }
        }
        tracing::info!(samples = self.frames.len(), "samples loaded");
        Ok(())
    }

    /// Log the columns available on each sample's nominal node.
    pub fn print_all_branches(&self) {
        for (key, sample) in &self.frames {
            tracing::info!(
                sample = %key,
                columns = sample.nominal().column_names().len(),
                "{}",
                sample.nominal().column_names().join(", ")
            );
        }
    }

    /// Log how the loaded samples split by origin, stage and configuration.
    pub fn log_sample_distributions(&self) {
        if self.frames.is_empty() {
            tracing::debug!("no samples queued for processing");
            return;
        }
        let mut by_origin: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_stage: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_config: BTreeMap<String, usize> = BTreeMap::new();
        for (key, sample) in &self.frames {
            *by_origin.entry(sample.origin().to_string()).or_default() += 1;
            let stage = &sample.descriptor().stage_name;
            *by_stage.entry(if stage.is_empty() { "<none>".into() } else { stage.clone() }).or_default() += 1;
            let label = self.config_for(key).map_or_else(|| "<unmapped>".to_string(), |c| c.label());
            *by_config.entry(label).or_default() += 1;
        }
        for (heading, counts) in [("origin", &by_origin), ("stage", &by_stage), ("configuration", &by_config)] {
            for (label, count) in counts {
                tracing::debug!(by = heading, label = %label, samples = count, "sample distribution");
            }
        }
    }

    fn datasets(&self, filter: &str, dicts: &mut ProvenanceDicts) -> Result<Vec<Dataset>> {
        let mut out = Vec::new();
        for (key, sample) in &self.frames {
            let descriptor = sample.descriptor();
            let config = self.config_for(key);
            let beam = config.map(|c| c.beam().to_string()).unwrap_or_default();
            let period = config.map(|c| c.period().to_string()).unwrap_or_default();
            let origin = sample.origin();

            let sample_id = dicts.samples.intern(key.as_str())?;
            let beam_id = dicts.beams.intern(&beam)?;
            let period_id = dicts.periods.intern(&period)?;
            let origin_id = dicts.origin_id(origin)?;

            let stage = descriptor.stage_name.clone();
            let stage_label = if stage.is_empty() { "<none>" } else { stage.as_str() };
            let ids = DatasetIds {
                sample_id,
                beam_id,
                period_id,
                stage_id: dicts.stages.intern(&stage)?,
                variation_id: dicts.variations.intern(NOMINAL_LABEL)?,
                origin_id,
            };
            tracing::info!(
                sample = %key,
                origin = %origin,
                stage = stage_label,
                variations = sample.variations().len(),
                "configuring sample"
            );
            let nominal = with_filter(sample.nominal(), filter)?;
            out.push(Dataset {
                node: annotate(&nominal, ids, origin, true, descriptor.pot, descriptor.triggers)?,
                ids,
                origin,
                sample_key: key.to_string(),
                variation: NOMINAL_LABEL.to_string(),
                beam: beam.clone(),
                period: period.clone(),
                stage,
                relative_path: descriptor.relative_path.clone(),
                pot: descriptor.pot,
                triggers: descriptor.triggers,
            });

            for var in &descriptor.variations {
                let Some(node) = sample.variations().get(&var.variation) else {
                    continue;
                };
                let label = var.variation.key();
                let vstage = descriptor.stage_of(var).to_string();
                let ids = DatasetIds {
                    stage_id: dicts.stages.intern(&vstage)?,
                    variation_id: dicts.variations.intern(label)?,
                    ..ids
                };
                out.push(Dataset {
                    node: annotate(&with_filter(node, filter)?, ids, origin, false, var.pot, var.triggers)?,
                    ids,
                    origin,
                    sample_key: key.to_string(),
                    variation: label.to_string(),
                    beam: beam.clone(),
                    period: period.clone(),
                    stage: vstage,
                    relative_path: var.relative_path.clone(),
                    pot: var.pot,
                    triggers: var.triggers,
                });
            }
        }
        Ok(out)
    }

    /// Write every dataset to the archive at `output`.
    ///
    /// `filter` is applied to every node when non-empty. `columns` is the
    /// payload; the provenance and analysis columns are always added.
    pub fn snapshot(&self, filter: &str, output: impl AsRef<Path>, columns: &[String]) -> Result<SnapshotSummary> {
        let output = output.as_ref().to_path_buf();
        let layout = HubLayout::new(&output);
        tracing::info!(output = %output.display(), samples = self.frames.len(), "preparing snapshot");
        self.log_sample_distributions();

        let mut dicts = ProvenanceDicts::new();
        let datasets = self.datasets(filter, &mut dicts)?;
        if datasets.is_empty() {
            tracing::warn!("no nodes to process");
            return Ok(SnapshotSummary { output, ..SnapshotSummary::default() });
        }
        let write_columns = write_columns(columns);

        let catalog = if self.options.write_catalog {
            Some(HubCatalog::open(&output, OpenMode::Recreate)?)
        } else {
            std::fs::create_dir_all(&output)?;
            layout.clear_catalog()?;
            None
        };
        let friends = FriendWriter::new(FriendConfig { output_dir: layout.friends_dir(), ..FriendConfig::default() });
        let friend_columns: Vec<String> = FRIEND_COLUMNS.iter().map(|c| c.to_string()).collect();
        let mut events = EventsTree::open(layout.events_dir(), WriteMode::Recreate, self.options.shard.clone())?;

        let mut summary = SnapshotSummary { datasets: datasets.len(), output: output.clone(), ..SnapshotSummary::default() };
        let mut exposure = Vec::with_capacity(datasets.len());
        let mut cutflow = Vec::with_capacity(datasets.len());

        let batch_size = self.options.batch_size.max(1);
        let n_batches = datasets.len().div_ceil(batch_size);
        for (b, batch) in datasets.chunks(batch_size).enumerate() {
            tracing::info!(batch = b + 1, of = n_batches, datasets = batch.len(), "running batch");
            let results: Vec<Result<Materialised>> = if is_implicit_mt_enabled() {
                batch.par_iter().map(|d| d.materialise(&write_columns)).collect()
            } else {
                batch.iter().map(|d| d.materialise(&write_columns)).collect()
            };

            for (d, result) in batch.iter().zip(results) {
                let m = result.map_err(|e| {
                    tracing::error!(dataset = %d.describe(), error = %e, "dataset failed");
                    e
                })?;
                cutflow.push(cutflow_row(d, m.n_total, m.n_base));
                exposure.push(exposure_row(d));

                let Some((path, stats)) = events.append(&d.sample_key, &d.variation, &m.table)? else {
                    tracing::debug!(dataset = %d.describe(), "empty dataset, no partition written");
                    continue;
                };
                summary.partitions += 1;
                summary.events += stats.n_events;

                if let Some(catalog) = &catalog {
                    let friend_path = friends.default_path(&d.sample_key, &d.variation);
                    friends.write_table(&m.table.select(&friend_columns)?, &friend_path)?;
                    catalog.add_entry(HubEntry {
                        sample_id: d.ids.sample_id,
                        beam_id: d.ids.beam_id,
                        period_id: d.ids.period_id,
                        variation_id: d.ids.variation_id,
                        stage_id: d.ids.stage_id,
                        origin_id: d.ids.origin_id,
                        dataset_path: layout.store(&path, true)?,
                        dataset_tree: EVENTS_TREE.to_string(),
                        friend_path: layout.store(&friend_path, true)?,
                        friend_tree: DEFAULT_FRIEND_TREE.to_string(),
                        n_events: stats.n_events,
                        first_event_uid: stats.first_event_uid,
                        last_event_uid: stats.last_event_uid,
                        sum_weights: stats.sum_weights,
                        pot: d.pot,
                        triggers: d.triggers,
                        sample_key: d.sample_key.clone(),
                        beam: d.beam.clone(),
                        period: d.period.clone(),
                        variation: d.variation.clone(),
                        origin: d.origin.as_str().to_string(),
                        stage: d.stage.clone(),
                        ..HubEntry::default()
                    })?;
                }
            }
            if b + 1 < n_batches && !self.options.batch_pause.is_zero() {
                std::thread::sleep(self.options.batch_pause);
            }
        }

        {
            let _mt = ImplicitMtGuard::disabled();
            let indexed = build_event_index(&layout)?;
            write_meta(
                &layout,
                &MetaContent {
                    dicts: &dicts,
                    total_pot: self.total_pot,
                    total_triggers: self.total_triggers,
                    samples: &exposure,
                    cutflow: &cutflow,
                },
            )?;
            tracing::debug!(rows = indexed, "index and metadata written");
        }

        if let Some(catalog) = catalog {
            catalog.write_dictionaries(&dicts)?;
            catalog.write_summary(&HubSummary {
                total_pot: self.total_pot,
                total_triggers: self.total_triggers,
                base_directory: self.base_dir.to_string_lossy().into_owned(),
                friend_tree: DEFAULT_FRIEND_TREE.to_string(),
                dataset_base: Some(".".to_string()),
            })?;
            catalog.finalize()?;
        }

        tracing::info!(
            output = %output.display(),
            datasets = summary.datasets,
            partitions = summary.partitions,
            events = summary.events,
            "snapshot written"
        );
        Ok(summary)
    }
}

fn with_filter(node: &Node, filter: &str) -> Result<Node> {
    if filter.trim().is_empty() { Ok(node.clone()) } else { node.filter_expr(filter) }
}

/// Requested columns, deduplicated in order, followed by the snapshot columns.
fn write_columns(requested: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    requested
        .iter()
        .cloned()
        .chain(SNAPSHOT_COLUMNS.iter().map(|c| c.to_string()))
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

fn constant<T: Clone + Send + Sync + 'static>(
    value: T,
    wrap: fn(Vec<T>) -> Column,
) -> impl Fn(&Table) -> Result<Column> + Send + Sync + 'static {
    move |t: &Table| Ok(wrap(vec![value.clone(); t.num_rows()]))
}

fn first_present<'n>(node: &Node, candidates: &[&'n str]) -> Option<&'n str> {
    candidates.iter().copied().find(|c| node.has_column(c))
}

/// Provenance ids, identity keys and analysis aliases.
fn annotate(node: &Node, ids: DatasetIds, origin: SampleOrigin, nominal: bool, pot: f64, triggers: i64) -> Result<Node> {
    let mut n = node.clone();
    n = define_or_replace(&n, "sample_id", &[], constant(ids.sample_id, Column::U32))?;
    n = define_or_replace(&n, "beam_id", &[], constant(ids.beam_id, Column::U16))?;
    n = define_or_replace(&n, "period_id", &[], constant(ids.period_id, Column::U16))?;
    n = define_or_replace(&n, "stage_id", &[], constant(ids.stage_id, Column::U16))?;
    n = define_or_replace(&n, "variation_id", &[], constant(ids.variation_id, Column::U16))?;
    n = define_or_replace(&n, "origin_id", &[], constant(ids.origin_id, Column::U8))?;

    let has_ids = ["run", "sub", "evt"].iter().all(|c| n.has_column(c));
    if has_ids {
        n = define_or_replace(&n, "event_uid", &["run", "sub", "evt"], |t| {
            let (run, sub, evt) = (t.u64s("run")?, t.u64s("sub")?, t.u64s("evt")?);
            Ok(Column::U64(
                run.iter().zip(&sub).zip(&evt).map(|((r, s), e)| (r << 42) | (s << 21) | e).collect(),
            ))
        })?;
        n = define_or_replace(&n, "rsub_key", &["run", "sub"], |t| {
            let (run, sub) = (t.u64s("run")?, t.u64s("sub")?);
            Ok(Column::U64(run.iter().zip(&sub).map(|(r, s)| (r << 20) | s).collect()))
        })?;
    } else {
        n = define_or_replace(&n, "event_uid", &[], constant(0u64, Column::U64))?;
        n = define_or_replace(&n, "rsub_key", &[], constant(0u64, Column::U64))?;
    }

    n = match first_present(&n, &["passes_preselection", "pure_slice_signal", "in_fiducial"]) {
        Some(src) => {
            let col = src.to_string();
            define_or_replace(&n, "base_sel", &[src], move |t| Ok(Column::Bool(t.bools(&col)?)))?
        }
        None => define_or_replace(&n, "base_sel", &[], constant(true, Column::Bool))?,
    };
    n = match first_present(&n, &["nominal_event_weight", "base_event_weight"]) {
        Some(src) => {
            let col = src.to_string();
            define_or_replace(&n, "w_nom", &[src], move |t| {
                Ok(Column::F64(
                    t.f64s(&col)?.into_iter().map(|w| if w.is_finite() && w >= 0.0 { w } else { 1.0 }).collect(),
                ))
            })?
        }
        None => define_or_replace(&n, "w_nom", &[], constant(1.0f64, Column::F64))?,
    };

    n = define_or_replace(&n, "is_mc", &[], constant(origin == SampleOrigin::MonteCarlo, Column::Bool))?;
    n = define_or_replace(&n, "is_nominal", &[], constant(nominal, Column::Bool))?;
    n = define_or_replace(&n, "sampvar_uid", &[], constant(ids.sampvar_uid(), Column::U64))?;
    n = define_or_replace(&n, "sample_pot", &[], constant(pot, Column::F64))?;
    define_or_replace(&n, "sample_triggers", &[], constant(triggers, Column::I64))
}

fn exposure_row(d: &Dataset) -> ExposureRow {
    ExposureRow {
        sample_id: d.ids.sample_id,
        variation_id: d.ids.variation_id,
        beam_id: d.ids.beam_id,
        period_id: d.ids.period_id,
        stage_id: d.ids.stage_id,
        origin_id: d.ids.origin_id,
        sample_key: d.sample_key.clone(),
        variation: d.variation.clone(),
        beam: d.beam.clone(),
        period: d.period.clone(),
        stage: d.stage.clone(),
        origin: d.origin.as_str().to_string(),
        pot: d.pot,
        triggers: d.triggers,
        tree_path: d.relative_path.clone(),
    }
}

fn cutflow_row(d: &Dataset, n_total: u64, n_base: u64) -> CutflowRow {
    CutflowRow {
        sample_id: d.ids.sample_id,
        variation_id: d.ids.variation_id,
        beam_id: d.ids.beam_id,
        period_id: d.ids.period_id,
        stage_id: d.ids.stage_id,
        origin_id: d.ids.origin_id,
        n_total,
        n_base,
        sample_key: d.sample_key.clone(),
        variation: d.variation.clone(),
        beam: d.beam.clone(),
        period: d.period.clone(),
        stage: d.stage.clone(),
        origin: d.origin.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(cols: Vec<(&str, Column)>) -> Node {
        Node::from_table(Table::from_columns(cols.into_iter().map(|(n, c)| (n.to_string(), c)).collect()).unwrap())
    }

    fn ids() -> DatasetIds {
        DatasetIds { sample_id: 3, beam_id: 1, period_id: 2, stage_id: 0, variation_id: 4, origin_id: 1 }
    }

    #[test]
    fn write_columns_deduplicate_and_extend() {
        let cols = write_columns(&["run".into(), "w_nom".into(), "run".into()]);
        assert_eq!(&cols[..2], &["run", "w_nom"]);
        assert_eq!(cols.len(), 2 + SNAPSHOT_COLUMNS.len() - 1);
        assert_eq!(cols.iter().filter(|c| *c == "w_nom").count(), 1);
    }

    #[test]
    fn identity_keys_follow_the_bit_layout() {
        let n = node(vec![
            ("run", Column::I32(vec![12001])),
            ("sub", Column::I32(vec![3])),
            ("evt", Column::I32(vec![42])),
        ]);
        let t = annotate(&n, ids(), SampleOrigin::MonteCarlo, true, 1.0, 0).unwrap().collect().unwrap();
        assert_eq!(t.u64s("event_uid").unwrap(), vec![(12001u64 << 42) | (3 << 21) | 42]);
        assert_eq!(t.u64s("rsub_key").unwrap(), vec![(12001u64 << 20) | 3]);
        assert_eq!(t.u64s("sampvar_uid").unwrap(), vec![(3u64 << 16) | 4]);
        assert_eq!(t.bools("base_sel").unwrap(), vec![true]);
        assert_eq!(t.f64s("w_nom").unwrap(), vec![1.0]);
        assert_eq!(t.bools("is_mc").unwrap(), vec![true]);
        assert_eq!(t.bools("is_nominal").unwrap(), vec![true]);
        assert_eq!(t.column("origin_id").unwrap(), &Column::U8(vec![1]));
    }

    #[test]
    fn aliases_prefer_the_first_available_source() {
        let n = node(vec![
            ("pure_slice_signal", Column::Bool(vec![false, true])),
            ("in_fiducial", Column::Bool(vec![true, true])),
            ("base_event_weight", Column::F64(vec![2.0, f64::NAN])),
        ]);
        let t = annotate(&n, ids(), SampleOrigin::External, false, 0.0, 20).unwrap().collect().unwrap();
        assert_eq!(t.bools("base_sel").unwrap(), vec![false, true]);
        assert_eq!(t.f64s("w_nom").unwrap(), vec![2.0, 1.0]);
        assert_eq!(t.u64s("event_uid").unwrap(), vec![0, 0]);
        assert_eq!(t.bools("is_mc").unwrap(), vec![false, false]);
        assert_eq!(t.i64s("sample_triggers").unwrap(), vec![20, 20]);
    }

    #[test]
    fn dataset_counts_base_selection() {
        let n = node(vec![("passes_preselection", Column::Bool(vec![true, false, true]))]);
        let d = Dataset {
            node: annotate(&n, ids(), SampleOrigin::MonteCarlo, true, 1.0, 0).unwrap(),
            ids: ids(),
            origin: SampleOrigin::MonteCarlo,
            sample_key: "s".into(),
            variation: NOMINAL_LABEL.into(),
            beam: "b".into(),
            period: "p".into(),
            stage: String::new(),
            relative_path: "s.parquet".into(),
            pot: 1.0,
            triggers: 0,
        };
        let m = d.materialise(&write_columns(&[])).unwrap();
        assert_eq!((m.n_total, m.n_base), (3, 2));
        assert_eq!(m.table.column_names().len(), SNAPSHOT_COLUMNS.len());
    }
}
