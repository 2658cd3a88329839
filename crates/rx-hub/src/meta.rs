//! The `meta/` directory: schema tag, totals, provenance dictionaries,
//! per-dataset exposure and cutflow.

use rx_core::{Result, SampleOrigin};
use rx_frame::{Column, Table, WriteOptions, read_table, write_table};

use crate::archive::HubLayout;
use crate::provenance::{Interner, ProvenanceDicts};

/// Version recorded in `meta/schema`.
pub const SCHEMA_VERSION: i32 = 1;

/// Exposure of one (sample, variation) dataset.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct ExposureRow {
    pub sample_id: u32,
    pub variation_id: u16,
    pub beam_id: u16,
    pub period_id: u16,
    pub stage_id: u16,
    pub origin_id: u8,
    pub sample_key: String,
    pub variation: String,
    pub beam: String,
    pub period: String,
    pub stage: String,
    pub origin: String,
    pub pot: f64,
    pub triggers: i64,
    /// Partition path relative to the hub, empty when the dataset had no rows.
    pub tree_path: String,
}

/// Row counts of one (sample, variation) dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct CutflowRow {
    pub sample_id: u32,
    pub variation_id: u16,
    pub beam_id: u16,
    pub period_id: u16,
    pub stage_id: u16,
    pub origin_id: u8,
    pub n_total: u64,
    pub n_base: u64,
    pub sample_key: String,
    pub variation: String,
    pub beam: String,
    pub period: String,
    pub stage: String,
    pub origin: String,
}

/// Everything written under `meta/`.
#[derive(Debug, Clone, Copy)]
pub struct MetaContent<'a> {
    /// Provenance dictionaries.
    pub dicts: &'a ProvenanceDicts,
    /// Summed exposure.
    pub total_pot: f64,
    /// Summed external triggers.
    pub total_triggers: i64,
    /// One row per dataset.
    pub samples: &'a [ExposureRow],
    /// One row per dataset.
    pub cutflow: &'a [CutflowRow],
}

fn write_meta_table(layout: &HubLayout, name: &str, table: &Table) -> Result<()> {
    write_table(&layout.meta_table(name), table, &WriteOptions::tree(format!("meta/{name}")))
}

fn u16_dictionary(dict: &Interner<u16>) -> Result<Table> {
    Table::from_columns(vec![
        ("id".into(), Column::U16(dict.iter().map(|(id, _)| id as u16).collect())),
        ("name".into(), Column::Str(dict.iter().map(|(_, n)| n.to_string()).collect())),
    ])
}

fn strs<T>(rows: &[T], f: impl Fn(&T) -> &String) -> Column {
    Column::Str(rows.iter().map(|r| f(r).clone()).collect())
}

/// Write the whole `meta/` directory, replacing previous contents.
pub fn write_meta(layout: &HubLayout, content: &MetaContent<'_>) -> Result<()> {
    std::fs::create_dir_all(layout.meta_dir())?;
    let d = content.dicts;

    write_meta_table(
        layout,
        "schema",
        &Table::from_columns(vec![("version".into(), Column::I32(vec![SCHEMA_VERSION]))])?,
    )?;
    write_meta_table(
        layout,
        "totals",
        &Table::from_columns(vec![
            ("total_pot".into(), Column::F64(vec![content.total_pot])),
            ("total_triggers".into(), Column::I64(vec![content.total_triggers])),
        ])?,
    )?;
    write_meta_table(layout, "beams", &u16_dictionary(&d.beams)?)?;
    write_meta_table(layout, "periods", &u16_dictionary(&d.periods)?)?;
    write_meta_table(layout, "stages", &u16_dictionary(&d.stages)?)?;
    write_meta_table(layout, "variations", &u16_dictionary(&d.variations)?)?;
    write_meta_table(
        layout,
        "samples_dict",
        &Table::from_columns(vec![
            ("id".into(), Column::U32(d.samples.iter().map(|(id, _)| id as u32).collect())),
            ("key".into(), Column::Str(d.samples.iter().map(|(_, n)| n.to_string()).collect())),
        ])?,
    )?;
    write_meta_table(
        layout,
        "origins",
        &Table::from_columns(vec![
            ("id".into(), Column::U8(d.origins.iter().map(|(id, _)| id as u8).collect())),
            (
                "name".into(),
                Column::Str(
                    d.origins
                        .iter()
                        .map(|(_, n)| SampleOrigin::from_label(n).dictionary_name().to_string())
                        .collect(),
                ),
            ),
        ])?,
    )?;

    let s = content.samples;
    write_meta_table(
        layout,
        "samples",
        &Table::from_columns(vec![
            ("sample_id".into(), Column::U32(s.iter().map(|r| r.sample_id).collect())),
            ("variation_id".into(), Column::U16(s.iter().map(|r| r.variation_id).collect())),
            ("beam_id".into(), Column::U16(s.iter().map(|r| r.beam_id).collect())),
            ("period_id".into(), Column::U16(s.iter().map(|r| r.period_id).collect())),
            ("stage_id".into(), Column::U16(s.iter().map(|r| r.stage_id).collect())),
            ("origin_id".into(), Column::U8(s.iter().map(|r| r.origin_id).collect())),
            ("sample_key".into(), strs(s, |r| &r.sample_key)),
            ("variation".into(), strs(s, |r| &r.variation)),
            ("beam".into(), strs(s, |r| &r.beam)),
            ("period".into(), strs(s, |r| &r.period)),
            ("stage".into(), strs(s, |r| &r.stage)),
            ("origin".into(), strs(s, |r| &r.origin)),
            ("pot".into(), Column::F64(s.iter().map(|r| r.pot).collect())),
            ("triggers".into(), Column::I64(s.iter().map(|r| r.triggers).collect())),
            ("tree_path".into(), strs(s, |r| &r.tree_path)),
        ])?,
    )?;

    let c = content.cutflow;
    write_meta_table(
        layout,
        "cutflow",
        &Table::from_columns(vec![
            ("sample_id".into(), Column::U32(c.iter().map(|r| r.sample_id).collect())),
            ("variation_id".into(), Column::U16(c.iter().map(|r| r.variation_id).collect())),
            ("beam_id".into(), Column::U16(c.iter().map(|r| r.beam_id).collect())),
            ("period_id".into(), Column::U16(c.iter().map(|r| r.period_id).collect())),
            ("stage_id".into(), Column::U16(c.iter().map(|r| r.stage_id).collect())),
            ("origin_id".into(), Column::U8(c.iter().map(|r| r.origin_id).collect())),
            ("n_total".into(), Column::U64(c.iter().map(|r| r.n_total).collect())),
            ("n_base".into(), Column::U64(c.iter().map(|r| r.n_base).collect())),
            ("sample_key".into(), strs(c, |r| &r.sample_key)),
            ("variation".into(), strs(c, |r| &r.variation)),
            ("beam".into(), strs(c, |r| &r.beam)),
            ("period".into(), strs(c, |r| &r.period)),
            ("stage".into(), strs(c, |r| &r.stage)),
            ("origin".into(), strs(c, |r| &r.origin)),
        ])?,
    )?;
    tracing::debug!(
        hub = %layout.root().display(),
        samples = s.len(),
        cutflow = c.len(),
        "metadata written"
    );
    Ok(())
}

/// `(total_pot, total_triggers)` from `meta/totals`.
pub fn read_totals(layout: &HubLayout) -> Result<(f64, i64)> {
    let t = read_table(&layout.meta_table("totals"))?;
    let pot = t.f64s("total_pot")?.first().copied().unwrap_or(0.0);
    let triggers = t.i64s("total_triggers")?.first().copied().unwrap_or(0);
    Ok((pot, triggers))
}

/// Schema version from `meta/schema`.
pub fn read_schema_version(layout: &HubLayout) -> Result<i64> {
    let t = read_table(&layout.meta_table("schema"))?;
    Ok(t.i64s("version")?.first().copied().unwrap_or(0))
}

/// `(id, name)` rows of a dictionary table (`beams`, `periods`, `stages`,
/// `variations`, `origins` or `samples_dict`).
pub fn read_dictionary(layout: &HubLayout, name: &str) -> Result<Vec<(u64, String)>> {
    let t = read_table(&layout.meta_table(name))?;
    let ids = t.u64s("id")?;
    let label = if t.has_column("key") { "key" } else { "name" };
    let names = t.strs(label)?;
    Ok(ids.into_iter().zip(names.iter().cloned()).collect())
}

/// Rows of `meta/cutflow`.
pub fn read_cutflow(layout: &HubLayout) -> Result<Vec<CutflowRow>> {
    let t = read_table(&layout.meta_table("cutflow"))?;
    let sample_ids = t.u64s("sample_id")?;
    let variation_ids = t.u64s("variation_id")?;
    let beam_ids = t.u64s("beam_id")?;
    let period_ids = t.u64s("period_id")?;
    let stage_ids = t.u64s("stage_id")?;
    let origin_ids = t.u64s("origin_id")?;
    let n_total = t.u64s("n_total")?;
    let n_base = t.u64s("n_base")?;
    let keys = t.strs("sample_key")?;
    let variations = t.strs("variation")?;
    let beams = t.strs("beam")?;
    let periods = t.strs("period")?;
    let stages = t.strs("stage")?;
    let origins = t.strs("origin")?;
    Ok((0..t.num_rows())
        .map(|i| CutflowRow {
            sample_id: sample_ids[i] as u32,
            variation_id: variation_ids[i] as u16,
            beam_id: beam_ids[i] as u16,
            period_id: period_ids[i] as u16,
            stage_id: stage_ids[i] as u16,
            origin_id: origin_ids[i] as u8,
            n_total: n_total[i],
            n_base: n_base[i],
            sample_key: keys[i].clone(),
            variation: variations[i].clone(),
            beam: beams[i].clone(),
            period: periods[i].clone(),
            stage: stages[i].clone(),
            origin: origins[i].clone(),
        })
        .collect())
}
