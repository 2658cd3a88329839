//! One sample's processed nodes: the nominal input and, for simulation, one
//! node per detector variation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rx_core::{Error, Result, SampleKey, SampleOrigin, SampleVariation};
use rx_frame::{Node, ParquetSource};

use crate::descriptor::{SampleDescriptor, VariationDescriptor};
use crate::stage::StageChain;
use crate::validation::validate_columns;
use crate::variables::VariableRegistry;

/// Name of the event table inside a sample input.
pub const EVENT_TABLE: &str = "nuselection/EventSelectionFilter";

/// Where the event table of a sample lives.
///
/// A directory input holds the table as `nuselection/EventSelectionFilter.parquet`.
pub fn resolve_input(base_dir: &Path, relative_path: &str) -> PathBuf {
    let path = base_dir.join(relative_path);
    if path.is_dir() {
        path.join(format!("{EVENT_TABLE}.parquet"))
    } else {
        path
    }
}

/// Processed nodes of one sample.
#[derive(Debug, Clone)]
pub struct SamplePipeline {
    descriptor: SampleDescriptor,
    nominal: Node,
    variations: BTreeMap<SampleVariation, Node>,
}

impl SamplePipeline {
    /// Validate `descriptor`, open its inputs and run `chain` over them.
    ///
    /// `peers` are the other samples of the same beam/period, used to look up
    /// truth-exclusion filters.
    pub fn new(
        descriptor: &SampleDescriptor,
        peers: &[SampleDescriptor],
        base_dir: &Path,
        variables: &VariableRegistry,
        chain: &StageChain,
    ) -> Result<Self> {
        validate_descriptor(descriptor, base_dir)?;
        let origin = descriptor.origin;
        let ident = identifier(descriptor.sample_key.as_str(), &descriptor.relative_path);
        let plan = variables.column_plan_for(origin);

        let mut nominal = load(base_dir, &descriptor.relative_path, origin, chain)?;
        validate_columns(&nominal, &plan, ident, origin, variables.reports_optional())?;
        if !descriptor.truth_filter.is_empty() {
            nominal = nominal.filter_expr(&descriptor.truth_filter)?;
        }
        for key in &descriptor.truth_exclusions {
            match peers.iter().find(|p| p.sample_key.as_str() == key) {
                Some(peer) if !peer.truth_filter.is_empty() => {
                    nominal = nominal.filter_expr(&format!("!({})", peer.truth_filter))?;
                }
                Some(_) => {
                    tracing::warn!(sample = %descriptor.sample_key, peer = %key, "exclusion peer has no truth filter");
                }
                None => {
                    tracing::warn!(sample = %descriptor.sample_key, peer = %key, "exclusion peer not found");
                }
            }
        }

        let mut variations = BTreeMap::new();
        if origin == SampleOrigin::MonteCarlo {
            for var in &descriptor.variations {
                let node = load(base_dir, &var.relative_path, origin, chain)?;
                let var_id = identifier(var.sample_key.as_str(), &var.relative_path);
                validate_columns(&node, &plan, var_id, origin, variables.reports_optional())?;
                if variations.insert(var.variation, node).is_some() {
                    return Err(Error::Config(format!(
                        "sample '{}' lists variation {} twice",
                        descriptor.sample_key,
                        var.variation.key()
                    )));
                }
            }
        } else if !descriptor.variations.is_empty() {
            tracing::warn!(
                sample = %descriptor.sample_key,
                origin = %origin,
                "detector variations are only processed for simulation; ignoring"
            );
        }

        tracing::debug!(
            sample = %descriptor.sample_key,
            origin = %origin,
            variations = variations.len(),
            "sample pipeline ready"
        );
        Ok(Self { descriptor: descriptor.clone(), nominal, variations })
    }

    /// The descriptor this pipeline was built from.
    pub fn descriptor(&self) -> &SampleDescriptor {
        &self.descriptor
    }

    /// Sample key.
    pub fn key(&self) -> &SampleKey {
        &self.descriptor.sample_key
    }

    /// Origin class.
    pub fn origin(&self) -> SampleOrigin {
        self.descriptor.origin
    }

    /// Processed nominal node, truth filter and exclusions applied.
    pub fn nominal(&self) -> &Node {
        &self.nominal
    }

    /// Processed variation nodes.
    pub fn variations(&self) -> &BTreeMap<SampleVariation, Node> {
        &self.variations
    }
}

fn identifier<'a>(key: &'a str, relative_path: &'a str) -> &'a str {
    if key.is_empty() { relative_path } else { key }
}

fn load(base_dir: &Path, relative_path: &str, origin: SampleOrigin, chain: &StageChain) -> Result<Node> {
    let path = resolve_input(base_dir, relative_path);
    let source = ParquetSource::open(&path)?;
    if let Some(tree) = source.tree_name() {
        if tree != EVENT_TABLE {
            tracing::debug!(path = %path.display(), tree, "input records a different table name");
        }
    }
    chain.process(Node::from_source(source), origin)
}

fn validate_descriptor(d: &SampleDescriptor, base_dir: &Path) -> Result<()> {
    let key = d.sample_key.as_str();
    if d.sample_key.is_empty() {
        return Err(Error::Validation("empty sample_key".into()));
    }
    if d.origin == SampleOrigin::Unknown {
        return Err(Error::Validation(format!("unknown origin for sample '{key}'")));
    }
    if d.origin.is_simulated() && d.pot <= 0.0 {
        return Err(Error::Validation(format!("non-positive pot for simulated sample '{key}'")));
    }
    if d.origin == SampleOrigin::Data && d.triggers <= 0 {
        return Err(Error::Validation(format!("non-positive triggers for data sample '{key}'")));
    }
    if d.origin != SampleOrigin::Data && d.relative_path.is_empty() {
        return Err(Error::Validation(format!("empty path for sample '{key}'")));
    }
    let nominal = resolve_input(base_dir, &d.relative_path);
    if !nominal.exists() {
        return Err(Error::NotFound(format!("input for sample '{key}' not found: {}", nominal.display())));
    }
    for v in &d.variations {
        validate_variation(key, v, base_dir)?;
    }
    Ok(())
}

fn validate_variation(key: &str, v: &VariationDescriptor, base_dir: &Path) -> Result<()> {
    if v.variation == SampleVariation::Unknown {
        return Err(Error::Validation(format!(
            "variation '{}' of sample '{key}' has an unknown tag",
            v.sample_key
        )));
    }
    let path = resolve_input(base_dir, &v.relative_path);
    if v.relative_path.is_empty() || !path.exists() {
        return Err(Error::NotFound(format!(
            "input for variation '{}' of sample '{key}' not found: {}",
            v.sample_key,
            path.display()
        )));
    }
    Ok(())
}
