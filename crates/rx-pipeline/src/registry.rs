//! Registry of `beam:period` configurations.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use rx_core::{Error, Result};

use crate::config::SampleConfig;
use crate::names::canonicalise_beam;

/// Canonical name of the beam-off beam when the catalogue does not name one.
pub const DEFAULT_EXT_BEAM: &str = "numi-ext";

/// Samples and exposure totals of one beam and period.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamPeriodConfig {
    beam: String,
    period: String,
    nominal_pot: f64,
    nominal_triggers: i64,
    samples: Vec<SampleConfig>,
}

impl BeamPeriodConfig {
    /// Configuration without samples.
    pub fn new(beam: impl Into<String>, period: impl Into<String>, nominal_pot: f64, nominal_triggers: i64) -> Self {
        Self { beam: beam.into(), period: period.into(), nominal_pot, nominal_triggers, samples: Vec::new() }
    }

    /// Replace the sample list.
    pub fn with_samples(mut self, samples: Vec<SampleConfig>) -> Self {
        self.samples = samples;
        self
    }

    /// Beam name.
    pub fn beam(&self) -> &str {
        &self.beam
    }

    /// Period name.
    pub fn period(&self) -> &str {
        &self.period
    }

    /// `beam:period`.
    pub fn label(&self) -> String {
        format!("{}:{}", self.beam, self.period)
    }

    /// Nominal exposure of the period.
    pub fn nominal_pot(&self) -> f64 {
        self.nominal_pot
    }

    /// Nominal trigger count of the period.
    pub fn nominal_triggers(&self) -> i64 {
        self.nominal_triggers
    }

    /// Configured samples.
    pub fn samples(&self) -> &[SampleConfig] {
        &self.samples
    }

    /// Non-empty beam and period, at least one sample, unique sample keys.
    pub fn validate(&self) -> Result<()> {
        if self.beam.is_empty() {
            return Err(Error::Validation("empty beam name".into()));
        }
        if self.period.is_empty() {
            return Err(Error::Validation(format!("empty period name for beam '{}'", self.beam)));
        }
        if self.samples.is_empty() {
            return Err(Error::Validation(format!("no samples for {}/{}", self.beam, self.period)));
        }
        let mut keys = HashSet::new();
        for s in &self.samples {
            if !keys.insert(s.sample_key.as_str()) {
                return Err(Error::Validation(format!("duplicate sample key '{}' in {}", s.sample_key, self.label())));
            }
        }
        Ok(())
    }
}

/// All configurations of a catalogue, keyed by `beam:period`.
#[derive(Debug, Clone, Default)]
pub struct BeamPeriodRegistry {
    configs: BTreeMap<String, BeamPeriodConfig>,
    base_directory: Option<PathBuf>,
    recipe_hash: Option<String>,
    ext_beam: Option<String>,
}

impl BeamPeriodRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration; a second one with the same label is an error.
    pub fn add_config(&mut self, config: BeamPeriodConfig) -> Result<()> {
        let label = config.label();
        if self.configs.contains_key(&label) {
            return Err(Error::Validation(format!("duplicate beam/period configuration '{label}'")));
        }
        self.configs.insert(label, config);
        Ok(())
    }

    /// Configuration of a beam and period.
    pub fn get(&self, beam: &str, period: &str) -> Result<&BeamPeriodConfig> {
        let label = format!("{beam}:{period}");
        self.configs.get(&label).ok_or_else(|| Error::NotFound(format!("unknown beam/period '{label}'")))
    }

    /// True if the beam and period are configured.
    pub fn contains(&self, beam: &str, period: &str) -> bool {
        self.configs.contains_key(&format!("{beam}:{period}"))
    }

    /// Every configuration, ordered by label.
    pub fn all(&self) -> &BTreeMap<String, BeamPeriodConfig> {
        &self.configs
    }

    /// Number of configurations.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Configured beam names, sorted and unique.
    pub fn beams(&self) -> Vec<String> {
        let mut beams: Vec<String> = self.configs.values().map(|c| c.beam.clone()).collect();
        beams.sort();
        beams.dedup();
        beams
    }

    /// Periods configured for a beam, in label order.
    pub fn periods(&self, beam: &str) -> Vec<String> {
        self.configs.values().filter(|c| c.beam == beam).map(|c| c.period.clone()).collect()
    }

    /// Set the ntuple base directory.
    pub fn set_base_directory(&mut self, dir: impl Into<PathBuf>) {
        self.base_directory = Some(dir.into());
    }

    /// Ntuple base directory, if configured.
    pub fn base_directory(&self) -> Option<&Path> {
        self.base_directory.as_deref()
    }

    /// Set the recipe hash.
    pub fn set_recipe_hash(&mut self, hash: impl Into<String>) {
        self.recipe_hash = Some(hash.into());
    }

    /// Recipe hash, if configured.
    pub fn recipe_hash(&self) -> Option<&str> {
        self.recipe_hash.as_deref()
    }

    /// Set the beam that holds beam-off samples.
    pub fn set_ext_beam(&mut self, beam: impl Into<String>) {
        self.ext_beam = Some(beam.into());
    }

    /// The configured beam-off beam, else the registered beam whose canonical
    /// name is [`DEFAULT_EXT_BEAM`].
    pub fn ext_beam(&self) -> Option<String> {
        if let Some(b) = &self.ext_beam {
            return Some(b.clone());
        }
        self.beams().into_iter().find(|b| canonicalise_beam(b) == DEFAULT_EXT_BEAM)
    }
}
