//! JSON run catalogue.
//!
//! ```json
//! {
//!   "ntuple_base_directory": "/data/ntuples",
//!   "source_recipe_hash": "abc123",
//!   "ext_beam": "numi-ext",
//!   "run_configurations": {
//!     "numi-fhc": {
//!       "run1": {
//!         "nominal_pot": 2.0e20,
//!         "samples": [
//!           { "sample_key": "numi_fhc_overlay", "sample_type": "mc",
//!             "relative_path": "overlay.parquet", "pot": 1.0e21,
//!             "detector_variations": [
//!               { "sample_key": "numi_fhc_overlay_lydown", "variation_type": "lydown",
//!                 "relative_path": "lydown.parquet", "pot": 5.0e20 }
//!             ] }
//!         ]
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! The beam table may also sit under `beamlines` or `samples.beamlines`, and
//! the base directory under `samples.ntupledir`.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use rx_core::{Error, Result, SampleOrigin, SampleVariation};

use crate::registry::{BeamPeriodConfig, BeamPeriodRegistry};

/// `beam -> period -> period config`.
pub type BeamTable = BTreeMap<String, BTreeMap<String, PeriodConfig>>;

/// One detector variation of a simulated sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariationConfig {
    /// Key of the variation sample.
    pub sample_key: String,
    /// Variation tag (`cv`, `lydown`, ...).
    #[serde(default)]
    pub variation_type: String,
    /// Input path relative to the base directory.
    #[serde(default)]
    pub relative_path: String,
    /// Stage override; empty means the nominal sample's stage.
    #[serde(default)]
    pub stage_name: String,
    /// Exposure of the variation.
    #[serde(default)]
    pub pot: f64,
    /// Trigger count of the variation.
    #[serde(default)]
    pub triggers: i64,
}

fn yes() -> bool {
    true
}

/// One sample of a beam/period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleConfig {
    /// Unique key within the configuration.
    pub sample_key: String,
    /// `mc`, `data`, `ext` or `dirt`.
    #[serde(default)]
    pub sample_type: String,
    /// Input path relative to the base directory.
    #[serde(default)]
    pub relative_path: String,
    /// Processing stage recorded in the catalogue.
    #[serde(default)]
    pub stage_name: String,
    /// Boolean expression keeping only this sample's share of the events.
    #[serde(default)]
    pub truth_filter: String,
    /// Keys of peer samples whose truth filter is vetoed.
    #[serde(default)]
    pub exclusion_truth_filters: Vec<String>,
    /// Exposure.
    #[serde(default)]
    pub pot: f64,
    /// Trigger count.
    #[serde(default)]
    pub triggers: i64,
    /// Inactive samples are skipped by the builder.
    #[serde(default = "yes")]
    pub active: bool,
    /// Detector variations.
    #[serde(default)]
    pub detector_variations: Vec<VariationConfig>,
}

impl SampleConfig {
    /// Origin class from `sample_type`.
    pub fn origin(&self) -> SampleOrigin {
        SampleOrigin::from_sample_type(&self.sample_type)
    }
}

/// Everything configured for one beam and period.
///
/// The exposure totals accept the older key names; the first present of each
/// list wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nominal_pot: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pot_target_wcut_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    torb_target_pot_wcut: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nominal_triggers: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ext_triggers_total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ext_triggers: Option<i64>,
    /// Samples of the period.
    pub samples: Vec<SampleConfig>,
}

impl PeriodConfig {
    /// Period with explicit totals.
    pub fn new(nominal_pot: f64, nominal_triggers: i64, samples: Vec<SampleConfig>) -> Self {
        Self {
            nominal_pot: Some(nominal_pot),
            nominal_triggers: Some(nominal_triggers),
            samples,
            ..Self::default()
        }
    }

    /// `nominal_pot`, `pot_target_wcut_total` or `torb_target_pot_wcut`; 0 if none.
    pub fn nominal_pot(&self) -> f64 {
        self.nominal_pot.or(self.pot_target_wcut_total).or(self.torb_target_pot_wcut).unwrap_or(0.0)
    }

    /// `nominal_triggers`, `ext_triggers_total` or `ext_triggers`; 0 if none.
    pub fn nominal_triggers(&self) -> i64 {
        self.nominal_triggers.or(self.ext_triggers_total).or(self.ext_triggers).unwrap_or(0)
    }
}

/// The `samples` object of the legacy layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacySamples {
    /// Base directory.
    #[serde(default)]
    pub ntupledir: Option<String>,
    /// Beam table.
    #[serde(default)]
    pub beamlines: Option<BeamTable>,
}

/// Top level of a catalogue file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogueFile {
    /// Base directory of every relative sample path.
    #[serde(default)]
    pub ntuple_base_directory: Option<String>,
    /// Hash of the recipe that produced the ntuples.
    #[serde(default)]
    pub source_recipe_hash: Option<String>,
    /// Older name of `source_recipe_hash`.
    #[serde(default)]
    pub catalog_hash: Option<String>,
    /// Beam whose periods hold the beam-off samples of every other beam.
    #[serde(default)]
    pub ext_beam: Option<String>,
    /// Beam table.
    #[serde(default)]
    pub run_configurations: Option<BeamTable>,
    /// Beam table under its older name.
    #[serde(default)]
    pub beamlines: Option<BeamTable>,
    /// Legacy layout.
    #[serde(default)]
    pub samples: Option<LegacySamples>,
}

impl CatalogueFile {
    /// Parse a catalogue from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a catalogue file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("could not open config file {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// `ntuple_base_directory`, else `samples.ntupledir`.
    pub fn base_directory(&self) -> Option<&str> {
        self.ntuple_base_directory
            .as_deref()
            .or_else(|| self.samples.as_ref().and_then(|s| s.ntupledir.as_deref()))
    }

    /// `source_recipe_hash`, else `catalog_hash`.
    pub fn recipe_hash(&self) -> Option<&str> {
        self.source_recipe_hash.as_deref().or(self.catalog_hash.as_deref())
    }

    /// `run_configurations`, else `beamlines`, else `samples.beamlines`.
    pub fn beam_table(&self) -> Result<&BeamTable> {
        self.run_configurations
            .as_ref()
            .or(self.beamlines.as_ref())
            .or_else(|| self.samples.as_ref().and_then(|s| s.beamlines.as_ref()))
            .ok_or_else(|| Error::Config("missing run configuration sections".into()))
    }

    /// Validate every period and add it to `registry`.
    pub fn register(&self, registry: &mut BeamPeriodRegistry) -> Result<()> {
        if let Some(base) = self.base_directory() {
            registry.set_base_directory(base);
        }
        if let Some(hash) = self.recipe_hash() {
            registry.set_recipe_hash(hash);
        }
        if let Some(ext) = &self.ext_beam {
            registry.set_ext_beam(ext);
        }
        for (beam, periods) in self.beam_table()? {
            for (period, details) in periods {
                let config = BeamPeriodConfig::new(beam, period, details.nominal_pot(), details.nominal_triggers())
                    .with_samples(details.samples.clone());
                validate_samples(&config)?;
                registry.add_config(config)?;
            }
        }
        Ok(())
    }
}

/// Reject unknown sample and variation types at load time.
fn validate_samples(config: &BeamPeriodConfig) -> Result<()> {
    config.validate()?;
    let mut keys = HashSet::new();
    for sample in config.samples() {
        if sample.origin() == SampleOrigin::Unknown {
            return Err(Error::Config(format!(
                "{}: sample '{}' has unknown sample_type '{}'",
                config.label(),
                sample.sample_key,
                sample.sample_type
            )));
        }
        for var in &sample.detector_variations {
            if SampleVariation::from_variation_type(&var.variation_type) == SampleVariation::Unknown {
                return Err(Error::Config(format!(
                    "{}: variation '{}' of '{}' has unknown variation_type '{}'",
                    config.label(),
                    var.sample_key,
                    sample.sample_key,
                    var.variation_type
                )));
            }
            if !keys.insert(var.sample_key.clone()) {
                return Err(Error::Config(format!(
                    "{}: duplicate variation key '{}'",
                    config.label(),
                    var.sample_key
                )));
            }
        }
    }
    Ok(())
}

/// Load a catalogue file into `registry`.
pub fn load_catalogue(path: impl AsRef<Path>, registry: &mut BeamPeriodRegistry) -> Result<()> {
    let path = path.as_ref();
    let file = CatalogueFile::from_path(path)?;
    file.register(registry).map_err(|e| match e {
        Error::Config(m) => Error::Config(format!("{}: {m}", path.display())),
        other => other,
    })?;
    tracing::info!(
        config = %path.display(),
        periods = registry.len(),
        base_directory = registry.base_directory().map(|p| p.display().to_string()).unwrap_or_default(),
        "loaded run catalogue"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOGUE: &str = r#"{
        "samples": {
            "ntupledir": "/data",
            "beamlines": {
                "numi-fhc": {
                    "run1": {
                        "pot_target_wcut_total": 3.0e20,
                        "torb_target_pot_wcut": 9.0,
                        "ext_triggers": 12,
                        "samples": [
                            { "sample_key": "mc1", "sample_type": "mc", "relative_path": "a.parquet", "pot": 1.0e21,
                              "detector_variations": [
                                  { "sample_key": "mc1_lyd", "variation_type": "lydown", "relative_path": "b.parquet" }
                              ] },
                            { "sample_key": "d1", "sample_type": "data", "triggers": 5, "active": false }
                        ]
                    }
                }
            }
        },
        "catalog_hash": "h1"
    }"#;

    #[test]
    fn legacy_layout_and_aliases() {
        let file = CatalogueFile::from_json_str(CATALOGUE).unwrap();
        assert_eq!(file.base_directory(), Some("/data"));
        assert_eq!(file.recipe_hash(), Some("h1"));
        let table = file.beam_table().unwrap();
        let period = &table["numi-fhc"]["run1"];
        assert_eq!(period.nominal_pot(), 3.0e20);
        assert_eq!(period.nominal_triggers(), 12);
        assert!(period.samples[0].active);
        assert!(!period.samples[1].active);
        assert_eq!(period.samples[0].origin(), SampleOrigin::MonteCarlo);
        assert_eq!(period.samples[0].detector_variations[0].variation_type, "lydown");
    }

    #[test]
    fn registers_periods() {
        let mut reg = BeamPeriodRegistry::new();
        CatalogueFile::from_json_str(CATALOGUE).unwrap().register(&mut reg).unwrap();
        let cfg = reg.get("numi-fhc", "run1").unwrap();
        assert_eq!(cfg.samples().len(), 2);
        assert_eq!(reg.base_directory(), Some(Path::new("/data")));
        assert_eq!(reg.recipe_hash(), Some("h1"));
    }

    #[test]
    fn missing_beam_table_is_an_error() {
        let file = CatalogueFile::from_json_str(r#"{"ntuple_base_directory": "/x"}"#).unwrap();
        assert!(file.register(&mut BeamPeriodRegistry::new()).is_err());
    }

    #[test]
    fn unknown_sample_type_is_rejected() {
        let text = r#"{"beamlines": {"b": {"p": {"samples": [{"sample_key": "s", "sample_type": "cosmic"}]}}}}"#;
        let err = CatalogueFile::from_json_str(text).unwrap().register(&mut BeamPeriodRegistry::new()).unwrap_err();
        assert!(err.to_string().contains("unknown sample_type"));
    }

    #[test]
    fn samples_section_is_required() {
        assert!(CatalogueFile::from_json_str(r#"{"beamlines": {"b": {"p": {"nominal_pot": 1.0}}}}"#).is_err());
    }
}
