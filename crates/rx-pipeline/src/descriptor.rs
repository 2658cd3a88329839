//! Resolved sample descriptions.
//!
//! A [`SampleDescriptor`] is the catalogue entry of one sample with its
//! strings parsed into typed origins and variations.

use rx_core::{SampleKey, SampleOrigin, SampleVariation};

use crate::config::{SampleConfig, VariationConfig};

/// One detector variation of a simulated sample.
#[derive(Debug, Clone, PartialEq)]
pub struct VariationDescriptor {
    /// Key of the variation sample.
    pub sample_key: SampleKey,
    /// Parsed variation tag.
    pub variation: SampleVariation,
    /// Input path relative to the base directory.
    pub relative_path: String,
    /// Stage override, `None` when the nominal stage applies.
    pub stage_name: Option<String>,
    /// Exposure.
    pub pot: f64,
    /// Trigger count.
    pub triggers: i64,
}

impl From<&VariationConfig> for VariationDescriptor {
    fn from(cfg: &VariationConfig) -> Self {
        Self {
            sample_key: SampleKey::new(cfg.sample_key.clone()),
            variation: SampleVariation::from_variation_type(&cfg.variation_type),
            relative_path: cfg.relative_path.clone(),
            stage_name: Some(cfg.stage_name.clone()).filter(|s| !s.is_empty()),
            pot: cfg.pot,
            triggers: cfg.triggers,
        }
    }
}

/// One sample of a beam/period.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDescriptor {
    /// Unique key.
    pub sample_key: SampleKey,
    /// Origin class.
    pub origin: SampleOrigin,
    /// Input path relative to the base directory.
    pub relative_path: String,
    /// Processing stage name.
    pub stage_name: String,
    /// Selection keeping this sample's share of the events; empty for none.
    pub truth_filter: String,
    /// Keys of peers whose truth filter is vetoed.
    pub truth_exclusions: Vec<String>,
    /// Exposure.
    pub pot: f64,
    /// Trigger count.
    pub triggers: i64,
    /// Detector variations.
    pub variations: Vec<VariationDescriptor>,
}

impl SampleDescriptor {
    /// Stage name of a variation: its override, else the nominal one.
    pub fn stage_of<'a>(&'a self, variation: &'a VariationDescriptor) -> &'a str {
        variation.stage_name.as_deref().unwrap_or(&self.stage_name)
    }

    /// The variation descriptor for a tag.
    pub fn variation(&self, tag: SampleVariation) -> Option<&VariationDescriptor> {
        self.variations.iter().find(|v| v.variation == tag)
    }
}

impl From<&SampleConfig> for SampleDescriptor {
    fn from(cfg: &SampleConfig) -> Self {
        Self {
            sample_key: SampleKey::new(cfg.sample_key.clone()),
            origin: cfg.origin(),
            relative_path: cfg.relative_path.clone(),
            stage_name: cfg.stage_name.clone(),
            truth_filter: cfg.truth_filter.clone(),
            truth_exclusions: cfg.exclusion_truth_filters.clone(),
            pot: cfg.pot,
            triggers: cfg.triggers,
            variations: cfg.detector_variations.iter().map(VariationDescriptor::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_config() {
        let cfg: SampleConfig = serde_json::from_value(serde_json::json!({
            "sample_key": "mc", "sample_type": "mc", "stage_name": "sel",
            "relative_path": "mc.parquet", "truth_filter": "is_signal", "pot": 2.0,
            "exclusion_truth_filters": ["strange"],
            "detector_variations": [
                { "sample_key": "mc_cv", "variation_type": "cv", "relative_path": "cv.parquet", "pot": 1.0 },
                { "sample_key": "mc_sce", "variation_type": "sce", "stage_name": "sel2" }
            ]
        }))
        .unwrap();
        let d = SampleDescriptor::from(&cfg);
        assert_eq!(d.origin, SampleOrigin::MonteCarlo);
        assert_eq!(d.truth_exclusions, vec!["strange"]);
        assert_eq!(d.variations.len(), 2);
        let cv = d.variation(SampleVariation::CV).unwrap();
        assert_eq!(cv.stage_name, None);
        assert_eq!(d.stage_of(cv), "sel");
        assert_eq!(d.stage_of(d.variation(SampleVariation::SCE).unwrap()), "sel2");
        assert!(d.variation(SampleVariation::LYDown).is_none());
    }
}
