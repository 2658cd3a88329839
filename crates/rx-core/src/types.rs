//! Sample identity types for rarexsec

use std::fmt;

use serde::{Deserialize, Serialize};

/// Provenance class of a sample.
///
/// The origin decides which stages apply which transformations and which
/// columns an input file must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SampleOrigin {
    /// Beam-on detector data
    Data,
    /// Simulated neutrino interactions (overlay)
    MonteCarlo,
    /// Beam-off data taken with an external trigger
    External,
    /// Simulated interactions outside the cryostat
    Dirt,
    /// Unrecognised `sample_type`
    Unknown,
}

impl SampleOrigin {
    /// Parse a configuration `sample_type` string (`mc`, `data`, `ext`, `dirt`).
    ///
    /// Anything else maps to [`SampleOrigin::Unknown`].
    pub fn from_sample_type(s: &str) -> Self {
        match s {
            "mc" => SampleOrigin::MonteCarlo,
            "data" => SampleOrigin::Data,
            "ext" => SampleOrigin::External,
            "dirt" => SampleOrigin::Dirt,
            _ => SampleOrigin::Unknown,
        }
    }

    /// Short label used in catalogue rows and log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleOrigin::Data => "data",
            SampleOrigin::MonteCarlo => "mc",
            SampleOrigin::External => "ext",
            SampleOrigin::Dirt => "dirt",
            SampleOrigin::Unknown => "unknown",
        }
    }

    /// Inverse of [`SampleOrigin::as_str`]; also accepts the dictionary names.
    pub fn from_label(s: &str) -> Self {
        match s {
            "data" => SampleOrigin::Data,
            "mc" => SampleOrigin::MonteCarlo,
            "ext" | "external" => SampleOrigin::External,
            "dirt" => SampleOrigin::Dirt,
            _ => SampleOrigin::Unknown,
        }
    }

    /// Name written to the `meta/origins` dictionary.
    pub fn dictionary_name(&self) -> &'static str {
        match self {
            SampleOrigin::External => "external",
            other => other.as_str(),
        }
    }

    /// True for origins whose events come from simulation and carry exposure in POT.
    pub fn is_simulated(&self) -> bool {
        matches!(self, SampleOrigin::MonteCarlo | SampleOrigin::Dirt)
    }
}

impl fmt::Display for SampleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detector-response variation of a simulation sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum SampleVariation {
    CV,
    LYAttenuation,
    LYDown,
    LYRayleigh,
    Recomb2,
    SCE,
    WireModX,
    WireModYZ,
    WireModAngleXZ,
    WireModAngleYZ,
    Unknown,
}

impl SampleVariation {
    /// All known variations, in declaration order.
    pub const KNOWN: [SampleVariation; 10] = [
        SampleVariation::CV,
        SampleVariation::LYAttenuation,
        SampleVariation::LYDown,
        SampleVariation::LYRayleigh,
        SampleVariation::Recomb2,
        SampleVariation::SCE,
        SampleVariation::WireModX,
        SampleVariation::WireModYZ,
        SampleVariation::WireModAngleXZ,
        SampleVariation::WireModAngleYZ,
    ];

    /// Parse a configuration `variation_type` string (`cv`, `lyatt`, `lydown`, ...).
    pub fn from_variation_type(s: &str) -> Self {
        match s {
            "cv" => SampleVariation::CV,
            "lyatt" => SampleVariation::LYAttenuation,
            "lydown" => SampleVariation::LYDown,
            "lyray" => SampleVariation::LYRayleigh,
            "recomb2" => SampleVariation::Recomb2,
            "sce" => SampleVariation::SCE,
            "wiremodx" => SampleVariation::WireModX,
            "wiremodyz" => SampleVariation::WireModYZ,
            "wiremodanglexz" => SampleVariation::WireModAngleXZ,
            "wiremodangleyz" => SampleVariation::WireModAngleYZ,
            _ => SampleVariation::Unknown,
        }
    }

    /// Canonical key (`CV`, `LYAttenuation`, ...).
    pub fn key(&self) -> &'static str {
        match self {
            SampleVariation::CV => "CV",
            SampleVariation::LYAttenuation => "LYAttenuation",
            SampleVariation::LYDown => "LYDown",
            SampleVariation::LYRayleigh => "LYRayleigh",
            SampleVariation::Recomb2 => "Recomb2",
            SampleVariation::SCE => "SCE",
            SampleVariation::WireModX => "WireModX",
            SampleVariation::WireModYZ => "WireModYZ",
            SampleVariation::WireModAngleXZ => "WireModAngleXZ",
            SampleVariation::WireModAngleYZ => "WireModAngleYZ",
            SampleVariation::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SampleVariation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Opaque identity of one sample variant (nominal or detector variation).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleKey(String);

impl SampleKey {
    /// Wrap a key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the key is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SampleKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SampleKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}
