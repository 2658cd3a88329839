//! Provenance dictionaries: dense, first-seen-wins string → id maps.

use std::collections::{BTreeMap, HashMap};

use rx_core::{Error, Result, SampleOrigin};
use serde_json::{Value, json};

/// Insertion-ordered string interner with dense ids starting at 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interner<I> {
    ids: HashMap<String, I>,
    names: Vec<String>,
}

impl<I> Default for Interner<I> {
    fn default() -> Self {
        Self { ids: HashMap::new(), names: Vec::new() }
    }
}

impl<I> Interner<I>
where
    I: Copy + TryFrom<usize> + Into<u64>,
{
    /// Empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `name`, assigning the next id on first sight.
    pub fn intern(&mut self, name: &str) -> Result<I> {
        if let Some(&id) = self.ids.get(name) {
            return Ok(id);
        }
        let id = I::try_from(self.names.len()).map_err(|_| {
            Error::Validation(format!("too many distinct values interning '{name}'"))
        })?;
        self.ids.insert(name.to_string(), id);
        self.names.push(name.to_string());
        Ok(id)
    }

    /// Id of an already interned name.
    pub fn get(&self, name: &str) -> Option<I> {
        self.ids.get(name).copied()
    }

    /// Name of an id.
    pub fn name(&self, id: I) -> Option<&str> {
        self.names.get(id.into() as usize).map(String::as_str)
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// `(id, name)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i as u64, n.as_str()))
    }

    fn to_json(&self) -> Value {
        let map: BTreeMap<&str, u64> = self.iter().map(|(id, n)| (n, id)).collect();
        json!(map)
    }

    fn from_json(value: Option<&Value>) -> Result<Self> {
        let mut pairs: Vec<(u64, String)> = Vec::new();
        if let Some(Value::Object(obj)) = value {
            for (name, id) in obj {
                let id = id.as_u64().ok_or_else(|| {
                    Error::Validation(format!("provenance id for '{name}' is not an integer"))
                })?;
                pairs.push((id, name.clone()));
            }
        }
        pairs.sort();
        let mut out = Self::new();
        for (expected, (id, name)) in pairs.iter().enumerate() {
            if *id != expected as u64 {
                return Err(Error::Validation(format!(
                    "provenance ids are not dense: '{name}' has id {id}, expected {expected}"
                )));
            }
            out.intern(name)?;
        }
        Ok(out)
    }
}

/// The six provenance dictionaries of a snapshot run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct ProvenanceDicts {
    pub samples: Interner<u32>,
    pub beams: Interner<u16>,
    pub periods: Interner<u16>,
    pub stages: Interner<u16>,
    pub variations: Interner<u16>,
    pub origins: Interner<u8>,
}

/// Seed order of the origin dictionary.
pub const ORIGIN_SEED: [SampleOrigin; 4] =
    [SampleOrigin::Data, SampleOrigin::MonteCarlo, SampleOrigin::Dirt, SampleOrigin::External];

impl Default for ProvenanceDicts {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvenanceDicts {
    /// Empty dictionaries with the origin map pre-seeded.
    pub fn new() -> Self {
        let mut origins = Interner::new();
        for o in ORIGIN_SEED {
            // cannot overflow: four entries into u8 ids
            let _ = origins.intern(o.as_str());
        }
        Self {
            samples: Interner::new(),
            beams: Interner::new(),
            periods: Interner::new(),
            stages: Interner::new(),
            variations: Interner::new(),
            origins,
        }
    }

    /// Origin id, interning origins outside the seed.
    pub fn origin_id(&mut self, origin: SampleOrigin) -> Result<u8> {
        self.origins.intern(origin.as_str())
    }

    /// JSON form stored under `provenance_dicts` in `hub_meta`.
    pub fn to_json(&self) -> Value {
        json!({
            "sample2id": self.samples.to_json(),
            "beam2id": self.beams.to_json(),
            "period2id": self.periods.to_json(),
            "stage2id": self.stages.to_json(),
            "var2id": self.variations.to_json(),
            "origin2id": self.origins.to_json(),
        })
    }

    /// Parse the JSON form written by [`ProvenanceDicts::to_json`].
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(Self {
            samples: Interner::from_json(value.get("sample2id"))?,
            beams: Interner::from_json(value.get("beam2id"))?,
            periods: Interner::from_json(value.get("period2id"))?,
            stages: Interner::from_json(value.get("stage2id"))?,
            variations: Interner::from_json(value.get("var2id"))?,
            origins: Interner::from_json(value.get("origin2id"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_seen_wins() {
        let mut i: Interner<u16> = Interner::new();
        assert_eq!(i.intern("b").unwrap(), 0);
        assert_eq!(i.intern("a").unwrap(), 1);
        assert_eq!(i.intern("b").unwrap(), 0);
        assert_eq!(i.name(1), Some("a"));
        assert_eq!(i.len(), 2);
    }

    #[test]
    fn overflow_is_an_error() {
        let mut i: Interner<u8> = Interner::new();
        for k in 0..256 {
            i.intern(&format!("k{k}")).unwrap();
        }
        assert!(i.intern("one-too-many").is_err());
    }

    #[test]
    fn origins_are_pre_seeded() {
        let mut d = ProvenanceDicts::new();
        assert_eq!(d.origin_id(SampleOrigin::Data).unwrap(), 0);
        assert_eq!(d.origin_id(SampleOrigin::MonteCarlo).unwrap(), 1);
        assert_eq!(d.origin_id(SampleOrigin::Dirt).unwrap(), 2);
        assert_eq!(d.origin_id(SampleOrigin::External).unwrap(), 3);
        assert_eq!(d.origin_id(SampleOrigin::Unknown).unwrap(), 4);
    }

    #[test]
    fn json_round_trip_keeps_ids() {
        let mut d = ProvenanceDicts::new();
        d.samples.intern("numi_fhc_overlay").unwrap();
        d.samples.intern("numi_fhc_ext").unwrap();
        d.beams.intern("numi-fhc").unwrap();
        d.variations.intern("nominal").unwrap();
        d.variations.intern("LYDown").unwrap();
        let back = ProvenanceDicts::from_json(&d.to_json()).unwrap();
        assert_eq!(back, d);
        assert_eq!(back.samples.get("numi_fhc_ext"), Some(1));
    }

    #[test]
    fn sparse_ids_are_rejected() {
        let v = json!({"sample2id": {"a": 0, "b": 2}});
        assert!(ProvenanceDicts::from_json(&v).is_err());
    }
}
