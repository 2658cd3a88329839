//! Beam and period names as typed on the command line.
//!
//! Beams compare case-insensitively with `_` and `-` equivalent. Periods
//! accept `run1`, `r1`, `Run 1`, `1`, ranges such as `run1-run3` and the
//! special `all`.

use std::collections::HashMap;
use std::path::PathBuf;

use rx_core::{Error, Result};
use rx_hub::archive::{absolutize, normalize_lexically};

use crate::registry::BeamPeriodRegistry;

/// Special period standing for every configured period.
pub const ALL_PERIODS: &str = "all";

const ALL_COMBINED: &str = "The special period 'all' cannot be combined with explicit periods.";

/// Trim, lowercase and map `_` to `-`.
pub fn canonicalise_beam(beam: &str) -> String {
    beam.trim().chars().map(|c| if c == '_' { '-' } else { c.to_ascii_lowercase() }).collect()
}

/// Run number of `run1`, `r 2`, `Run_03`, `4`, ...
pub fn extract_run_number(token: &str) -> Option<u32> {
    let lower = token.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return None;
    }
    let rest = lower.strip_prefix("run").or_else(|| lower.strip_prefix('r')).unwrap_or(&lower).trim();
    if rest.is_empty() {
        return None;
    }
    let mut digits = String::new();
    for c in rest.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !(c.is_whitespace() || c == '_' || c == '-') {
            return None;
        }
    }
    digits.parse().ok()
}

/// `all`/`*` to `all`, anything with a run number to `runN`, else lowercase.
pub fn canonicalise_period(period: &str) -> String {
    let lower = period.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return lower;
    }
    if lower == ALL_PERIODS || lower == "*" {
        return ALL_PERIODS.to_string();
    }
    match extract_run_number(&lower) {
        Some(n) => format!("run{n}"),
        None => lower,
    }
}

/// `all` or `run` followed by digits only.
pub fn is_canonical_run_designator(period: &str) -> bool {
    period == ALL_PERIODS
        || period.strip_prefix("run").is_some_and(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()))
}

fn push_unique(out: &mut Vec<String>, item: String) {
    if !out.contains(&item) {
        out.push(item);
    }
}

/// Parse a comma-separated period list, expanding `a-b` ranges.
///
/// Empty entries are skipped. `all` must stand alone.
pub fn parse_periods(csv: &str) -> Result<Vec<String>> {
    let mut periods = Vec::new();
    for entry in csv.split(',') {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lowered = trimmed.to_ascii_lowercase();
        if let Some((start, end)) = lowered.split_once('-') {
            if let (Some(a), Some(b)) = (extract_run_number(start), extract_run_number(end)) {
                if b < a {
                    return Err(Error::Validation(format!("Invalid run period range: {trimmed}")));
                }
                for n in a..=b {
                    push_unique(&mut periods, format!("run{n}"));
                }
                continue;
            }
        }
        let canonical = canonicalise_period(trimmed);
        if canonical.is_empty() {
            continue;
        }
        if canonical == ALL_PERIODS {
            if !periods.is_empty() {
                return Err(Error::Validation(ALL_COMBINED.into()));
            }
            periods.push(canonical);
            break;
        }
        push_unique(&mut periods, canonical);
    }
    Ok(periods)
}

fn period_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (extract_run_number(a), extract_run_number(b)) {
        (Some(x), Some(y)) if x != y => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// The configured spelling of a beam given in any spelling.
pub fn resolve_beam(registry: &BeamPeriodRegistry, beam: &str) -> Result<String> {
    let mut canonical_to_actual: HashMap<String, String> = HashMap::new();
    for config in registry.all().values() {
        let canonical = canonicalise_beam(config.beam());
        if !canonical.is_empty() {
            canonical_to_actual.entry(canonical).or_insert_with(|| config.beam().to_string());
        }
    }
    if canonical_to_actual.is_empty() {
        return Err(Error::Validation("No beam configurations are available in the provided catalogue.".into()));
    }
    if let Some(actual) = canonical_to_actual.get(&canonicalise_beam(beam)) {
        return Ok(actual.clone());
    }
    let mut available: Vec<&String> = canonical_to_actual.keys().collect();
    available.sort();
    let available: Vec<&str> = available.into_iter().map(String::as_str).collect();
    Err(Error::Validation(format!("Unknown beam '{beam}'. Available beams: {}", available.join(", "))))
}

/// The configured spellings of the requested periods of `beam`.
///
/// A lone `all` expands to every period in run-number order.
pub fn resolve_periods(registry: &BeamPeriodRegistry, beam: &str, requested: &[String]) -> Result<Vec<String>> {
    let mut canonical_to_actual: HashMap<String, String> = HashMap::new();
    for config in registry.all().values().filter(|c| c.beam() == beam) {
        let canonical = canonicalise_period(config.period());
        if !canonical.is_empty() {
            canonical_to_actual.entry(canonical).or_insert_with(|| config.period().to_string());
        }
    }
    if canonical_to_actual.is_empty() {
        return Err(Error::Validation(format!("No run periods are configured for beam '{beam}'.")));
    }
    let mut available: Vec<String> = canonical_to_actual.keys().cloned().collect();
    available.sort_by(|a, b| period_order(a, b));

    if let [only] = requested {
        if canonicalise_period(only) == ALL_PERIODS {
            return Ok(available.iter().map(|c| canonical_to_actual[c].clone()).collect());
        }
    }

    let mut resolved = Vec::new();
    for period in requested {
        match canonical_to_actual.get(&canonicalise_period(period)) {
            Some(actual) => push_unique(&mut resolved, actual.clone()),
            None => {
                return Err(Error::Validation(format!(
                    "Run period '{period}' is not configured for beam '{beam}'. Available periods: {}",
                    available.join(", ")
                )));
            }
        }
    }
    Ok(resolved)
}

/// Positional arguments shared by the snapshot subcommands:
/// `<config> <beam> <periods> [more periods...] [selection] [output]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArguments {
    /// Catalogue file.
    pub config: PathBuf,
    /// Canonical beam name.
    pub beam: String,
    /// Canonical period names.
    pub periods: Vec<String>,
    /// Row filter, if given.
    pub selection: Option<String>,
    /// Output path, absolute and lexically normalised.
    pub output: Option<PathBuf>,
}

impl RunArguments {
    /// Usage line for error messages.
    pub const USAGE: &'static str =
        "<config.json> <beam:{numi-fhc|numi-rhc|bnb}> <periods> [additional-periods...] [selection] [output.hub]";

    /// Parse the positional arguments (without the program name).
    ///
    /// Tokens after the first period list are taken as further periods while
    /// every period they parse to is canonical (`runN` or `all`).
    pub fn parse(args: &[String]) -> Result<Self> {
        let usage = || Error::Validation(format!("Usage: {}", Self::USAGE));
        let [config, beam, first, rest @ ..] = args else {
            return Err(usage());
        };
        let beam = canonicalise_beam(beam);
        if beam.is_empty() {
            return Err(Error::Validation(format!("No beam argument provided\nUsage: {}", Self::USAGE)));
        }
        let mut periods = parse_periods(first)?;
        if periods.is_empty() {
            return Err(Error::Validation("No valid periods provided".into()));
        }

        let mut rest = rest.iter();
        let mut pending = rest.next();
        while let Some(candidate) = pending {
            let more = match parse_periods(candidate) {
                Ok(more) if !more.is_empty() && more.iter().all(|p| is_canonical_run_designator(p)) => more,
                _ => break,
            };
            if periods.iter().any(|p| p == ALL_PERIODS) || more.iter().any(|p| p == ALL_PERIODS) {
                return Err(Error::Validation(ALL_COMBINED.into()));
            }
            for p in more {
                push_unique(&mut periods, p);
            }
            pending = rest.next();
        }
        if periods.len() > 1 && periods.iter().any(|p| p == ALL_PERIODS) {
            return Err(Error::Validation(ALL_COMBINED.into()));
        }

        let selection = pending.filter(|s| !s.is_empty()).cloned();
        if pending.is_some() {
            pending = rest.next();
        }
        let output = match pending.filter(|s| !s.is_empty()) {
            Some(out) => {
                let path = PathBuf::from(out);
                Some(absolutize(&path).map(|p| normalize_lexically(&p)).unwrap_or(path))
            }
            None => None,
        };
        if pending.is_some() && rest.next().is_some() {
            return Err(Error::Validation(format!("Too many arguments provided\nUsage: {}", Self::USAGE)));
        }

        Ok(Self { config: PathBuf::from(config), beam, periods, selection, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BeamPeriodConfig;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn beam_and_period_spellings() {
        assert_eq!(canonicalise_beam("  NuMI_FHC "), "numi-fhc");
        assert_eq!(extract_run_number("Run_03"), Some(3));
        assert_eq!(extract_run_number("r 2"), Some(2));
        assert_eq!(extract_run_number("run"), None);
        assert_eq!(extract_run_number("runX"), None);
        assert_eq!(canonicalise_period("*"), "all");
        assert_eq!(canonicalise_period("R4"), "run4");
        assert_eq!(canonicalise_period("Special"), "special");
        assert!(is_canonical_run_designator("run12"));
        assert!(!is_canonical_run_designator("run"));
        assert!(!is_canonical_run_designator("pass_final"));
    }

    #[test]
    fn period_lists_and_ranges() {
        assert_eq!(parse_periods("run1-run3, r2, 5").unwrap(), vec!["run1", "run2", "run3", "run5"]);
        assert_eq!(parse_periods(" , all").unwrap(), vec!["all"]);
        assert!(parse_periods("run3-run1").is_err());
        assert!(parse_periods("run1,all").is_err());
        assert!(parse_periods("").unwrap().is_empty());
    }

    fn registry() -> BeamPeriodRegistry {
        let mut reg = BeamPeriodRegistry::new();
        for period in ["Run10", "run2", "run1"] {
            reg.add_config(BeamPeriodConfig::new("NuMI_FHC", period, 1.0, 0)).unwrap();
        }
        reg
    }

    #[test]
    fn beams_and_periods_resolve_to_configured_spelling() {
        let reg = registry();
        assert_eq!(resolve_beam(&reg, "numi-fhc").unwrap(), "NuMI_FHC");
        let err = resolve_beam(&reg, "bnb").unwrap_err().to_string();
        assert!(err.contains("Unknown beam 'bnb'. Available beams: numi-fhc"));
        assert_eq!(resolve_periods(&reg, "NuMI_FHC", &args(&["all"])).unwrap(), vec!["run1", "run2", "Run10"]);
        assert_eq!(resolve_periods(&reg, "NuMI_FHC", &args(&["run10", "r1", "1"])).unwrap(), vec!["Run10", "run1"]);
        let err = resolve_periods(&reg, "NuMI_FHC", &args(&["run4"])).unwrap_err().to_string();
        assert!(err.contains("Available periods: run1, run2, run10"));
    }

    #[test]
    fn positional_grammar() {
        let parsed = RunArguments::parse(&args(&["c.json", "NuMI_FHC", "run1", "run2", "pass_final", "/tmp/x/../out.hub"]))
            .unwrap();
        assert_eq!(parsed.beam, "numi-fhc");
        assert_eq!(parsed.periods, vec!["run1", "run2"]);
        assert_eq!(parsed.selection.as_deref(), Some("pass_final"));
        assert_eq!(parsed.output, Some(PathBuf::from("/tmp/out.hub")));

        let bare = RunArguments::parse(&args(&["c.json", "bnb", "all"])).unwrap();
        assert_eq!(bare.selection, None);
        assert_eq!(bare.output, None);

        assert!(RunArguments::parse(&args(&["c.json", "bnb"])).is_err());
        assert!(RunArguments::parse(&args(&["c.json", "bnb", "all", "run2"])).is_err());
        let err = RunArguments::parse(&args(&["c.json", "bnb", "run1", "sel", "out", "extra"])).unwrap_err();
        assert!(err.to_string().contains("Too many arguments"));
    }
}
