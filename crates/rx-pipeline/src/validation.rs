//! Checking a processed node against its column plan.
//!
//! Missing required columns are fatal for simulated samples. Everything else
//! is a warning, emitted once per (sample, origin, kind, column set) for the
//! lifetime of the process.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use rx_core::{Error, Result, SampleOrigin};
use rx_frame::Node;

use crate::variables::ColumnPlan;

/// Which half of a [`ColumnPlan`] a report concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Required columns.
    Required,
    /// Optional columns.
    Optional,
}

impl Requirement {
    fn as_str(&self) -> &'static str {
        match self {
            Requirement::Required => "required",
            Requirement::Optional => "optional",
        }
    }
}

fn reported() -> &'static Mutex<HashSet<String>> {
    static REPORTED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    REPORTED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Columns of `wanted` the node does not provide, sorted and deduplicated.
pub fn missing_columns(node: &Node, wanted: &[String]) -> Vec<String> {
    let mut missing: Vec<String> = wanted.iter().filter(|c| !node.has_column(c)).cloned().collect();
    missing.sort();
    missing.dedup();
    missing
}

/// Report missing columns of one kind.
///
/// Returns `Ok(true)` when a warning was emitted and `Ok(false)` when there
/// was nothing to report or it had been reported before.
pub fn report_missing(
    identifier: &str,
    origin: SampleOrigin,
    requirement: Requirement,
    missing: &[String],
    report_optional: bool,
) -> Result<bool> {
    if missing.is_empty() {
        return Ok(false);
    }
    let joined = missing.join(", ");
    if requirement == Requirement::Required && origin.is_simulated() {
        return Err(Error::Column(format!(
            "Missing required columns for {identifier} (origin: {origin}): {joined}"
        )));
    }
    if requirement == Requirement::Optional && !report_optional {
        return Ok(false);
    }
    let signature = format!("{identifier}|{origin}|{}|{joined}", requirement.as_str());
    let fresh = reported()
        .lock()
        .map_err(|_| Error::Computation("missing-column report lock poisoned".into()))?
        .insert(signature);
    if fresh {
        tracing::warn!(
            sample = identifier,
            origin = %origin,
            kind = requirement.as_str(),
            columns = %joined,
            "missing columns"
        );
    }
    Ok(fresh)
}

/// Validate a node against a plan: fatal for missing required columns of
/// simulated origins, warnings otherwise.
pub fn validate_columns(
    node: &Node,
    plan: &ColumnPlan,
    identifier: &str,
    origin: SampleOrigin,
    report_optional: bool,
) -> Result<()> {
    report_missing(identifier, origin, Requirement::Required, &missing_columns(node, &plan.required), report_optional)?;
    report_missing(identifier, origin, Requirement::Optional, &missing_columns(node, &plan.optional), report_optional)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rx_frame::{Column, Table};

    fn node() -> Node {
        Node::from_table(Table::from_columns(vec![("run".into(), Column::I32(vec![1]))]).unwrap())
    }

    fn plan(required: &[&str], optional: &[&str]) -> ColumnPlan {
        ColumnPlan {
            required: required.iter().map(|s| s.to_string()).collect(),
            optional: optional.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn missing_required_is_fatal_for_simulation() {
        let err = validate_columns(&node(), &plan(&["run", "zeta", "alpha"], &[]), "numi_mc", SampleOrigin::Dirt, false)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Column error: Missing required columns for numi_mc (origin: dirt): alpha, zeta"
        );
    }

    #[test]
    fn missing_required_warns_once_for_data() {
        let missing = missing_columns(&node(), &["beta".to_string(), "beta".to_string()]);
        assert_eq!(missing, vec!["beta"]);
        let id = "validation_test_data_once";
        assert!(report_missing(id, SampleOrigin::Data, Requirement::Required, &missing, false).unwrap());
        assert!(!report_missing(id, SampleOrigin::Data, Requirement::Required, &missing, false).unwrap());
    }

    #[test]
    fn optional_reports_follow_toggle() {
        let missing = vec!["gamma".to_string()];
        let id = "validation_test_optional";
        assert!(!report_missing(id, SampleOrigin::MonteCarlo, Requirement::Optional, &missing, false).unwrap());
        assert!(report_missing(id, SampleOrigin::MonteCarlo, Requirement::Optional, &missing, true).unwrap());
    }
}
