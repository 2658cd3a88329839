//! The processing chain.
//!
//! A [`Stage`] maps a node to a node given the sample origin. A
//! [`StageChain`] is an ordered list of stages folded left: each stage
//! receives the node produced by the previous one.

use rx_core::{Result, SampleOrigin};
use rx_frame::{Column, Node, Table};

use crate::stages::{
    BlipStage, MuonSelectionStage, PreselectionStage, ReconstructionStage, TruthStage, WeightStage,
};

/// One step of the processing chain.
pub trait Stage: Send + Sync {
    /// Short name for log output.
    fn name(&self) -> &'static str;

    /// Add this stage's columns to `node`.
    ///
    /// A stage may define new columns and redefine existing ones; it never
    /// drops a column.
    fn process(&self, node: Node, origin: SampleOrigin) -> Result<Node>;
}

/// Ordered sequence of stages.
#[derive(Default)]
pub struct StageChain {
    stages: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for StageChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stages.iter().map(|s| s.name())).finish()
    }
}

impl StageChain {
    /// Empty chain (the identity).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn with(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Append a boxed stage.
    pub fn push(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    /// Weight, truth, blip, muon, reconstruction, preselection.
    pub fn standard(weights: WeightStage) -> Self {
        Self::new()
            .with(weights)
            .with(TruthStage)
            .with(BlipStage)
            .with(MuonSelectionStage)
            .with(ReconstructionStage)
            .with(PreselectionStage)
    }

    /// Stage names in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True for the identity chain.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order.
    pub fn process(&self, node: Node, origin: SampleOrigin) -> Result<Node> {
        self.stages.iter().try_fold(node, |node, stage| {
            tracing::trace!(stage = stage.name(), origin = %origin, "applying stage");
            stage.process(node, origin)
        })
    }
}

// ---------------------------------------------------------------------------
// Column helpers shared by the stages
// ---------------------------------------------------------------------------

/// Define `name`, or redefine it when the input already carries it.
pub fn define_or_replace<F>(node: &Node, name: &str, inputs: &[&str], f: F) -> Result<Node>
where
    F: Fn(&Table) -> Result<Column> + Send + Sync + 'static,
{
    if node.has_column(name) { node.redefine(name, inputs, f) } else { node.define(name, inputs, f) }
}

/// Define `name` only when it is absent.
pub fn define_if_absent<F>(node: Node, name: &str, inputs: &[&str], f: F) -> Result<Node>
where
    F: Fn(&Table) -> Result<Column> + Send + Sync + 'static,
{
    if node.has_column(name) { Ok(node) } else { node.define(name, inputs, f) }
}

/// Scalar column as `f32`, or `default` on every row when absent.
pub(crate) fn f32s_or(t: &Table, name: &str, default: f32) -> Result<Vec<f32>> {
    if t.has_column(name) {
        Ok(t.f64s(name)?.into_iter().map(|v| v as f32).collect())
    } else {
        Ok(vec![default; t.num_rows()])
    }
}

/// Scalar column as `i64`, or `default` on every row when absent.
pub(crate) fn i64s_or(t: &Table, name: &str, default: i64) -> Result<Vec<i64>> {
    if t.has_column(name) { t.i64s(name) } else { Ok(vec![default; t.num_rows()]) }
}

/// Scalar column as `bool`, or `default` on every row when absent.
pub(crate) fn bools_or(t: &Table, name: &str, default: bool) -> Result<Vec<bool>> {
    if t.has_column(name) { t.bools(name) } else { Ok(vec![default; t.num_rows()]) }
}

/// List column as `f64` lists, or empty lists when absent.
pub(crate) fn lists_or_empty(t: &Table, name: &str) -> Result<Vec<Vec<f64>>> {
    if t.has_column(name) { t.f64_lists(name) } else { Ok(vec![Vec::new(); t.num_rows()]) }
}

/// Three coordinate columns; a missing one reads as NaN (outside every volume).
pub(crate) fn xyz(t: &Table, prefix: &str) -> Result<[Vec<f32>; 3]> {
    Ok([
        f32s_or(t, &format!("{prefix}_x"), f32::NAN)?,
        f32s_or(t, &format!("{prefix}_y"), f32::NAN)?,
        f32s_or(t, &format!("{prefix}_z"), f32::NAN)?,
    ])
}

/// Constant column of the node's row count.
pub(crate) fn constant_bool(value: bool) -> impl Fn(&Table) -> Result<Column> + Send + Sync + 'static {
    move |t: &Table| Ok(Column::Bool(vec![value; t.num_rows()]))
}

/// Constant `i32` column.
pub(crate) fn constant_i32(value: i32) -> impl Fn(&Table) -> Result<Column> + Send + Sync + 'static {
    move |t: &Table| Ok(Column::I32(vec![value; t.num_rows()]))
}

/// Constant `f64` column.
pub(crate) fn constant_f64(value: f64) -> impl Fn(&Table) -> Result<Column> + Send + Sync + 'static {
    move |t: &Table| Ok(Column::F64(vec![value; t.num_rows()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AddOne(&'static str);

    impl Stage for AddOne {
        fn name(&self) -> &'static str {
            self.0
        }

        fn process(&self, node: Node, _origin: SampleOrigin) -> Result<Node> {
            define_or_replace(&node, "n", &[], |t: &Table| {
                let prev = i64s_or(t, "n", 0)?;
                Ok(Column::I64(prev.into_iter().map(|v| v + 1).collect()))
            })
        }
    }

    fn node() -> Node {
        Node::from_table(Table::from_columns(vec![("x".into(), Column::F64(vec![1.0, 2.0]))]).unwrap())
    }

    #[test]
    fn chain_folds_left() {
        let chain = StageChain::new().with(AddOne("a")).with(AddOne("b")).with(AddOne("c"));
        assert_eq!(chain.names(), vec!["a", "b", "c"]);
        let out = chain.process(node(), SampleOrigin::Data).unwrap().collect().unwrap();
        assert_eq!(out.i64s("n").unwrap(), vec![3, 3]);
    }

    #[test]
    fn empty_chain_is_identity() {
        let chain = StageChain::new();
        assert!(chain.is_empty());
        let out = chain.process(node(), SampleOrigin::MonteCarlo).unwrap();
        assert_eq!(out.column_names(), &["x".to_string()]);
    }

    #[test]
    fn standard_chain_order() {
        let chain = StageChain::standard(WeightStage::new(1.0, 0, 1.0, 0));
        assert_eq!(
            chain.names(),
            vec!["weight", "truth", "blip", "muon", "reconstruction", "preselection"]
        );
    }

    #[test]
    fn define_if_absent_keeps_existing() {
        let n = define_if_absent(node(), "x", &[], constant_f64(9.0)).unwrap();
        assert_eq!(n.collect().unwrap().f64s("x").unwrap(), vec![1.0, 2.0]);
        let n = define_if_absent(n, "y", &[], constant_f64(9.0)).unwrap();
        assert_eq!(n.collect().unwrap().f64s("y").unwrap(), vec![9.0, 9.0]);
    }
}
