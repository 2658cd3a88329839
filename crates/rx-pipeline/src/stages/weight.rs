//! Exposure scaling and nominal event weights.

use rx_core::{Result, SampleOrigin};
use rx_frame::{Column, Node, Table};

use crate::stage::{Stage, constant_f64, define_or_replace, f32s_or};

/// Scales simulation to the summed exposure and external data to the summed
/// trigger count.
///
/// Defines `base_event_weight` and `nominal_event_weight`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightStage {
    sample_pot: f64,
    sample_triggers: i64,
    total_pot: f64,
    total_triggers: i64,
}

impl WeightStage {
    /// Stage for one sample.
    pub fn new(sample_pot: f64, sample_triggers: i64, total_pot: f64, total_triggers: i64) -> Self {
        if sample_pot <= 0.0 && sample_triggers <= 0 {
            tracing::warn!("sample has neither POT nor triggers; weights fall back to 1");
        }
        Self { sample_pot, sample_triggers, total_pot, total_triggers }
    }

    /// Exposure scale for simulated samples.
    pub fn pot_scale(&self) -> f64 {
        if self.sample_pot > 0.0 && self.total_pot > 0.0 { self.total_pot / self.sample_pot } else { 1.0 }
    }

    /// Trigger scale for external samples.
    pub fn trigger_scale(&self) -> f64 {
        if self.sample_triggers > 0 && self.total_triggers > 0 {
            self.total_triggers as f64 / self.sample_triggers as f64
        } else {
            1.0
        }
    }
}

/// A generator weight is used only when finite and positive.
fn usable(w: f32) -> f64 {
    if w.is_finite() && w > 0.0 { w as f64 } else { 1.0 }
}

/// `base * spline * tune`, or 1 when the product is non-finite or negative.
pub fn nominal_weight(base: f64, spline: f32, tune: f32) -> f64 {
    let w = base * usable(spline) * usable(tune);
    if w.is_finite() && w >= 0.0 { w } else { 1.0 }
}

impl Stage for WeightStage {
    fn name(&self) -> &'static str {
        "weight"
    }

    fn process(&self, node: Node, origin: SampleOrigin) -> Result<Node> {
        let mut node = node;
        match origin {
            SampleOrigin::MonteCarlo | SampleOrigin::Dirt => {
                if self.sample_pot <= 0.0 || self.total_pot <= 0.0 {
                    tracing::warn!(
                        origin = %origin,
                        sample_pot = self.sample_pot,
                        total_pot = self.total_pot,
                        "missing POT information; base weight is 1"
                    );
                }
                node = define_or_replace(&node, "base_event_weight", &[], constant_f64(self.pot_scale()))?;
                node = define_or_replace(&node, "nominal_event_weight", &["base_event_weight"], |t: &Table| {
                    let base = t.f64s("base_event_weight")?;
                    // A missing spline or tune column contributes 1.
                    let spline = f32s_or(t, "weightSpline", 1.0)?;
                    let tune = f32s_or(t, "weightTune", 1.0)?;
                    Ok(Column::F64(
                        base.iter().zip(spline).zip(tune).map(|((b, s), u)| nominal_weight(*b, s, u)).collect(),
                    ))
                })?;
            }
            SampleOrigin::External => {
                if self.sample_triggers <= 0 || self.total_triggers <= 0 {
                    tracing::warn!(
                        sample_triggers = self.sample_triggers,
                        total_triggers = self.total_triggers,
                        "missing trigger information; base weight is 1"
                    );
                }
                node = define_or_replace(&node, "base_event_weight", &[], constant_f64(self.trigger_scale()))?;
            }
            SampleOrigin::Data | SampleOrigin::Unknown => {}
        }

        if !node.has_column("nominal_event_weight") {
            node = if node.has_column("base_event_weight") {
                node.alias("nominal_event_weight", "base_event_weight")?
            } else {
                node.define("nominal_event_weight", &[], constant_f64(1.0))?
            };
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn node() -> Node {
        Node::from_table(
            Table::from_columns(vec![
                ("weightSpline".into(), Column::F32(vec![2.0, f32::NAN, -1.0])),
                ("weightTune".into(), Column::F32(vec![0.5, 3.0, 1.0])),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn simulation_scaled_by_pot() {
        let stage = WeightStage::new(2.0e20, 0, 6.0e20, 0);
        let t = stage.process(node(), SampleOrigin::MonteCarlo).unwrap().collect().unwrap();
        assert_eq!(t.f64s("base_event_weight").unwrap(), vec![3.0; 3]);
        let w = t.f64s("nominal_event_weight").unwrap();
        assert_relative_eq!(w[0], 3.0);
        assert_relative_eq!(w[1], 9.0);
        assert_relative_eq!(w[2], 3.0);
    }

    #[test]
    fn zero_pot_gives_unit_weight() {
        let stage = WeightStage::new(0.0, 0, 6.0e20, 0);
        let t = stage.process(node(), SampleOrigin::Dirt).unwrap().collect().unwrap();
        assert_eq!(t.f64s("base_event_weight").unwrap(), vec![1.0; 3]);
    }

    #[test]
    fn external_scaled_by_triggers() {
        let stage = WeightStage::new(0.0, 1000, 0.0, 4000);
        let t = stage.process(node(), SampleOrigin::External).unwrap().collect().unwrap();
        assert_eq!(t.f64s("base_event_weight").unwrap(), vec![4.0; 3]);
        assert_eq!(t.f64s("nominal_event_weight").unwrap(), vec![4.0; 3]);
    }

    #[test]
    fn data_gets_unit_nominal_weight_only() {
        let stage = WeightStage::new(0.0, 10, 0.0, 10);
        let out = stage.process(node(), SampleOrigin::Data).unwrap();
        assert!(!out.has_column("base_event_weight"));
        assert_eq!(out.collect().unwrap().f64s("nominal_event_weight").unwrap(), vec![1.0; 3]);
    }

    #[test]
    fn existing_base_weight_is_replaced() {
        let t = Table::from_columns(vec![("base_event_weight".into(), Column::F64(vec![7.0]))]).unwrap();
        let stage = WeightStage::new(1.0, 0, 2.0, 0);
        let out = stage.process(Node::from_table(t), SampleOrigin::MonteCarlo).unwrap().collect().unwrap();
        assert_eq!(out.f64s("base_event_weight").unwrap(), vec![2.0]);
        assert_eq!(out.f64s("nominal_event_weight").unwrap(), vec![2.0]);
    }

    #[test]
    fn nominal_weight_guards() {
        assert_relative_eq!(nominal_weight(2.0, 0.0, 1.0), 2.0);
        assert_relative_eq!(nominal_weight(f64::INFINITY, 1.0, 1.0), 1.0);
        assert_relative_eq!(nominal_weight(-1.0, 1.0, 1.0), 1.0);
    }
}
