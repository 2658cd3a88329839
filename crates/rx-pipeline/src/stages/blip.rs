//! Low-energy blip features.

use rx_core::{Result, SampleOrigin};
use rx_frame::{Column, Node, Table};

use crate::stage::{Stage, define_or_replace, f32s_or, lists_or_empty};

/// Integer code of a Geant4 creator process name.
///
/// Empty and `null` map to 0; unknown names to -1.
pub fn blip_process_code(process: &str) -> i32 {
    match process {
        "" | "null" => 0,
        "muMinusCaptureAtRest" => 1,
        "nCapture" => 2,
        "neutronInelastic" => 3,
        "compt" | "phot" | "conv" => 4,
        "eIoni" | "eBrem" => 5,
        "muIoni" => 6,
        "hIoni" => 7,
        _ => -1,
    }
}

/// Encodes blip creator processes and measures blip distances to the true vertex.
///
/// Defines `blip_process_code` when `blip_process` is present and
/// `blip_distance_to_vertex` when `blip_x` is present. Without a true vertex
/// every distance is -1.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlipStage;

impl Stage for BlipStage {
    fn name(&self) -> &'static str {
        "blip"
    }

    fn process(&self, node: Node, _origin: SampleOrigin) -> Result<Node> {
        let mut node = node;
        if node.has_column("blip_process") {
            node = define_or_replace(&node, "blip_process_code", &["blip_process"], |t: &Table| {
                let lists = t.str_lists("blip_process")?;
                Ok(Column::ListI32(
                    lists.iter().map(|l| l.iter().map(|p| blip_process_code(p)).collect()).collect(),
                ))
            })?;
        }
        if node.has_column("blip_x") {
            node = define_or_replace(&node, "blip_distance_to_vertex", &["blip_x"], |t: &Table| {
                let bx = t.f64_lists("blip_x")?;
                let by = lists_or_empty(t, "blip_y")?;
                let bz = lists_or_empty(t, "blip_z")?;
                let has_vertex = ["neutrino_vertex_x", "neutrino_vertex_y", "neutrino_vertex_z"]
                    .iter()
                    .all(|c| t.has_column(c));
                let vx = f32s_or(t, "neutrino_vertex_x", 0.0)?;
                let vy = f32s_or(t, "neutrino_vertex_y", 0.0)?;
                let vz = f32s_or(t, "neutrino_vertex_z", 0.0)?;
                let out = (0..t.num_rows())
                    .map(|i| {
                        (0..bx[i].len())
                            .map(|j| {
                                if !has_vertex {
                                    return -1.0f32;
                                }
                                let dx = bx[i][j] as f32 - vx[i];
                                let dy = by[i].get(j).copied().unwrap_or(f64::NAN) as f32 - vy[i];
                                let dz = bz[i].get(j).copied().unwrap_or(f64::NAN) as f32 - vz[i];
                                (dx * dx + dy * dy + dz * dz).sqrt()
                            })
                            .collect()
                    })
                    .collect();
                Ok(Column::ListF32(out))
            })?;
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn process_codes() {
        assert_eq!(blip_process_code("null"), 0);
        assert_eq!(blip_process_code("nCapture"), 2);
        assert_eq!(blip_process_code("conv"), 4);
        assert_eq!(blip_process_code("eBrem"), 5);
        assert_eq!(blip_process_code("annihil"), -1);
    }

    fn blips() -> Vec<(String, Column)> {
        vec![
            ("blip_process".into(), Column::ListStr(vec![vec!["compt".into(), "hIoni".into()], vec![]])),
            ("blip_x".into(), Column::ListF32(vec![vec![3.0, 0.0], vec![]])),
            ("blip_y".into(), Column::ListF32(vec![vec![4.0, 0.0], vec![]])),
            ("blip_z".into(), Column::ListF32(vec![vec![0.0, 2.0], vec![]])),
        ]
    }

    #[test]
    fn distances_from_true_vertex() {
        let mut cols = blips();
        cols.push(("neutrino_vertex_x".into(), Column::F32(vec![0.0, 0.0])));
        cols.push(("neutrino_vertex_y".into(), Column::F32(vec![0.0, 0.0])));
        cols.push(("neutrino_vertex_z".into(), Column::F32(vec![0.0, 0.0])));
        let node = Node::from_table(Table::from_columns(cols).unwrap());
        let t = BlipStage.process(node, SampleOrigin::MonteCarlo).unwrap().collect().unwrap();
        let d = t.f64_lists("blip_distance_to_vertex").unwrap();
        assert_relative_eq!(d[0][0], 5.0);
        assert_relative_eq!(d[0][1], 2.0);
        assert!(d[1].is_empty());
        let codes = t.f64_lists("blip_process_code").unwrap();
        assert_eq!(codes[0], vec![4.0, 7.0]);
    }

    #[test]
    fn distances_without_vertex_are_negative_one() {
        let node = Node::from_table(Table::from_columns(blips()).unwrap());
        let t = BlipStage.process(node, SampleOrigin::Data).unwrap().collect().unwrap();
        assert_eq!(t.f64_lists("blip_distance_to_vertex").unwrap()[0], vec![-1.0, -1.0]);
    }

    #[test]
    fn no_blips_no_columns() {
        let node = Node::from_table(Table::from_columns(vec![("run".into(), Column::I32(vec![1]))]).unwrap());
        let out = BlipStage.process(node, SampleOrigin::Data).unwrap();
        assert!(!out.has_column("blip_process_code"));
        assert!(!out.has_column("blip_distance_to_vertex"));
    }
}
