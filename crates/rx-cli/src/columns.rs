//! Payload column lists of the snapshot commands.

use std::collections::BTreeMap;

use rx_core::SampleKey;
use rx_pipeline::SamplePipeline;

const IMAGE_COLUMNS: [&str; 24] = [
    "detector_image_u",
    "detector_image_v",
    "detector_image_w",
    "semantic_image_u",
    "semantic_image_v",
    "semantic_image_w",
    "event_detector_image_u",
    "event_detector_image_v",
    "event_detector_image_w",
    "event_semantic_image_u",
    "event_semantic_image_v",
    "event_semantic_image_w",
    "event_adc_u",
    "event_adc_v",
    "event_adc_w",
    "slice_semantic_counts_u",
    "slice_semantic_counts_v",
    "slice_semantic_counts_w",
    "event_semantic_counts_u",
    "event_semantic_counts_v",
    "event_semantic_counts_w",
    "is_vtx_in_image_u",
    "is_vtx_in_image_v",
    "is_vtx_in_image_w",
];

/// Columns written by `snapshot` and `snapshot-analysis`.
pub fn analysis_columns() -> Vec<String> {
    let head = [
        "run",
        "sub",
        "evt",
        "nominal_event_weight",
        "base_event_weight",
        "inclusive_strange_channel_category",
        "exclusive_strange_channel_category",
        "channel_definition_category",
        "interaction_mode_category",
        "reco_neutrino_vertex_x",
        "reco_neutrino_vertex_y",
        "reco_neutrino_vertex_z",
    ];
    head.iter().chain(IMAGE_COLUMNS.iter()).map(|s| s.to_string()).collect()
}

/// Columns written by `training-pool`.
///
/// The category columns go by their short aliases here.
pub fn training_columns() -> Vec<String> {
    let head = [
        "run",
        "sub",
        "evt",
        "nominal_event_weight",
        "base_event_weight",
        "inclusive_strange_channels",
        "exclusive_strange_channels",
        "channel_definitions",
        "genie_int_mode",
        "reco_neutrino_vertex_x",
        "reco_neutrino_vertex_y",
        "reco_neutrino_vertex_z",
    ];
    head.iter().chain(IMAGE_COLUMNS.iter()).chain(["inference_score"].iter()).map(|s| s.to_string()).collect()
}

/// Requested columns defined on every nominal and variation node, in request
/// order. Each dropped column is logged once.
pub fn available_everywhere(frames: &BTreeMap<SampleKey, SamplePipeline>, requested: &[String]) -> Vec<String> {
    requested
        .iter()
        .filter(|column| {
            let present = frames.values().all(|sample| {
                sample.nominal().has_column(column) && sample.variations().values().all(|n| n.has_column(column))
            });
            if !present {
                tracing::warn!(column = %column, "omitting column: not available for every dataset");
            }
            present
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_share_the_image_block() {
        let analysis = analysis_columns();
        let training = training_columns();
        assert_eq!(analysis.len(), 36);
        assert_eq!(training.len(), 37);
        assert_eq!(&analysis[12..], &training[12..36]);
        assert_eq!(training.last().map(String::as_str), Some("inference_score"));
    }

    #[test]
    fn empty_frames_keep_everything() {
        let frames = BTreeMap::new();
        assert_eq!(available_everywhere(&frames, &analysis_columns()), analysis_columns());
    }
}
