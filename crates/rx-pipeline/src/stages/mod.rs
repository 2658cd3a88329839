//! Processing stages of the standard chain.

pub mod blip;
pub mod muon;
pub mod preselection;
pub mod reco;
pub mod truth;
pub mod weight;

pub use blip::BlipStage;
pub use muon::MuonSelectionStage;
pub use preselection::PreselectionStage;
pub use reco::ReconstructionStage;
pub use truth::TruthStage;
pub use weight::WeightStage;
