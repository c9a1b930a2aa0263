//! Reconstruction driver: owns the map and runs the pipeline stages in order.

pub mod reconstruction;

pub use reconstruction::{run_reconstruction, ImageReport, IncrementalReconstruction, ReconstructionSummary};
