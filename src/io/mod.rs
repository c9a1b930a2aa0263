//! Input and output around the reconstruction core.
//!
//! - Image discovery and color sampling
//! - Precomputed feature sidecars
//! - PLY point clouds and the web-viewer scene export

pub mod features;
pub mod images;
pub mod ply;
pub mod viewer;

pub use features::PrecomputedFeatures;
pub use images::{load_images_from_dir, sample_color, ColorSource, ImageSequence, UniformColor};
pub use ply::{write_ply, write_ply_to};
pub use viewer::{export_viewer_scene, ViewerScene};
