//! Mapping: growing the point cloud from posed cameras.
//!
//! - Pairwise DLT triangulation of keypoints neither camera tracks yet
//! - Cheirality filtering of the candidates
//! - Track extension of a new camera against its most recent neighbours

pub mod triangulation;

pub use triangulation::{extend_tracks, triangulate_pair, TriangulationConfig, TriangulationResult};
