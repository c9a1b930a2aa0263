//! Incremental monocular structure-from-motion.
//!
//! A shared [`map::MapStore`] is grown one image at a time:
//! - [`tracking`]: 2D-3D correspondence search and PnP registration
//! - [`local_mapping`]: pairwise triangulation of untracked keypoints
//! - [`optimizer`]: global bundle adjustment with a fixed reference camera
//! - [`system`]: the driver that bootstraps and sequences the stages
//! - [`io`]: images, feature sidecars, PLY and viewer export

pub mod config;
pub mod error;
pub mod features;
pub mod geometry;
pub mod io;
pub mod local_mapping;
pub mod logging;
pub mod map;
pub mod optimizer;
pub mod system;
pub mod tracking;

pub use config::PipelineConfig;
pub use error::{SfmError, SfmResult};
pub use logging::init_logger_with_level;
