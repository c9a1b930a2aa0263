//! Map module - the reconstruction's shared state.
//!
//! This module contains:
//! - [`CameraRecord`] - A registered image: pose, features, correspondences
//! - [`PointRecord`] - A triangulated 3D point with its color
//! - [`MapStore`] - The arena holding both, with invariant-preserving mutators
//!
//! # Architecture
//!
//! Cameras and points reference each other by id only:
//! - Cameras map local keypoint indices to points (`correspondences`)
//! - A point's track is recovered by scanning those maps
//!
//! Cameras and points are only ever added; poses and positions are only
//! ever refined.
//!
//! # Example
//!
//! ```ignore
//! use rust_sfm::map::{CameraId, MapStore, TrackEntry};
//!
//! let mut map = MapStore::new(image_names);
//! map.register_camera(CameraId::new(0), Pose::identity(), features0)?;
//! map.register_camera(CameraId::new(2), pose2, features2)?;
//!
//! let pid = map.add_point(
//!     position,
//!     color,
//!     &[TrackEntry::new(CameraId::new(0), 17), TrackEntry::new(CameraId::new(2), 40)],
//! )?;
//! ```

pub mod camera;
pub mod point;
pub mod store;
pub mod types;

pub use camera::CameraRecord;
pub use point::{Color, PointRecord};
pub use store::{MapStore, Observation};
pub use types::{CameraId, PointId, TrackEntry};
