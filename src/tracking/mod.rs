//! Tracking: localizing a new image against the map.
//!
//! - 2D-3D correspondence search over a bounded reference-camera set
//! - PnP-RANSAC pose solving and registration of the inlier bindings

pub mod correspondence;
pub mod registration;

pub use correspondence::{find_correspondences, select_reference_cameras, Correspondences, CorrespondenceConfig};
pub use registration::{register_image, RegistrationResult};
