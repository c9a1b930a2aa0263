//! Shared pinhole calibration.
//!
//! One set of intrinsics is used for every image of a reconstruction. It is
//! derived from the image size and an assumed focal length / sensor width,
//! without distortion.

use nalgebra::{Matrix3, Vector2, Vector3};

use crate::config::CameraConfig;

/// Pinhole intrinsics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Derive intrinsics from the image size.
    ///
    /// `fx = fy = max(w, h) * focal_mm / sensor_mm`, principal point at the
    /// image center.
    pub fn from_image_size(width: u32, height: u32, config: &CameraConfig) -> Self {
        let max_dim = width.max(height) as f64;
        let f = max_dim * config.focal_length_mm / config.sensor_width_mm;
        Self {
            fx: f,
            fy: f,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    /// The 3x3 calibration matrix K.
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx,
            0.0, self.fy, self.cy,
            0.0, 0.0, 1.0,
        )
    }

    /// Project a camera-frame point to pixels. No depth check.
    #[inline]
    pub fn project(&self, p_cam: &Vector3<f64>) -> Vector2<f64> {
        Vector2::new(
            self.fx * p_cam.x / p_cam.z + self.cx,
            self.fy * p_cam.y / p_cam.z + self.cy,
        )
    }

    /// Back-project a pixel to normalized image coordinates (z = 1).
    #[inline]
    pub fn unproject(&self, pixel: &Vector2<f64>) -> Vector3<f64> {
        Vector3::new(
            (pixel.x - self.cx) / self.fx,
            (pixel.y - self.cy) / self.fy,
            1.0,
        )
    }
}
