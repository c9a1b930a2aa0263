//! Image discovery and color sampling.

use std::path::{Path, PathBuf};

use image::RgbImage;
use nalgebra::Vector2;
use tracing::warn;

use crate::error::{SfmError, SfmResult};
use crate::map::Color;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Something a point color can be read from.
pub trait ColorSource {
    /// RGB value at integer pixel `(x, y)`, `None` outside the image.
    fn pixel(&self, x: i64, y: i64) -> Option<Color>;
}

impl ColorSource for RgbImage {
    fn pixel(&self, x: i64, y: i64) -> Option<Color> {
        let x = u32::try_from(x).ok()?;
        let y = u32::try_from(y).ok()?;
        self.get_pixel_checked(x, y).map(|p| p.0)
    }
}

/// Every pixel of an unbounded plane has the same color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformColor(pub Color);

impl ColorSource for UniformColor {
    fn pixel(&self, _x: i64, _y: i64) -> Option<Color> {
        Some(self.0)
    }
}

/// Color at the rounded pixel location.
pub fn sample_color(source: &dyn ColorSource, pixel: &Vector2<f64>) -> SfmResult<Color> {
    let x = pixel.x.round() as i64;
    let y = pixel.y.round() as i64;
    source.pixel(x, y).ok_or(SfmError::OutOfBoundsColorSample { x, y })
}

/// Image files directly inside `dir`, sorted by file name.
pub fn load_images_from_dir<P: AsRef<Path>>(dir: P) -> SfmResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// Ordered image files of one reconstruction, decoded on demand.
#[derive(Debug, Clone)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
}

impl ImageSequence {
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> SfmResult<Self> {
        Ok(Self { paths: load_images_from_dir(dir)? })
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// File names, used as image names in the map store.
    pub fn names(&self) -> Vec<String> {
        self.paths
            .iter()
            .map(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// `(width, height)` read from the file header.
    pub fn dimensions(&self, index: usize) -> SfmResult<(u32, u32)> {
        let path = self.require(index)?;
        Ok(image::image_dimensions(path)?)
    }

    /// Decode image `index` to 8-bit RGB.
    pub fn load_rgb(&self, index: usize) -> SfmResult<RgbImage> {
        let path = self.require(index)?;
        Ok(image::open(path)?.to_rgb8())
    }

    /// Decoded image, or a uniform gray plane when decoding fails.
    pub fn color_source(&self, index: usize, fallback: Color) -> Box<dyn ColorSource> {
        match self.load_rgb(index) {
            Ok(img) => Box::new(img),
            Err(e) => {
                warn!("Could not decode image {}: {}. Using fallback color.", index, e);
                Box::new(UniformColor(fallback))
            }
        }
    }

    fn require(&self, index: usize) -> SfmResult<&Path> {
        self.path(index).ok_or_else(|| {
            SfmError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no image at index {}", index),
            ))
        })
    }
}
