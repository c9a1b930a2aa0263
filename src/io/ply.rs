//! ASCII PLY point-cloud writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;
use tracing::info;

use crate::error::SfmResult;
use crate::map::{Color, PointRecord};

/// Write positions and colors as an ASCII PLY with float xyz and uchar rgb.
///
/// Extra entries of the longer slice are ignored.
pub fn write_ply_to<W: Write>(mut writer: W, positions: &[Vector3<f64>], colors: &[Color]) -> SfmResult<()> {
    let count = positions.len().min(colors.len());

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", count)?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    writeln!(writer, "property uchar red")?;
    writeln!(writer, "property uchar green")?;
    writeln!(writer, "property uchar blue")?;
    writeln!(writer, "end_header")?;

    for (p, c) in positions.iter().zip(colors) {
        writeln!(writer, "{:.4} {:.4} {:.4} {} {} {}", p.x, p.y, p.z, c[0], c[1], c[2])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write map points to `path`.
pub fn write_ply<P: AsRef<Path>>(path: P, points: &[PointRecord]) -> SfmResult<()> {
    let positions: Vec<Vector3<f64>> = points.iter().map(|p| p.position).collect();
    let colors: Vec<Color> = points.iter().map(|p| p.color).collect();
    write_ply_to(BufWriter::new(File::create(path.as_ref())?), &positions, &colors)?;
    info!("Saved point cloud to: {}", path.as_ref().display());
    Ok(())
}
