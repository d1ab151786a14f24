//! Label surfaces as triangle meshes.
//!
//! The surface of a label is the 0.5 level of its binary indicator, extracted
//! with marching cubes. The indicator is padded with one outside sample on
//! every side, so surfaces touching the volume edge are still closed.

use crate::volume::Volume;

use lin_alg::f32::Vec3;
use log::info;
use mcubes::{MarchingCubes, MeshSide};
use ndarray::{Array3, s};
use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Indicator level the surface is drawn at.
pub const ISO_LEVEL: f32 = 0.5;

#[derive(Debug, Error)]
pub enum IsoSurfaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Marching cubes failed: {0}")]
    MarchingCubes(String),

    #[error("Label {0} has an empty surface")]
    EmptySurface(u32),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    /// Vertex positions as (x, y, z).
    pub vertices: Vec<[f32; 3]>,
    pub triangles: Vec<[usize; 3]>,
}

impl Mesh {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Axis-aligned bounds as (min, max), or `None` for a mesh without vertices.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.vertices.first()?;
        Some(self.vertices.iter().fold((first, first), |(lo, hi), v| {
            (
                [0, 1, 2].map(|i| lo[i].min(v[i])),
                [0, 1, 2].map(|i| hi[i].max(v[i])),
            )
        }))
    }
}

/// Extract the surface of `label` from a `(Z, Y, X)` label volume.
///
/// Vertex positions are voxel centres scaled by `spacing` (x, y, z): the
/// centre of voxel `[z, y, x]` sits at `(x * sx, y * sy, z * sz)`.
pub fn extract_label_surface(
    labels: &Volume,
    label: u32,
    spacing: [f32; 3],
) -> Result<Mesh, IsoSurfaceError> {
    let indicator = labels.indicator(label);
    if !indicator.iter().any(|&v| v > ISO_LEVEL) {
        return Ok(Mesh::default());
    }

    let (depth, height, width) = indicator.dim();
    let (nz, ny, nx) = (depth + 2, height + 2, width + 2);
    let mut padded = Array3::<f32>::zeros((nz, ny, nx));
    padded
        .slice_mut(s![1..=depth, 1..=height, 1..=width])
        .assign(&indicator);

    // Standard layout of (Z, Y, X) is already x-fastest.
    let values: Vec<f32> = padded.iter().copied().collect();
    let [sx, sy, sz] = spacing;
    let mc = MarchingCubes::new(
        (nx, ny, nz),
        (nx as f32 * sx, ny as f32 * sy, nz as f32 * sz),
        (nx as f32, ny as f32, nz as f32),
        Vec3::new(-sx, -sy, -sz),
        values,
        ISO_LEVEL,
    )
    .map_err(|e| IsoSurfaceError::MarchingCubes(e.to_string()))?;
    let generated = mc.generate(MeshSide::OutsideOnly);

    Ok(Mesh {
        vertices: generated
            .vertices
            .iter()
            .map(|v| [v.posit.x, v.posit.y, v.posit.z])
            .collect(),
        triangles: generated
            .indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect(),
    })
}

/// Surfaces of every label present in `labels`, in ascending label order.
pub fn extract_surfaces(
    labels: &Volume,
    spacing: [f32; 3],
) -> Result<Vec<(u32, Mesh)>, IsoSurfaceError> {
    labels
        .present_labels()
        .into_iter()
        .map(|label| {
            let mesh = extract_label_surface(labels, label, spacing)?;
            info!(
                "Label {}: {} vertices, {} triangles",
                label,
                mesh.vertices.len(),
                mesh.triangle_count()
            );
            Ok((label, mesh))
        })
        .collect()
}

/// Write a mesh as binary STL.
pub fn write_stl(mesh: &Mesh, path: impl AsRef<Path>) -> Result<(), IsoSurfaceError> {
    let triangles = mesh.triangles.iter().map(|&[a, b, c]| {
        let (v0, v1, v2) = (mesh.vertices[a], mesh.vertices[b], mesh.vertices[c]);
        let n = normal(v0, v1, v2);
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        let n = if len > 0.0 {
            n.map(|component| component / len)
        } else {
            [0.0, 0.0, 1.0]
        };
        stl_io::Triangle {
            normal: stl_io::Normal::new(n),
            vertices: [
                stl_io::Vertex::new(v0),
                stl_io::Vertex::new(v1),
                stl_io::Vertex::new(v2),
            ],
        }
    });

    let mut file = BufWriter::new(File::create(path)?);
    stl_io::write_stl(&mut file, triangles)?;
    Ok(())
}

/// Write one STL per label into `dir` as `{prefix}_label_{label}.stl`.
pub fn write_label_surfaces(
    surfaces: &[(u32, Mesh)],
    dir: impl AsRef<Path>,
    prefix: &str,
) -> Result<Vec<PathBuf>, IsoSurfaceError> {
    surfaces
        .iter()
        .map(|(label, mesh)| {
            if mesh.is_empty() {
                return Err(IsoSurfaceError::EmptySurface(*label));
            }
            let path = dir.as_ref().join(format!("{prefix}_label_{label}.stl"));
            write_stl(mesh, &path)?;
            Ok(path)
        })
        .collect()
}

fn normal(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> [f32; 3] {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ]
}
