//! Builders for in-memory compressed PLY and SOG fixtures.

use crate::common::SQRT_2;
use crate::error::UnsplatError;
use crate::pixels::PixelSource;
use crate::structures::{Bounds3, Chunk, PackedVertex, Rgba};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn pack_111011(v: [f32; 3]) -> u32 {
    let q = |x: f32, max: f32| (x.clamp(0.0, 1.0) * max).round() as u32;
    (q(v[0], 2047.0) << 21) | (q(v[1], 1023.0) << 11) | q(v[2], 2047.0)
}

pub fn pack_8888(c: [u8; 4]) -> u32 {
    u32::from_be_bytes(c)
}

pub fn normalize_quat(q: [f32; 4]) -> [f32; 4] {
    let norm = q.iter().map(|v| v * v).sum::<f32>().sqrt();
    q.map(|v| v / norm)
}

/// Smallest-three encoding of a unit `(w, x, y, z)` quaternion.
pub fn pack_rotation(q: [f32; 4]) -> u32 {
    let largest = (0..4)
        .max_by(|&a, &b| q[a].abs().total_cmp(&q[b].abs()))
        .unwrap_or(0);
    let sign = if q[largest] < 0.0 { -1.0 } else { 1.0 };
    let mut packed = (largest as u32) << 30;
    let mut shift = 20;
    for (slot, v) in q.iter().enumerate() {
        if slot == largest {
            continue;
        }
        let unit = (v * sign / SQRT_2 + 0.5).clamp(0.0, 1.0);
        packed |= ((unit * 1023.0).round() as u32) << shift;
        shift -= 10;
    }
    packed
}

/// Describes a compressed PLY to be serialized by [`compressed_ply`].
pub struct PlyFixture<'a> {
    pub chunks: &'a [Chunk],
    pub vertices: &'a [PackedVertex],
    pub vertex_order: [&'static str; 4],
    /// Extra zero-filled vertex property, e.g. `"uchar flags"`.
    pub vertex_extra: Option<&'static str>,
    /// Extra zero-filled chunk property, e.g. `"float min_r"`.
    pub chunk_extra: Option<&'static str>,
    /// `(name, rows, uchar properties)` of an element placed before `chunk`.
    pub leading_element: Option<(&'static str, usize, usize)>,
}

impl<'a> PlyFixture<'a> {
    pub fn new(chunks: &'a [Chunk], vertices: &'a [PackedVertex]) -> Self {
        Self {
            chunks,
            vertices,
            vertex_order: [
                "packed_position",
                "packed_rotation",
                "packed_scale",
                "packed_color",
            ],
            vertex_extra: None,
            chunk_extra: None,
            leading_element: None,
        }
    }
}

fn extra_size(decl: &str) -> usize {
    match decl.split_whitespace().next() {
        Some("uchar") | Some("char") => 1,
        Some("ushort") | Some("short") => 2,
        Some("double") => 8,
        _ => 4,
    }
}

fn push_bounds(out: &mut Vec<u8>, b: &Bounds3) {
    for v in b.min.iter().chain(b.max.iter()) {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub fn compressed_ply(fixture: &PlyFixture) -> Vec<u8> {
    let with_color = fixture.chunks.first().is_some_and(|c| c.color.is_some());
    let mut out = Vec::new();
    writeln!(out, "ply\nformat binary_little_endian 1.0\ncomment fixture").unwrap();

    if let Some((name, rows, props)) = fixture.leading_element {
        writeln!(out, "element {} {}", name, rows).unwrap();
        for p in 0..props {
            writeln!(out, "property uchar f_{}", p).unwrap();
        }
    }

    writeln!(out, "element chunk {}", fixture.chunks.len()).unwrap();
    let mut chunk_props = vec![
        "min_x",
        "min_y",
        "min_z",
        "max_x",
        "max_y",
        "max_z",
        "min_scale_x",
        "min_scale_y",
        "min_scale_z",
        "max_scale_x",
        "max_scale_y",
        "max_scale_z",
    ];
    if with_color {
        chunk_props.extend(["min_r", "min_g", "min_b", "max_r", "max_g", "max_b"]);
    }
    for p in &chunk_props {
        writeln!(out, "property float {}", p).unwrap();
    }
    if let Some(extra) = fixture.chunk_extra {
        writeln!(out, "property {}", extra).unwrap();
    }

    writeln!(out, "element vertex {}", fixture.vertices.len()).unwrap();
    for p in fixture.vertex_order {
        writeln!(out, "property uint {}", p).unwrap();
    }
    if let Some(extra) = fixture.vertex_extra {
        writeln!(out, "property {}", extra).unwrap();
    }
    writeln!(out, "end_header").unwrap();

    if let Some((_, rows, props)) = fixture.leading_element {
        out.resize(out.len() + rows * props, 0);
    }

    for chunk in fixture.chunks {
        push_bounds(&mut out, &chunk.position);
        push_bounds(&mut out, &chunk.scale);
        if let Some(color) = &chunk.color {
            push_bounds(&mut out, color);
        }
        if let Some(extra) = fixture.chunk_extra {
            out.resize(out.len() + extra_size(extra), 0);
        }
    }

    for v in fixture.vertices {
        for p in fixture.vertex_order {
            let word = match p {
                "packed_position" => v.position,
                "packed_rotation" => v.rotation,
                "packed_scale" => v.scale,
                _ => v.color,
            };
            out.extend_from_slice(&word.to_le_bytes());
        }
        if let Some(extra) = fixture.vertex_extra {
            out.resize(out.len() + extra_size(extra), 0);
        }
    }
    out
}

/// Pixel planes keyed by path, standing in for decoded image files.
#[derive(Debug, Default, Clone)]
pub struct MemoryPixels {
    pub planes: Vec<(PathBuf, Vec<Rgba>)>,
}

impl MemoryPixels {
    pub fn insert(&mut self, path: impl Into<PathBuf>, pixels: Vec<Rgba>) {
        self.planes.push((path.into(), pixels));
    }
}

impl PixelSource for MemoryPixels {
    fn load_rgba(&self, path: &Path) -> Result<Vec<Rgba>, UnsplatError> {
        self.planes
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, pixels)| pixels.clone())
            .ok_or_else(|| UnsplatError::image(path.display().to_string(), "no such plane"))
    }
}

/// A valid SOG manifest with linear `-8..8` codebooks.
pub fn sog_manifest(count: usize) -> serde_json::Value {
    let codebook: Vec<f32> = (0..256).map(|i| i as f32 / 16.0 - 8.0).collect();
    serde_json::json!({
        "version": 2,
        "count": count,
        "means": {
            "mins": [-1.0, 0.0, 2.0],
            "maxs": [1.0, 0.0, 4.0],
            "files": ["means_l.webp", "means_u.webp"]
        },
        "scales": { "codebook": codebook.clone(), "files": ["scales.webp"] },
        "quats": { "files": ["quats.webp"] },
        "sh0": { "codebook": codebook, "files": ["sh0.webp"] }
    })
}
