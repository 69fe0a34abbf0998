//! Decoder for the chunked, bit-packed "compressed PLY" layout.
//!
//! Every 256 consecutive vertices share one `chunk` row holding the position,
//! scale and (optionally) color bounds the packed words are expanded into.

use crate::common::{
    color_to_sh_dc, logit_opacity, unpack_111011, unpack_8888, unpack_rotation, CHUNK_SIZE,
};
use crate::error::UnsplatError;
use crate::header::{parse_header, Element, FieldSlot, ScalarType, Schema};
use crate::structures::{Bounds3, Chunk, PackedVertex, Splat};
use crate::DecodeOptions;
use foldhash::HashMap;
use log::{debug, warn};
use rayon::prelude::*;

pub const CHUNK_ELEMENT: &str = "chunk";
pub const VERTEX_ELEMENT: &str = "vertex";

const POSITION_BOUNDS: [&str; 6] = ["min_x", "min_y", "min_z", "max_x", "max_y", "max_z"];
const SCALE_BOUNDS: [&str; 6] = [
    "min_scale_x",
    "min_scale_y",
    "min_scale_z",
    "max_scale_x",
    "max_scale_y",
    "max_scale_z",
];
const COLOR_BOUNDS: [&str; 6] = ["min_r", "min_g", "min_b", "max_r", "max_g", "max_b"];
const PACKED_FIELDS: [&str; 4] = [
    "packed_position",
    "packed_rotation",
    "packed_scale",
    "packed_color",
];

/// Chunk and vertex tables read from a compressed PLY body.
#[derive(Debug, Default, Clone)]
pub struct CompressedPly {
    pub chunks: Vec<Chunk>,
    pub vertices: Vec<PackedVertex>,
}

/// Index of the chunk that holds the bounds for vertex `i`.
#[inline]
pub const fn chunk_index(i: usize) -> usize {
    i / CHUNK_SIZE
}

/// Number of chunk rows needed to cover `vertices` splats.
#[inline]
pub const fn chunks_needed(vertices: usize) -> usize {
    vertices.div_ceil(CHUNK_SIZE)
}

#[inline(always)]
fn le_f32(row: &[u8], offset: usize) -> f32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&row[offset..offset + 4]);
    f32::from_le_bytes(bytes)
}

#[inline(always)]
fn le_u32(row: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&row[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn require_slots<const N: usize>(
    element: &Element,
    slots: &HashMap<&str, FieldSlot>,
    names: [&str; N],
    ty: ScalarType,
) -> Result<[usize; N], UnsplatError> {
    let missing: Vec<&str> = names
        .iter()
        .copied()
        .filter(|n| !slots.contains_key(n))
        .collect();
    if !missing.is_empty() {
        return Err(UnsplatError::Schema(format!(
            "{} element is missing required properties: {}",
            element.name,
            missing.join(", ")
        )));
    }

    let mut offsets = [0usize; N];
    for (out, name) in offsets.iter_mut().zip(names) {
        let slot = slots[name];
        if slot.ty != ty {
            return Err(UnsplatError::Schema(format!(
                "{} property '{}' has type {:?}, expected {:?}",
                element.name, name, slot.ty, ty
            )));
        }
        *out = slot.offset;
    }
    Ok(offsets)
}

/// Byte offsets of the bound fields inside a chunk row.
struct ChunkLayout {
    stride: usize,
    position: [usize; 6],
    scale: [usize; 6],
    color: Option<[usize; 6]>,
}

impl ChunkLayout {
    fn new(element: &Element) -> Result<Self, UnsplatError> {
        let slots = element.slots()?;
        let position = require_slots(element, &slots, POSITION_BOUNDS, ScalarType::Float32)?;
        let scale = require_slots(element, &slots, SCALE_BOUNDS, ScalarType::Float32)?;

        let present = COLOR_BOUNDS.iter().filter(|n| slots.contains_key(*n)).count();
        let color = match present {
            0 => None,
            n if n == COLOR_BOUNDS.len() => Some(require_slots(
                element,
                &slots,
                COLOR_BOUNDS,
                ScalarType::Float32,
            )?),
            _ => {
                let missing: Vec<&str> = COLOR_BOUNDS
                    .iter()
                    .copied()
                    .filter(|n| !slots.contains_key(n))
                    .collect();
                return Err(UnsplatError::Schema(format!(
                    "chunk color bounds are incomplete; missing: {}",
                    missing.join(", ")
                )));
            }
        };

        if let Some(p) = element
            .properties
            .iter()
            .find(|p| slots[p.name.as_str()].ty != ScalarType::Float32)
        {
            return Err(UnsplatError::Schema(format!(
                "chunk property '{}' must be float32",
                p.name
            )));
        }

        Ok(Self {
            stride: element.stride()?,
            position,
            scale,
            color,
        })
    }

    fn bounds(row: &[u8], offsets: &[usize; 6]) -> Bounds3 {
        Bounds3 {
            min: [
                le_f32(row, offsets[0]),
                le_f32(row, offsets[1]),
                le_f32(row, offsets[2]),
            ],
            max: [
                le_f32(row, offsets[3]),
                le_f32(row, offsets[4]),
                le_f32(row, offsets[5]),
            ],
        }
    }

    fn read(&self, row: &[u8]) -> Chunk {
        Chunk {
            position: Self::bounds(row, &self.position),
            scale: Self::bounds(row, &self.scale),
            color: self.color.as_ref().map(|c| Self::bounds(row, c)),
        }
    }
}

/// Byte offsets of the packed words inside a vertex row.
struct VertexLayout {
    stride: usize,
    packed: [usize; 4],
}

impl VertexLayout {
    fn new(element: &Element) -> Result<Self, UnsplatError> {
        let slots = element.slots()?;
        let packed = require_slots(element, &slots, PACKED_FIELDS, ScalarType::UInt32)?;
        Ok(Self {
            stride: element.stride()?,
            packed,
        })
    }

    fn read(&self, row: &[u8]) -> PackedVertex {
        PackedVertex {
            position: le_u32(row, self.packed[0]),
            rotation: le_u32(row, self.packed[1]),
            scale: le_u32(row, self.packed[2]),
            color: le_u32(row, self.packed[3]),
        }
    }
}

fn single_element<'s>(schema: &'s Schema, name: &str) -> Result<&'s Element, UnsplatError> {
    let element = schema.element(name).ok_or_else(|| {
        UnsplatError::Schema(format!(
            "not a compressed PLY (missing '{}' element)",
            name
        ))
    })?;
    if schema.elements.iter().filter(|e| e.name == name).count() > 1 {
        return Err(UnsplatError::Schema(format!(
            "element '{}' is declared more than once",
            name
        )));
    }
    Ok(element)
}

fn take_rows<'b>(
    body: &'b [u8],
    cursor: &mut usize,
    element: &Element,
    stride: usize,
) -> Result<&'b [u8], UnsplatError> {
    let needed = element.count.checked_mul(stride).ok_or_else(|| {
        UnsplatError::Format(format!("element '{}' is too large", element.name))
    })?;
    let available = body.len() - *cursor;
    if available < needed {
        return Err(UnsplatError::TruncatedData {
            element: element.name.clone(),
            needed,
            available,
        });
    }
    let rows = &body[*cursor..*cursor + needed];
    *cursor += needed;
    Ok(rows)
}

/// Reads the chunk and vertex tables of a compressed PLY that has already had
/// its header parsed. `body` starts at the first byte after `end_header`.
pub fn read_tables(schema: &Schema, body: &[u8]) -> Result<CompressedPly, UnsplatError> {
    schema.require_binary_le()?;

    let chunk_element = single_element(schema, CHUNK_ELEMENT)?;
    let vertex_element = single_element(schema, VERTEX_ELEMENT)?;
    if !vertex_element.has_property(PACKED_FIELDS[0]) {
        return Err(UnsplatError::Schema(format!(
            "not a compressed PLY (vertex element has no '{}')",
            PACKED_FIELDS[0]
        )));
    }
    let chunk_layout = ChunkLayout::new(chunk_element)?;
    let vertex_layout = VertexLayout::new(vertex_element)?;

    let mut ply = CompressedPly::default();
    let mut cursor = 0;
    for element in &schema.elements {
        match element.name.as_str() {
            CHUNK_ELEMENT => {
                let rows = take_rows(body, &mut cursor, element, chunk_layout.stride)?;
                ply.chunks = rows
                    .chunks_exact(chunk_layout.stride)
                    .map(|row| chunk_layout.read(row))
                    .collect();
            }
            VERTEX_ELEMENT => {
                let rows = take_rows(body, &mut cursor, element, vertex_layout.stride)?;
                ply.vertices = rows
                    .chunks_exact(vertex_layout.stride)
                    .map(|row| vertex_layout.read(row))
                    .collect();
            }
            other => {
                let stride = element.stride()?;
                take_rows(body, &mut cursor, element, stride)?;
                warn!("Skipping element '{}' ({} rows)", other, element.count);
            }
        }
    }

    debug!(
        "Read {} chunks and {} packed vertices",
        ply.chunks.len(),
        ply.vertices.len()
    );
    Ok(ply)
}

/// Parses header and body of a compressed PLY.
pub fn read_compressed_ply(raw_data: &[u8]) -> Result<CompressedPly, UnsplatError> {
    let (schema, offset) = parse_header(raw_data)?;
    read_tables(&schema, &raw_data[offset..])
}

#[inline]
fn narrow<const N: usize>(v: [f64; N]) -> [f32; N] {
    v.map(|x| x as f32)
}

/// Expands one packed vertex against the bounds of its chunk. All arithmetic
/// is done in f64 and rounded to f32 once per field.
#[inline]
pub fn decode_vertex(chunk: &Chunk, vertex: &PackedVertex) -> Splat {
    let position = chunk.position.expand(unpack_111011(vertex.position));
    let scale = chunk.scale.expand(unpack_111011(vertex.scale));

    let [r, g, b, a] = unpack_8888(vertex.color);
    let rgb = match &chunk.color {
        Some(bounds) => bounds.expand([r, g, b]),
        None => [r, g, b],
    };

    Splat {
        position: narrow(position),
        sh_dc: narrow(rgb.map(color_to_sh_dc)),
        opacity: logit_opacity(a) as f32,
        scale: narrow(scale),
        rotation: narrow(unpack_rotation(vertex.rotation)),
    }
}

/// Decodes every vertex in input order.
pub fn decode_splats(ply: &CompressedPly, options: DecodeOptions) -> Result<Vec<Splat>, UnsplatError> {
    let needed = chunks_needed(ply.vertices.len());
    if ply.chunks.len() < needed {
        let vertex = ply.chunks.len() * CHUNK_SIZE;
        return Err(UnsplatError::Range {
            vertex,
            chunk: chunk_index(vertex),
            chunks: ply.chunks.len(),
        });
    }

    let decode = |(i, vertex): (usize, &PackedVertex)| decode_vertex(&ply.chunks[chunk_index(i)], vertex);
    let splats = if options.parallel {
        ply.vertices
            .par_iter()
            .enumerate()
            .with_min_len(CHUNK_SIZE)
            .map(decode)
            .collect()
    } else {
        ply.vertices.iter().enumerate().map(decode).collect()
    };
    Ok(splats)
}
