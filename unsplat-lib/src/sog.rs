//! Decoder for SOG scenes: a `meta.json` manifest plus RGBA image planes.

use crate::common::{inv_log_transform, inv_sigmoid, CODEBOOK_LEN, QUAT_TAG_BASE, SQRT_2};
use crate::error::UnsplatError;
use crate::pixels::PixelSource;
use crate::structures::{Rgba, Splat};
use crate::DecodeOptions;
use log::{debug, info};
use rayon::prelude::*;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "meta.json";

pub type Codebook = Box<[f32; CODEBOOK_LEN]>;

#[derive(Deserialize)]
struct RawManifest {
    count: Option<i64>,
    means: Option<RawMeans>,
    scales: Option<RawCodebookSection>,
    quats: Option<RawFilesSection>,
    sh0: Option<RawCodebookSection>,
}

#[derive(Deserialize)]
struct RawMeans {
    mins: Option<Vec<f32>>,
    maxs: Option<Vec<f32>>,
    files: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct RawCodebookSection {
    codebook: Option<Vec<f32>>,
    files: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct RawFilesSection {
    files: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Means {
    pub mins: [f32; 3],
    pub maxs: [f32; 3],
    /// Low byte plane, high byte plane.
    pub files: [String; 2],
}

/// Validated `meta.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub count: usize,
    pub means: Means,
    pub scales_codebook: Codebook,
    pub scales_file: String,
    pub quats_file: String,
    pub sh0_codebook: Codebook,
    pub sh0_file: String,
}

fn required<T>(value: Option<T>, key: &str) -> Result<T, UnsplatError> {
    value.ok_or_else(|| UnsplatError::manifest(format!("missing key '{}'", key)))
}

fn axis(values: Vec<f32>, key: &str) -> Result<[f32; 3], UnsplatError> {
    <[f32; 3]>::try_from(values).map_err(|v| {
        UnsplatError::manifest(format!("{} must have 3 entries, found {}", key, v.len()))
    })
}

fn codebook(values: Vec<f32>, key: &str) -> Result<Codebook, UnsplatError> {
    let len = values.len();
    Codebook::try_from(values.into_boxed_slice()).map_err(|_| {
        UnsplatError::manifest(format!(
            "{} must have {} entries, found {}",
            key, CODEBOOK_LEN, len
        ))
    })
}

fn files(values: Vec<String>, key: &str, min: usize) -> Result<Vec<String>, UnsplatError> {
    if values.len() < min {
        return Err(UnsplatError::manifest(format!(
            "{} must list at least {} file(s), found {}",
            key,
            min,
            values.len()
        )));
    }
    Ok(values)
}

impl Manifest {
    pub fn from_json(data: &[u8]) -> Result<Self, UnsplatError> {
        let value: serde_json::Value = serde_json::from_slice(data)?;
        let root = value
            .as_object()
            .ok_or_else(|| UnsplatError::manifest("meta.json root must be an object"))?;
        for key in ["means", "scales", "quats", "sh0"] {
            if root.get(key).is_some_and(|section| !section.is_object()) {
                return Err(UnsplatError::manifest(format!("'{}' must be an object", key)));
            }
        }
        let raw = RawManifest::deserialize(value)?;

        let count = required(raw.count, "count")?;
        let means = required(raw.means, "means")?;
        let scales = required(raw.scales, "scales")?;
        let quats = required(raw.quats, "quats")?;
        let sh0 = required(raw.sh0, "sh0")?;

        let count = usize::try_from(count)
            .ok()
            .filter(|&c| c > 0)
            .ok_or_else(|| {
                UnsplatError::manifest(format!("count must be a positive integer, found {}", count))
            })?;

        let mins = axis(required(means.mins, "means.mins")?, "means.mins")?;
        let maxs = axis(required(means.maxs, "means.maxs")?, "means.maxs")?;
        let mut means_files =
            files(required(means.files, "means.files")?, "means.files", 2)?.into_iter();
        let (Some(low), Some(high)) = (means_files.next(), means_files.next()) else {
            return Err(UnsplatError::manifest("means.files must list 2 files"));
        };

        let scales_codebook = codebook(
            required(scales.codebook, "scales.codebook")?,
            "scales.codebook",
        )?;
        let scales_files = files(required(scales.files, "scales.files")?, "scales.files", 1)?;
        let quats_files = files(required(quats.files, "quats.files")?, "quats.files", 1)?;
        let sh0_codebook = codebook(required(sh0.codebook, "sh0.codebook")?, "sh0.codebook")?;
        let sh0_files = files(required(sh0.files, "sh0.files")?, "sh0.files", 1)?;

        Ok(Self {
            count,
            means: Means {
                mins,
                maxs,
                files: [low, high],
            },
            scales_codebook,
            scales_file: first(scales_files),
            quats_file: first(quats_files),
            sh0_codebook,
            sh0_file: first(sh0_files),
        })
    }
}

fn first(files: Vec<String>) -> String {
    files.into_iter().next().unwrap_or_default()
}

/// Pixel planes referenced by a manifest, each holding at least `count`
/// pixels.
#[derive(Debug, Clone, Default)]
pub struct Planes {
    pub means_low: Vec<Rgba>,
    pub means_high: Vec<Rgba>,
    pub scales: Vec<Rgba>,
    pub quats: Vec<Rgba>,
    pub sh0: Vec<Rgba>,
}

/// Resolves a SOG input path: a directory means `<dir>/meta.json`.
pub fn resolve_manifest_path(input: &Path) -> Result<PathBuf, UnsplatError> {
    if input.is_dir() {
        let manifest = input.join(MANIFEST_FILE);
        if !manifest.is_file() {
            return Err(UnsplatError::manifest(format!(
                "directory does not contain {}: {}",
                MANIFEST_FILE,
                input.display()
            )));
        }
        return Ok(manifest);
    }
    Ok(input.to_path_buf())
}

fn too_few_pixels(path: impl Into<String>, count: usize, found: usize) -> UnsplatError {
    UnsplatError::image(
        path,
        format!("has too few pixels for {} gaussians ({})", count, found),
    )
}

/// Loads every plane a manifest references, relative to `base_dir`.
pub fn load_planes<P: PixelSource>(
    manifest: &Manifest,
    base_dir: &Path,
    source: &P,
) -> Result<Planes, UnsplatError> {
    let load = |file: &str| -> Result<Vec<Rgba>, UnsplatError> {
        let path = base_dir.join(file);
        let pixels = source.load_rgba(&path)?;
        if pixels.len() < manifest.count {
            return Err(too_few_pixels(
                path.display().to_string(),
                manifest.count,
                pixels.len(),
            ));
        }
        debug!("Plane {} has {} pixels", path.display(), pixels.len());
        Ok(pixels)
    };

    Ok(Planes {
        means_low: load(&manifest.means.files[0])?,
        means_high: load(&manifest.means.files[1])?,
        scales: load(&manifest.scales_file)?,
        quats: load(&manifest.quats_file)?,
        sh0: load(&manifest.sh0_file)?,
    })
}

/// Rebuilds a position from the two 8-bit planes. Each axis is a 16-bit
/// fraction of the manifest range, stored in log space.
#[inline]
pub fn decode_position(low: Rgba, high: Rgba, means: &Means) -> [f32; 3] {
    let unit = 1.0f32 / 65535.0;
    std::array::from_fn(|axis| {
        let quantized = u16::from(low[axis]) | (u16::from(high[axis]) << 8);
        let mut range = means.maxs[axis] - means.mins[axis];
        if range == 0.0 {
            range = 1.0;
        }
        inv_log_transform(means.mins[axis] + range * (quantized as f32 * unit))
    })
}

/// Smallest-three rotation from one quaternion-plane pixel, as `(w, x, y, z)`.
///
/// Alpha holds `252 + index` of the reconstructed component; any other tag
/// decodes to the identity. The result is not renormalized.
#[inline]
pub fn decode_quat(px: Rgba) -> [f32; 4] {
    let tag = px[3];
    if tag < QUAT_TAG_BASE {
        return [1.0, 0.0, 0.0, 0.0];
    }
    let largest = usize::from(tag - QUAT_TAG_BASE);
    let stored = [px[0], px[1], px[2]].map(|b| (b as f32 / 255.0 * 2.0 - 1.0) / SQRT_2);

    let mut q = [0.0f32; 4];
    let slots = (0..4).filter(|&slot| slot != largest);
    for (slot, v) in slots.zip(stored) {
        q[slot] = v;
    }
    let rest: f32 = stored.iter().map(|v| v * v).sum();
    q[largest] = (1.0 - rest).max(0.0).sqrt();
    q
}

#[inline]
fn decode_one(manifest: &Manifest, planes: &Planes, i: usize) -> Splat {
    let scale_px = planes.scales[i];
    let color_px = planes.sh0[i];
    let scales = &manifest.scales_codebook;
    let sh0 = &manifest.sh0_codebook;

    Splat {
        position: decode_position(planes.means_low[i], planes.means_high[i], &manifest.means),
        sh_dc: std::array::from_fn(|c| sh0[usize::from(color_px[c])]),
        opacity: inv_sigmoid(color_px[3] as f32 / 255.0),
        scale: std::array::from_fn(|c| scales[usize::from(scale_px[c])]),
        rotation: decode_quat(planes.quats[i]),
    }
}

fn check_planes(manifest: &Manifest, planes: &Planes) -> Result<(), UnsplatError> {
    let named = [
        (&manifest.means.files[0], &planes.means_low),
        (&manifest.means.files[1], &planes.means_high),
        (&manifest.scales_file, &planes.scales),
        (&manifest.quats_file, &planes.quats),
        (&manifest.sh0_file, &planes.sh0),
    ];
    for (file, pixels) in named {
        if pixels.len() < manifest.count {
            return Err(too_few_pixels(file.as_str(), manifest.count, pixels.len()));
        }
    }
    Ok(())
}

/// Decodes `manifest.count` splats in index order. Fails if any plane holds
/// fewer than `count` pixels.
pub fn decode_splats(
    manifest: &Manifest,
    planes: &Planes,
    options: DecodeOptions,
) -> Result<Vec<Splat>, UnsplatError> {
    check_planes(manifest, planes)?;
    let count = manifest.count;
    info!("Decoding {} gaussians", count);
    let splats = if options.parallel {
        (0..count)
            .into_par_iter()
            .with_min_len(1024)
            .map(|i| decode_one(manifest, planes, i))
            .collect()
    } else {
        (0..count).map(|i| decode_one(manifest, planes, i)).collect()
    };
    Ok(splats)
}
