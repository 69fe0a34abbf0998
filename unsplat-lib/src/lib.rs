pub mod common;
pub mod compressed;
pub mod error;
pub mod header;
pub mod pixels;
pub mod sog;
mod structures;
pub mod writer;

#[cfg(test)]
mod test_utils;

pub use structures::{Bounds3, Chunk, PackedVertex, Rgba, Splat};

use error::UnsplatError;
use log::info;
use pixels::PixelSource;
use sog::Manifest;
use std::fs;
use std::path::Path;
use writer::{publish, write_ply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Decode splats on the rayon pool. Output order is unaffected.
    pub parallel: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { parallel: true }
    }
}

/// The two compressed layouts this crate reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Chunked, bit-packed PLY.
    CompressedPly,
    /// `meta.json` plus image planes.
    Sog,
}

impl InputFormat {
    /// Directories and `.json` files are SOG scenes, anything else is treated
    /// as a compressed PLY.
    pub fn detect(input: &Path) -> Self {
        let is_json = input
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if input.is_dir() || is_json {
            InputFormat::Sog
        } else {
            InputFormat::CompressedPly
        }
    }
}

#[inline(never)]
pub fn decode_compressed_ply(
    raw_data: &[u8],
    options: DecodeOptions,
) -> Result<Vec<Splat>, UnsplatError> {
    let ply = compressed::read_compressed_ply(raw_data)?;
    info!(
        "Decoding {} splats from {} chunks",
        ply.vertices.len(),
        ply.chunks.len()
    );
    compressed::decode_splats(&ply, options)
}

/// Converts a compressed PLY into a standard PLY, returning the number of
/// splats written to `output`.
pub fn decompress_ply(
    raw_data: &[u8],
    options: DecodeOptions,
    output: &mut Vec<u8>,
) -> Result<usize, UnsplatError> {
    let splats = decode_compressed_ply(raw_data, options)?;
    write_ply(&splats, output)?;
    Ok(splats.len())
}

/// Decodes a SOG scene. Plane paths in the manifest are resolved against
/// `base_dir`.
#[inline(never)]
pub fn decode_sog<P: PixelSource>(
    manifest_json: &[u8],
    base_dir: &Path,
    source: &P,
    options: DecodeOptions,
) -> Result<Vec<Splat>, UnsplatError> {
    let manifest = Manifest::from_json(manifest_json)?;
    let planes = sog::load_planes(&manifest, base_dir, source)?;
    sog::decode_splats(&manifest, &planes, options)
}

pub fn decompress_sog<P: PixelSource>(
    manifest_json: &[u8],
    base_dir: &Path,
    source: &P,
    options: DecodeOptions,
    output: &mut Vec<u8>,
) -> Result<usize, UnsplatError> {
    let splats = decode_sog(manifest_json, base_dir, source, options)?;
    write_ply(&splats, output)?;
    Ok(splats.len())
}

fn read_input(path: &Path) -> Result<Vec<u8>, UnsplatError> {
    fs::read(path).map_err(UnsplatError::io(format!(
        "Error reading input file {}",
        path.display()
    )))
}

fn manifest_dir(manifest_path: &Path) -> &Path {
    manifest_path.parent().unwrap_or_else(|| Path::new("."))
}

/// Converts a compressed PLY file. The output file only appears once the
/// whole conversion has succeeded.
pub fn convert_compressed_ply(
    input: &Path,
    output: &Path,
    options: DecodeOptions,
) -> Result<usize, UnsplatError> {
    let raw_data = read_input(input)?;
    let mut buf = Vec::new();
    let count = decompress_ply(&raw_data, options, &mut buf)?;
    publish(output, &buf)?;
    Ok(count)
}

/// Converts a SOG scene given as a `meta.json` path or its directory.
pub fn convert_sog<P: PixelSource>(
    input: &Path,
    output: &Path,
    source: &P,
    options: DecodeOptions,
) -> Result<usize, UnsplatError> {
    let manifest_path = sog::resolve_manifest_path(input)?;
    info!("Loading manifest: {}", manifest_path.display());
    let manifest_json = read_input(&manifest_path)?;
    let mut buf = Vec::new();
    let count = decompress_sog(
        &manifest_json,
        manifest_dir(&manifest_path),
        source,
        options,
        &mut buf,
    )?;
    publish(output, &buf)?;
    Ok(count)
}

cfg_if::cfg_if! {
if #[cfg(feature = "image")] {
    use pixels::ImageFilePixels;

    /// Converts `input` to a standard PLY at `output`, decoding SOG planes
    /// with the `image` crate.
    pub fn convert(
        input: &Path,
        output: &Path,
        format: InputFormat,
        options: DecodeOptions,
    ) -> Result<usize, UnsplatError> {
        match format {
            InputFormat::CompressedPly => convert_compressed_ply(input, output, options),
            InputFormat::Sog => convert_sog(input, output, &ImageFilePixels, options),
        }
    }
}
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use std::path::PathBuf;
    use writer::publish_async;

    fn join_error(e: tokio::task::JoinError) -> UnsplatError {
        UnsplatError::Io {
            context: "Decode task failed".to_string(),
            source: e.into(),
        }
    }

    async fn read_input_async(path: &Path) -> Result<Vec<u8>, UnsplatError> {
        tokio::fs::read(path).await.map_err(UnsplatError::io(format!(
            "Error reading input file {}",
            path.display()
        )))
    }

    #[inline(never)]
    pub async fn convert_compressed_ply_async(
        input: &Path,
        output: &Path,
        options: DecodeOptions,
    ) -> Result<usize, UnsplatError> {
        let raw_data = read_input_async(input).await?;
        let (count, buf) = tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            decompress_ply(&raw_data, options, &mut buf).map(|count| (count, buf))
        })
        .await
        .map_err(join_error)??;
        publish_async(output, &buf).await?;
        Ok(count)
    }

    #[inline(never)]
    pub async fn convert_sog_async<P>(
        input: &Path,
        output: &Path,
        source: P,
        options: DecodeOptions,
    ) -> Result<usize, UnsplatError>
    where
        P: PixelSource + Send + 'static,
    {
        let manifest_path = sog::resolve_manifest_path(input)?;
        let manifest_json = read_input_async(&manifest_path).await?;
        let base_dir: PathBuf = manifest_dir(&manifest_path).to_path_buf();
        let (count, buf) = tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            decompress_sog(&manifest_json, &base_dir, &source, options, &mut buf)
                .map(|count| (count, buf))
        })
        .await
        .map_err(join_error)??;
        publish_async(output, &buf).await?;
        Ok(count)
    }

    #[cfg(feature = "image")]
    pub async fn convert_async(
        input: &Path,
        output: &Path,
        format: InputFormat,
        options: DecodeOptions,
    ) -> Result<usize, UnsplatError> {
        match format {
            InputFormat::CompressedPly => convert_compressed_ply_async(input, output, options).await,
            InputFormat::Sog => convert_sog_async(input, output, ImageFilePixels, options).await,
        }
    }
}
}
