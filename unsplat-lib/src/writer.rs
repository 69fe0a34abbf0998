use crate::error::UnsplatError;
use crate::structures::Splat;
use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use zerocopy::byteorder::little_endian::F32;
use zerocopy::{Immutable, IntoBytes, KnownLayout};

/// Vertex properties of the canonical output, in record order.
pub const PLY_PROPERTIES: [&str; Splat::FLOATS] = [
    "x", "y", "z", "f_dc_0", "f_dc_1", "f_dc_2", "opacity", "scale_0", "scale_1", "scale_2",
    "rot_0", "rot_1", "rot_2", "rot_3",
];

/// One output vertex, little-endian regardless of the host.
#[repr(transparent)]
#[derive(IntoBytes, Immutable, KnownLayout)]
struct PlyRecord([F32; Splat::FLOATS]);

impl From<&Splat> for PlyRecord {
    fn from(splat: &Splat) -> Self {
        PlyRecord(splat.to_array().map(F32::new))
    }
}

/// Size in bytes of a canonical PLY holding `count` splats.
pub fn ply_size(count: usize) -> usize {
    header(count).len() + count * size_of::<PlyRecord>()
}

fn header(count: usize) -> String {
    let mut header = format!(
        "ply\nformat binary_little_endian 1.0\nelement vertex {}\n",
        count
    );
    for name in PLY_PROPERTIES {
        header.push_str("property float ");
        header.push_str(name);
        header.push('\n');
    }
    header.push_str("end_header\n");
    header
}

/// Renders `splats` as a binary little-endian PLY into `output`, replacing its
/// previous contents. The vertex count is taken from `splats`.
pub fn write_ply(splats: &[Splat], output: &mut Vec<u8>) -> Result<(), UnsplatError> {
    output.clear();
    output.reserve(ply_size(splats.len()));
    output
        .write_all(header(splats.len()).as_bytes())
        .map_err(UnsplatError::io("Failed to write PLY header"))?;

    let records: Vec<PlyRecord> = splats.iter().map(PlyRecord::from).collect();
    output.extend_from_slice(records.as_bytes());
    Ok(())
}

/// Creates a uniquely named, hidden sibling of `path` (`.<name>.XXXXXX.partial`)
/// to stage the output in. The file is removed when dropped unless persisted.
pub fn staging_file(path: &Path) -> Result<NamedTempFile, UnsplatError> {
    let name = path.file_name().ok_or_else(|| UnsplatError::Io {
        context: format!("Invalid output path '{}'", path.display()),
        source: std::io::ErrorKind::InvalidInput.into(),
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut prefix = OsString::from(".");
    prefix.push(name);
    prefix.push(".");
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(UnsplatError::io(format!(
            "Error creating staging file for '{}'",
            path.display()
        )))
}

fn write_error(path: &Path) -> impl FnOnce(std::io::Error) -> UnsplatError {
    UnsplatError::io(format!("Error writing output '{}'", path.display()))
}

/// Writes `data` to `path` so that readers only ever see the complete file:
/// the bytes go to a staging file first and are renamed over `path`.
pub fn publish(path: &Path, data: &[u8]) -> Result<(), UnsplatError> {
    let mut staged = staging_file(path)?;
    staged.write_all(data).map_err(write_error(path))?;
    staged.as_file().sync_all().map_err(write_error(path))?;
    staged
        .persist(path)
        .map_err(|e| write_error(path)(e.error))?;
    log::debug!("Published {} bytes to {}", data.len(), path.display());
    Ok(())
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    /// Async counterpart of [`publish`].
    pub async fn publish_async(path: &Path, data: &[u8]) -> Result<(), UnsplatError> {
        use tokio::io::AsyncWriteExt;
        let (file, staged) = staging_file(path)?.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        file.write_all(data).await.map_err(write_error(path))?;
        file.sync_all().await.map_err(write_error(path))?;
        drop(file);
        staged
            .persist(path)
            .map_err(|e| write_error(path)(e.error))?;
        Ok(())
    }
}
}
