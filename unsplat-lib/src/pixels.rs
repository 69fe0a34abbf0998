use crate::error::UnsplatError;
use crate::structures::Rgba;
use std::path::Path;

/// Supplies the decoded pixels of one SOG plane as row-major RGBA quadruples.
pub trait PixelSource {
    fn load_rgba(&self, path: &Path) -> Result<Vec<Rgba>, UnsplatError>;
}

impl<P: PixelSource + ?Sized> PixelSource for &P {
    fn load_rgba(&self, path: &Path) -> Result<Vec<Rgba>, UnsplatError> {
        (**self).load_rgba(path)
    }
}

cfg_if::cfg_if! {
if #[cfg(feature = "image")] {
    use image::ImageReader;

    /// Reads planes from disk with the `image` crate, sniffing the codec from
    /// the file contents.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ImageFilePixels;

    impl PixelSource for ImageFilePixels {
        fn load_rgba(&self, path: &Path) -> Result<Vec<Rgba>, UnsplatError> {
            log::info!("Loading image: {}", path.display());
            let reader = ImageReader::open(path)
                .map_err(UnsplatError::io(format!("Failed to open image {}", path.display())))?
                .with_guessed_format()
                .map_err(UnsplatError::io(format!("Failed to read image {}", path.display())))?;
            let image = reader.decode().map_err(|e| UnsplatError::Image {
                path: path.display().to_string(),
                reason: format!("failed to decode: {}", e),
                source: Some(Box::new(e)),
            })?;

            let rgba = image.into_rgba8();
            Ok(rgba.pixels().map(|p| p.0).collect())
        }
    }
}
}
