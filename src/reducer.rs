//! Lossy recompression of downloaded charts into a `lowres` sibling directory.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::Quality;

/// Directory, next to the original, that receives reduced copies.
#[cfg_attr(not(feature = "lowres"), allow(dead_code))]
pub const LOWRES_DIR: &str = "lowres";

/// Whether this build can decode and re-encode images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCapability {
    Available,
    Unavailable,
}

impl ImageCapability {
    pub fn detect() -> Self {
        if cfg!(feature = "lowres") {
            ImageCapability::Available
        } else {
            ImageCapability::Unavailable
        }
    }

    pub fn is_available(self) -> bool {
        self == ImageCapability::Available
    }
}

#[derive(Debug, Error)]
pub enum ReduceError {
    #[cfg(feature = "lowres")]
    #[error("cannot decode `{}`", path.display())]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[cfg(feature = "lowres")]
    #[error("cannot encode `{}` as JPEG", path.display())]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[cfg(feature = "lowres")]
    #[error("cannot write `{}`", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[cfg(not(feature = "lowres"))]
    #[error("built without image support")]
    Unavailable,
}

/// `<dir>/lowres/<stem>.jpg` for an original at `<dir>/<stem>.<ext>`.
#[cfg_attr(not(feature = "lowres"), allow(dead_code))]
pub fn reduced_path(source: &Path) -> PathBuf {
    let dir = source.parent().unwrap_or_else(|| Path::new("."));
    let name = source.file_name().map(PathBuf::from).unwrap_or_default();

    dir.join(LOWRES_DIR).join(name.with_extension("jpg"))
}

/// Re-encodes `source` as a JPEG at `quality` and returns the new path.
/// The original is left in place.
#[cfg(feature = "lowres")]
pub fn reduce(source: &Path, quality: Quality) -> Result<PathBuf, ReduceError> {
    use image::DynamicImage;

    let img = image::open(source).map_err(|e| ReduceError::Decode {
        path: source.to_path_buf(),
        source: e,
    })?;
    let target = reduced_path(source);

    let bytes = match encode_jpeg(&img, quality) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(
                error = %e,
                color = ?img.color(),
                "JPEG encoder rejected image, retrying as RGB"
            );
            encode_jpeg(&DynamicImage::ImageRgb8(img.to_rgb8()), quality).map_err(|e| {
                ReduceError::Encode {
                    path: source.to_path_buf(),
                    source: e,
                }
            })?
        }
    };

    let io_err = |source| ReduceError::Io {
        path: target.clone(),
        source,
    };
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    std::fs::write(&target, bytes).map_err(io_err)?;

    Ok(target)
}

#[cfg(not(feature = "lowres"))]
pub fn reduce(_source: &Path, _quality: Quality) -> Result<PathBuf, ReduceError> {
    Err(ReduceError::Unavailable)
}

#[cfg(feature = "lowres")]
fn encode_jpeg(img: &image::DynamicImage, quality: Quality) -> image::ImageResult<Vec<u8>> {
    use image::codecs::jpeg::JpegEncoder;

    let mut bytes = Vec::new();
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality.get()))?;

    Ok(bytes)
}

// -- Tests -------------------------------------------------------------------
