use std::io;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum UnsplatError {
    /// Bad magic, unsupported format/version or a malformed header line.
    #[error("Invalid PLY header: {0}")]
    Format(String),

    /// Required property missing, wrong property type or list property.
    #[error("Unsupported PLY schema: {0}")]
    Schema(String),

    #[error("Element '{element}' is truncated: need {needed} bytes, have {available}")]
    TruncatedData {
        element: String,
        needed: usize,
        available: usize,
    },

    #[error("Vertex {vertex} belongs to chunk {chunk}, but the file only has {chunks} chunks")]
    Range {
        vertex: usize,
        chunk: usize,
        chunks: usize,
    },

    #[error("Invalid SOG manifest: {reason}")]
    Manifest {
        reason: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Image '{path}': {reason}")]
    Image {
        path: String,
        reason: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl UnsplatError {
    pub(crate) fn manifest(reason: impl Into<String>) -> Self {
        UnsplatError::Manifest {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn image(path: impl Into<String>, reason: impl Into<String>) -> Self {
        UnsplatError::Image {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Wraps an I/O failure with a short description of what was being done.
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| UnsplatError::Io { context, source }
    }
}

impl From<serde_json::Error> for UnsplatError {
    fn from(e: serde_json::Error) -> Self {
        UnsplatError::Manifest {
            reason: e.to_string(),
            source: Some(e),
        }
    }
}
