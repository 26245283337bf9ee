use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unreadable EXIF block: {0}")]
    Exif(#[from] exif::Error),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("malformed image container: {0}")]
    Container(String),
    #[error("malformed polygon payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("unsupported image format for {0:?} (only JPEG and PNG are handled)")]
    UnsupportedFormat(PathBuf),
    #[error("a polygon needs at least 3 points, got {0}")]
    DegeneratePolygon(usize),
    #[error("polygon point #{0} is not a finite coordinate")]
    InvalidPoint(usize),
    #[error("location ID must be a non-negative number, got {0:?}")]
    InvalidLocationId(String),
    #[error("no reference map ends with +{0}")]
    NoReferenceMap(String),
    #[error("refusing to overwrite existing file {0:?}")]
    TargetExists(PathBuf),
    #[error("polygon editor failed: {0}")]
    Editor(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
