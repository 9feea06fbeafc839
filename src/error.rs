//! Error types shared by every stage of the map pipeline.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapError {
    #[error("configuration error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("cannot project ({x}, {y}): {reason}")]
    Projection { x: f64, y: f64, reason: &'static str },

    #[error("extent has zero width or height")]
    DegenerateExtent,

    #[error("invalid aspect ratio dx={dx}, dy={dy}: both must be > 0")]
    InvalidAspect { dx: f64, dy: f64 },

    #[error("unsupported geometry type: {0}")]
    UnsupportedGeometry(String),

    #[error("background '{background}' needs {variable} and no alternative was chosen")]
    CredentialMissing {
        background: String,
        variable: &'static str,
    },

    #[error("fetch from {url} failed: {message}")]
    Fetch { url: String, message: String },

    #[error("render failed: {0}")]
    Render(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{place}: {stage} failed: {source}")]
    PlaceFailed {
        place: String,
        stage: Stage,
        #[source]
        source: Box<MapError>,
    },
}

impl MapError {
    pub fn config(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        MapError::Config {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        MapError::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Attach the place name and pipeline stage to an error.
    pub fn at(self, place: &str, stage: Stage) -> Self {
        MapError::PlaceFailed {
            place: place.to_string(),
            stage,
            source: Box::new(self),
        }
    }
}

/// Pipeline stage, reported alongside per-place failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extent,
    Features,
    Tiles,
    Draw,
    Save,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extent => "extent computation",
            Stage::Features => "feature fetch",
            Stage::Tiles => "tile fetch",
            Stage::Draw => "drawing",
            Stage::Save => "saving",
        };
        f.write_str(name)
    }
}

pub type Result<T, E = MapError> = std::result::Result<T, E>;
