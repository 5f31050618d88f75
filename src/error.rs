use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    /// The vector layer name does not follow the naming schema.
    #[error("Malformed layer name '{name}': {reason}")]
    Format { name: String, reason: String },

    /// The tile identifier did not resolve to exactly one reference row.
    #[error("Tile {tile} matched {matches} rows in the bounds table, expected exactly 1")]
    Lookup { tile: u32, matches: usize },

    #[error("Unable to read bounds table {path}: {reason}")]
    BoundsTable { path: PathBuf, reason: String },

    #[error("Catalog unavailable ({url}): {reason}")]
    CatalogUnavailable { url: String, reason: String },

    #[error("Transfer of {href} failed")]
    Transfer {
        href: String,
        #[source]
        source: BoxError,
    },

    #[error("Raster I/O on {path} failed")]
    RasterIo {
        path: PathBuf,
        #[source]
        source: gdal::errors::GdalError,
    },

    #[error("Band {path} is {found:?} pixels, expected {expected:?}")]
    BandShape {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Band {path} has unsupported data type {data_type}")]
    UnsupportedDataType { path: PathBuf, data_type: String },

    #[error("No band rasters to stack in {0}")]
    NoBands(PathBuf),

    #[error("Expected exactly one .shp layer in {dir}, found {found}")]
    LayerNotFound { dir: PathBuf, found: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn format(name: &str, reason: impl Into<String>) -> Self {
        Self::Format {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    pub fn raster_io(path: impl Into<PathBuf>, source: gdal::errors::GdalError) -> Self {
        Self::RasterIo {
            path: path.into(),
            source,
        }
    }

    pub fn transfer(href: &str, source: anyhow::Error) -> Self {
        Self::Transfer {
            href: href.to_owned(),
            source: source.into(),
        }
    }

    /// Errors that invalidate the whole input directory rather than one date.
    pub fn is_directory_wide(&self) -> bool {
        matches!(
            self,
            Self::Format { .. }
                | Self::Lookup { .. }
                | Self::BoundsTable { .. }
                | Self::LayerNotFound { .. }
        )
    }
}
