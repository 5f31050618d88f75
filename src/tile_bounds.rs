//! Tile identifier to bounding box resolution.
//!
//! Footprints of neighbouring WRS-2 tiles overlap, so the catalog is queried
//! with a small box around the centre of the target tile rather than the full
//! footprint. Those boxes come from a reference table keyed by the integer
//! tile identifier.
use crate::error::{Error, Result};
use crate::tile_name::TileId;
use gdal::vector::LayerAccess;
use gdal::Dataset;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `[min_x, min_y, max_x, max_y]` in the reference table's CRS.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    /// `[a,b,c,d]` without whitespace, the form the catalog search accepts.
    pub fn to_query_param(&self) -> String {
        let parts = self.to_array().map(|v| format!("{v:?}"));
        format!("[{}]", parts.join(","))
    }
}

pub trait BoundsTable {
    /// Every bounding box stored under `tile`.
    fn rows(&self, tile: u32) -> Result<Vec<BoundingBox>>;

    /// The bounding box of the single row keyed by `tile`.
    fn resolve(&self, tile: TileId) -> Result<BoundingBox> {
        let key = tile.value();
        let rows = self.rows(key)?;
        match rows.as_slice() {
            [bbox] => {
                debug!(tile = key, bbox = ?bbox.to_array(), "Resolved tile bounds");
                Ok(*bbox)
            }
            _ => Err(Error::Lookup {
                tile: key,
                matches: rows.len(),
            }),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryBoundsTable {
    rows: Vec<(u32, BoundingBox)>,
}

impl MemoryBoundsTable {
    pub fn new(rows: Vec<(u32, BoundingBox)>) -> Self {
        Self { rows }
    }
}

impl BoundsTable for MemoryBoundsTable {
    fn rows(&self, tile: u32) -> Result<Vec<BoundingBox>> {
        Ok(self
            .rows
            .iter()
            .filter(|(id, _)| *id == tile)
            .map(|(_, bbox)| *bbox)
            .collect())
    }
}

/// Any OGR-readable vector dataset (shapefile, GeoJSON, GeoPackage, ...).
/// The first layer is scanned; the envelope of each feature geometry is its
/// bounding box.
#[derive(Clone, Debug)]
pub struct VectorBoundsTable {
    path: PathBuf,
    tile_field: String,
}

impl VectorBoundsTable {
    pub fn new<P: AsRef<Path>>(path: P, tile_field: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            tile_field: tile_field.to_owned(),
        }
    }

    fn table_error(&self, reason: impl ToString) -> Error {
        Error::BoundsTable {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl BoundsTable for VectorBoundsTable {
    fn rows(&self, tile: u32) -> Result<Vec<BoundingBox>> {
        let dataset = Dataset::open(&self.path).map_err(|e| self.table_error(e))?;
        let mut layer = dataset.layer(0).map_err(|e| self.table_error(e))?;

        let mut rows = vec![];
        for feature in layer.features() {
            let index = feature
                .field_index(&self.tile_field)
                .map_err(|e| self.table_error(e))?;
            let value = feature
                .field_as_integer(index)
                .map_err(|e| self.table_error(e))?;
            if value.map(i64::from) != Some(i64::from(tile)) {
                continue;
            }
            let geometry = feature
                .geometry()
                .ok_or_else(|| self.table_error(format!("row {tile} has no geometry")))?;
            let envelope = geometry.envelope();
            rows.push(BoundingBox::new(
                envelope.MinX,
                envelope.MinY,
                envelope.MaxX,
                envelope.MaxY,
            ));
        }
        Ok(rows)
    }
}
