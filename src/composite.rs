//! Stacks downloaded single-band rasters into one multi-band GeoTIFF.
//!
//! The panchromatic band is 15 m while the multispectral bands are 30 m, so
//! it is left out of the stack and kept on disk beside the composite for
//! visual interpretation.
use crate::error::{Error, Result};
use gdal::errors::GdalError;
use gdal::raster::{GdalDataType, GdalType, RasterCreationOptions};
use gdal::{Dataset, DriverManager};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RASTER_EXTENSION: &str = "tif";

/// Which files to stack and how to name the result.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct CompositeRules {
    /// Substring of an asset href that marks a spectral band.
    pub band_marker: String,
    /// Substring of the file name of the band kept out of the stack.
    pub excluded_band: String,
    /// Characters trimmed off a band file name, e.g. `band01.tif`.
    pub band_suffix_len: usize,
    /// Appended to the trimmed name to form the composite file name.
    pub composite_suffix: String,
}

impl Default for CompositeRules {
    fn default() -> Self {
        Self {
            band_marker: "band".to_string(),
            excluded_band: "band08".to_string(),
            band_suffix_len: 10,
            composite_suffix: "comp.tif".to_string(),
        }
    }
}

impl CompositeRules {
    /// The composite file name derived from one band file name.
    pub fn composite_name(&self, band_name: &str) -> Result<String> {
        let cut = band_name
            .len()
            .checked_sub(self.band_suffix_len)
            .filter(|cut| band_name.is_char_boundary(*cut))
            .ok_or_else(|| {
                Error::format(
                    band_name,
                    format!("shorter than the {} character band suffix", self.band_suffix_len),
                )
            })?;
        Ok(format!("{}{}", &band_name[..cut], self.composite_suffix))
    }

    fn is_candidate(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(RASTER_EXTENSION))
            && !name.ends_with(&self.composite_suffix)
    }

    fn is_excluded(&self, name: &str) -> bool {
        name.contains(&self.excluded_band)
    }
}

/// A written composite and the band files it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub path: PathBuf,
    pub bands: Vec<PathBuf>,
}

impl Composite {
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }
}

trait RasterContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> RasterContext<T> for std::result::Result<T, GdalError> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| Error::raster_io(path, e))
    }
}

/// The bands of `dir` that go into the composite, in stacking order.
pub fn select_bands(dir: &Path, rules: &CompositeRules) -> Result<Vec<PathBuf>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .filter_map(|name| name.into_string().ok())
        .filter(|name| rules.is_candidate(name))
        .collect::<Vec<_>>();
    names.sort();

    let mut bands = vec![];
    for name in names {
        if rules.is_excluded(&name) {
            debug!(band = %name, "Leaving band out of the composite");
            continue;
        }
        bands.push(dir.join(name));
    }
    Ok(bands)
}

/// Georeferencing and layout copied from the first band.
struct Template {
    size: (usize, usize),
    data_type: GdalDataType,
    geo_transform: Option<[f64; 6]>,
    projection: String,
    no_data: Option<f64>,
}

impl Template {
    fn read(path: &Path) -> Result<Self> {
        let dataset = Dataset::open(path).at(path)?;
        let band = dataset.rasterband(1).at(path)?;
        Ok(Self {
            size: dataset.raster_size(),
            data_type: band.band_type(),
            geo_transform: dataset.geo_transform().ok(),
            projection: dataset.projection(),
            no_data: band.no_data_value(),
        })
    }
}

/// Stacks every band of `dir` (apart from the excluded one) into a single
/// LZW compressed GeoTIFF and deletes the stacked band files. Nothing is
/// deleted unless the composite was written in full.
pub fn build_composite(dir: &Path, rules: &CompositeRules) -> Result<Composite> {
    let bands = select_bands(dir, rules)?;
    let first = bands
        .first()
        .ok_or_else(|| Error::NoBands(dir.to_path_buf()))?;

    let first_name = first
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::NoBands(dir.to_path_buf()))?;
    let output = dir.join(rules.composite_name(first_name)?);

    let template = Template::read(first)?;
    for band in &bands[1..] {
        let size = Dataset::open(band).at(band)?.raster_size();
        if size != template.size {
            return Err(Error::BandShape {
                path: band.clone(),
                expected: template.size,
                found: size,
            });
        }
    }

    match template.data_type {
        GdalDataType::UInt8 => write_stack::<u8>(&output, &bands, &template)?,
        GdalDataType::UInt16 => write_stack::<u16>(&output, &bands, &template)?,
        GdalDataType::Int16 => write_stack::<i16>(&output, &bands, &template)?,
        GdalDataType::UInt32 => write_stack::<u32>(&output, &bands, &template)?,
        GdalDataType::Int32 => write_stack::<i32>(&output, &bands, &template)?,
        GdalDataType::Float32 => write_stack::<f32>(&output, &bands, &template)?,
        GdalDataType::Float64 => write_stack::<f64>(&output, &bands, &template)?,
        other => {
            return Err(Error::UnsupportedDataType {
                path: first.clone(),
                data_type: format!("{other:?}"),
            })
        }
    }
    info!(
        composite = %output.display(),
        bands = bands.len(),
        "Composite written"
    );

    for band in &bands {
        fs::remove_file(band)?;
    }
    info!("Individual bands have been deleted");

    Ok(Composite {
        path: output,
        bands,
    })
}

fn write_stack<T: GdalType + Copy>(
    output: &Path,
    bands: &[PathBuf],
    template: &Template,
) -> Result<()> {
    let (width, height) = template.size;

    let driver = DriverManager::get_driver_by_name("GTiff").at(output)?;
    let mut options = RasterCreationOptions::new();
    options.set_name_value("COMPRESS", "LZW").at(output)?;

    let mut dst = driver
        .create_with_band_type_with_options::<T, _>(output, width, height, bands.len(), &options)
        .at(output)?;
    if let Some(geo_transform) = template.geo_transform {
        dst.set_geo_transform(&geo_transform).at(output)?;
    }
    if !template.projection.is_empty() {
        dst.set_projection(&template.projection).at(output)?;
    }

    for (index, path) in bands.iter().enumerate() {
        let src = Dataset::open(path).at(path)?;
        let mut buffer = src
            .rasterband(1)
            .at(path)?
            .read_as::<T>((0, 0), (width, height), (width, height), None)
            .at(path)?;

        let mut out_band = dst.rasterband(index + 1).at(output)?;
        if template.no_data.is_some() {
            out_band.set_no_data_value(template.no_data).at(output)?;
        }
        out_band
            .write((0, 0), (width, height), &mut buffer)
            .at(output)?;
        debug!(band = %path.display(), index = index + 1, "Stacked band");
    }

    dst.flush_cache().at(output)?;
    Ok(())
}
