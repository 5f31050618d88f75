use crate::composite::CompositeRules;
use crate::error::{Error, Result};
use crate::s3::DEFAULT_REGION;
use crate::stac_operations::DEA_STAC_API;
use crate::tile_name::NameSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use toml;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub catalog_url: String,
    /// Primary then fallback collection.
    pub collections: [String; 2],
    /// Reference vector dataset holding one box per tile.
    pub bounds_table: PathBuf,
    pub tile_field: String,
    pub storage: StorageConfig,
    #[serde(default)]
    pub name_schema: NameSchema,
    #[serde(default)]
    pub composite: CompositeRules,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct StorageConfig {
    pub region: String,
    /// Send anonymous requests. Public buckets reject signatures made with
    /// credentials from outside their account.
    pub unsigned_requests: bool,
}

/// Landsat 8 and 9 analysis ready data from Digital Earth Australia.
pub fn default_config_toml() -> toml::Table {
    toml::toml! {
        catalog_url = "https://explorer.sandbox.dea.ga.gov.au/stac"

        collections = ["ga_ls8c_ard_3", "ga_ls9c_ard_3"]

        bounds_table = "WRS2_AU_centroid_buff50m.shp"

        tile_field = "WRSPR"

        [storage]
        region = "ap-southeast-2"
        unsigned_requests = true

        [name_schema]
        path = { offset = 4, width = 3 }
        row = { offset = 8, width = 3 }
        pre_date = { offset = 12, width = 8 }
        post_date = { offset = 21, width = 8 }

        [composite]
        band_marker = "band"
        excluded_band = "band08"
        band_suffix_len = 10
        composite_suffix = "comp.tif"
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog_url: DEA_STAC_API.to_string(),
            collections: ["ga_ls8c_ard_3".to_string(), "ga_ls9c_ard_3".to_string()],
            bounds_table: PathBuf::from("WRS2_AU_centroid_buff50m.shp"),
            tile_field: "WRSPR".to_string(),
            storage: StorageConfig {
                region: DEFAULT_REGION.to_string(),
                unsigned_requests: true,
            },
            name_schema: NameSchema::default(),
            composite: CompositeRules::default(),
        }
    }
}

impl PipelineConfig {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Writes the built-in template, whatever configuration is in use.
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let content = toml::to_string_pretty(&default_config_toml())
            .map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(table: &toml::Table) -> Result<Self> {
        let config: Self = toml::from_str(&table.to_string())
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(self: &Self) -> Result<()> {
        if self.collections.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::Config("collection names must not be empty".to_string()));
        }
        if self.composite.band_suffix_len == 0 {
            return Err(Error::Config("band_suffix_len must be positive".to_string()));
        }
        self.name_schema.validate()
    }

    pub fn primary_collection(self: &Self) -> &str {
        &self.collections[0]
    }

    pub fn fallback_collection(self: &Self) -> &str {
        &self.collections[1]
    }
}
