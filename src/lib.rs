#![allow(async_fn_in_trait)]
pub mod composite;
pub mod config;
pub mod download_plan;
pub mod error;
pub mod pipeline;
pub mod s3;
pub mod s3_operations;
pub mod stac_operations;
pub mod tile_bounds;
pub mod tile_name;

pub use error::{Error, Result};
pub use pipeline::{DateOutcome, DirectoryReport, Pipeline};
