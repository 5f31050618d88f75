//! Per-directory scene resolution.
//!
//! For each of the two dates encoded in the change layer name the catalog is
//! searched with the primary collection, then with the fallback collection
//! when the primary has no scene. A matched scene is downloaded into
//! `<collection>_<date>_imagery` next to the layer and stacked into a
//! composite. Every path is passed explicitly; the process working directory
//! is never changed.
use crate::composite::{build_composite, Composite};
use crate::config::PipelineConfig;
use crate::download_plan::DownloadPlan;
use crate::error::{Error, Result};
use crate::s3::S3ObjOps;
use crate::stac_operations::{SceneCatalog, SceneQuery};
use crate::tile_bounds::{BoundingBox, BoundsTable};
use crate::tile_name::{TileId, TileName};
use chrono::NaiveDate;
use stac::Item;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const LAYER_EXTENSION: &str = "shp";

/// What happened to one date.
#[derive(Debug)]
pub enum DateOutcome {
    Resolved {
        date: NaiveDate,
        collection: String,
        composite: Composite,
    },
    /// Neither collection has a scene for this date.
    NoCoverage { date: NaiveDate },
    Failed { date: NaiveDate, error: Error },
}

impl DateOutcome {
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::Resolved { date, .. } | Self::NoCoverage { date } | Self::Failed { date, .. } => {
                *date
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug)]
pub struct DirectoryReport {
    pub layer: String,
    pub tile: TileId,
    pub bbox: BoundingBox,
    pub outcomes: Vec<DateOutcome>,
}

impl DirectoryReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(DateOutcome::is_failure)
    }
}

enum Resolution {
    QueryPrimary,
    QueryFallback,
    Resolved { collection: String, item: Item },
    NoCoverage,
}

pub struct Pipeline<C, S, B> {
    catalog: C,
    store: S,
    bounds: B,
    config: PipelineConfig,
}

impl<C: SceneCatalog, S: S3ObjOps, B: BoundsTable> Pipeline<C, S, B> {
    /// Fails when `config` does not pass [`PipelineConfig::validate`].
    pub fn new(catalog: C, store: S, bounds: B, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            catalog,
            store,
            bounds,
            config,
        })
    }

    /// Processes one change-layer directory. Name and lookup failures abort
    /// the directory; failures while resolving a date are reported in that
    /// date's outcome and do not affect the other date.
    pub async fn run(&self, dir: &Path) -> Result<DirectoryReport> {
        let layer = find_change_layer(dir)?;
        let TileName { tile, dates } = self.config.name_schema.decode(&layer)?;
        info!(%layer, %tile, ?dates, "Decoded change layer");

        let bbox = self.bounds.resolve(tile)?;

        let mut outcomes = vec![];
        for date in dates {
            let outcome = match self.resolve_date(dir, date, bbox).await {
                Ok(Some((collection, composite))) => DateOutcome::Resolved {
                    date,
                    collection,
                    composite,
                },
                Ok(None) => {
                    warn!(
                        %tile,
                        %date,
                        primary = self.config.primary_collection(),
                        fallback = self.config.fallback_collection(),
                        "There is no imagery available for this date"
                    );
                    DateOutcome::NoCoverage { date }
                }
                Err(error) => {
                    error!(%tile, %date, %error, "Unable to resolve scene");
                    DateOutcome::Failed { date, error }
                }
            };
            outcomes.push(outcome);
        }

        Ok(DirectoryReport {
            layer,
            tile,
            bbox,
            outcomes,
        })
    }

    async fn resolve_date(
        &self,
        dir: &Path,
        date: NaiveDate,
        bbox: BoundingBox,
    ) -> Result<Option<(String, Composite)>> {
        let mut state = Resolution::QueryPrimary;
        loop {
            state = match state {
                Resolution::QueryPrimary => {
                    let collection = self.config.primary_collection();
                    match self.search(collection, date, bbox).await? {
                        Some(item) => Resolution::Resolved {
                            collection: collection.to_owned(),
                            item,
                        },
                        None => Resolution::QueryFallback,
                    }
                }
                Resolution::QueryFallback => {
                    let collection = self.config.fallback_collection();
                    match self.search(collection, date, bbox).await? {
                        Some(item) => Resolution::Resolved {
                            collection: collection.to_owned(),
                            item,
                        },
                        None => Resolution::NoCoverage,
                    }
                }
                Resolution::Resolved { collection, item } => {
                    let composite = self.build_scene(dir, &collection, date, &item).await?;
                    return Ok(Some((collection, composite)));
                }
                Resolution::NoCoverage => return Ok(None),
            }
        }
    }

    async fn search(
        &self,
        collection: &str,
        date: NaiveDate,
        bbox: BoundingBox,
    ) -> Result<Option<Item>> {
        let query = SceneQuery::new(collection, date, bbox);
        let item = self.catalog.search(&query).await?;
        match &item {
            Some(item) => info!(collection, %date, scene = %item.id, "Scene found"),
            None => info!(collection, %date, "No scene in collection"),
        }
        Ok(item)
    }

    async fn build_scene(
        &self,
        dir: &Path,
        collection: &str,
        date: NaiveDate,
        item: &Item,
    ) -> Result<Composite> {
        let image_dir = scene_dir(dir, collection, date);
        fs::create_dir_all(&image_dir)?;
        info!(dir = %image_dir.display(), "Downloading scene bands");

        let rules = &self.config.composite;
        let plan = DownloadPlan::from_item(item, &rules.band_marker, &image_dir)?;
        plan.execute(&self.store).await?;

        build_composite(&image_dir, rules)
    }
}

/// `<dir>/<collection>_<YYYY-MM-DD>_imagery`
pub fn scene_dir(dir: &Path, collection: &str, date: NaiveDate) -> PathBuf {
    dir.join(format!("{collection}_{date}_imagery"))
}

/// The file name of the single `.shp` layer in `dir`.
pub fn find_change_layer(dir: &Path) -> Result<String> {
    let mut layers = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_layer = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(LAYER_EXTENSION));
        if !is_layer || !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            layers.push(name.to_owned());
        }
    }

    match layers.len() {
        1 => Ok(layers.remove(0)),
        found => Err(Error::LayerNotFound {
            dir: dir.to_path_buf(),
            found,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::tests::{write_band, GEO_TRANSFORM};
    use crate::download_plan::tests::MemoryStore;
    use crate::tile_bounds::MemoryBoundsTable;
    use stac::Asset;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const LAYER: &str = "LS_p095r078_20210101_20210315_change.shp";
    const PRIMARY: &str = "ga_ls8c_ard_3";
    const FALLBACK: &str = "ga_ls9c_ard_3";
    const BUCKET: &str = "dea-public-data";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[derive(Default)]
    struct MockCatalog {
        scenes: HashMap<(String, NaiveDate), Item>,
        unavailable: Vec<NaiveDate>,
        queries: Mutex<Vec<(String, NaiveDate)>>,
    }

    impl SceneCatalog for MockCatalog {
        async fn search(&self, query: &SceneQuery) -> Result<Option<Item>> {
            self.queries
                .lock()
                .unwrap()
                .push((query.collection.clone(), query.date));
            if self.unavailable.contains(&query.date) {
                return Err(Error::CatalogUnavailable {
                    url: "mock".to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            Ok(self
                .scenes
                .get(&(query.collection.clone(), query.date))
                .cloned())
        }
    }

    /// A scene with two spectral bands and the panchromatic band, registered
    /// in both the catalog and the store.
    fn add_scene(catalog: &mut MockCatalog, store: &mut MemoryStore, collection: &str, day: NaiveDate) {
        let scratch = tempfile::tempdir().unwrap();
        let prefix = format!("{collection}_095078_{day}_final_");
        let mut item = Item::new(format!("{collection}-{day}"));
        for (band, size) in [("band01", (4, 3)), ("band02", (4, 3)), ("band08", (8, 6))] {
            let name = format!("{prefix}{band}.tif");
            let local = scratch.path().join(&name);
            write_band(&local, size, 1, GEO_TRANSFORM);
            let key = format!("baseline/{collection}/{name}");
            store.insert(BUCKET, &key, fs::read(&local).unwrap());
            item.assets
                .insert(band.to_string(), Asset::new(format!("s3://{BUCKET}/{key}")));
        }
        catalog.scenes.insert((collection.to_string(), day), item);
    }

    fn layer_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LAYER), b"").unwrap();
        dir
    }

    fn pipeline(catalog: MockCatalog, store: MemoryStore) -> Pipeline<MockCatalog, MemoryStore, MemoryBoundsTable> {
        let bounds = MemoryBoundsTable::new(vec![(95078, BoundingBox::new(100.0, -20.0, 101.0, -19.0))]);
        Pipeline::new(catalog, store, bounds, PipelineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_primary_hit_skips_fallback() {
        let mut catalog = MockCatalog::default();
        let mut store = MemoryStore::default();
        add_scene(&mut catalog, &mut store, PRIMARY, date(2021, 1, 1));
        add_scene(&mut catalog, &mut store, FALLBACK, date(2021, 1, 1));
        let dir = layer_dir();

        let pipeline = pipeline(catalog, store);
        let report = pipeline.run(dir.path()).await.unwrap();

        assert!(matches!(
            &report.outcomes[0],
            DateOutcome::Resolved { collection, .. } if collection == PRIMARY
        ));
        let queries = pipeline.catalog.queries.lock().unwrap().clone();
        assert_eq!(
            queries,
            vec![
                (PRIMARY.to_string(), date(2021, 1, 1)),
                (PRIMARY.to_string(), date(2021, 3, 15)),
                (FALLBACK.to_string(), date(2021, 3, 15)),
            ]
        );
        assert!(scene_dir(dir.path(), PRIMARY, date(2021, 1, 1)).is_dir());
        assert!(!scene_dir(dir.path(), FALLBACK, date(2021, 1, 1)).exists());
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_empty() {
        let mut catalog = MockCatalog::default();
        let mut store = MemoryStore::default();
        add_scene(&mut catalog, &mut store, FALLBACK, date(2021, 3, 15));
        let dir = layer_dir();

        let report = pipeline(catalog, store).run(dir.path()).await.unwrap();

        assert!(matches!(report.outcomes[0], DateOutcome::NoCoverage { .. }));
        match &report.outcomes[1] {
            DateOutcome::Resolved {
                date: resolved,
                collection,
                composite,
            } => {
                assert_eq!(*resolved, date(2021, 3, 15));
                assert_eq!(collection, FALLBACK);
                assert_eq!(composite.band_count(), 2);
                assert_eq!(
                    composite.path,
                    scene_dir(dir.path(), FALLBACK, date(2021, 3, 15))
                        .join(format!("{FALLBACK}_095078_2021-03-15_final_comp.tif"))
                );
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_no_coverage_creates_no_directory() {
        let dir = layer_dir();
        let report = pipeline(MockCatalog::default(), MemoryStore::default())
            .run(dir.path())
            .await
            .unwrap();

        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o, DateOutcome::NoCoverage { .. })));
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_failed_date_does_not_affect_other_date() {
        let mut catalog = MockCatalog::default();
        let mut store = MemoryStore::default();
        catalog.unavailable.push(date(2021, 1, 1));
        add_scene(&mut catalog, &mut store, PRIMARY, date(2021, 3, 15));
        let dir = layer_dir();

        let report = pipeline(catalog, store).run(dir.path()).await.unwrap();

        assert!(matches!(
            &report.outcomes[0],
            DateOutcome::Failed { error: Error::CatalogUnavailable { .. }, .. }
        ));
        assert!(matches!(report.outcomes[1], DateOutcome::Resolved { .. }));
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_transfer_failure_keeps_downloaded_bands() {
        let mut catalog = MockCatalog::default();
        add_scene(&mut catalog, &mut MemoryStore::default(), PRIMARY, date(2021, 1, 1));
        let dir = layer_dir();

        // The bucket holds none of the scene's objects
        let report = pipeline(catalog, MemoryStore::default())
            .run(dir.path())
            .await
            .unwrap();

        assert!(matches!(
            &report.outcomes[0],
            DateOutcome::Failed { error: Error::Transfer { .. }, .. }
        ));
        assert!(scene_dir(dir.path(), PRIMARY, date(2021, 1, 1)).is_dir());
    }

    #[tokio::test]
    async fn test_unknown_tile_aborts_directory() {
        let dir = layer_dir();
        let bounds = MemoryBoundsTable::default();
        let pipeline = Pipeline::new(
            MockCatalog::default(),
            MemoryStore::default(),
            bounds,
            PipelineConfig::default(),
        )
        .unwrap();

        let err = pipeline.run(dir.path()).await.unwrap_err();

        assert!(matches!(err, Error::Lookup { tile: 95078, matches: 0 }));
        assert!(pipeline.catalog.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_layer_name_aborts_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("change.shp"), b"").unwrap();

        let err = pipeline(MockCatalog::default(), MemoryStore::default())
            .run(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
        assert!(err.is_directory_wide());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = PipelineConfig::default();
        config.name_schema.row.width = 10;
        let result = Pipeline::new(
            MockCatalog::default(),
            MemoryStore::default(),
            MemoryBoundsTable::default(),
            config,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_both_collections_queried_before_no_coverage() {
        let mut config = PipelineConfig::default();
        config.collections = ["ga_ls8c_ard_3".to_string(), "ga_ls8c_ard_3_nrt".to_string()];
        let bounds = MemoryBoundsTable::new(vec![(95078, BoundingBox::new(100.0, -20.0, 101.0, -19.0))]);
        let pipeline =
            Pipeline::new(MockCatalog::default(), MemoryStore::default(), bounds, config).unwrap();
        let dir = layer_dir();

        let report = pipeline.run(dir.path()).await.unwrap();

        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o, DateOutcome::NoCoverage { .. })));
        let queried = pipeline
            .catalog
            .queries
            .lock()
            .unwrap()
            .iter()
            .map(|(collection, _)| collection.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            queried,
            vec!["ga_ls8c_ard_3", "ga_ls8c_ard_3_nrt", "ga_ls8c_ard_3", "ga_ls8c_ard_3_nrt"]
        );
    }

    #[test]
    fn test_find_change_layer() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_change_layer(dir.path()),
            Err(Error::LayerNotFound { found: 0, .. })
        ));

        for name in [LAYER, "LS_p095r078_20210101_20210315_change.dbf"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(find_change_layer(dir.path()).unwrap(), LAYER);

        fs::write(dir.path().join("other.shp"), b"").unwrap();
        assert!(matches!(
            find_change_layer(dir.path()),
            Err(Error::LayerNotFound { found: 2, .. })
        ));
    }
}
