use crate::error::{Error, Result};
use crate::tile_bounds::BoundingBox;
use chrono::NaiveDate;
use serde::Deserialize;
use stac::Item;
use tracing::debug;

pub const DEA_STAC_API: &str = "https://explorer.sandbox.dea.ga.gov.au/stac";

/// One catalog search: a collection, a single day and a spatial extent.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneQuery {
    pub collection: String,
    pub date: NaiveDate,
    pub bbox: BoundingBox,
}

impl SceneQuery {
    pub fn new(collection: &str, date: NaiveDate, bbox: BoundingBox) -> Self {
        Self {
            collection: collection.to_owned(),
            date,
            bbox,
        }
    }

    fn params(&self) -> [(&'static str, String); 4] {
        [
            ("collection", self.collection.clone()),
            ("time", self.date.to_string()),
            ("bbox", self.bbox.to_query_param()),
            ("limit", "1".to_string()),
        ]
    }
}

pub trait SceneCatalog {
    /// The best matching scene, or `None` when the catalog has no coverage.
    async fn search(&self, query: &SceneQuery) -> Result<Option<Item>>;
}

impl<T: SceneCatalog> SceneCatalog for &T {
    async fn search(&self, query: &SceneQuery) -> Result<Option<Item>> {
        (**self).search(query).await
    }
}

pub struct StacCatalog {
    client: reqwest::Client,
    root_url: String,
}

impl StacCatalog {
    pub fn new(root_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            root_url: root_url.trim_end_matches('/').to_owned(),
        }
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.root_url)
    }
}

impl SceneCatalog for StacCatalog {
    async fn search(&self, query: &SceneQuery) -> Result<Option<Item>> {
        let url = self.search_url();
        let unavailable = |e: reqwest::Error| Error::CatalogUnavailable {
            url: url.clone(),
            reason: e.to_string(),
        };

        debug!(%url, collection = %query.collection, date = %query.date, "Searching catalog");
        let body = self
            .client
            .get(&url)
            .query(&query.params())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(unavailable)?
            .text()
            .await
            .map_err(unavailable)?;

        parse_search_response(&url, &body)
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(rename = "numberReturned")]
    number_returned: Option<u64>,
    #[serde(default)]
    features: Vec<Item>,
}

/// Interprets a search response body. A missing `numberReturned` is treated
/// as a broken response; more than one result is accepted and the first
/// feature wins.
pub fn parse_search_response(url: &str, body: &str) -> Result<Option<Item>> {
    let unavailable = |reason: String| Error::CatalogUnavailable {
        url: url.to_owned(),
        reason,
    };

    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| unavailable(format!("invalid response: {e}")))?;

    let returned = response
        .number_returned
        .ok_or_else(|| unavailable("response has no 'numberReturned'".to_string()))?;
    if returned == 0 {
        return Ok(None);
    }

    let item = response.features.into_iter().next().ok_or_else(|| {
        unavailable(format!("'numberReturned' is {returned} but no features were sent"))
    })?;
    Ok(Some(item))
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://explorer.sandbox.dea.ga.gov.au/stac/search";

    fn feature(id: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "Feature",
            "stac_version": "1.0.0",
            "id": id,
            "geometry": null,
            "properties": {"datetime": "2021-01-01T00:00:00Z"},
            "links": [],
            "assets": {
                "nbart_blue": {"href": format!("s3://dea-public-data/baseline/{id}_band02.tif")}
            }
        })
    }

    fn response(number_returned: Option<u64>, ids: &[&str]) -> String {
        let mut body = serde_json::json!({
            "type": "FeatureCollection",
            "features": ids.iter().map(|id| feature(id)).collect::<Vec<_>>(),
        });
        if let Some(n) = number_returned {
            body["numberReturned"] = n.into();
        }
        body.to_string()
    }

    #[test]
    fn test_zero_results_is_no_coverage() {
        let item = parse_search_response(URL, &response(Some(0), &[])).unwrap();
        assert!(item.is_none());
    }

    #[test]
    fn test_single_result() {
        let item = parse_search_response(URL, &response(Some(1), &["scene-a"]))
            .unwrap()
            .unwrap();
        assert_eq!(item.id, "scene-a");
        assert!(item.assets.get("nbart_blue").is_some());
    }

    #[test]
    fn test_many_results_takes_first() {
        let item = parse_search_response(URL, &response(Some(2), &["scene-a", "scene-b"]))
            .unwrap()
            .unwrap();
        assert_eq!(item.id, "scene-a");
    }

    #[test]
    fn test_missing_count_is_unavailable() {
        let err = parse_search_response(URL, &response(None, &["scene-a"])).unwrap_err();
        assert!(matches!(err, Error::CatalogUnavailable { .. }));
    }

    #[test]
    fn test_count_without_features_is_unavailable() {
        let err = parse_search_response(URL, &response(Some(1), &[])).unwrap_err();
        assert!(matches!(err, Error::CatalogUnavailable { .. }));
    }

    #[test]
    fn test_garbage_is_unavailable() {
        let err = parse_search_response(URL, "<html>502</html>").unwrap_err();
        assert!(err.to_string().contains("invalid response"));
    }

    #[test]
    fn test_query_params() {
        let date = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let query = SceneQuery::new(
            "ga_ls8c_ard_3",
            date,
            BoundingBox::new(100.0, -20.0, 101.0, -19.0),
        );
        let params = query.params();
        assert_eq!(params[0], ("collection", "ga_ls8c_ard_3".to_string()));
        assert_eq!(params[1], ("time", "2021-01-01".to_string()));
        assert_eq!(params[2], ("bbox", "[100.0,-20.0,101.0,-19.0]".to_string()));
        assert_eq!(params[3], ("limit", "1".to_string()));
    }

    #[test]
    fn test_search_url_trims_slash() {
        let catalog = StacCatalog::new("https://example.com/stac/");
        assert_eq!(catalog.search_url(), "https://example.com/stac/search");
    }
}
