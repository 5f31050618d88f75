use anyhow::{anyhow, Result};
use regex::Regex;
use url::Url;

#[derive(Debug, PartialEq)]
pub struct S3Object {
    pub region: Option<String>,
    pub bucket: String,
    pub key: String,
}

impl S3Object {
    /// Accepts `s3://bucket/key` and virtual-hosted
    /// `https://bucket.s3.region.amazonaws.com/key` hrefs.
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("s3://") {
            return Self::from_s3_uri(url);
        }

        let re = Regex::new(
            r"https:\/\/(?<bucket>[\d\w.-]+)\.s3\.(?<region>[\d\w-]+)\.amazonaws.com\/(?<key>.+)",
        )
        .expect("Regex pattern should always compile");

        let captures = re
            .captures(url)
            .ok_or(anyhow!("No regex matches found for: {}", url))?;

        let (_, [bucket, region, key]) = captures.extract();

        Ok(Self {
            region: Some(region.to_string()),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    fn from_s3_uri(uri: &str) -> Result<Self> {
        let parsed = Url::parse(uri)?;
        let bucket = parsed
            .host_str()
            .ok_or(anyhow!("No bucket in: {}", uri))?
            .to_string();
        let key = parsed.path().trim_start_matches('/').to_string();
        if key.is_empty() {
            return Err(anyhow!("No object key in: {}", uri));
        }
        Ok(Self {
            region: None,
            bucket,
            key,
        })
    }

    /// Last segment of the key, used as the local file name.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}
