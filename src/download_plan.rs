use crate::error::{Error, Result};
use crate::s3::S3ObjOps;
use crate::s3_operations::S3Object;
use anyhow::anyhow;
use stac::Item;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, PartialEq)]
pub struct DownloadTask {
    href: String,
    bucket: String,
    key: String,
    output: PathBuf,
}

impl DownloadTask {
    pub fn new(href: &str, output_dir: &Path) -> anyhow::Result<Self> {
        let object = S3Object::from_url(href)?;
        let output = output_dir.join(object.file_name());
        Ok(DownloadTask {
            href: href.to_string(),
            bucket: object.bucket,
            key: object.key,
            output,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

/// The band assets of one scene and where each one lands locally.
#[derive(Debug)]
pub struct DownloadPlan {
    tasks: Vec<DownloadTask>,
}

impl DownloadPlan {
    /// Selects the assets whose href contains `band_marker`; metadata,
    /// thumbnails and quality layers are left behind.
    pub fn from_item(item: &Item, band_marker: &str, output_dir: &Path) -> Result<Self> {
        let mut tasks = item
            .assets
            .values()
            .filter(|asset| asset.href.contains(band_marker))
            .map(|asset| {
                DownloadTask::new(&asset.href, output_dir)
                    .map_err(|e| Error::transfer(&asset.href, e))
            })
            .collect::<Result<Vec<_>>>()?;
        tasks.sort_by(|a, b| a.output.cmp(&b.output));
        debug!(scene = %item.id, bands = tasks.len(), "Planned band downloads");
        Ok(Self { tasks })
    }

    pub fn tasks(&self) -> &[DownloadTask] {
        &self.tasks
    }

    /// Downloads every task in order. The first failure aborts the plan;
    /// files already written stay on disk.
    pub async fn execute(&self, provider: &impl S3ObjOps) -> Result<Vec<PathBuf>> {
        let mut written = vec![];
        for task in self.tasks.iter() {
            debug!(href = %task.href, "Current task");
            try_download(provider, &task.bucket, &task.key, &task.output)
                .await
                .map_err(|e| Error::transfer(&task.href, e))?;
            written.push(task.output.clone());
        }
        Ok(written)
    }
}

/// Streams `bucket/key` into `output`. Bytes go to `<output>.partial` first,
/// which is renamed into place once complete; a leftover partial file from an
/// interrupted run is resumed with a ranged request.
pub async fn try_download(
    provider: &impl S3ObjOps,
    bucket: &str,
    key: &str,
    output: &Path,
) -> anyhow::Result<()> {
    // Make parent directories as necessary
    if let Some(parent_dir) = output.parent() {
        if !parent_dir.exists() {
            fs::create_dir_all(parent_dir)?;
        }
    }

    // Get object details from S3
    let head_object = provider.head_object(bucket, key).await?;

    let total_size = head_object
        .content_length()
        .ok_or(anyhow!("Error reading size of remote object"))? as u64;

    // Check if partial file exists and get its size
    let mut partial = output.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);
    let mut partial_file = OpenOptions::new()
        .read(true)
        .create(true)
        .append(true)
        .open(&partial)?;
    let mut byte_count = partial_file.metadata()?.len();

    if byte_count > total_size {
        // Stale partial from a different object
        partial_file.set_len(0)?;
        byte_count = 0;
    }

    if byte_count > 0 {
        let progress = (byte_count as f64 / total_size as f64) * 100.;
        info!("Resuming {} from {:.2}% completion", key, progress);
    }

    if byte_count < total_size {
        let mut response = if byte_count == 0 {
            provider.get_object(bucket, key).await?
        } else {
            provider
                .get_object_range(bucket, key, byte_count, total_size - 1)
                .await?
        };

        while let Some(bytes) = response.body.try_next().await? {
            let bytes_len = bytes.len() as u64;
            partial_file.write_all(&bytes)?;
            byte_count += bytes_len;
        }
    }

    if byte_count != total_size {
        return Err(anyhow!(
            "Received {} of {} bytes for s3://{}/{}",
            byte_count,
            total_size,
            bucket,
            key
        ));
    }

    // Rename the file to remove .partial suffix
    fs::rename(&partial, output)?;
    info!("Downloaded {}", output.display());

    Ok(())
}
