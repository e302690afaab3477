use std::{path::Path, time::Instant};

use futures_lite::StreamExt;
use log::{debug, info};
use object_store::{aws::AmazonS3Builder, path::Path as StorePath, ObjectStore};

use super::write_stream;
use crate::{error::DatasetResult, util::elapsed_secs};

/// Mirrors every object below `prefix` of a public S3 bucket into
/// `local_dir`, keeping the key layout relative to the prefix.
///
/// Requests are unsigned. `AWS_ENDPOINT` and `AWS_ALLOW_HTTP` are honoured,
/// so the bucket can be served from an S3-compatible mirror. Returns the
/// number of objects downloaded.
pub async fn fetch_bucket_prefix(
    bucket: &str,
    region: &str,
    prefix: &str,
    local_dir: &Path,
    chunk_size: usize,
) -> DatasetResult<usize> {
    let store = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region(region)
        .with_skip_signature(true)
        .build()?;
    info!("Listing s3://{bucket}/{prefix}...");
    mirror_prefix(&store, prefix, local_dir, chunk_size).await
}

/// Copies every object of `store` below `prefix` into `local_dir`.
/// Objects that already exist locally are not fetched again.
pub async fn mirror_prefix(
    store: &dyn ObjectStore,
    prefix: &str,
    local_dir: &Path,
    chunk_size: usize,
) -> DatasetResult<usize> {
    let prefix = StorePath::from(prefix.trim_end_matches('/'));
    let start = Instant::now();

    let objects = store
        .list(Some(&prefix))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    let mut fetched = 0;
    for meta in &objects {
        let Some(parts) = meta.location.prefix_match(&prefix) else {
            continue;
        };
        let target = parts.fold(local_dir.to_path_buf(), |p, part| {
            let part: &str = part.as_ref();
            p.join(part)
        });
        if target.exists() {
            debug!("{} exists, skipping", target.display());
            continue;
        }
        let stream = store.get(&meta.location).await?.into_stream();
        write_stream(stream, &target, chunk_size).await?;
        fetched += 1;
    }
    info!(
        "Fetched {fetched} of {} objects in {} seconds.",
        objects.len(),
        elapsed_secs(start)
    );
    Ok(fetched)
}
