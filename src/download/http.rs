use std::{path::Path, time::Instant};

use log::info;
use object_store::{http::HttpBuilder, path::Path as StorePath, ClientOptions, ObjectStore};

use super::write_stream;
use crate::{
    error::{DatasetError, DatasetResult},
    util::elapsed_secs,
};

/// Splits `scheme://host/rest` into `scheme://host` and `rest`
pub fn split_url(url: &str) -> DatasetResult<(&str, &str)> {
    let invalid = || DatasetError::InvalidUrl(url.to_string());
    let host_start = url.find("://").ok_or_else(invalid)? + 3;
    let path_start = url[host_start..]
        .find('/')
        .map(|i| host_start + i)
        .ok_or_else(invalid)?;
    if path_start == host_start {
        return Err(invalid());
    }
    Ok((&url[..path_start], &url[path_start + 1..]))
}

/// Downloads `url` to `save_path` unless it already exists
pub async fn download_file(url: &str, save_path: &Path, chunk_size: usize) -> DatasetResult<bool> {
    if save_path.exists() {
        info!("File {} already exists. Skipping download.", save_path.display());
        return Ok(false);
    }
    info!("File {} does not exist. Downloading...", save_path.display());
    info!("Starting download from {url} to {}...", save_path.display());
    let start = Instant::now();

    let (base, path) = split_url(url)?;
    let store = HttpBuilder::new()
        .with_url(base)
        .with_client_options(ClientOptions::new().with_allow_http(base.starts_with("http://")))
        .build()?;
    let location = StorePath::from_url_path(path)?;
    let stream = store.get(&location).await?.into_stream();
    let written = write_stream(stream, save_path, chunk_size).await?;

    info!(
        "Download completed in {} seconds ({written} bytes).",
        elapsed_secs(start)
    );
    Ok(true)
}
