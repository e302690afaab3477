//! Fetching remote files into the local data directory.
//!
//! Every download writes to `<target>.part` and renames on success, so an
//! interrupted transfer never looks like a finished file.

mod bucket;
mod ftp;
mod http;

use std::path::{Path, PathBuf};

use futures_lite::{Stream, StreamExt};
use tokio::{
    fs,
    io::{AsyncWriteExt, BufWriter},
};

use crate::error::DatasetResult;

pub use bucket::{fetch_bucket_prefix, mirror_prefix};
pub use ftp::{download_ftp_files, download_ftp_matching, FtpClient, Reply};
pub use http::{download_file, split_url};

/// `<path>.part`
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Streams `chunks` into `path` via its `.part` sibling, returning the byte
/// count
pub(crate) async fn write_stream<S, B, E>(
    mut chunks: S,
    path: &Path,
    chunk_size: usize,
) -> DatasetResult<u64>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    crate::DatasetError: From<E>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let part = part_path(path);
    let mut file = BufWriter::with_capacity(chunk_size, fs::File::create(&part).await?);
    let mut written = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        file.write_all(chunk.as_ref()).await?;
        written += chunk.as_ref().len() as u64;
    }
    file.flush().await?;
    drop(file);
    fs::rename(&part, path).await?;
    Ok(written)
}
