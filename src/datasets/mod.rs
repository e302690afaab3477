//! The datasets this crate knows how to acquire.
//!
//! Each one downloads its files below [`Config::data_dir`] and writes its
//! metadata below [`Config::outputs_dir`]. Both steps skip work whose result
//! already exists, so `run_tasks` can be repeated safely.

mod empiar_11759;
mod epfl_hippocampus;
mod hemibrain_ng;
mod jrc_mus_nacc;
mod u2os_chromatin;

use std::{path::Path, time::Instant};

use async_trait::async_trait;
use log::{error, info};
use walkdir::WalkDir;

use crate::{
    config::Config,
    error::{DatasetError, DatasetResult},
    util::elapsed_secs,
};

pub use empiar_11759::Empiar11759;
pub use epfl_hippocampus::EpflHippocampus;
pub use hemibrain_ng::HemibrainNg;
pub use jrc_mus_nacc::JrcMusNacc;
pub use u2os_chromatin::U2osChromatin;

#[async_trait]
pub trait Dataset: Send + Sync {
    /// Name used on the command line and in the consolidated report
    fn name(&self) -> &'static str;

    /// One line shown by `list`
    fn description(&self) -> &'static str;

    async fn download(&self, config: &Config) -> DatasetResult<()>;

    async fn extract_metadata(&self, config: &Config) -> DatasetResult<()>;

    /// Downloads, then extracts. Errors are logged, not returned, so one
    /// failing dataset does not stop the others. Returns whether both steps
    /// succeeded.
    async fn run_tasks(&self, config: &Config) -> bool {
        let mut ok = true;
        if let Err(e) = self.download(config).await {
            error!("{}: download failed: {e}", self.name());
            ok = false;
        }
        if let Err(e) = self.extract_metadata(config).await {
            error!("{}: metadata extraction failed: {e}", self.name());
            ok = false;
        }
        ok
    }
}

/// Every known dataset, in the order `run` processes them
pub fn all_datasets() -> Vec<Box<dyn Dataset>> {
    vec![
        Box::new(Empiar11759),
        Box::new(EpflHippocampus),
        Box::new(HemibrainNg),
        Box::new(JrcMusNacc),
        Box::new(U2osChromatin),
    ]
}

pub fn find(name: &str) -> DatasetResult<Box<dyn Dataset>> {
    all_datasets()
        .into_iter()
        .find(|d| d.name() == name)
        .ok_or_else(|| DatasetError::UnknownDataset(name.to_string()))
}

/// Logs and returns `true` when `path` exists, so the caller skips its download
fn dataset_exists(path: &Path) -> bool {
    if path.exists() {
        info!("Dataset already exists at {}. Skipping download.", path.display());
        true
    } else {
        info!("Dataset not found at {}. Proceeding with download...", path.display());
        false
    }
}

/// Runs `extract` on every file below `data_dir`, unless `folder` already
/// exists. Per-file errors are logged and counted.
fn extract_folder(
    data_dir: &Path,
    folder: &Path,
    mut extract: impl FnMut(&Path) -> DatasetResult<()>,
) -> DatasetResult<()> {
    if folder.exists() {
        info!(
            "Metadata folder already exists at {}. Skipping extraction.",
            folder.display()
        );
        return Ok(());
    }
    if !data_dir.exists() {
        return Err(DatasetError::MissingInput(data_dir.to_path_buf()));
    }
    info!(
        "Metadata folder not found at {}. Proceeding with extraction...",
        folder.display()
    );
    std::fs::create_dir_all(folder)?;
    let start = Instant::now();
    let mut failed = 0;
    for entry in WalkDir::new(data_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Err(e) = extract(entry.path()) {
            error!("Error during metadata extraction from {}: {e}", entry.path().display());
            failed += 1;
        }
    }
    info!(
        "Metadata extraction completed in {} seconds ({failed} failures).",
        elapsed_secs(start)
    );
    Ok(())
}
