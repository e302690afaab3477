use std::time::Instant;

use async_trait::async_trait;
use log::info;

use super::{dataset_exists, extract_folder, Dataset};
use crate::{
    config::Config,
    download::{download_ftp_matching, FtpClient},
    error::DatasetResult,
    metadata::extract_all_tif_metadata,
    util::{elapsed_secs, metadata_file_for},
};

const FTP_HOST: &str = "ftp.ebi.ac.uk";
const FTP_PATH: &str = "/pub/databases/IDR/idr0086-miron-micrographs/20200610-ftp/experimentD/Miron_FIB-SEM/Miron_FIB-SEM_processed";
const FTP_FILE_PATTERN: &str = "Figure_S3B_FIB-SEM_U2OS_*.tif";
const SAVE_PATH: &str = "u2os_chromatin";
const METADATA_FOLDER: &str = "u2os_chromatin_metadata";

/// FIB-SEM stacks of U2OS cell chromatin from IDR study idr0086
pub struct U2osChromatin;

#[async_trait]
impl Dataset for U2osChromatin {
    fn name(&self) -> &'static str {
        "u2os_chromatin"
    }

    fn description(&self) -> &'static str {
        "IDR idr0086 U2OS chromatin FIB-SEM (FTP, TIFF)"
    }

    async fn download(&self, config: &Config) -> DatasetResult<()> {
        let save = config.raw_path(SAVE_PATH);
        if dataset_exists(&save) {
            return Ok(());
        }
        tokio::fs::create_dir_all(&save).await?;
        let start = Instant::now();
        let mut ftp = FtpClient::connect(FTP_HOST, 21).await?;
        ftp.login_anonymous().await?;
        let files =
            download_ftp_matching(&mut ftp, FTP_PATH, FTP_FILE_PATTERN, &save, config.chunk_size)
                .await?;
        ftp.quit().await?;
        info!(
            "Download of {} files completed in {} seconds.",
            files.len(),
            elapsed_secs(start)
        );
        Ok(())
    }

    async fn extract_metadata(&self, config: &Config) -> DatasetResult<()> {
        let folder = config.output_path(METADATA_FOLDER);
        extract_folder(&config.raw_path(SAVE_PATH), &folder, |file| {
            extract_all_tif_metadata(file, &metadata_file_for(&folder, file), config).map(drop)
        })
    }
}
