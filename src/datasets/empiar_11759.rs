use async_trait::async_trait;

use super::{dataset_exists, extract_folder, Dataset};
use crate::{
    config::Config,
    download::{download_ftp_files, FtpClient},
    error::DatasetResult,
    metadata::extract_dm3_metadata,
};

const FTP_HOST: &str = "ftp.ebi.ac.uk";
const FTP_PATH: &str = "/empiar/world_availability/11759/data/";
const SAVE_PATH: &str = "empiar_11759_dataset";
const METADATA_FOLDER: &str = "empiar_11759_metadata";

/// EMPIAR-11759, developing retina in the 55 hpf zebrafish larval eye.
/// A directory tree of DM3 micrographs on the EBI FTP server.
pub struct Empiar11759;

#[async_trait]
impl Dataset for Empiar11759 {
    fn name(&self) -> &'static str {
        "empiar_11759"
    }

    fn description(&self) -> &'static str {
        "EMPIAR-11759 zebrafish larval retina (FTP, DM3)"
    }

    async fn download(&self, config: &Config) -> DatasetResult<()> {
        let save = config.raw_path(SAVE_PATH);
        if dataset_exists(&save) {
            return Ok(());
        }
        let mut ftp = FtpClient::connect(FTP_HOST, 21).await?;
        ftp.login_anonymous().await?;
        download_ftp_files(&mut ftp, FTP_PATH, &save, config.chunk_size).await?;
        ftp.quit().await
    }

    async fn extract_metadata(&self, config: &Config) -> DatasetResult<()> {
        let folder = config.output_path(METADATA_FOLDER);
        extract_folder(&config.raw_path(SAVE_PATH), &folder, |file| {
            extract_dm3_metadata(file, &folder, config).map(drop)
        })
    }
}
