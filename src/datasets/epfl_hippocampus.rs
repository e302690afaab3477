use async_trait::async_trait;

use super::Dataset;
use crate::{
    config::Config,
    download::download_file,
    error::DatasetResult,
    metadata::{extract_all_tif_metadata, get_brief_tif_metadata},
};

const DATASET_URL: &str = "https://documents.epfl.ch/groups/c/cv/cvlab-unit/www/data/%20ElectronMicroscopy_Hippocampus/volumedata.tif";
const SAVE_PATH: &str = "epfl_volumedata.tif";
const METADATA_FILE: &str = "epfl_hippocampus_metadata.json";
const BRIEF_METADATA_FILE: &str = "epfl_hippocampus_brief_metadata.json";

/// EPFL electron microscopy stack of the CA1 hippocampus, one multi-page TIFF
pub struct EpflHippocampus;

#[async_trait]
impl Dataset for EpflHippocampus {
    fn name(&self) -> &'static str {
        "epfl_hippocampus"
    }

    fn description(&self) -> &'static str {
        "EPFL CA1 hippocampus EM stack (HTTP, TIFF)"
    }

    async fn download(&self, config: &Config) -> DatasetResult<()> {
        download_file(DATASET_URL, &config.raw_path(SAVE_PATH), config.chunk_size).await?;
        Ok(())
    }

    async fn extract_metadata(&self, config: &Config) -> DatasetResult<()> {
        let file = config.raw_path(SAVE_PATH);
        extract_all_tif_metadata(&file, &config.output_path(METADATA_FILE), config)?;
        get_brief_tif_metadata(&file, &config.output_path(BRIEF_METADATA_FILE), config)?;
        Ok(())
    }
}
