use std::time::Instant;

use async_trait::async_trait;
use log::info;

use super::{dataset_exists, Dataset};
use crate::{
    config::Config, download::fetch_bucket_prefix, error::DatasetResult,
    metadata::extract_zarr_metadata, util::elapsed_secs,
};

const BUCKET: &str = "janelia-cosem-datasets";
const BUCKET_REGION: &str = "us-east-1";
const BUCKET_PATH: &str = "jrc_mus-nacc-2/jrc_mus-nacc-2.zarr/recon-2/em/fibsem-int16/";
const SAVE_PATH: &str = "jrc_mus_nacc_2.zarr";
const METADATA_FILE: &str = "jrc_mus_nacc_zarr_metadata.json";

/// FIB-SEM volume of the mouse nucleus accumbens from the OpenOrganelle
/// collection, a Zarr v2 multiscale group on S3
pub struct JrcMusNacc;

#[async_trait]
impl Dataset for JrcMusNacc {
    fn name(&self) -> &'static str {
        "jrc_mus_nacc"
    }

    fn description(&self) -> &'static str {
        "Janelia COSEM mouse nucleus accumbens (S3, Zarr)"
    }

    async fn download(&self, config: &Config) -> DatasetResult<()> {
        let save = config.raw_path(SAVE_PATH);
        if dataset_exists(&save) {
            return Ok(());
        }
        let start = Instant::now();
        fetch_bucket_prefix(BUCKET, BUCKET_REGION, BUCKET_PATH, &save, config.chunk_size).await?;
        info!("Download completed in {} seconds.", elapsed_secs(start));
        Ok(())
    }

    async fn extract_metadata(&self, config: &Config) -> DatasetResult<()> {
        extract_zarr_metadata(
            &config.raw_path(SAVE_PATH),
            &config.output_path(METADATA_FILE),
            config,
        )?;
        Ok(())
    }
}
