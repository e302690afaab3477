use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use log::{info, warn};
use object_store::http::HttpBuilder;
use serde_json::json;

use super::{dataset_exists, Dataset};
use crate::{
    config::Config,
    download::download_file,
    error::DatasetResult,
    metadata::{extract_zarr_metadata, get_volume_info_metadata},
    precomputed::PrecomputedVolume,
    util::elapsed_secs,
    volume::{crop_region, VolumeInfo},
};

/// gs://neuroglancer-janelia-flyem-hemibrain/v1.0/segmentation, through the
/// public HTTPS endpoint of the bucket
const DATASET_URL: &str =
    "https://storage.googleapis.com/neuroglancer-janelia-flyem-hemibrain/v1.0/segmentation";
const INFO_SAVE_PATH: &str = "hemibrain_ng/info";
const SAVE_PATH: &str = "hemibrain_1000x1000x1000_crop.zarr";
const METADATA_FILE: &str = "hemibrain_ng_zarr_metadata.json";
const INFO_METADATA_FILE: &str = "hemibrain_ng_volume_info_metadata.json";

const CROP_START: [u64; 3] = [0, 0, 0];
const CROP_SIZE: [u64; 3] = [1000, 1000, 1000];

/// FlyEM hemibrain v1.0 segmentation, a neuroglancer precomputed volume.
///
/// A 1000³ crop is cut out of the finest scale [`PrecomputedVolume`] can
/// read and saved as a local Zarr array. Its metadata is extracted like any
/// other Zarr dataset, next to the metadata of the `info` descriptor.
pub struct HemibrainNg;

#[async_trait]
impl Dataset for HemibrainNg {
    fn name(&self) -> &'static str {
        "hemibrain_ng"
    }

    fn description(&self) -> &'static str {
        "FlyEM hemibrain v1.0 segmentation (precomputed, 1000^3 crop to Zarr)"
    }

    async fn download(&self, config: &Config) -> DatasetResult<()> {
        let info_path = config.raw_path(INFO_SAVE_PATH);
        download_file(&format!("{DATASET_URL}/info"), &info_path, config.chunk_size).await?;

        let save = config.raw_path(SAVE_PATH);
        if dataset_exists(&save) {
            return Ok(());
        }
        let end = crop_region(CROP_START, CROP_SIZE);
        info!("Downloading a 1000x1000x1000 crop from {CROP_START:?} to {end:?}...");
        let start = Instant::now();
        let volume_info = VolumeInfo::from_json(&tokio::fs::read(&info_path).await?)?;
        let store = HttpBuilder::new().with_url(DATASET_URL).build()?;
        let volume = PrecomputedVolume::new(Arc::new(store), volume_info);
        let stats = volume.save_crop(CROP_START, end, &save).await?;
        info!(
            "Download completed in {} seconds ({} chunks, {} empty).",
            elapsed_secs(start),
            stats.chunks_written,
            stats.chunks_missing
        );
        Ok(())
    }

    async fn extract_metadata(&self, config: &Config) -> DatasetResult<()> {
        extract_zarr_metadata(
            &config.raw_path(SAVE_PATH),
            &config.output_path(METADATA_FILE),
            config,
        )?;

        let info_path = config.raw_path(INFO_SAVE_PATH);
        let volume_info = if info_path.exists() {
            let mut info = VolumeInfo::from_json(&tokio::fs::read(&info_path).await?)?;
            let end = crop_region(CROP_START, CROP_SIZE);
            if !info.contains(0, CROP_START, end) {
                warn!("Crop from {CROP_START:?} to {end:?} exceeds the bounds of scale 0");
            }
            let scale_key = info.scales.first().map(|s| s.key.clone());
            info.extra.insert(
                "crop_request".to_string(),
                json!({"start": CROP_START, "end": end, "scale": scale_key}),
            );
            Some(info)
        } else {
            None
        };
        get_volume_info_metadata(
            volume_info.as_ref(),
            &config.output_path(INFO_METADATA_FILE),
            config,
        )?;
        Ok(())
    }
}
