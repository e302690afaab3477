//! The `info` descriptor of a neuroglancer precomputed volume.
//!
//! ```json
//! {
//!     "@type": "neuroglancer_multiscale_volume",
//!     "type": "segmentation",
//!     "data_type": "uint64",
//!     "num_channels": 1,
//!     "scales": [{
//!         "key": "8.0x8.0x8.0",
//!         "size": [34432, 39552, 41408],
//!         "resolution": [8, 8, 8],
//!         "voxel_offset": [0, 0, 0],
//!         "chunk_sizes": [[64, 64, 64]],
//!         "encoding": "compressed_segmentation"
//!     }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::DatasetResult,
    normalize::{MetaValue, ToMeta},
};

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct VolumeInfo {
    /// `image` or `segmentation`
    #[serde(rename = "type")]
    pub volume_type: String,
    pub data_type: String,
    pub num_channels: u64,
    pub scales: Vec<Scale>,
    /// Keys this struct does not name, such as `mesh` or `@type`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Scale {
    pub key: String,
    /// Voxel count along x, y, z
    pub size: [u64; 3],
    /// Voxel size in nanometers
    pub resolution: [f64; 3],
    #[serde(default)]
    pub voxel_offset: [i64; 3],
    pub chunk_sizes: Vec<[u64; 3]>,
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharding: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VolumeInfo {
    pub fn from_json(buf: &[u8]) -> DatasetResult<Self> {
        Ok(serde_json::from_slice(buf)?)
    }

    /// Voxel bounds `[start, end)` of scale `index`
    pub fn bounds(&self, index: usize) -> Option<([i64; 3], [i64; 3])> {
        let scale = self.scales.get(index)?;
        let mut end = [0i64; 3];
        for (axis, e) in end.iter_mut().enumerate() {
            let size = i64::try_from(scale.size[axis]).ok()?;
            *e = scale.voxel_offset[axis].checked_add(size)?;
        }
        Some((scale.voxel_offset, end))
    }

    /// Whether the box `[start, end)` lies inside scale `index`
    pub fn contains(&self, index: usize, start: [u64; 3], end: [u64; 3]) -> bool {
        let Some((lo, hi)) = self.bounds(index) else {
            return false;
        };
        (0..3).all(|axis| {
            let (Ok(s), Ok(e)) = (i64::try_from(start[axis]), i64::try_from(end[axis])) else {
                return false;
            };
            lo[axis] <= s && s <= e && e <= hi[axis]
        })
    }
}

/// End coordinates of a crop starting at `start` and spanning `size` voxels
pub fn crop_region(start: [u64; 3], size: [u64; 3]) -> [u64; 3] {
    [
        start[0].saturating_add(size[0]),
        start[1].saturating_add(size[1]),
        start[2].saturating_add(size[2]),
    ]
}

impl ToMeta for VolumeInfo {
    fn to_meta(&self) -> MetaValue {
        serde_json::to_value(self).map_or(MetaValue::Null, MetaValue::from)
    }
}
