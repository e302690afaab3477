//! Cutouts of neuroglancer precomputed volumes, saved as Zarr.
//!
//! Chunks are read with `raw` or `compressed_segmentation` encoding, either
//! as one object per chunk or packed in `neuroglancer_uint64_sharded_v1`
//! shards. Shards are only located with the `identity` hash: chunks placed
//! with `murmurhash3_x86_128` cannot be found, and the image encodings
//! (`jpeg`, `png`, `compresso`) are not decoded. [`pick_scale`] passes over
//! a scale that needs any of these and settles for the next coarser one.
//!
//! Precomputed chunks hold voxels in Fortran order `[x, y, z, channel]`. The
//! Zarr array keeps those axes and stores them in C order, one chunk per
//! precomputed chunk, so a crop never has to fit in memory at once.

use std::{
    collections::HashMap,
    io::Read,
    num::NonZeroU64,
    ops::Range,
    path::Path,
    sync::Arc,
};

use flate2::read::GzDecoder;
use log::{debug, info, warn};
use object_store::{path::Path as StorePath, ObjectStore};
use serde::Deserialize;
use serde_json::json;
use zarrs::{
    array::{
        chunk_grid::ChunkGrid, codec::GzipCodec, Array, ArrayBuilder, DataType, FillValue,
    },
    array_subset::ArraySubset,
    filesystem::FilesystemStore,
};

use crate::{
    download::part_path,
    error::{zarr_err, DatasetError, DatasetResult, FormatError, UsageError},
    volume::{Scale, VolumeInfo},
    zarr::checked_product,
};

/// Largest precomputed chunk decoded in one piece
const MAX_CHUNK_VOXELS: u64 = 1 << 26;

const SHARDED_V1: &str = "neuroglancer_uint64_sharded_v1";

/// `sharding` member of a scale
#[derive(Deserialize, Clone, PartialEq, Debug)]
pub struct ShardingSpec {
    #[serde(rename = "@type")]
    pub kind: String,
    pub preshift_bits: u32,
    pub hash: String,
    pub minishard_bits: u32,
    pub shard_bits: u32,
    #[serde(default = "raw_encoding")]
    pub minishard_index_encoding: String,
    #[serde(default = "raw_encoding")]
    pub data_encoding: String,
}

fn raw_encoding() -> String {
    "raw".to_string()
}

fn low_bits(value: u64, bits: u32) -> u64 {
    if bits >= u64::BITS {
        value
    } else {
        value & ((1 << bits) - 1)
    }
}

impl ShardingSpec {
    /// Why this crate cannot read shards laid out this way, if it cannot
    pub fn unsupported(&self) -> Option<String> {
        if self.kind != SHARDED_V1 {
            return Some(format!("sharding {}", self.kind));
        }
        if self.hash != "identity" {
            return Some(format!("shard hash {}", self.hash));
        }
        for encoding in [&self.minishard_index_encoding, &self.data_encoding] {
            if encoding != "raw" && encoding != "gzip" {
                return Some(format!("shard encoding {encoding}"));
            }
        }
        if self.minishard_bits > 32 || self.shard_bits > 64 || self.preshift_bits > 64 {
            return Some("shard bit counts out of range".to_string());
        }
        None
    }

    /// Shard and minishard holding `chunk_id`
    pub fn locate(&self, chunk_id: u64) -> (u64, u64) {
        let hash = chunk_id.checked_shr(self.preshift_bits).unwrap_or(0);
        let minishard = low_bits(hash, self.minishard_bits);
        let shard = low_bits(
            hash.checked_shr(self.minishard_bits).unwrap_or(0),
            self.shard_bits,
        );
        (shard, minishard)
    }

    /// `<shard>.shard`, in lowercase hex padded to the shard bit count
    pub fn shard_file(&self, shard: u64) -> String {
        let width = self.shard_bits.div_ceil(4) as usize;
        format!("{shard:0width$x}.shard")
    }

    /// Byte length of the shard index at the start of every shard file
    pub fn index_len(&self) -> u64 {
        16u64 << self.minishard_bits
    }
}

/// One chunk listed in a minishard index. Byte offsets are relative to the
/// end of the shard index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinishardEntry {
    pub chunk_id: u64,
    pub start: u64,
    pub end: u64,
}

fn le_u64s(buf: &[u8]) -> DatasetResult<Vec<u64>> {
    buf.chunks_exact(8)
        .map(|c| Ok(u64::from_le_bytes(c.try_into()?)))
        .collect()
}

fn le_u32s(buf: &[u8]) -> DatasetResult<Vec<u32>> {
    buf.chunks_exact(4)
        .map(|c| Ok(u32::from_le_bytes(c.try_into()?)))
        .collect()
}

/// Decodes the `[3, n]` delta-coded table of a minishard index
pub fn decode_minishard_index(buf: &[u8]) -> DatasetResult<Vec<MinishardEntry>> {
    if buf.len() % 24 != 0 {
        return Err(DatasetError::FormatError(FormatError::PrecomputedChunkInvalid {
            key: "minishard index".to_string(),
            reason: format!("length {} is not a multiple of 24", buf.len()),
        }));
    }
    let words = le_u64s(buf)?;
    let n = words.len() / 3;
    let (ids, rest) = words.split_at(n);
    let (offsets, sizes) = rest.split_at(n);

    let mut entries = Vec::with_capacity(n);
    let (mut chunk_id, mut next) = (0u64, 0u64);
    for i in 0..n {
        chunk_id = chunk_id.wrapping_add(ids[i]);
        let start = next.checked_add(offsets[i]).ok_or(DatasetError::LimitsExceeded)?;
        let end = start.checked_add(sizes[i]).ok_or(DatasetError::LimitsExceeded)?;
        entries.push(MinishardEntry { chunk_id, start, end });
        next = end;
    }
    Ok(entries)
}

/// Chunk id of grid position `pos` in a grid of `grid` chunks: the bits of
/// x, y and z interleaved, each axis only using the bits its extent needs
pub fn compressed_morton_code(pos: [u64; 3], grid: [u64; 3]) -> u64 {
    let bits = grid.map(|g| u64::BITS - g.saturating_sub(1).leading_zeros());
    let max_bits = bits.iter().copied().max().unwrap_or(0);
    let mut code = 0u64;
    let mut out = 0u32;
    for bit in 0..max_bits {
        for axis in 0..3 {
            if bit < bits[axis] {
                if out < u64::BITS {
                    code |= ((pos[axis] >> bit) & 1) << out;
                }
                out += 1;
            }
        }
    }
    code
}

fn gunzip(key: &str, buf: &[u8]) -> DatasetResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(buf)
        .read_to_end(&mut out)
        .map_err(|e| DatasetError::FormatError(FormatError::PrecomputedChunkInvalid {
            key: key.to_string(),
            reason: e.to_string(),
        }))?;
    Ok(out)
}

fn is_gzip(buf: &[u8]) -> bool {
    buf.starts_with(&[0x1f, 0x8b])
}

/// Element width of the unsigned integer types a crop can be made of
fn element_bytes(data_type: &str) -> Option<usize> {
    match data_type {
        "uint8" => Some(1),
        "uint16" => Some(2),
        "uint32" => Some(4),
        "uint64" => Some(8),
        _ => None,
    }
}

/// Decodes a `raw` chunk of `voxels` little-endian elements
pub fn decode_raw(data: &[u8], width: usize, voxels: usize) -> DatasetResult<Vec<u64>> {
    if !(1..=8).contains(&width) || Some(data.len()) != voxels.checked_mul(width) {
        return Err(DatasetError::FormatError(FormatError::PrecomputedChunkInvalid {
            key: "raw".to_string(),
            reason: format!("{} bytes for {voxels} voxels of {width} bytes", data.len()),
        }));
    }
    Ok(data
        .chunks_exact(width)
        .map(|c| {
            let mut le = [0u8; 8];
            le[..width].copy_from_slice(c);
            u64::from_le_bytes(le)
        })
        .collect())
}

/// Decodes a `compressed_segmentation` chunk of `size` voxels per channel.
///
/// Every channel starts at the word offset listed at its index. Within a
/// channel each block has a two-word header: the lookup table offset in the
/// low 24 bits with the bit width above it, then the offset of the packed
/// indices. Table entries are one word for `uint32`, two for `uint64`.
pub fn decode_compressed_segmentation(
    data: &[u8],
    size: [usize; 3],
    block: [usize; 3],
    channels: usize,
    wide: bool,
) -> DatasetResult<Vec<u64>> {
    let invalid = |reason: String| DatasetError::FormatError(FormatError::PrecomputedChunkInvalid {
        key: "compressed_segmentation".to_string(),
        reason,
    });
    let block_voxels = block.iter().try_fold(1usize, |n, b| n.checked_mul(*b));
    if block.contains(&0) || block_voxels.and_then(|n| u64::try_from(n).ok()).map_or(true, |n| n > MAX_CHUNK_VOXELS) {
        return Err(invalid(format!("block size {block:?}")));
    }
    let words = le_u32s(data)?;
    let word = |i: usize| -> DatasetResult<u64> {
        words
            .get(i)
            .map(|w| u64::from(*w))
            .ok_or_else(|| invalid(format!("word {i} past the end of {}", words.len())))
    };
    let grid = [0, 1, 2].map(|a| size[a].div_ceil(block[a]));
    let voxels = size
        .iter()
        .try_fold(channels, |n, s| n.checked_mul(*s))
        .filter(|n| u64::try_from(*n).is_ok_and(|n| n <= MAX_CHUNK_VOXELS))
        .ok_or(DatasetError::LimitsExceeded)?;
    let mut out = vec![0u64; voxels];

    for channel in 0..channels {
        let base = usize::try_from(word(channel)?)?;
        for (gz, gy, gx) in (0..grid[2])
            .flat_map(|z| (0..grid[1]).flat_map(move |y| (0..grid[0]).map(move |x| (z, y, x))))
        {
            let header = base + 2 * (gx + grid[0] * (gy + grid[1] * gz));
            let w0 = word(header)?;
            let table = base + usize::try_from(w0 & 0xff_ffff)?;
            let bits = usize::try_from(w0 >> 24)?;
            let values = base + usize::try_from(word(header + 1)?)?;
            if !matches!(bits, 0 | 1 | 2 | 4 | 8 | 16 | 32) {
                return Err(invalid(format!("{bits} bits per index")));
            }
            let mask = if bits == 32 { u64::from(u32::MAX) } else { (1 << bits) - 1 };

            let origin = [gx * block[0], gy * block[1], gz * block[2]];
            let extent = [0, 1, 2].map(|a| block[a].min(size[a] - origin[a]));
            for z in 0..extent[2] {
                let vz = origin[2] + z;
                for y in 0..extent[1] {
                    let vy = origin[1] + y;
                    for x in 0..extent[0] {
                        let vx = origin[0] + x;
                        let index = if bits == 0 {
                            0
                        } else {
                            let bit = (x + block[0] * (y + block[1] * z)) * bits;
                            (word(values + bit / 32)? >> (bit % 32)) & mask
                        };
                        let index = usize::try_from(index)?;
                        let value = if wide {
                            word(table + 2 * index)? | word(table + 2 * index + 1)? << 32
                        } else {
                            word(table + index)?
                        };
                        out[vx + size[0] * (vy + size[1] * (vz + size[2] * channel))] = value;
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Why a scale of `info` cannot be cropped, if it cannot
pub fn unsupported(info: &VolumeInfo, scale: &Scale) -> Option<String> {
    if element_bytes(&info.data_type).is_none() {
        return Some(format!("data type {}", info.data_type));
    }
    match scale.encoding.as_str() {
        "raw" => {}
        "compressed_segmentation" => {
            if !matches!(info.data_type.as_str(), "uint32" | "uint64") {
                return Some(format!("compressed_segmentation of {}", info.data_type));
            }
            if block_size(scale).is_none() {
                return Some("missing compressed_segmentation_block_size".to_string());
            }
        }
        other => return Some(format!("encoding {other}")),
    }
    match scale.chunk_sizes.first() {
        Some(chunk) if !chunk.contains(&0) => {
            let voxels = checked_product(chunk).and_then(|n| n.checked_mul(info.num_channels.max(1)));
            if voxels.map_or(true, |n| n > MAX_CHUNK_VOXELS) {
                return Some(format!("chunk size {chunk:?}"));
            }
        }
        _ => return Some("no chunk size".to_string()),
    }
    match sharding(scale) {
        Ok(Some(spec)) => spec.unsupported(),
        Ok(None) => None,
        Err(e) => Some(format!("sharding: {e}")),
    }
}

/// Index of the finest scale that can be cropped
pub fn pick_scale(info: &VolumeInfo) -> Option<usize> {
    info.scales.iter().position(|scale| match unsupported(info, scale) {
        Some(reason) => {
            warn!("Scale {} cannot be read ({reason}), trying the next one", scale.key);
            false
        }
        None => true,
    })
}

/// Maps a box given in voxels of scale 0 onto scale `index`
pub fn rescale_crop(
    info: &VolumeInfo,
    index: usize,
    start: [u64; 3],
    end: [u64; 3],
) -> ([u64; 3], [u64; 3]) {
    let (Some(base), Some(scale)) = (info.scales.first(), info.scales.get(index)) else {
        return (start, end);
    };
    let mut out = (start, end);
    for axis in 0..3 {
        let factor = (scale.resolution[axis] / base.resolution[axis]).round().max(1.0) as u64;
        out.0[axis] = start[axis] / factor;
        out.1[axis] = end[axis].div_ceil(factor);
    }
    out
}

fn block_size(scale: &Scale) -> Option<[usize; 3]> {
    let value = scale.extra.get("compressed_segmentation_block_size")?;
    let block: [usize; 3] = serde_json::from_value(value.clone()).ok()?;
    (!block.contains(&0)).then_some(block)
}

fn sharding(scale: &Scale) -> DatasetResult<Option<ShardingSpec>> {
    match &scale.sharding {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}

/// Fetches `path`, or the byte `range` of it. Objects that do not exist are
/// `None`, which precomputed volumes use for chunks that are all zero.
async fn read_object(
    store: &dyn ObjectStore,
    path: &str,
    range: Option<Range<u64>>,
) -> DatasetResult<Option<Vec<u8>>> {
    let location = StorePath::parse(path)?;
    let result = match range {
        Some(r) => {
            let r = usize::try_from(r.start)?..usize::try_from(r.end)?;
            store.get_range(&location, r).await
        }
        None => match store.get(&location).await {
            Ok(get) => get.bytes().await,
            Err(e) => Err(e),
        },
    };
    match result {
        Ok(bytes) => Ok(Some(bytes.to_vec())),
        Err(object_store::Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reads the chunks of one scale, caching the minishard indices it has seen
struct ScaleReader<'a> {
    store: &'a dyn ObjectStore,
    scale: &'a Scale,
    chunk: [u64; 3],
    grid: [u64; 3],
    sharding: Option<ShardingSpec>,
    minishards: HashMap<(u64, u64), Vec<MinishardEntry>>,
}

impl<'a> ScaleReader<'a> {
    fn new(store: &'a dyn ObjectStore, scale: &'a Scale) -> DatasetResult<Self> {
        let chunk = *scale
            .chunk_sizes
            .first()
            .filter(|c| !c.contains(&0))
            .ok_or(DatasetError::FormatError(FormatError::PrecomputedNoReadableScale))?;
        let grid = [0, 1, 2].map(|a| scale.size[a].div_ceil(chunk[a]));
        Ok(ScaleReader {
            store,
            scale,
            chunk,
            grid,
            sharding: sharding(scale)?,
            minishards: HashMap::new(),
        })
    }

    /// Voxel box `[start, end)` of chunk `pos`, relative to the voxel offset
    fn chunk_box(&self, pos: [u64; 3]) -> ([u64; 3], [u64; 3]) {
        let start = [0, 1, 2].map(|a| pos[a] * self.chunk[a]);
        let end = [0, 1, 2].map(|a| (start[a] + self.chunk[a]).min(self.scale.size[a]));
        (start, end)
    }

    /// `<x0>-<x1>_<y0>-<y1>_<z0>-<z1>` in absolute voxel coordinates
    fn chunk_name(&self, pos: [u64; 3]) -> String {
        let (start, end) = self.chunk_box(pos);
        let axis = |a: usize| {
            let offset = self.scale.voxel_offset[a];
            let lo = i64::try_from(start[a]).unwrap_or(i64::MAX).saturating_add(offset);
            let hi = i64::try_from(end[a]).unwrap_or(i64::MAX).saturating_add(offset);
            format!("{lo}-{hi}")
        };
        format!("{}/{}_{}_{}", self.scale.key, axis(0), axis(1), axis(2))
    }

    /// Encoded bytes of chunk `pos`, `None` when it was never written
    async fn chunk_bytes(&mut self, pos: [u64; 3]) -> DatasetResult<Option<Vec<u8>>> {
        let Some(spec) = self.sharding.clone() else {
            let key = self.chunk_name(pos);
            return match read_object(self.store, &key, None).await? {
                Some(buf) if is_gzip(&buf) => Ok(Some(gunzip(&key, &buf)?)),
                other => Ok(other),
            };
        };

        let chunk_id = compressed_morton_code(pos, self.grid);
        let (shard, minishard) = spec.locate(chunk_id);
        let file = format!("{}/{}", self.scale.key, spec.shard_file(shard));
        if !self.minishards.contains_key(&(shard, minishard)) {
            let entries = self.read_minishard(&spec, &file, minishard).await?;
            self.minishards.insert((shard, minishard), entries);
        }
        let Some(entry) = self.minishards[&(shard, minishard)]
            .iter()
            .find(|e| e.chunk_id == chunk_id)
            .copied()
        else {
            return Ok(None);
        };
        let range = spec.index_len() + entry.start..spec.index_len() + entry.end;
        let Some(buf) = read_object(self.store, &file, Some(range)).await? else {
            return Ok(None);
        };
        if spec.data_encoding == "gzip" {
            Ok(Some(gunzip(&file, &buf)?))
        } else {
            Ok(Some(buf))
        }
    }

    async fn read_minishard(
        &self,
        spec: &ShardingSpec,
        file: &str,
        minishard: u64,
    ) -> DatasetResult<Vec<MinishardEntry>> {
        let at = minishard * 16;
        let Some(index) = read_object(self.store, file, Some(at..at + 16)).await? else {
            debug!("{file} does not exist");
            return Ok(Vec::new());
        };
        let bounds = le_u64s(&index)?;
        let &[start, end] = bounds.as_slice() else {
            return Err(DatasetError::FormatError(FormatError::PrecomputedChunkInvalid {
                key: file.to_string(),
                reason: "short shard index".to_string(),
            }));
        };
        if start >= end {
            return Ok(Vec::new());
        }
        let range = spec.index_len() + start..spec.index_len() + end;
        let buf = read_object(self.store, file, Some(range))
            .await?
            .unwrap_or_default();
        if spec.minishard_index_encoding == "gzip" {
            decode_minishard_index(&gunzip(file, &buf)?)
        } else {
            decode_minishard_index(&buf)
        }
    }
}

/// Counts from writing a crop
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CropStats {
    /// Precomputed chunks decoded and written
    pub chunks_written: u64,
    /// Chunks absent from the volume, left at the fill value
    pub chunks_missing: u64,
}

/// A precomputed volume behind an object store
pub struct PrecomputedVolume {
    store: Arc<dyn ObjectStore>,
    info: VolumeInfo,
}

impl PrecomputedVolume {
    pub fn new(store: Arc<dyn ObjectStore>, info: VolumeInfo) -> Self {
        PrecomputedVolume { store, info }
    }

    /// Writes the box `[start, end)`, given in voxels of scale 0, into a new
    /// Zarr array at `path`. The finest readable scale is used.
    ///
    /// The array is built in `<path>.part` and renamed when complete.
    pub async fn save_crop(
        &self,
        start: [u64; 3],
        end: [u64; 3],
        path: &Path,
    ) -> DatasetResult<CropStats> {
        let index = pick_scale(&self.info).ok_or(DatasetError::FormatError(FormatError::PrecomputedNoReadableScale))?;
        let (start, end) = rescale_crop(&self.info, index, start, end);
        let scale = &self.info.scales[index];
        let offset = scale.voxel_offset;
        let (Some(lo), Some(hi)) = (shift(start, offset), shift(end, offset)) else {
            return Err(crop_out_of_bounds(scale, start, end));
        };
        if !self.info.contains(index, start, end) || (0..3).any(|a| lo[a] >= hi[a]) {
            return Err(crop_out_of_bounds(scale, start, end));
        }
        if index > 0 {
            info!("Cropping scale {} instead of scale 0", scale.key);
        }

        let part = part_path(path);
        if part.exists() {
            std::fs::remove_dir_all(&part)?;
        }
        std::fs::create_dir_all(&part)?;
        let store = Arc::new(FilesystemStore::new(&part)?);
        let shape = [0, 1, 2].map(|a| hi[a] - lo[a]);
        let array = self.create_array(store, index, shape, start)?;
        let stats = self.copy_box(index, lo, hi, &array).await?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&part, path)?;
        Ok(stats)
    }

    fn create_array(
        &self,
        store: Arc<FilesystemStore>,
        index: usize,
        shape: [u64; 3],
        start: [u64; 3],
    ) -> DatasetResult<Array<FilesystemStore>> {
        let scale = &self.info.scales[index];
        let channels = self.info.num_channels.max(1);
        let chunk = scale.chunk_sizes.first().copied().unwrap_or(shape);
        let chunk_shape = (0..3)
            .map(|a| chunk[a].min(shape[a]))
            .chain([channels])
            .map(|n| NonZeroU64::new(n).ok_or(DatasetError::FormatError(FormatError::PrecomputedNoReadableScale)))
            .collect::<DatasetResult<Vec<_>>>()?;
        let chunk_grid = ChunkGrid::from(chunk_shape);
        let (data_type, fill_value) = match self.info.data_type.as_str() {
            "uint8" => (DataType::UInt8, FillValue::from(0u8)),
            "uint16" => (DataType::UInt16, FillValue::from(0u16)),
            "uint32" => (DataType::UInt32, FillValue::from(0u32)),
            _ => (DataType::UInt64, FillValue::from(0u64)),
        };
        let mut attributes = serde_json::Map::new();
        attributes.insert(
            "precomputed".to_string(),
            json!({
                "scale": scale.key,
                "resolution": scale.resolution,
                "voxel_offset": start,
                "type": self.info.volume_type,
            }),
        );
        let array = ArrayBuilder::new(
            vec![shape[0], shape[1], shape[2], channels],
            data_type,
            chunk_grid,
            fill_value,
        )
        .bytes_to_bytes_codecs(vec![Arc::new(GzipCodec::new(5).map_err(zarr_err)?)])
        .dimension_names(["x", "y", "z", "c"].into())
        .attributes(attributes)
        .build(store, "/")?;
        array.store_metadata()?;
        Ok(array)
    }

    /// Copies the box `[lo, hi)`, relative to the voxel offset of scale
    /// `index`, chunk by chunk into `array`
    async fn copy_box(
        &self,
        index: usize,
        lo: [u64; 3],
        hi: [u64; 3],
        array: &Array<FilesystemStore>,
    ) -> DatasetResult<CropStats> {
        let scale = &self.info.scales[index];
        let channel_count = self.info.num_channels.max(1);
        let channels = usize::try_from(channel_count)?;
        let width = element_bytes(&self.info.data_type)
            .ok_or(DatasetError::FormatError(FormatError::PrecomputedNoReadableScale))?;
        let mut reader = ScaleReader::new(self.store.as_ref(), scale)?;
        let first = [0, 1, 2].map(|a| lo[a] / reader.chunk[a]);
        let last = [0, 1, 2].map(|a| (hi[a] - 1) / reader.chunk[a]);
        let total = (0..3).map(|a| last[a] - first[a] + 1).product::<u64>();

        let mut stats = CropStats::default();
        for z in first[2]..=last[2] {
            for y in first[1]..=last[1] {
                for x in first[0]..=last[0] {
                    let pos = [x, y, z];
                    let Some(encoded) = reader.chunk_bytes(pos).await? else {
                        stats.chunks_missing += 1;
                        continue;
                    };
                    let (c_lo, c_hi) = reader.chunk_box(pos);
                    let size = [0, 1, 2].map(|a| c_hi[a] - c_lo[a]);
                    let size = [
                        usize::try_from(size[0])?,
                        usize::try_from(size[1])?,
                        usize::try_from(size[2])?,
                    ];
                    let voxels = size[0] * size[1] * size[2] * channels;
                    let values = match scale.encoding.as_str() {
                        "compressed_segmentation" => decode_compressed_segmentation(
                            &encoded,
                            size,
                            block_size(scale).ok_or(DatasetError::FormatError(FormatError::PrecomputedNoReadableScale))?,
                            channels,
                            self.info.data_type == "uint64",
                        )?,
                        _ => decode_raw(&encoded, width, voxels)?,
                    };

                    let from = [0, 1, 2].map(|a| lo[a].max(c_lo[a]));
                    let to = [0, 1, 2].map(|a| hi[a].min(c_hi[a]));
                    let block = transpose(&values, size, channels, from, to, c_lo)?;
                    let subset = ArraySubset::new_with_start_shape(
                        (0..3).map(|a| from[a] - lo[a]).chain([0]).collect(),
                        (0..3).map(|a| to[a] - from[a]).chain([channel_count]).collect(),
                    )
                    .map_err(zarr_err)?;
                    store_values(array, &subset, block)?;
                    stats.chunks_written += 1;
                    if stats.chunks_written % 256 == 0 {
                        info!(
                            "{} of {total} chunks written",
                            stats.chunks_written + stats.chunks_missing
                        );
                    }
                }
            }
        }
        Ok(stats)
    }
}

/// `point - offset`, when it is not negative
fn shift(point: [u64; 3], offset: [i64; 3]) -> Option<[u64; 3]> {
    let mut out = [0u64; 3];
    for a in 0..3 {
        let p = i64::try_from(point[a]).ok()?;
        out[a] = u64::try_from(p.checked_sub(offset[a])?).ok()?;
    }
    Some(out)
}

fn crop_out_of_bounds(scale: &Scale, start: [u64; 3], end: [u64; 3]) -> DatasetError {
    UsageError::CropOutOfBounds {
        scale: scale.key.clone(),
        start,
        end,
    }
    .into()
}

/// Picks the box `[from, to)` out of a Fortran-order chunk starting at
/// `origin`, as a C-order `[x, y, z, channel]` block
fn transpose(
    values: &[u64],
    size: [usize; 3],
    channels: usize,
    from: [u64; 3],
    to: [u64; 3],
    origin: [u64; 3],
) -> DatasetResult<Vec<u64>> {
    let mut range = [0..0, 0..0, 0..0];
    for a in 0..3 {
        range[a] = usize::try_from(from[a] - origin[a])?..usize::try_from(to[a] - origin[a])?;
    }
    let mut out = Vec::with_capacity(range.iter().map(|r| r.len()).product::<usize>() * channels);
    for x in range[0].clone() {
        for y in range[1].clone() {
            for z in range[2].clone() {
                for c in 0..channels {
                    out.push(values[x + size[0] * (y + size[1] * (z + size[2] * c))]);
                }
            }
        }
    }
    Ok(out)
}

fn narrow<T: TryFrom<u64>>(values: Vec<u64>) -> DatasetResult<Vec<T>> {
    values
        .into_iter()
        .map(|v| T::try_from(v).map_err(|_| DatasetError::IntSizeError))
        .collect()
}

fn store_values(
    array: &Array<FilesystemStore>,
    subset: &ArraySubset,
    values: Vec<u64>,
) -> DatasetResult<()> {
    match array.data_type() {
        DataType::UInt8 => array.store_array_subset_elements(subset, &narrow::<u8>(values)?)?,
        DataType::UInt16 => array.store_array_subset_elements(subset, &narrow::<u16>(values)?)?,
        DataType::UInt32 => array.store_array_subset_elements(subset, &narrow::<u32>(values)?)?,
        _ => array.store_array_subset_elements::<u64>(subset, &values)?,
    }
    Ok(())
}
