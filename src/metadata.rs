//! Extraction entry points.
//!
//! Every extractor checks its input, skips when its output already exists,
//! builds a [`MetaValue`] tree from the parsed file, normalizes it and writes
//! it with [`save_metadata_as_json`]. Progress goes to the `log` facade.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
    time::Instant,
};

use log::{debug, error, info};
use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Value};

use crate::{
    config::Config,
    dm3::DmFile,
    error::{DatasetError, DatasetResult, UsageError},
    normalize::{MetaValue, Normalizer, ToMeta},
    tiff::{Page, Tag, TiffFile},
    util::{elapsed_secs, metadata_file_for},
    volume::VolumeInfo,
    zarr::ZarrNode,
    ByteOrder,
};

/// What an extractor did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Written,
    /// The output already existed, or there was nothing to write
    Skipped,
}

const NO_OME: &str = "No OME-XML metadata found at global level.";

/// Shared skeleton of the extractors: input check, skip check, timing, save
fn extract(
    input: &Path,
    out: &Path,
    build: impl FnOnce() -> DatasetResult<MetaValue>,
    config: &Config,
) -> DatasetResult<Outcome> {
    if !input.exists() {
        return Err(DatasetError::MissingInput(input.to_path_buf()));
    }
    if out.exists() {
        info!(
            "Metadata file {} already exists. Skipping extraction.",
            out.display()
        );
        return Ok(Outcome::Skipped);
    }
    info!("Metadata file {} does not exist. Extracting...", out.display());
    let start = Instant::now();
    let meta = build()?;
    let json = Normalizer::new(config.normalize.clone()).normalize(&meta);
    info!(
        "Metadata extraction completed in {} seconds.",
        elapsed_secs(start)
    );
    save_metadata_as_json(&json, out)
}

/// PIL-style image mode of a page
fn image_mode(page: &Page, byte_order: ByteOrder) -> String {
    let photometric = page.ifd.u64_value(&Tag::PhotometricInterpretation);
    let samples = page.samples_per_pixel();
    let mode = match (photometric, page.dtype(), samples) {
        (Some(0 | 1) | None, Some("bool"), 1) => "1",
        (Some(0 | 1) | None, Some("uint8"), 1) => "L",
        (Some(0 | 1) | None, Some("uint8"), 2) => "LA",
        (Some(0 | 1) | None, Some("uint16"), 1) => match byte_order {
            ByteOrder::LittleEndian => "I;16",
            ByteOrder::BigEndian => "I;16B",
        },
        (Some(0 | 1) | None, Some("int16"), 1) => "I;16S",
        (Some(0 | 1) | None, Some("int32" | "uint32"), 1) => "I",
        (Some(0 | 1) | None, Some("float32"), 1) => "F",
        (Some(2), Some("uint8"), 3) => "RGB",
        (Some(2), Some("uint8"), 4) => "RGBA",
        (Some(3), _, 1) => "P",
        (Some(5), Some("uint8"), 4) => "CMYK",
        (Some(6), Some("uint8"), 3) => "YCbCr",
        (Some(8), Some("uint8"), 3) => "LAB",
        _ => return format!("{}{}", page.dtype().unwrap_or("unknown"), samples_suffix(samples)),
    };
    mode.to_string()
}

fn samples_suffix(samples: u64) -> String {
    if samples > 1 {
        format!("x{samples}")
    } else {
        String::new()
    }
}

/// PIL's name of a TIFF compression scheme
#[rustfmt::skip]
fn pil_compression(code: u64) -> String {
    match code {
        1     => "raw",
        2     => "tiff_ccitt",
        3     => "group3",
        4     => "group4",
        5     => "tiff_lzw",
        6     => "tiff_jpeg",
        7     => "jpeg",
        8     => "tiff_adobe_deflate",
        32773 => "packbits",
        32946 => "tiff_deflate",
        34925 => "lzma",
        50000 => "zstd",
        50001 => "webp",
        other => return other.to_string(),
    }
    .to_string()
}

fn brief_tif_meta(tif: &TiffFile) -> MetaValue {
    let Some(page) = tif.first_page() else {
        return MetaValue::map([("Frames", MetaValue::List(vec![MetaValue::from(0usize)]))]);
    };
    let (x, y) = page.resolution();
    let mut info = vec![
        (
            "compression",
            MetaValue::from(pil_compression(
                page.ifd.u64_value(&Tag::Compression).unwrap_or(1),
            )),
        ),
        (
            "resolution",
            MetaValue::List(vec![MetaValue::from(x), MetaValue::from(y)]),
        ),
    ];
    if page.resolution_unit() == "INCH" {
        info.push((
            "dpi",
            MetaValue::List(vec![MetaValue::from(x), MetaValue::from(y)]),
        ));
    }
    if let Some(description) = page.description() {
        info.push(("description", MetaValue::from(description)));
    }
    let frames = tif.pages_count();
    let mut fields = vec![
        (
            "ImageSize".to_string(),
            MetaValue::List(vec![
                MetaValue::from(page.width()),
                MetaValue::from(page.length()),
            ]),
        ),
        ("Format".to_string(), MetaValue::from("TIFF")),
        (
            "Mode".to_string(),
            MetaValue::from(image_mode(page, tif.byte_order)),
        ),
        ("Info".to_string(), MetaValue::map(info)),
        // one-element list, the shape existing brief metadata files have
        (
            "Frames".to_string(),
            MetaValue::List(vec![MetaValue::from(frames)]),
        ),
        ("IsMultiPage".to_string(), MetaValue::Bool(frames > 1)),
        ("IsAnimated".to_string(), MetaValue::Bool(frames > 1)),
    ];
    if let MetaValue::Map(tags) = page.tags_meta() {
        fields.extend(tags);
    }
    MetaValue::Map(fields)
}

/// Image size, mode, frame count and the first page's tags
pub fn get_brief_tif_metadata(file: &Path, out: &Path, config: &Config) -> DatasetResult<Outcome> {
    extract(
        file,
        out,
        || Ok(brief_tif_meta(&TiffFile::open(file, &config.tiff)?)),
        config,
    )
}

fn page_meta(page: &Page) -> MetaValue {
    let (x, y) = page.resolution();
    MetaValue::map([
        ("page_index", MetaValue::from(page.index)),
        (
            "shape",
            MetaValue::List(page.shape().into_iter().map(MetaValue::from).collect()),
        ),
        ("dtype", MetaValue::from(page.dtype())),
        ("is_tiled", MetaValue::Bool(page.is_tiled())),
        ("compression", MetaValue::from(page.compression())),
        ("photometric", MetaValue::from(page.photometric())),
        (
            "resolution",
            MetaValue::List(vec![MetaValue::from(x), MetaValue::from(y)]),
        ),
        ("resolution_unit", MetaValue::from(page.resolution_unit())),
        ("is_contiguous", MetaValue::Bool(page.is_contiguous())),
        ("is_subsampled", MetaValue::Bool(page.is_subsampled())),
        ("image_description", MetaValue::from(page.description())),
        ("page_tiff_tags", page.tags_meta()),
    ])
}

fn all_tif_meta(tif: &TiffFile) -> MetaValue {
    let global_info = MetaValue::map([
        ("is_bigtiff", MetaValue::Bool(tif.is_bigtiff())),
        ("is_ome", MetaValue::Bool(tif.is_ome())),
        ("is_lsm", MetaValue::Bool(tif.is_lsm())),
        ("is_fei", MetaValue::Bool(tif.is_fei())),
        ("byteorder", MetaValue::from(tif.byteorder())),
        ("series_count", MetaValue::from(tif.series_count())),
        ("pages_count", MetaValue::from(tif.pages_count())),
    ]);
    let mut fields = vec![
        ("global_info", global_info),
        (
            "ome_xml_global",
            MetaValue::from(tif.ome_metadata().unwrap_or(NO_OME)),
        ),
    ];
    if tif.is_lsm() {
        fields.push(("lsm_metadata", tif.lsm_metadata().into()));
    }
    if tif.is_fei() {
        fields.push(("fei_metadata", tif.fei_metadata().into()));
    }
    fields.push((
        "pages",
        MetaValue::List(tif.pages.iter().map(page_meta).collect()),
    ));
    MetaValue::map(fields)
}

/// Global file information, proprietary metadata and every page's tags
pub fn extract_all_tif_metadata(
    file: &Path,
    out: &Path,
    config: &Config,
) -> DatasetResult<Outcome> {
    extract(
        file,
        out,
        || {
            info!("Extracting all available metadata from {}...", file.display());
            Ok(all_tif_meta(&TiffFile::open(file, &config.tiff)?))
        },
        config,
    )
}

/// The group/array tree of a local Zarr hierarchy
pub fn extract_zarr_metadata(zarr_dir: &Path, out: &Path, config: &Config) -> DatasetResult<Outcome> {
    extract(
        zarr_dir,
        out,
        || {
            let root = ZarrNode::open(zarr_dir)?;
            Ok(MetaValue::map([
                ("zarr_path", MetaValue::from(zarr_dir.display().to_string())),
                ("summary", root.summary().to_meta()),
                ("hierarchy", root.to_meta()),
            ]))
        },
        config,
    )
}

/// Writes the tag tree of a DM3/DM4 file to `<out_folder>/<stem>_metadata.json`.
///
/// Files without a `.dm3` or `.dm4` extension are skipped.
pub fn extract_dm3_metadata(
    file: &Path,
    out_folder: &Path,
    config: &Config,
) -> DatasetResult<Outcome> {
    let is_dm = file
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("dm3") || e.eq_ignore_ascii_case("dm4"));
    if !is_dm {
        debug!("{} is not a DM file, skipping", file.display());
        return Ok(Outcome::Skipped);
    }
    let out = metadata_file_for(out_folder, file);
    extract(
        file,
        &out,
        || Ok(DmFile::open(file, config.dm.max_array_bytes)?.to_meta()),
        config,
    )
}

/// Writes a precomputed volume descriptor. `None` means the descriptor was
/// never downloaded.
pub fn get_volume_info_metadata(
    volume_info: Option<&VolumeInfo>,
    out: &Path,
    config: &Config,
) -> DatasetResult<Outcome> {
    if out.exists() {
        info!(
            "Metadata file {} already exists. Skipping extraction.",
            out.display()
        );
        return Ok(Outcome::Skipped);
    }
    let Some(volume_info) = volume_info else {
        info!("Metadata extraction for a volume info can only be performed at the end of the download process. Skipping extraction.");
        return Ok(Outcome::Skipped);
    };
    info!("Metadata file {} does not exist. Extracting...", out.display());
    let start = Instant::now();
    let json = Normalizer::new(config.normalize.clone()).normalize(&volume_info.to_meta());
    let outcome = save_metadata_as_json(&json, out)?;
    info!(
        "Metadata extraction completed in {} seconds.",
        elapsed_secs(start)
    );
    Ok(outcome)
}

/// Writes `metadata` as 4-space indented JSON, creating parent directories.
///
/// Objects carrying an `"error"` key are logged and not written.
pub fn save_metadata_as_json(metadata: &Value, out: &Path) -> DatasetResult<Outcome> {
    if let Some(err) = metadata.get("error") {
        error!("Error in obtained metadata: {err}");
        return Ok(Outcome::Skipped);
    }
    if out.file_name().is_none() {
        return Err(UsageError::OutputWithoutFileName(out.to_path_buf()).into());
    }
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(out)?);
    let mut ser = serde_json::Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
    metadata.serialize(&mut ser)?;
    writer.flush()?;
    info!("Metadata saved to {}", out.display());
    Ok(Outcome::Written)
}
