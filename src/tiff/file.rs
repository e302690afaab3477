use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};

use log::{debug, warn};

use crate::{
    config::TiffOptions,
    error::{DatasetError, DatasetResult, FormatError},
    normalize::{MetaValue, ToMeta},
    reader::EndianReader,
    tiff::{
        entry::IfdEntry,
        ifd::Ifd,
        proprietary,
        tags::{compression_name, photometric_name, resolution_unit_name, Tag},
        value::Value,
    },
    ByteOrder,
};

/// The directory chain of a TIFF file, with every page's tags decoded.
///
/// Pixel data is never read.
#[derive(Debug, Clone)]
pub struct TiffFile {
    pub byte_order: ByteOrder,
    pub bigtiff: bool,
    pub pages: Vec<Page>,
}

impl TiffFile {
    pub fn open(path: &Path, options: &TiffOptions) -> DatasetResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), options)
    }

    pub fn from_reader<R: Read + Seek>(reader: R, options: &TiffOptions) -> DatasetResult<Self> {
        let mut r = EndianReader::wrap(reader, ByteOrder::LittleEndian);
        let (bigtiff, first) = read_header(&mut r)?;

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        let mut next = first;
        while next != 0 {
            if pages.len() >= options.max_pages {
                warn!("stopping after {} pages", options.max_pages);
                break;
            }
            if !visited.insert(next) {
                warn!("{}, stopping", FormatError::CycleInOffsets(next));
                break;
            }
            let (mut ifd, following) = match Ifd::read(&mut r, next, bigtiff) {
                Ok(read) => read,
                Err(e) if pages.is_empty() => return Err(e),
                Err(e) => {
                    warn!("cannot read IFD at offset {next}: {e}, stopping");
                    break;
                }
            };
            ifd.resolve_values(&mut r, options.max_tag_bytes);
            pages.push(Page {
                index: pages.len(),
                offset: next,
                ifd,
            });
            next = following;
        }
        debug!("read {} pages", pages.len());
        Ok(TiffFile {
            byte_order: r.byte_order,
            bigtiff,
            pages,
        })
    }

    /// `"<"` for little endian, `">"` for big endian
    pub fn byteorder(&self) -> &'static str {
        self.byte_order.marker()
    }

    pub fn is_bigtiff(&self) -> bool {
        self.bigtiff
    }

    pub fn pages_count(&self) -> usize {
        self.pages.len()
    }

    pub fn first_page(&self) -> Option<&Page> {
        self.pages.first()
    }

    /// The first page's description is an OME-XML document
    pub fn is_ome(&self) -> bool {
        self.first_page()
            .and_then(Page::description)
            .is_some_and(|d| d.trim_end().ends_with("OME>"))
    }

    pub fn is_lsm(&self) -> bool {
        self.first_page()
            .is_some_and(|p| p.ifd.contains(&Tag::CZ_LSMINFO))
    }

    pub fn is_fei(&self) -> bool {
        self.first_page().is_some_and(|p| {
            p.ifd.contains(&Tag::FEI_SFEG) || p.ifd.contains(&Tag::FEI_HELIOS)
        })
    }

    pub fn is_imagej(&self) -> bool {
        self.first_page()
            .and_then(Page::description)
            .is_some_and(|d| d.starts_with("ImageJ="))
    }

    pub fn ome_metadata(&self) -> Option<&str> {
        if !self.is_ome() {
            return None;
        }
        self.first_page().and_then(Page::description)
    }

    pub fn lsm_metadata(&self) -> Option<MetaValue> {
        let bytes = self.first_page()?.ifd.raw_bytes(&Tag::CZ_LSMINFO)?;
        proprietary::lsm_info(&bytes)
    }

    pub fn fei_metadata(&self) -> Option<MetaValue> {
        let page = self.first_page()?;
        let text = page
            .ifd
            .ascii(&Tag::FEI_HELIOS)
            .or_else(|| page.ifd.ascii(&Tag::FEI_SFEG))?;
        Some(proprietary::fei_ini(text))
    }

    /// Number of image series.
    ///
    /// OME files count their `Image` elements and ImageJ hyperstacks are one
    /// series. Otherwise consecutive full-resolution pages with the same
    /// shape, dtype and compression form a series.
    pub fn series_count(&self) -> usize {
        if self.pages.is_empty() {
            return 0;
        }
        if let Some(xml) = self.ome_metadata() {
            let images = xml.matches("<Image ").count() + xml.matches("<Image>").count();
            return images.max(1);
        }
        if self.is_imagej() || self.is_lsm() {
            return 1;
        }
        let mut count = 0;
        let mut previous = None;
        for page in self.pages.iter().filter(|p| !p.is_reduced()) {
            let key = (page.shape(), page.dtype(), page.compression());
            if previous.as_ref() != Some(&key) {
                count += 1;
                previous = Some(key);
            }
        }
        count.max(1)
    }
}

fn read_header<R: Read + Seek>(r: &mut EndianReader<R>) -> DatasetResult<(bool, u64)> {
    let mut magic = [0u8; 2];
    r.read_exact(&mut magic)
        .map_err(|_| DatasetError::from(FormatError::TiffSignatureNotFound))?;
    r.byte_order = match &magic {
        b"II" => ByteOrder::LittleEndian,
        b"MM" => ByteOrder::BigEndian,
        _ => return Err(FormatError::TiffSignatureNotFound.into()),
    };
    match r.read_u16()? {
        42 => Ok((false, r.read_u32()?.into())),
        43 => {
            let offset_size = r.read_u16()?;
            let zero = r.read_u16()?;
            if offset_size != 8 || zero != 0 {
                return Err(FormatError::TiffSignatureInvalid.into());
            }
            Ok((true, r.read_u64()?))
        }
        _ => Err(FormatError::TiffSignatureInvalid.into()),
    }
}

/// One IFD of the chain
#[derive(Debug, Clone)]
pub struct Page {
    pub index: usize,
    /// File offset of the IFD
    pub offset: u64,
    pub ifd: Ifd,
}

impl Page {
    fn u64_or(&self, tag: Tag, default: u64) -> u64 {
        self.ifd.u64_value(&tag).unwrap_or(default)
    }

    pub fn width(&self) -> u64 {
        self.u64_or(Tag::ImageWidth, 0)
    }

    pub fn length(&self) -> u64 {
        self.u64_or(Tag::ImageLength, 0)
    }

    pub fn samples_per_pixel(&self) -> u64 {
        self.u64_or(Tag::SamplesPerPixel, 1)
    }

    /// Bit 0 of NewSubfileType marks reduced-resolution copies
    pub fn is_reduced(&self) -> bool {
        self.u64_or(Tag::NewSubfileType, 0) & 1 == 1
    }

    /// Array shape the page decodes to. Planar pages put samples first,
    /// contiguous ones last; singleton depth and sample axes are dropped.
    pub fn shape(&self) -> Vec<u64> {
        let samples = self.samples_per_pixel();
        let depth = self.u64_or(Tag::ImageDepth, 1);
        let planar = self.u64_or(Tag::PlanarConfiguration, 1) == 2;
        let mut shape = Vec::with_capacity(4);
        if planar && samples > 1 {
            shape.push(samples);
        }
        if depth > 1 {
            shape.push(depth);
        }
        shape.push(self.length());
        shape.push(self.width());
        if !planar && samples > 1 {
            shape.push(samples);
        }
        shape
    }

    /// numpy name of the sample type, `None` for bit depths numpy lacks
    #[rustfmt::skip]
    pub fn dtype(&self) -> Option<&'static str> {
        let bits = self
            .ifd
            .u64_values(&Tag::BitsPerSample)
            .and_then(|b| b.first().copied())
            .unwrap_or(1);
        let format = self
            .ifd
            .u64_values(&Tag::SampleFormat)
            .and_then(|f| f.first().copied())
            .unwrap_or(1);
        Some(match (format, bits) {
            (1, 1)  => "bool",
            (1, 8)  => "uint8",
            (1, 16) => "uint16",
            (1, 32) => "uint32",
            (1, 64) => "uint64",
            (2, 8)  => "int8",
            (2, 16) => "int16",
            (2, 32) => "int32",
            (2, 64) => "int64",
            (3, 16) => "float16",
            (3, 32) => "float32",
            (3, 64) => "float64",
            (6, 64) => "complex64",
            (6, 128) => "complex128",
            _ => return None,
        })
    }

    pub fn is_tiled(&self) -> bool {
        self.ifd.contains(&Tag::TileWidth)
    }

    fn compression_code(&self) -> u64 {
        self.u64_or(Tag::Compression, 1)
    }

    pub fn compression(&self) -> String {
        compression_name(u16::try_from(self.compression_code()).unwrap_or(u16::MAX)).into_owned()
    }

    pub fn photometric(&self) -> Option<String> {
        let code = u16::try_from(self.ifd.u64_value(&Tag::PhotometricInterpretation)?).ok()?;
        Some(photometric_name(code).into_owned())
    }

    /// X and Y resolution, 1 when absent
    pub fn resolution(&self) -> (f64, f64) {
        let get = |tag| {
            self.ifd
                .value(&tag)
                .and_then(Value::to_f64)
                .unwrap_or(1.0)
        };
        (get(Tag::XResolution), get(Tag::YResolution))
    }

    /// Name of the resolution unit, `NONE` when the tag is absent
    pub fn resolution_unit(&self) -> String {
        match self.ifd.u64_value(&Tag::ResolutionUnit) {
            Some(code) => resolution_unit_name(u16::try_from(code).unwrap_or(u16::MAX)).into_owned(),
            None => "NONE".to_string(),
        }
    }

    /// Uncompressed data stored in one run of bytes
    pub fn is_contiguous(&self) -> bool {
        if self.compression_code() != 1 {
            return false;
        }
        let (offsets, counts) = if self.is_tiled() {
            (Tag::TileOffsets, Tag::TileByteCounts)
        } else {
            (Tag::StripOffsets, Tag::StripByteCounts)
        };
        let (Some(offsets), Some(counts)) =
            (self.ifd.u64_values(&offsets), self.ifd.u64_values(&counts))
        else {
            return false;
        };
        if offsets.is_empty() || offsets.len() != counts.len() {
            return false;
        }
        offsets
            .windows(2)
            .zip(&counts)
            .all(|(pair, count)| pair[0].saturating_add(*count) == pair[1])
    }

    /// YCbCr data with chroma subsampling that is not handled by JPEG
    pub fn is_subsampled(&self) -> bool {
        if self.ifd.u64_value(&Tag::PhotometricInterpretation) != Some(6)
            || self.compression_code() == 7
        {
            return false;
        }
        let sub = self
            .ifd
            .u64_values(&Tag::YCbCrSubSampling)
            .unwrap_or_else(|| vec![2, 2]);
        sub != [1, 1]
    }

    pub fn description(&self) -> Option<&str> {
        self.ifd.ascii(&Tag::ImageDescription)
    }

    /// Every tag of the page by name, in tag order.
    ///
    /// Tags that failed to decode carry `"Error reading tag: <reason>"`,
    /// tags too large to read are described by a `SkippedTag` object.
    pub fn tags_meta(&self) -> MetaValue {
        let mut tags: Vec<(Tag, MetaValue)> = self
            .ifd
            .entries()
            .map(|(tag, entry)| {
                let meta = match entry {
                    IfdEntry::Value(v) => v.to_meta(),
                    IfdEntry::Offset {
                        tag_type,
                        count,
                        offset,
                    } => MetaValue::object(
                        "SkippedTag",
                        [
                            ("type", MetaValue::from(format!("{tag_type:?}"))),
                            ("count", MetaValue::from(*count)),
                            ("offset", MetaValue::from(*offset)),
                        ],
                    ),
                };
                (*tag, meta)
            })
            .chain(self.ifd.errors().map(|(tag, reason)| {
                (*tag, MetaValue::Text(format!("Error reading tag: {reason}")))
            }))
            .collect();
        tags.sort_by_key(|(tag, _)| *tag);
        MetaValue::Map(
            tags.into_iter()
                .map(|(tag, meta)| (tag.name().into_owned(), meta))
                .collect(),
        )
    }
}
