use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};

use bytemuck::allocation::pod_collect_to_vec;
use log::debug;

use crate::{
    error::{DatasetError, DatasetResult, FormatError},
    normalize::{MetaValue, NumericArray, ToMeta},
    reader::EndianReader,
    util::fix_endianness,
    ByteOrder,
};

/// Tag groups nested deeper than this are rejected
pub const MAX_DEPTH: usize = 64;

const TAG_GROUP: u8 = 20;
const TAG_DATA: u8 = 21;
const TAG_END: u8 = 0;

const STRUCT: u64 = 15;
const STRING: u64 = 18;
const ARRAY: u64 = 20;

/// Size of a simple DM data type, `None` for compound and unknown types
#[rustfmt::skip]
fn simple_size(dm_type: u64) -> Option<usize> {
    Some(match dm_type {
        8 | 9 | 10     => 1,
        2 | 4          => 2,
        3 | 5 | 6      => 4,
        7 | 11 | 12    => 8,
        _ => return None,
    })
}

/// A Gatan Digital Micrograph file reduced to its tag tree
#[derive(Debug, Clone, PartialEq)]
pub struct DmFile {
    pub version: u32,
    /// Byte order of the tag data; structure fields are always big endian
    pub byte_order: ByteOrder,
    pub root: TagGroup,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TagGroup {
    pub sorted: bool,
    pub open: bool,
    pub entries: Vec<TagEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagEntry {
    /// Empty for unlabeled entries, which are common in lists
    pub label: String,
    pub node: TagNode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TagNode {
    Group(TagGroup),
    Data(TagData),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TagData {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Text(String),
    Struct(Vec<TagData>),
    Array(NumericArray),
    StructArray(Vec<Vec<TagData>>),
    /// An array larger than the read bound, left in the file
    Skipped { element_type: u64, count: u64 },
}

impl DmFile {
    /// Reads the tag tree of a DM3 or DM4 file, skipping arrays bigger than
    /// `max_array_bytes`
    pub fn open(path: &Path, max_array_bytes: u64) -> DatasetResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), max_array_bytes)
    }

    pub fn from_reader<R: Read + Seek>(reader: R, max_array_bytes: u64) -> DatasetResult<Self> {
        let mut parser = Parser {
            r: EndianReader::wrap(reader, ByteOrder::BigEndian),
            dm4: false,
            data_order: ByteOrder::BigEndian,
            max_array_bytes,
        };
        let version = parser.r.read_u32()?;
        parser.dm4 = match version {
            3 => false,
            4 => true,
            other => return Err(FormatError::DmVersionUnsupported(other).into()),
        };
        let _root_len = parser.read_len()?;
        parser.data_order = match parser.r.read_u32()? {
            1 => ByteOrder::LittleEndian,
            _ => ByteOrder::BigEndian,
        };
        let root = parser.read_group(0)?;
        Ok(DmFile {
            version,
            byte_order: parser.data_order,
            root,
        })
    }
}

struct Parser<R> {
    r: EndianReader<R>,
    dm4: bool,
    data_order: ByteOrder,
    max_array_bytes: u64,
}

impl<R: Read + Seek> Parser<R> {
    /// Sizes and counts: 32 bits in DM3, 64 bits in DM4, always big endian
    fn read_len(&mut self) -> DatasetResult<u64> {
        Ok(if self.dm4 {
            self.r.read_u64()?
        } else {
            self.r.read_u32()?.into()
        })
    }

    fn read_group(&mut self, depth: usize) -> DatasetResult<TagGroup> {
        if depth > MAX_DEPTH {
            return Err(FormatError::DmNestingTooDeep(MAX_DEPTH).into());
        }
        let sorted = self.r.read_u8()? != 0;
        let open = self.r.read_u8()? != 0;
        let count = self.read_len()?;
        let mut entries = Vec::new();
        for _ in 0..count {
            let kind = self.r.read_u8()?;
            if kind == TAG_END {
                break;
            }
            let label_len = self.r.read_u16()?;
            let label = self.r.read_bytes(label_len.into())?;
            // latin-1 labels are common, so no strict decoding
            let label = label.iter().map(|&b| char::from(b)).collect::<String>();
            if self.dm4 {
                let _tag_len = self.r.read_u64()?;
            }
            let node = match kind {
                TAG_GROUP => TagNode::Group(self.read_group(depth + 1)?),
                TAG_DATA => TagNode::Data(self.read_data()?),
                other => return Err(FormatError::DmInvalidTagKind(other).into()),
            };
            entries.push(TagEntry { label, node });
        }
        Ok(TagGroup {
            sorted,
            open,
            entries,
        })
    }

    fn read_data(&mut self) -> DatasetResult<TagData> {
        let mut delimiter = [0u8; 4];
        self.r.read_exact(&mut delimiter)?;
        if &delimiter != b"%%%%" {
            return Err(FormatError::DmMissingDelimiter.into());
        }
        let ninfo = self.read_len()?;
        if ninfo == 0 || ninfo > 1 << 16 {
            return Err(DatasetError::LimitsExceeded);
        }
        let info = (0..ninfo)
            .map(|_| self.read_len())
            .collect::<DatasetResult<Vec<u64>>>()?;
        match info[0] {
            STRUCT => {
                let fields = struct_fields(&info[1..])?;
                Ok(TagData::Struct(self.read_struct(&fields)?))
            }
            STRING => {
                let len = *info.get(1).ok_or(FormatError::DmUnsupportedType(STRING))?;
                let units = self.read_simple_array(4, len)?;
                Ok(TagData::Text(utf16_text(&units).unwrap_or_default()))
            }
            ARRAY => self.read_array(&info[1..]),
            simple => self.read_simple(simple),
        }
    }

    fn read_simple(&mut self, dm_type: u64) -> DatasetResult<TagData> {
        self.r.byte_order = self.data_order;
        let value = match dm_type {
            2 => self.r.read_i16().map(|v| TagData::Int(v.into())),
            3 => self.r.read_i32().map(|v| TagData::Int(v.into())),
            4 => self.r.read_u16().map(|v| TagData::UInt(v.into())),
            5 => self.r.read_u32().map(|v| TagData::UInt(v.into())),
            6 => self.r.read_f32().map(|v| TagData::Float(v.into())),
            7 => self.r.read_f64().map(TagData::Float),
            8 => self.r.read_u8().map(|v| TagData::Bool(v != 0)),
            9 => self.r.read_i8().map(|v| TagData::Int(v.into())),
            10 => self.r.read_u8().map(|v| TagData::UInt(v.into())),
            11 => self.r.read_i64().map(TagData::Int),
            12 => self.r.read_u64().map(TagData::UInt),
            other => {
                self.r.byte_order = ByteOrder::BigEndian;
                return Err(FormatError::DmUnsupportedType(other).into());
            }
        };
        self.r.byte_order = ByteOrder::BigEndian;
        Ok(value?)
    }

    fn read_struct(&mut self, fields: &[u64]) -> DatasetResult<Vec<TagData>> {
        fields.iter().map(|t| self.read_simple(*t)).collect()
    }

    fn read_array(&mut self, info: &[u64]) -> DatasetResult<TagData> {
        let (&element_type, rest) = info
            .split_first()
            .ok_or(FormatError::DmUnsupportedType(ARRAY))?;
        if element_type == STRUCT {
            // [15, name_len, nfields, (name_len, type)..., count]
            let (&count, field_info) = rest
                .split_last()
                .ok_or(FormatError::DmUnsupportedType(STRUCT))?;
            let fields = struct_fields(field_info)?;
            let row = fields
                .iter()
                .map(|t| simple_size(*t).ok_or(FormatError::DmUnsupportedType(*t)))
                .sum::<Result<usize, _>>()?;
            let bytes = count.saturating_mul(row as u64);
            // zero-width rows hold no data, whatever their count
            if row == 0 || bytes > self.max_array_bytes {
                debug!("skipping DM struct array of {count} rows of {row} bytes");
                self.r.skip(bytes)?;
                return Ok(TagData::Skipped {
                    element_type,
                    count,
                });
            }
            let rows = (0..count)
                .map(|_| self.read_struct(&fields))
                .collect::<DatasetResult<Vec<_>>>()?;
            return Ok(TagData::StructArray(rows));
        }
        let count = *rest
            .first()
            .ok_or(FormatError::DmUnsupportedType(ARRAY))?;
        let size = simple_size(element_type).ok_or(FormatError::DmUnsupportedType(element_type))?;
        let bytes = count.saturating_mul(size as u64);
        if bytes > self.max_array_bytes {
            debug!("skipping DM array of {count} elements of type {element_type}");
            self.r.skip(bytes)?;
            return Ok(TagData::Skipped {
                element_type,
                count,
            });
        }
        if element_type == 4 {
            let units = self.read_simple_array(4, count)?;
            if let Some(text) = utf16_text(&units) {
                return Ok(TagData::Text(text));
            }
            return Ok(TagData::Array(pod_collect_to_vec::<u8, u16>(&units).into()));
        }
        let data = self.read_simple_array(element_type, count)?;
        Ok(TagData::Array(numeric(element_type, &data)?))
    }

    /// Raw bytes of `count` simple values, in native byte order
    fn read_simple_array(&mut self, dm_type: u64, count: u64) -> DatasetResult<Vec<u8>> {
        let size = simple_size(dm_type).ok_or(FormatError::DmUnsupportedType(dm_type))?;
        let len = usize::try_from(count)?
            .checked_mul(size)
            .ok_or(DatasetError::LimitsExceeded)?;
        if len as u64 > self.max_array_bytes {
            return Err(DatasetError::LimitsExceeded);
        }
        let mut data = self.r.read_bytes(len)?;
        fix_endianness(&mut data, self.data_order, 8 * size as u8);
        Ok(data)
    }
}

/// Field types of a struct from `[name_len, nfields, (name_len, type)...]`
fn struct_fields(info: &[u64]) -> DatasetResult<Vec<u64>> {
    let nfields = usize::try_from(*info.get(1).ok_or(FormatError::DmUnsupportedType(STRUCT))?)?;
    let end = nfields
        .checked_mul(2)
        .and_then(|n| n.checked_add(2))
        .ok_or(DatasetError::LimitsExceeded)?;
    let pairs = info.get(2..end).ok_or(DatasetError::LimitsExceeded)?;
    Ok(pairs.chunks_exact(2).map(|p| p[1]).collect())
}

#[rustfmt::skip]
fn numeric(dm_type: u64, data: &[u8]) -> DatasetResult<NumericArray> {
    Ok(match dm_type {
        2       => pod_collect_to_vec::<u8, i16>(data).into(),
        3       => pod_collect_to_vec::<u8, i32>(data).into(),
        4       => pod_collect_to_vec::<u8, u16>(data).into(),
        5       => pod_collect_to_vec::<u8, u32>(data).into(),
        6       => pod_collect_to_vec::<u8, f32>(data).into(),
        7       => pod_collect_to_vec::<u8, f64>(data).into(),
        8 | 10  => data.to_vec().into(),
        9       => pod_collect_to_vec::<u8, i8>(data).into(),
        11      => pod_collect_to_vec::<u8, i64>(data).into(),
        12      => pod_collect_to_vec::<u8, u64>(data).into(),
        other => return Err(FormatError::DmUnsupportedType(other).into()),
    })
}

/// UTF-16 text from native-order code units; `None` when it is not text
fn utf16_text(units: &[u8]) -> Option<String> {
    let units = pod_collect_to_vec::<u8, u16>(units);
    let text = String::from_utf16(&units).ok()?;
    let text = text.trim_end_matches('\0');
    text.chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .then(|| text.to_string())
}

impl ToMeta for TagData {
    fn to_meta(&self) -> MetaValue {
        match self {
            TagData::Int(v) => MetaValue::Int(*v),
            TagData::UInt(v) => MetaValue::UInt(*v),
            TagData::Float(v) => MetaValue::Float(*v),
            TagData::Bool(v) => MetaValue::Bool(*v),
            TagData::Text(v) => MetaValue::Text(v.clone()),
            TagData::Struct(fields) => fields.to_meta(),
            TagData::Array(a) => MetaValue::Array(a.clone()),
            TagData::StructArray(rows) => MetaValue::List(rows.iter().map(|r| r.to_meta()).collect()),
            TagData::Skipped {
                element_type,
                count,
            } => MetaValue::object(
                "SkippedArray",
                [
                    ("element_type", MetaValue::from(*element_type)),
                    ("count", MetaValue::from(*count)),
                ],
            ),
        }
    }
}

impl ToMeta for TagNode {
    fn to_meta(&self) -> MetaValue {
        match self {
            TagNode::Group(g) => g.to_meta(),
            TagNode::Data(d) => d.to_meta(),
        }
    }
}

/// Groups with only unlabeled entries are lists, the rest are maps where an
/// unlabeled entry is keyed by its position
impl ToMeta for TagGroup {
    fn to_meta(&self) -> MetaValue {
        if !self.entries.is_empty() && self.entries.iter().all(|e| e.label.is_empty()) {
            return MetaValue::List(self.entries.iter().map(|e| e.node.to_meta()).collect());
        }
        MetaValue::Map(
            self.entries
                .iter()
                .enumerate()
                .map(|(i, e)| {
                    let key = if e.label.is_empty() {
                        i.to_string()
                    } else {
                        e.label.clone()
                    };
                    (key, e.node.to_meta())
                })
                .collect(),
        )
    }
}

impl ToMeta for DmFile {
    fn to_meta(&self) -> MetaValue {
        MetaValue::map([
            ("version", MetaValue::from(self.version)),
            ("byte_order", MetaValue::from(self.byte_order.name())),
            ("tags", self.root.to_meta()),
        ])
    }
}


#[cfg(test)]
mod test_dm3 {
    use super::fixture::DmWriter;
    use super::*;
    use crate::normalize::NumericData;
    use std::io::Cursor;

    fn sample(dm4: bool) -> Vec<u8> {
        let mut w = DmWriter::new(dm4, 3);
        w.data("Exposure", &[7], &0.5f64.to_le_bytes());
        w.group("ImageList", 2);
        w.group("", 1);
        w.data("Name", &[20, 4, 3], &[b'a', 0, b'b', 0, b'c', 0]);
        w.group("", 1);
        w.data("Dims", &[20, 5, 2], &[2, 0, 0, 0, 3, 0, 0, 0]);
        w.data("Origin", &[15, 0, 2, 0, 6, 0, 6], &[0, 0, 128, 63, 0, 0, 0, 64]);
        w.buf
    }

    #[test]
    fn test_dm3_tree() {
        let dm = DmFile::from_reader(Cursor::new(sample(false)), 1024).unwrap();
        assert_eq!(dm.version, 3);
        assert_eq!(dm.byte_order, ByteOrder::LittleEndian);
        let entries = &dm.root.entries;
        assert_eq!(entries[0].label, "Exposure");
        assert_eq!(entries[0].node, TagNode::Data(TagData::Float(0.5)));
        assert_eq!(
            entries[2].node,
            TagNode::Data(TagData::Struct(vec![TagData::Float(1.0), TagData::Float(2.0)]))
        );
        let TagNode::Group(list) = &entries[1].node else {
            panic!("expected group");
        };
        let TagNode::Group(second) = &list.entries[1].node else {
            panic!("expected group");
        };
        assert_eq!(
            second.entries[0].node,
            TagNode::Data(TagData::Array(NumericArray {
                data: NumericData::U32(vec![2, 3]),
                shape: None
            }))
        );
    }

    #[test]
    fn test_dm4_matches_dm3() {
        let dm3 = DmFile::from_reader(Cursor::new(sample(false)), 1024).unwrap();
        let dm4 = DmFile::from_reader(Cursor::new(sample(true)), 1024).unwrap();
        assert_eq!(dm4.version, 4);
        assert_eq!(dm3.root, dm4.root);
    }

    #[test]
    fn test_unlabeled_group_is_list() {
        let dm = DmFile::from_reader(Cursor::new(sample(false)), 1024).unwrap();
        let meta = dm.root.to_meta();
        let MetaValue::List(images) = meta.get("ImageList").unwrap() else {
            panic!("expected list");
        };
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].get("Name"), Some(&MetaValue::Text("abc".into())));
    }

    #[test]
    fn test_big_array_is_skipped() {
        let mut w = DmWriter::new(false, 2);
        w.data("Data", &[20, 2, 8], &[0u8; 16]);
        w.data("After", &[3], &7i32.to_le_bytes());
        let dm = DmFile::from_reader(Cursor::new(w.buf), 8).unwrap();
        assert_eq!(
            dm.root.entries[0].node,
            TagNode::Data(TagData::Skipped {
                element_type: 2,
                count: 8
            })
        );
        assert_eq!(dm.root.entries[1].node, TagNode::Data(TagData::Int(7)));
    }

    #[test]
    fn test_empty_struct_array_is_skipped() {
        let mut w = DmWriter::new(false, 2);
        w.data("Rows", &[20, 15, 0, 0, 20_000_000], &[]);
        w.data("After", &[3], &7i32.to_le_bytes());
        let dm = DmFile::from_reader(Cursor::new(w.buf), 1024).unwrap();
        assert_eq!(
            dm.root.entries[0].node,
            TagNode::Data(TagData::Skipped {
                element_type: STRUCT,
                count: 20_000_000
            })
        );
        assert_eq!(dm.root.entries[1].node, TagNode::Data(TagData::Int(7)));
    }

    #[test]
    fn test_struct_field_count_overflow() {
        let mut w = DmWriter::new(true, 1);
        w.data("S", &[15, 0, u64::MAX / 2 + 1], &[]);
        let err = DmFile::from_reader(Cursor::new(w.buf), 1024).unwrap_err();
        assert!(matches!(err, DatasetError::LimitsExceeded));
    }

    #[test]
    fn test_binary_uint16_array_stays_numeric() {
        let mut w = DmWriter::new(false, 1);
        w.data("Raw", &[20, 4, 3], &[1, 0, 2, 0, 0, 1]);
        let dm = DmFile::from_reader(Cursor::new(w.buf), 1024).unwrap();
        assert_eq!(
            dm.root.entries[0].node,
            TagNode::Data(TagData::Array(NumericArray {
                data: NumericData::U16(vec![1, 2, 256]),
                shape: None
            }))
        );
    }

    #[test]
    fn test_errors() {
        let err = DmFile::from_reader(Cursor::new(5u32.to_be_bytes()), 8).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::FormatError(FormatError::DmVersionUnsupported(5))
        ));

        let mut w = DmWriter::new(false, 1);
        w.label(21, "x");
        w.buf.extend(b"%%%#");
        let err = DmFile::from_reader(Cursor::new(w.buf), 8).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::FormatError(FormatError::DmMissingDelimiter)
        ));
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut w = DmWriter::new(false, 1);
        for _ in 0..=MAX_DEPTH {
            w.group("g", 1);
        }
        let err = DmFile::from_reader(Cursor::new(w.buf), 8).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::FormatError(FormatError::DmNestingTooDeep(_))
        ));
    }
}
