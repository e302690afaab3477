use std::{
    collections::BTreeMap,
    io::{self, Read, Seek},
};

use log::debug;

use crate::{
    error::{DatasetError, DatasetResult},
    reader::EndianReader,
    tiff::{
        entry::{BufferedEntry, IfdEntry},
        tags::Tag,
        value::Value,
    },
    ByteOrder,
};

pub type Directory = BTreeMap<Tag, IfdEntry>;

/// Base IFD struct without any special-cased metadata
///
/// Entries that could not be decoded are kept in `errors` with the reason,
/// so a single broken tag does not hide the rest of the page.
#[derive(Debug, PartialEq, Default, Clone)]
pub struct Ifd {
    data: Directory,
    errors: BTreeMap<Tag, String>,
}

impl Ifd {
    /// Creates this ifd from a buffer holding the entry count and entries.
    ///
    /// Tags that fit in the offset field are directly added as an
    /// `IfdEntry::Value`, otherwise it will be a `type, count, offset` struct
    pub fn from_buffer(buf: &[u8], byte_order: ByteOrder, bigtiff: bool) -> DatasetResult<Self> {
        let mut ifd = Ifd::default();
        let mut r = EndianReader::wrap(io::Cursor::new(buf), byte_order);
        let num_entries: u64 = if bigtiff {
            r.read_u64()?
        } else {
            r.read_u16()?.into()
        };
        for _ in 0..num_entries {
            let tag = Tag::from_u16_exhaustive(r.read_u16()?);
            let entry = match IfdEntry::from_reader(&mut r, bigtiff) {
                Ok(entry) => entry,
                Err(DatasetError::IoError(e)) => return Err(e.into()),
                Err(e) => {
                    ifd.errors.insert(tag, e.to_string());
                    continue;
                }
            };
            if ifd.data.contains_key(&tag) || ifd.errors.contains_key(&tag) {
                debug!("duplicate tag {} ignored", tag.name());
                continue;
            }
            ifd.data.insert(tag, entry);
        }
        Ok(ifd)
    }

    /// Reads the directory at `offset` and returns it with the offset of the
    /// next one (0 at the end of the chain)
    pub fn read<R: Read + Seek>(
        r: &mut EndianReader<R>,
        offset: u64,
        bigtiff: bool,
    ) -> DatasetResult<(Self, u64)> {
        r.goto_offset(offset)?;
        let (count_bytes, entry_size) = if bigtiff { (8, 20) } else { (2, 12) };
        let mut buf = r.read_bytes(count_bytes)?;
        let num_entries = if bigtiff {
            r.byte_order.u64(buf.as_slice().try_into()?)
        } else {
            r.byte_order.u16(buf.as_slice().try_into()?).into()
        };
        // a classic directory holds at most 65535 entries
        if num_entries > u16::MAX.into() {
            return Err(DatasetError::LimitsExceeded);
        }
        buf.extend(r.read_bytes(usize::try_from(num_entries)? * entry_size)?);
        let next = if bigtiff {
            r.read_u64()?
        } else {
            r.read_u32()?.into()
        };
        Ok((Ifd::from_buffer(&buf, r.byte_order, bigtiff)?, next))
    }

    /// Reads every out-of-line value.
    ///
    /// Values bigger than `max_tag_bytes` stay as `IfdEntry::Offset`, values
    /// that cannot be read move to the error list.
    pub fn resolve_values<R: Read + Seek>(&mut self, r: &mut EndianReader<R>, max_tag_bytes: u64) {
        let pending: Vec<(Tag, IfdEntry)> = self
            .data
            .iter()
            .filter(|(_, e)| matches!(e, IfdEntry::Offset { .. }))
            .map(|(t, e)| (*t, e.clone()))
            .collect();
        for (tag, entry) in pending {
            let IfdEntry::Offset {
                tag_type,
                count,
                offset,
            } = entry
            else {
                continue;
            };
            let size = count.saturating_mul(tag_type.size() as u64);
            if size > max_tag_bytes {
                debug!("tag {} holds {size} bytes, not reading it", tag.name());
                continue;
            }
            let value = r
                .goto_offset(offset)
                .map_err(DatasetError::from)
                .and_then(|_| BufferedEntry::from_reader(r, tag_type, count))
                .and_then(Value::try_from);
            match value {
                Ok(value) => {
                    self.data.insert(tag, IfdEntry::Value(value));
                }
                Err(e) => {
                    self.data.remove(&tag);
                    self.errors.insert(tag, e.to_string());
                }
            }
        }
    }

    /// Get a tag. Will return None if the tag isn't present (in this tiff/Image)
    pub fn get_tag(&self, tag: &Tag) -> Option<&IfdEntry> {
        self.data.get(tag)
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.data.contains_key(tag)
    }

    /// Decoded value of a tag
    pub fn value(&self, tag: &Tag) -> Option<&Value> {
        match self.data.get(tag)? {
            IfdEntry::Value(v) => Some(v),
            IfdEntry::Offset { .. } => None,
        }
    }

    pub fn u64_value(&self, tag: &Tag) -> Option<u64> {
        self.value(tag)?.to_u64()
    }

    pub fn u64_values(&self, tag: &Tag) -> Option<Vec<u64>> {
        self.value(tag)?.to_u64_vec()
    }

    /// First string of an ASCII tag
    pub fn ascii(&self, tag: &Tag) -> Option<&str> {
        match self.value(tag)? {
            Value::Ascii(s) => Some(s),
            Value::List(items) => items.first()?.as_str(),
            _ => None,
        }
    }

    /// Byte content of BYTE, UNDEFINED or ASCII tags
    pub fn raw_bytes(&self, tag: &Tag) -> Option<Vec<u8>> {
        match self.value(tag)? {
            Value::Bytes(b) => Some(b.clone()),
            Value::Ascii(s) => Some(s.as_bytes().to_vec()),
            Value::Byte(b) | Value::Undefined(b) => Some(vec![*b]),
            Value::List(items) => items
                .iter()
                .map(|v| match v {
                    Value::Byte(b) | Value::Undefined(b) => Some(*b),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Tag, &IfdEntry)> {
        self.data.iter()
    }

    /// Tags that could not be decoded, with the reason
    pub fn errors(&self) -> impl Iterator<Item = (&Tag, &String)> {
        self.errors.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
