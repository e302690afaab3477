use std::io::Read;

use bytemuck::allocation::pod_collect_to_vec;

use crate::{
    error::{DatasetError, DatasetResult, FormatError},
    reader::EndianReader,
    tiff::{tags::TagType, value::Value},
    util::fix_endianness,
};

/// One IFD entry as found in the directory
#[derive(Debug, PartialEq, Clone)]
pub enum IfdEntry {
    /// The value lives elsewhere in the file
    Offset {
        tag_type: TagType,
        count: u64,
        offset: u64,
    },
    Value(Value),
}

impl IfdEntry {
    /// Create this entry from an EndianReader
    ///
    /// The reader should have its cursor at the start of tag_type, not at tag.
    /// The whole entry is always consumed, also when the type is invalid, so
    /// the caller can continue with the next entry.
    ///
    /// If the value fits in the offset field, it is decoded right away:
    /// ```
    /// # use bioimage_datasets::ByteOrder;
    /// # use bioimage_datasets::{tiff::{value::Value, entry::IfdEntry}, reader::EndianReader};
    /// let entry_buf = [
    ///     0x03, 0x00,                         // Type (SHORT)
    ///     0x01, 0x00, 0x00, 0x00,             // Count (1)
    ///     0x2C, 0x01, 0x00, 0x00,             // Offset = Value (300)
    /// ];
    /// let mut r = EndianReader::wrap(std::io::Cursor::new(entry_buf), ByteOrder::LittleEndian);
    /// assert_eq!(IfdEntry::from_reader(&mut r, false).unwrap(), IfdEntry::Value(Value::Short(300)));
    /// ```
    /// Otherwise an offset is saved
    /// ```
    /// # use bioimage_datasets::ByteOrder;
    /// # use bioimage_datasets::{tiff::{tags::TagType, entry::IfdEntry}, reader::EndianReader};
    /// let entry_buf = [
    ///     0x03, 0x00,                         // Type (SHORT)
    ///     0x03, 0x00, 0x00, 0x00,             // Count (3)
    ///     0x2C, 0x01, 0x00, 0x00,             // Offset (300)
    /// ];
    /// let mut r = EndianReader::wrap(std::io::Cursor::new(entry_buf), ByteOrder::LittleEndian);
    /// assert_eq!(IfdEntry::from_reader(&mut r, false).unwrap(), IfdEntry::Offset {
    ///     tag_type: TagType::SHORT,
    ///     count: 3,
    ///     offset: 300,
    /// });
    /// ```
    pub fn from_reader<R: Read>(r: &mut EndianReader<R>, bigtiff: bool) -> DatasetResult<Self> {
        let t_u16 = r.read_u16()?;
        let count: u64 = if bigtiff {
            r.read_u64()?
        } else {
            r.read_u32()?.into()
        };
        let field_len = if bigtiff { 8 } else { 4 };
        let mut field = r.read_bytes(field_len)?;

        let tag_type =
            TagType::from_u16(t_u16).ok_or(FormatError::InvalidTagValueType(t_u16))?;
        let Some(value_bytes) = count.checked_mul(tag_type.size().try_into()?) else {
            return Err(DatasetError::LimitsExceeded);
        };
        if value_bytes > field_len as u64 {
            let offset = if bigtiff {
                r.byte_order.u64(field.as_slice().try_into()?)
            } else {
                r.byte_order.u32(field.as_slice().try_into()?).into()
            };
            return Ok(IfdEntry::Offset {
                tag_type,
                count,
                offset,
            });
        }
        // value_bytes <= field_len here
        field.truncate(value_bytes as usize);
        fix_endianness(&mut field, r.byte_order, 8 * tag_type.primitive_size());
        let entry = BufferedEntry {
            tag_type,
            count,
            data: field,
        };
        Ok(IfdEntry::Value(entry.try_into()?))
    }
}

/// Entry with buffered data.
///
/// byte-order of the data should be native-endian in this buffer
#[derive(Debug, PartialEq, Clone)]
pub struct BufferedEntry {
    pub tag_type: TagType,
    pub count: u64,
    pub data: Vec<u8>,
}

impl BufferedEntry {
    /// Reads `count` values of `tag_type` at the reader's position
    pub fn from_reader<R: Read>(
        r: &mut EndianReader<R>,
        tag_type: TagType,
        count: u64,
    ) -> DatasetResult<Self> {
        let len = usize::try_from(count)?
            .checked_mul(tag_type.size())
            .ok_or(DatasetError::LimitsExceeded)?;
        let mut data = r.read_bytes(len)?;
        fix_endianness(&mut data, r.byte_order, 8 * tag_type.primitive_size());
        Ok(BufferedEntry {
            tag_type,
            count,
            data,
        })
    }
}

/// ASCII values are decoded leniently: invalid UTF-8 is replaced, trailing
/// NULs are dropped and inner NULs separate multiple strings.
fn decode_ascii(data: &[u8]) -> Value {
    let text = String::from_utf8_lossy(data);
    let text = text.trim_end_matches('\0');
    if text.contains('\0') {
        Value::List(
            text.split('\0')
                .map(|s| Value::Ascii(s.to_string()))
                .collect(),
        )
    } else {
        Value::Ascii(text.to_string())
    }
}

macro_rules! to_values {
    ($data:expr, $type:ty, $variant:ident) => {
        pod_collect_to_vec::<u8, $type>($data)
            .into_iter()
            .map(Value::$variant)
            .collect::<Vec<Value>>()
    };
}

impl TryFrom<BufferedEntry> for Value {
    type Error = DatasetError;

    #[rustfmt::skip]
    fn try_from(entry: BufferedEntry) -> DatasetResult<Value> {
        if entry.data.len() != entry.tag_type.size() * usize::try_from(entry.count)? {
            return Err(FormatError::InconsistentSizesEncountered(entry).into());
        }
        let data = entry.data.as_slice();
        let mut values = match entry.tag_type {
            TagType::ASCII     => return Ok(decode_ascii(data)),
            TagType::UNDEFINED if data.len() == 1 => return Ok(Value::Undefined(data[0])),
            TagType::UNDEFINED => return Ok(Value::Bytes(data.to_vec())),
            TagType::BYTE      => data.iter().map(|b| Value::Byte(*b)).collect(),
            TagType::SBYTE     => data.iter().map(|b| Value::SignedByte(*b as i8)).collect(),
            TagType::SHORT     => to_values!(data, u16, Short),
            TagType::SSHORT    => to_values!(data, i16, SShort),
            TagType::LONG      => to_values!(data, u32, Long),
            TagType::SLONG     => to_values!(data, i32, SLong),
            TagType::IFD       => to_values!(data, u32, Ifd),
            TagType::LONG8     => to_values!(data, u64, Long8),
            TagType::SLONG8    => to_values!(data, i64, SLong8),
            TagType::IFD8      => to_values!(data, u64, Ifd8),
            TagType::FLOAT     => to_values!(data, f32, Float),
            TagType::DOUBLE    => to_values!(data, f64, Double),
            TagType::RATIONAL  => pod_collect_to_vec::<u8, u32>(data)
                .chunks_exact(2)
                .map(|c| Value::Rational(c[0], c[1]))
                .collect(),
            TagType::SRATIONAL => pod_collect_to_vec::<u8, i32>(data)
                .chunks_exact(2)
                .map(|c| Value::SRational(c[0], c[1]))
                .collect(),
        };
        if values.len() == 1 {
            Ok(values.swap_remove(0))
        } else {
            Ok(Value::List(values))
        }
    }
}

#[cfg(test)]
mod test_entry {
    use super::*;
    use crate::ByteOrder;
    use std::io::Cursor;

    fn read(buf: &[u8], byte_order: ByteOrder, bigtiff: bool) -> DatasetResult<IfdEntry> {
        let mut r = EndianReader::wrap(Cursor::new(buf), byte_order);
        IfdEntry::from_reader(&mut r, bigtiff)
    }

    #[test]
    #[rustfmt::skip]
    fn test_inline_values() {
        let cases: [(&[u8], ByteOrder, Value); 8] = [
        //  type   count      value
        (&[3, 0,  1,0,0,0,  42, 0, 0, 0], ByteOrder::LittleEndian, Value::Short(42)),
        (&[0, 3,  0,0,0,1,   0,42, 0, 0], ByteOrder::BigEndian,    Value::Short(42)),
        (&[3, 0,  2,0,0,0,  42, 0, 7, 0], ByteOrder::LittleEndian, Value::List(vec![Value::Short(42), Value::Short(7)])),
        (&[0, 9,  0,0,0,1, 255,255,255,214], ByteOrder::BigEndian, Value::SLong(-42)),
        (&[2, 0,  4,0,0,0, b'A',b'B',b'C', 0], ByteOrder::LittleEndian, Value::Ascii("ABC".into())),
        (&[2, 0,  4,0,0,0, b'A', 0, b'B', 0], ByteOrder::LittleEndian, Value::List(vec![Value::Ascii("A".into()), Value::Ascii("B".into())])),
        (&[7, 0,  3,0,0,0,  1, 2, 3, 0], ByteOrder::LittleEndian, Value::Bytes(vec![1, 2, 3])),
        (&[13,0,  1,0,0,0,  8, 0, 0, 0], ByteOrder::LittleEndian, Value::Ifd(8)),
        ];
        for (buf, byte_order, res) in cases {
            assert_eq!(read(buf, byte_order, false).unwrap(), IfdEntry::Value(res));
        }
    }

    #[test]
    #[rustfmt::skip]
    fn test_inline_values_bigtiff() {
        let cases: [(&[u8], ByteOrder, Value); 3] = [
        //  type   count              value
        (&[5, 0,  1,0,0,0,0,0,0,0,  42, 0, 0, 0,13, 0, 0, 0], ByteOrder::LittleEndian, Value::Rational(42, 13)),
        (&[0,12,  0,0,0,0,0,0,0,1,   0, 0, 0, 0, 0, 0, 0,42], ByteOrder::BigEndian,    Value::Double(f64::from_bits(42))),
        (&[16,0,  1,0,0,0,0,0,0,0,   9, 0, 0, 0, 0, 0, 0, 0], ByteOrder::LittleEndian, Value::Long8(9)),
        ];
        for (buf, byte_order, res) in cases {
            assert_eq!(read(buf, byte_order, true).unwrap(), IfdEntry::Value(res));
        }
    }

    #[test]
    #[rustfmt::skip]
    fn test_padding_is_consumed() {
        // BYTE, count 1, then padding, then the next entry's type
        let buf = [1, 0,  1,0,0,0,  42, 0xEE, 0xEE, 0xEE,  3, 0];
        let mut r = EndianReader::wrap(Cursor::new(buf), ByteOrder::LittleEndian);
        assert_eq!(IfdEntry::from_reader(&mut r, false).unwrap(), IfdEntry::Value(Value::Byte(42)));
        assert_eq!(r.read_u16().unwrap(), 3);
    }

    #[test]
    #[rustfmt::skip]
    fn test_out_of_line() {
        assert_eq!(
            read(&[12, 0,  1,0,0,0,  0,1,0,0], ByteOrder::LittleEndian, false).unwrap(),
            IfdEntry::Offset { tag_type: TagType::DOUBLE, count: 1, offset: 256 }
        );
        assert_eq!(
            read(&[0, 2,  0,0,0,9,  0,0,1,0], ByteOrder::BigEndian, false).unwrap(),
            IfdEntry::Offset { tag_type: TagType::ASCII, count: 9, offset: 256 }
        );
    }

    #[test]
    fn test_invalid_type_consumes_entry() {
        let buf = [99, 0, 1, 0, 0, 0, 0, 0, 0, 0, 3, 0];
        let mut r = EndianReader::wrap(Cursor::new(buf), ByteOrder::LittleEndian);
        let err = IfdEntry::from_reader(&mut r, false).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::FormatError(FormatError::InvalidTagValueType(99))
        ));
        assert_eq!(r.read_u16().unwrap(), 3);
    }

    #[test]
    fn test_inconsistent_sizes() {
        let e = BufferedEntry {
            tag_type: TagType::SHORT,
            count: 2,
            data: vec![0; 3],
        };
        let err = Value::try_from(e.clone()).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::FormatError(FormatError::InconsistentSizesEncountered(x)) if x == e
        ));
    }

    #[test]
    fn test_buffered_from_reader_swaps_order() {
        let buf = [0u8, 1, 0, 2];
        let mut r = EndianReader::wrap(Cursor::new(buf), ByteOrder::BigEndian);
        let e = BufferedEntry::from_reader(&mut r, TagType::SHORT, 2).unwrap();
        assert_eq!(
            Value::try_from(e).unwrap(),
            Value::List(vec![Value::Short(1), Value::Short(2)])
        );
    }
}
