//! Vendor metadata stored in private TIFF tags

use crate::normalize::MetaValue;

#[derive(Clone, Copy)]
enum Field {
    U16,
    U32,
    I32,
    F64,
}

impl Field {
    fn size(self) -> usize {
        match self {
            Field::U16 => 2,
            Field::U32 | Field::I32 => 4,
            Field::F64 => 8,
        }
    }

    /// LSM structures are always little endian
    fn read(self, buf: &[u8]) -> Option<MetaValue> {
        let bytes = buf.get(..self.size())?;
        Some(match self {
            Field::U16 => u16::from_le_bytes(bytes.try_into().ok()?).into(),
            Field::U32 => u32::from_le_bytes(bytes.try_into().ok()?).into(),
            Field::I32 => i32::from_le_bytes(bytes.try_into().ok()?).into(),
            Field::F64 => f64::from_le_bytes(bytes.try_into().ok()?).into(),
        })
    }
}

/// Layout of the CZ_LSMINFO structure up to the display aspect fields
#[rustfmt::skip]
const LSM_INFO: &[(&str, usize, Field)] = &[
    ("MagicNumber",             0,   Field::U32),
    ("StructureSize",           4,   Field::I32),
    ("DimensionX",              8,   Field::I32),
    ("DimensionY",              12,  Field::I32),
    ("DimensionZ",              16,  Field::I32),
    ("DimensionChannels",       20,  Field::I32),
    ("DimensionTime",           24,  Field::I32),
    ("DataType",                28,  Field::I32),
    ("ThumbnailX",              32,  Field::I32),
    ("ThumbnailY",              36,  Field::I32),
    ("VoxelSizeX",              40,  Field::F64),
    ("VoxelSizeY",              48,  Field::F64),
    ("VoxelSizeZ",              56,  Field::F64),
    ("OriginX",                 64,  Field::F64),
    ("OriginY",                 72,  Field::F64),
    ("OriginZ",                 80,  Field::F64),
    ("ScanType",                88,  Field::U16),
    ("SpectralScan",            90,  Field::U16),
    ("TypeOfData",              92,  Field::U32),
    ("OffsetVectorOverlay",     96,  Field::U32),
    ("OffsetInputLut",          100, Field::U32),
    ("OffsetOutputLut",         104, Field::U32),
    ("OffsetChannelColors",     108, Field::U32),
    ("TimeIntervall",           112, Field::F64),
    ("OffsetChannelDataTypes",  120, Field::U32),
    ("OffsetScanInformation",   124, Field::U32),
    ("OffsetKsData",            128, Field::U32),
    ("OffsetTimeStamps",        132, Field::U32),
    ("OffsetEventList",         136, Field::U32),
    ("OffsetRoi",               140, Field::U32),
    ("OffsetBleachRoi",         144, Field::U32),
    ("OffsetNextRecording",     148, Field::U32),
];

/// Decodes the fixed part of a CZ_LSMINFO record.
///
/// Fields past the end of `buf` are left out; `None` when not even the magic
/// number is present.
pub fn lsm_info(buf: &[u8]) -> Option<MetaValue> {
    let mut fields = Vec::new();
    for (name, offset, field) in LSM_INFO {
        let Some(value) = buf.get(*offset..).and_then(|b| field.read(b)) else {
            break;
        };
        fields.push((name.to_string(), value));
    }
    if fields.is_empty() {
        return None;
    }
    Some(MetaValue::Map(fields))
}

/// Parses FEI/Helios INI-style text into `{section: {key: value}}`.
///
/// Values that parse as integers or floats become numbers, everything else
/// stays text. Keys before the first section go into an unnamed one.
pub fn fei_ini(text: &str) -> MetaValue {
    let mut sections: Vec<(String, Vec<(String, MetaValue)>)> = Vec::new();
    for line in text.lines() {
        let line = line.trim().trim_end_matches('\0');
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            sections.push((name.to_string(), Vec::new()));
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if sections.is_empty() {
            sections.push((String::new(), Vec::new()));
        }
        if let Some((_, entries)) = sections.last_mut() {
            entries.push((key.trim().to_string(), coerce(value.trim())));
        }
    }
    MetaValue::Map(
        sections
            .into_iter()
            .map(|(name, entries)| (name, MetaValue::Map(entries)))
            .collect(),
    )
}

fn coerce(value: &str) -> MetaValue {
    if let Ok(i) = value.parse::<i64>() {
        return MetaValue::Int(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        // "nan" and "inf" are kept as text
        if f.is_finite() {
            return MetaValue::Float(f);
        }
    }
    MetaValue::Text(value.to_string())
}
