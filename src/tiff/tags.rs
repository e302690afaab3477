#![allow(non_camel_case_types)]
use std::{borrow::Cow, cmp::Ordering};

/// Field type of an IFD entry
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TagType {
    BYTE = 1,
    ASCII = 2,
    SHORT = 3,
    LONG = 4,
    RATIONAL = 5,
    SBYTE = 6,
    UNDEFINED = 7,
    SSHORT = 8,
    SLONG = 9,
    SRATIONAL = 10,
    FLOAT = 11,
    DOUBLE = 12,
    IFD = 13,
    LONG8 = 16,
    SLONG8 = 17,
    IFD8 = 18,
}

impl TagType {
    #[rustfmt::skip]
    pub fn from_u16(n: u16) -> Option<Self> {
        Some(match n {
            1  => TagType::BYTE,
            2  => TagType::ASCII,
            3  => TagType::SHORT,
            4  => TagType::LONG,
            5  => TagType::RATIONAL,
            6  => TagType::SBYTE,
            7  => TagType::UNDEFINED,
            8  => TagType::SSHORT,
            9  => TagType::SLONG,
            10 => TagType::SRATIONAL,
            11 => TagType::FLOAT,
            12 => TagType::DOUBLE,
            13 => TagType::IFD,
            16 => TagType::LONG8,
            17 => TagType::SLONG8,
            18 => TagType::IFD8,
            _ => return None,
        })
    }

    /// Size in bytes of one value of this type
    #[rustfmt::skip]
    pub fn size(&self) -> usize {
        match self {
            TagType::BYTE | TagType::SBYTE | TagType::ASCII | TagType::UNDEFINED => 1,
            TagType::SHORT | TagType::SSHORT                                   => 2,
            TagType::LONG | TagType::SLONG | TagType::FLOAT | TagType::IFD     => 4,
            TagType::LONG8 | TagType::SLONG8 | TagType::DOUBLE | TagType::IFD8
            | TagType::RATIONAL | TagType::SRATIONAL                           => 8,
        }
    }

    /// Size in bytes of the primitives a value is made of.
    ///
    /// Only differs from [`TagType::size`] for rationals, which are two
    /// 32-bit integers.
    pub fn primitive_size(&self) -> u8 {
        match self {
            TagType::RATIONAL | TagType::SRATIONAL => 4,
            // size() is at most 8
            other => other.size() as u8,
        }
    }
}

macro_rules! tags {
    ($($name:ident = $value:literal,)+) => {
        /// TIFF tag identifiers, named the way tifffile names them
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum Tag {
            $($name,)+
            Unknown(u16),
        }

        impl Tag {
            pub fn from_u16_exhaustive(n: u16) -> Self {
                match n {
                    $($value => Tag::$name,)+
                    _ => Tag::Unknown(n),
                }
            }

            pub fn to_u16(&self) -> u16 {
                match self {
                    $(Tag::$name => $value,)+
                    Tag::Unknown(n) => *n,
                }
            }

            /// Name of the tag, or its code for unknown tags
            pub fn name(&self) -> Cow<'static, str> {
                match self {
                    $(Tag::$name => Cow::Borrowed(stringify!($name)),)+
                    Tag::Unknown(n) => Cow::Owned(n.to_string()),
                }
            }
        }
    };
}

tags! {
    NewSubfileType = 254,
    SubfileType = 255,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    Thresholding = 263,
    CellWidth = 264,
    CellLength = 265,
    FillOrder = 266,
    DocumentName = 269,
    ImageDescription = 270,
    Make = 271,
    Model = 272,
    StripOffsets = 273,
    Orientation = 274,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    MinSampleValue = 280,
    MaxSampleValue = 281,
    XResolution = 282,
    YResolution = 283,
    PlanarConfiguration = 284,
    PageName = 285,
    XPosition = 286,
    YPosition = 287,
    ResolutionUnit = 296,
    PageNumber = 297,
    TransferFunction = 301,
    Software = 305,
    DateTime = 306,
    Artist = 315,
    HostComputer = 316,
    Predictor = 317,
    WhitePoint = 318,
    PrimaryChromaticities = 319,
    ColorMap = 320,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    SubIFDs = 330,
    InkSet = 332,
    ExtraSamples = 338,
    SampleFormat = 339,
    SMinSampleValue = 340,
    SMaxSampleValue = 341,
    JPEGTables = 347,
    YCbCrCoefficients = 529,
    YCbCrSubSampling = 530,
    YCbCrPositioning = 531,
    ReferenceBlackWhite = 532,
    XMP = 700,
    ImageDepth = 32997,
    TileDepth = 32998,
    Copyright = 33432,
    ModelPixelScaleTag = 33550,
    UIC1tag = 33628,
    UIC2tag = 33629,
    UIC3tag = 33630,
    UIC4tag = 33631,
    IPTCNAA = 33723,
    ModelTiepointTag = 33922,
    ModelTransformationTag = 34264,
    Photoshop = 34377,
    CZ_LSMINFO = 34412,
    ExifTag = 34665,
    InterColorProfile = 34675,
    FEI_SFEG = 34680,
    FEI_HELIOS = 34682,
    GeoKeyDirectoryTag = 34735,
    GPSTag = 34853,
    NIHImageHeader = 43314,
    IJMetadataByteCounts = 50838,
    IJMetadata = 50839,
    MicroManagerMetadata = 51123,
}

impl PartialOrd for Tag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Tags sort by code, the order they appear in a well-formed IFD
impl Ord for Tag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_u16().cmp(&other.to_u16())
    }
}

#[rustfmt::skip]
pub fn compression_name(code: u16) -> Cow<'static, str> {
    Cow::Borrowed(match code {
        1     => "NONE",
        2     => "CCITTRLE",
        3     => "CCITT_T4",
        4     => "CCITT_T6",
        5     => "LZW",
        6     => "OJPEG",
        7     => "JPEG",
        8     => "ADOBE_DEFLATE",
        32773 => "PACKBITS",
        32946 => "DEFLATE",
        34712 => "JPEG2000",
        34887 => "LERC",
        34925 => "LZMA",
        50000 => "ZSTD",
        50001 => "WEBP",
        50002 => "JPEGXL",
        other => return Cow::Owned(other.to_string()),
    })
}

#[rustfmt::skip]
pub fn photometric_name(code: u16) -> Cow<'static, str> {
    Cow::Borrowed(match code {
        0     => "MINISWHITE",
        1     => "MINISBLACK",
        2     => "RGB",
        3     => "PALETTE",
        4     => "MASK",
        5     => "SEPARATED",
        6     => "YCBCR",
        8     => "CIELAB",
        32844 => "LOGL",
        32845 => "LOGLUV",
        34892 => "LINEAR_RAW",
        other => return Cow::Owned(other.to_string()),
    })
}

#[rustfmt::skip]
pub fn resolution_unit_name(code: u16) -> Cow<'static, str> {
    Cow::Borrowed(match code {
        1 => "NONE",
        2 => "INCH",
        3 => "CENTIMETER",
        4 => "MILLIMETER",
        5 => "MICROMETER",
        other => return Cow::Owned(other.to_string()),
    })
}
