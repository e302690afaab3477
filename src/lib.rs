//! Acquire bioimaging datasets and describe them as JSON.
//!
//! Each dataset in [`datasets`] downloads its files and hands them to the
//! extractors in [`metadata`]. The extractors parse TIFF, Zarr, DM3 and
//! precomputed-volume descriptors into a [`normalize::MetaValue`] tree, which
//! the [`normalize::Normalizer`] turns into bounded JSON.

/// Crate configuration, loadable from JSON
pub mod config;
/// Folding the metadata of many datasets into one attribute report
pub mod consolidate;
/// Dataset definitions: where to fetch them and what to extract
pub mod datasets;
/// Gatan Digital Micrograph (DM3/DM4) tag trees
pub mod dm3;
/// HTTP, FTP and bucket downloads
pub mod download;
/// Errors
pub mod error;
/// Extraction entry points writing metadata JSON files
pub mod metadata;
/// Converting heterogeneous object graphs into bounded JSON
pub mod normalize;
/// Cropping neuroglancer precomputed volumes into Zarr
pub mod precomputed;
/// Byte-order aware reading shared by the binary parsers
pub mod reader;
/// TIFF header, IFD chain and tag parsing
pub mod tiff;
/// Generic utility functions shared by the parsers and extractors
pub mod util;
/// Neuroglancer precomputed volume descriptors
pub mod volume;
/// Local Zarr v2/v3 hierarchies
pub mod zarr;

pub use error::{DatasetError, DatasetResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

macro_rules! cast_fn {
    ($name:ident, $type:ty, $length:literal) => {
        /// cast a $length-byte array to $type, respecting byte order
        #[inline(always)]
        pub fn $name(&self, bytes: [u8; $length]) -> $type {
            match self {
                ByteOrder::LittleEndian => <$type>::from_le_bytes(bytes),
                ByteOrder::BigEndian => <$type>::from_be_bytes(bytes),
            }
        }
    };
}

impl ByteOrder {
    cast_fn!(u16, u16, 2);
    cast_fn!(u32, u32, 4);
    cast_fn!(u64, u64, 8);

    /// numpy-style marker: `<` for little endian, `>` for big endian
    pub fn marker(&self) -> &'static str {
        match self {
            ByteOrder::LittleEndian => "<",
            ByteOrder::BigEndian => ">",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ByteOrder::LittleEndian => "little",
            ByteOrder::BigEndian => "big",
        }
    }
}
