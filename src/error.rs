use std::{array::TryFromSliceError, io, num::TryFromIntError, path::PathBuf, str::Utf8Error};

use thiserror::Error;

use crate::tiff::entry::BufferedEntry;

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Errors raised while acquiring a dataset or extracting its metadata
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The content of a file did not follow its format
    #[error("format error: {0}")]
    FormatError(#[from] FormatError),
    /// The API was used incorrectly
    #[error("usage error: {0}")]
    UsageError(#[from] UsageError),
    #[error("file {} not found. Pull it from DVC store by running 'dvc pull'.", .0.display())]
    MissingInput(PathBuf),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    /// An offset, count or size does not fit the platform integer
    #[error("integer conversion out of range")]
    IntSizeError,
    /// A size limit was hit while decoding
    #[error("limits exceeded")]
    LimitsExceeded,
    #[error("invalid utf-8: {0}")]
    Utf8Error(#[from] Utf8Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("object store error: {0}")]
    StoreError(#[from] object_store::Error),
    #[error("object store path error: {0}")]
    StorePathError(#[from] object_store::path::Error),
    #[error("directory walk error: {0}")]
    WalkError(#[from] walkdir::Error),
    #[error("invalid file pattern: {0}")]
    PatternError(#[from] glob::PatternError),
    #[error("zarr store error: {0}")]
    ZarrStoreError(#[from] zarrs::storage::StorageError),
    #[error("zarr store error: {0}")]
    ZarrStoreCreateError(#[from] zarrs::filesystem::FilesystemStoreCreateError),
    #[error("zarr array error: {0}")]
    ZarrArrayError(#[from] zarrs::array::ArrayError),
    #[error("zarr array error: {0}")]
    ZarrArrayCreateError(#[from] zarrs::array::ArrayCreateError),
    /// Zarr errors without a dedicated type, such as invalid chunk shapes
    #[error("zarr error: {0}")]
    ZarrError(String),
    /// The FTP server answered with an unexpected reply
    #[error("FTP error {code}: {message}")]
    FtpError { code: u16, message: String },
    #[error("invalid url {0}")]
    InvalidUrl(String),
    #[error("unknown dataset {0}")]
    UnknownDataset(String),
}

/// Wraps the zarrs errors that have no `From` conversion
pub(crate) fn zarr_err(e: impl std::fmt::Display) -> DatasetError {
    DatasetError::ZarrError(e.to_string())
}

impl From<TryFromIntError> for DatasetError {
    fn from(_: TryFromIntError) -> Self {
        DatasetError::IntSizeError
    }
}

impl From<TryFromSliceError> for DatasetError {
    fn from(_: TryFromSliceError) -> Self {
        DatasetError::IntSizeError
    }
}

/// Malformed file content
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    #[error("TIFF signature not found")]
    TiffSignatureNotFound,
    #[error("TIFF signature invalid")]
    TiffSignatureInvalid,
    #[error("invalid tag value type {0}")]
    InvalidTagValueType(u16),
    #[error("inconsistent sizes encountered in {0:?}")]
    InconsistentSizesEncountered(BufferedEntry),
    #[error("IFD offset {0} was already visited")]
    CycleInOffsets(u64),
    #[error("unsupported DM version {0}")]
    DmVersionUnsupported(u32),
    #[error("invalid DM tag kind {0}")]
    DmInvalidTagKind(u8),
    #[error("missing %%%% delimiter before DM tag data")]
    DmMissingDelimiter,
    #[error("unsupported DM data type {0}")]
    DmUnsupportedType(u64),
    #[error("DM tag tree nested deeper than {0}")]
    DmNestingTooDeep(usize),
    #[error("no zarr metadata found in {}", .0.display())]
    ZarrMetadataMissing(PathBuf),
    #[error("invalid zarr metadata in {}: {reason}", path.display())]
    ZarrMetadataInvalid { path: PathBuf, reason: String },
    #[error("no scale of the precomputed volume can be read")]
    PrecomputedNoReadableScale,
    #[error("invalid precomputed chunk {key}: {reason}")]
    PrecomputedChunkInvalid { key: String, reason: String },
}

/// Mistakes of the caller rather than of the file
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("metadata output path {} has no file name", .0.display())]
    OutputWithoutFileName(PathBuf),
    #[error("FTP data connection requested before login")]
    FtpNotLoggedIn,
    #[error("crop {start:?}..{end:?} lies outside scale {scale}")]
    CropOutOfBounds {
        scale: String,
        start: [u64; 3],
        end: [u64; 3],
    },
}
