//! Configuration of the acquisition and extraction tasks.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//! ```json
//! { "data_dir": "/scratch/raw", "normalize": { "max_sequence_len": 16 } }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DatasetResult;

/// Default chunk size for downloading files
pub const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the downloaded raw data
    pub data_dir: PathBuf,
    /// Root of the metadata JSON outputs
    pub outputs_dir: PathBuf,
    /// Write buffer of the HTTP and FTP downloads
    pub chunk_size: usize,
    pub normalize: NormalizeOptions,
    pub tiff: TiffOptions,
    pub dm: DmOptions,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data/raw"),
            outputs_dir: PathBuf::from("outputs"),
            chunk_size: CHUNK_SIZE,
            normalize: NormalizeOptions::default(),
            tiff: TiffOptions::default(),
            dm: DmOptions::default(),
        }
    }
}

impl Config {
    /// Reads a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> DatasetResult<Self> {
        let buf = std::fs::read(path)?;
        Ok(serde_json::from_slice(&buf)?)
    }

    /// Loads `path` when given, the defaults otherwise
    pub fn load(path: Option<&Path>) -> DatasetResult<Self> {
        match path {
            Some(path) => {
                log::debug!("loading config from {}", path.display());
                Self::from_file(path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn raw_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.data_dir.join(relative)
    }

    pub fn output_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.outputs_dir.join(relative)
    }
}

/// Bounds applied while turning metadata trees into JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeOptions {
    /// Nesting below this depth is replaced by a summary
    pub max_depth: usize,
    /// Lists and numeric arrays longer than this are summarized
    pub max_sequence_len: usize,
    /// Maps and objects with more entries than this are summarized
    pub max_map_len: usize,
    /// Strings longer than this are truncated
    pub max_string_len: usize,
    /// Byte strings longer than this are summarized unless they are text
    pub max_inline_bytes: usize,
    /// Number of leading elements kept in a summary
    pub preview_len: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        NormalizeOptions {
            max_depth: 32,
            max_sequence_len: 64,
            max_map_len: 1024,
            max_string_len: 1 << 20,
            max_inline_bytes: 64,
            preview_len: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiffOptions {
    /// Pages beyond this count are not read
    pub max_pages: usize,
    /// Out-of-line tag values bigger than this are not read
    pub max_tag_bytes: u64,
}

impl Default for TiffOptions {
    fn default() -> Self {
        TiffOptions {
            max_pages: 100_000,
            max_tag_bytes: 64 << 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmOptions {
    /// DM tag arrays bigger than this (image data, mostly) are not read
    pub max_array_bytes: u64,
}

impl Default for DmOptions {
    fn default() -> Self {
        DmOptions {
            max_array_bytes: 1 << 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"data_dir": "/scratch", "normalize": {"max_depth": 4}}"#)
                .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/scratch"));
        assert_eq!(config.outputs_dir, PathBuf::from("outputs"));
        assert_eq!(config.normalize.max_depth, 4);
        assert_eq!(config.normalize.max_sequence_len, 64);
        assert_eq!(config.tiff, TiffOptions::default());
    }

    #[test]
    fn config_paths() {
        let config = Config::default();
        assert_eq!(
            config.raw_path("epfl_volumedata.tif"),
            PathBuf::from("data/raw/epfl_volumedata.tif")
        );
        assert_eq!(
            config.output_path("epfl_hippocampus_metadata.json"),
            PathBuf::from("outputs/epfl_hippocampus_metadata.json")
        );
    }

    #[test]
    fn config_load_without_file() {
        assert_eq!(Config::load(None).unwrap(), Config::default());
    }
}
