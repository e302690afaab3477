//! Local Zarr hierarchies, read through the `zarrs` filesystem store.
//!
//! Both format versions are supported. Directories without node metadata
//! are not part of the hierarchy and are skipped.

use std::{path::Path, sync::Arc};

use log::{debug, warn};
use serde_json::{Map, Value};
use zarrs::{
    array::Array,
    filesystem::FilesystemStore,
    group::Group,
    storage::{ListableStorageTraits, StorePrefix},
};

use crate::{
    error::{zarr_err, DatasetResult, FormatError},
    normalize::{MetaValue, ToMeta},
};

/// Groups nested deeper than this are not descended into
pub const MAX_DEPTH: usize = 32;

/// Keys holding node metadata rather than chunks
const METADATA_KEYS: [&str; 5] = ["zarr.json", ".zarray", ".zgroup", ".zattrs", ".zmetadata"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Array,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Group => "group",
            NodeKind::Array => "array",
        }
    }
}

/// Layout of an array, common to both format versions
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayDetails {
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    /// `dtype` of v2 metadata, `data_type` of v3
    pub dtype: Value,
    /// v2 compressor
    pub compressor: Option<Value>,
    /// v3 codec chain
    pub codecs: Option<Value>,
    pub fill_value: Value,
    pub order: Option<String>,
    pub filters: Option<Value>,
    pub dimension_separator: String,
    pub dimension_names: Option<Value>,
    /// `None` when the chunk count does not fit 64 bits
    pub nchunks: Option<u64>,
    pub nchunks_initialized: u64,
}

/// Product of `dims`, `None` on overflow
pub fn checked_product(dims: &[u64]) -> Option<u64> {
    dims.iter().try_fold(1u64, |acc, d| acc.checked_mul(*d))
}

impl ArrayDetails {
    fn from_array(array: &Array<FilesystemStore>, store: &FilesystemStore) -> DatasetResult<Self> {
        let meta = serde_json::to_value(array.metadata())?;
        let v2 = meta.get("zarr_format").and_then(Value::as_u64) == Some(2);
        let shape = array.shape().to_vec();
        let origin = vec![0; shape.len()];
        let chunks = match array.chunk_shape(&origin) {
            Ok(chunks) => chunks.iter().map(|c| c.get()).collect(),
            // empty arrays have no chunk at the origin
            Err(_) => chunks_from_metadata(&meta),
        };
        let field = |key: &str| meta.get(key).filter(|v| !v.is_null()).cloned();
        let dimension_separator = if v2 {
            field("dimension_separator")
                .and_then(|s| s.as_str().map(str::to_string))
                .unwrap_or_else(|| ".".to_string())
        } else {
            let encoding = meta.get("chunk_key_encoding");
            encoding
                .and_then(|e| e.pointer("/configuration/separator"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    match encoding.and_then(|e| e.get("name")).and_then(Value::as_str) {
                        Some("v2") => ".".to_string(),
                        _ => "/".to_string(),
                    }
                })
        };
        Ok(ArrayDetails {
            nchunks: array
                .chunk_grid_shape()
                .and_then(|grid| checked_product(&grid)),
            nchunks_initialized: count_chunk_keys(store, array.path().as_str())?,
            shape,
            chunks,
            dtype: field(if v2 { "dtype" } else { "data_type" }).unwrap_or(Value::Null),
            compressor: if v2 { field("compressor") } else { None },
            codecs: if v2 { None } else { field("codecs") },
            fill_value: field("fill_value").unwrap_or(Value::Null),
            order: if v2 {
                field("order").and_then(|o| o.as_str().map(str::to_string))
            } else {
                None
            },
            filters: field("filters").filter(|f| f.as_array().is_some_and(|a| !a.is_empty())),
            dimension_separator,
            dimension_names: field("dimension_names"),
        })
    }
}

fn chunks_from_metadata(meta: &Value) -> Vec<u64> {
    meta.get("chunks")
        .or_else(|| meta.pointer("/chunk_grid/configuration/chunk_shape"))
        .and_then(|c| serde_json::from_value(c.clone()).ok())
        .unwrap_or_default()
}

/// Stored keys below an array that are chunks rather than metadata
fn count_chunk_keys(store: &FilesystemStore, node_path: &str) -> DatasetResult<u64> {
    let prefix = store_prefix(node_path)?;
    let keys = store.list_prefix(&prefix)?;
    let chunks = keys
        .iter()
        .filter(|key| {
            let name = key.as_str().rsplit('/').next().unwrap_or_default();
            !METADATA_KEYS.contains(&name)
        })
        .count();
    Ok(chunks as u64)
}

/// Store prefix of a node path: `/a/b` becomes `a/b/`
fn store_prefix(node_path: &str) -> DatasetResult<StorePrefix> {
    let relative = node_path.trim_matches('/');
    if relative.is_empty() {
        return Ok(StorePrefix::root());
    }
    StorePrefix::new(format!("{relative}/")).map_err(zarr_err)
}

/// A group or array of a local Zarr hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct ZarrNode {
    /// Path relative to the hierarchy root, `/`-separated, empty for the root
    pub path: String,
    pub kind: NodeKind,
    pub zarr_format: u64,
    pub attributes: Map<String, Value>,
    /// Set for arrays
    pub array: Option<ArrayDetails>,
    /// Whether a consolidated `.zmetadata` sits next to the group metadata
    pub consolidated: bool,
    pub children: Vec<ZarrNode>,
}

/// Counts of a hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZarrSummary {
    pub groups: usize,
    pub arrays: usize,
    pub depth: usize,
}

fn has_node_metadata(dir: &Path) -> bool {
    ["zarr.json", ".zarray", ".zgroup"]
        .iter()
        .any(|name| dir.join(name).is_file())
}

fn zarr_format(meta: &Value) -> u64 {
    meta.get("zarr_format").and_then(Value::as_u64).unwrap_or_default()
}

impl ZarrNode {
    /// Reads the hierarchy rooted at `root`
    pub fn open(root: &Path) -> DatasetResult<Self> {
        if !has_node_metadata(root) {
            return Err(FormatError::ZarrMetadataMissing(root.to_path_buf()).into());
        }
        let store = Arc::new(FilesystemStore::new(root)?);
        Self::open_node(&store, root, String::new(), 0)?
            .ok_or_else(|| FormatError::ZarrMetadataMissing(root.to_path_buf()).into())
    }

    fn open_node(
        store: &Arc<FilesystemStore>,
        root: &Path,
        path: String,
        depth: usize,
    ) -> DatasetResult<Option<Self>> {
        let dir = root.join(&path);
        if !has_node_metadata(&dir) {
            debug!("{} holds no zarr metadata", dir.display());
            return Ok(None);
        }
        let node_path = format!("/{path}");
        let array_err = match Array::open(store.clone(), &node_path) {
            Ok(array) => {
                let meta = serde_json::to_value(array.metadata())?;
                return Ok(Some(ZarrNode {
                    kind: NodeKind::Array,
                    zarr_format: zarr_format(&meta),
                    attributes: array.attributes().clone(),
                    array: Some(ArrayDetails::from_array(&array, store)?),
                    consolidated: false,
                    children: Vec::new(),
                    path,
                }));
            }
            Err(e) => e,
        };
        let group = Group::open(store.clone(), &node_path).map_err(|group_err| {
            FormatError::ZarrMetadataInvalid {
                path: dir.clone(),
                reason: format!("not an array ({array_err}) nor a group ({group_err})"),
            }
        })?;
        let meta = serde_json::to_value(group.metadata())?;
        let mut node = ZarrNode {
            kind: NodeKind::Group,
            zarr_format: zarr_format(&meta),
            attributes: group.attributes().clone(),
            array: None,
            consolidated: dir.join(".zmetadata").is_file(),
            children: Vec::new(),
            path,
        };
        if depth >= MAX_DEPTH {
            warn!("not descending below {} (depth {depth})", dir.display());
            return Ok(Some(node));
        }
        let listing = store.list_dir(&store_prefix(&node_path)?)?;
        let mut names: Vec<String> = listing
            .prefixes()
            .iter()
            .filter_map(|p| p.as_str().trim_end_matches('/').rsplit('/').next())
            .map(str::to_string)
            .collect();
        names.sort();
        for name in names {
            let child_path = if node.path.is_empty() {
                name
            } else {
                format!("{}/{name}", node.path)
            };
            if let Some(child) = Self::open_node(store, root, child_path, depth + 1)? {
                node.children.push(child);
            }
        }
        Ok(Some(node))
    }

    /// Group and array counts of this subtree, and its depth
    pub fn summary(&self) -> ZarrSummary {
        let mut summary = ZarrSummary::default();
        self.count(0, &mut summary);
        summary
    }

    fn count(&self, depth: usize, summary: &mut ZarrSummary) {
        match self.kind {
            NodeKind::Group => summary.groups += 1,
            NodeKind::Array => summary.arrays += 1,
        }
        summary.depth = summary.depth.max(depth);
        for child in &self.children {
            child.count(depth + 1, summary);
        }
    }
}

fn json_meta<T: serde::Serialize>(value: &T) -> MetaValue {
    serde_json::to_value(value).map_or(MetaValue::Null, MetaValue::from)
}

impl ToMeta for ArrayDetails {
    fn to_meta(&self) -> MetaValue {
        let mut fields = vec![
            ("shape", json_meta(&self.shape)),
            ("chunks", json_meta(&self.chunks)),
            ("dtype", self.dtype.to_meta()),
        ];
        if let Some(compressor) = &self.compressor {
            fields.push(("compressor", compressor.to_meta()));
        }
        if let Some(codecs) = &self.codecs {
            fields.push(("codecs", codecs.to_meta()));
        }
        fields.push(("fill_value", self.fill_value.to_meta()));
        if let Some(order) = &self.order {
            fields.push(("order", MetaValue::from(order.as_str())));
        }
        fields.push(("filters", self.filters.to_meta()));
        fields.push((
            "dimension_separator",
            MetaValue::from(self.dimension_separator.as_str()),
        ));
        if let Some(names) = &self.dimension_names {
            fields.push(("dimension_names", names.to_meta()));
        }
        fields.push(("nchunks", self.nchunks.map_or(MetaValue::Null, MetaValue::from)));
        fields.push(("nchunks_initialized", MetaValue::from(self.nchunks_initialized)));
        MetaValue::map(fields)
    }
}

impl ToMeta for ZarrNode {
    fn to_meta(&self) -> MetaValue {
        let mut fields = vec![
            ("path", MetaValue::from(format!("/{}", self.path))),
            ("node_type", MetaValue::from(self.kind.name())),
            ("zarr_format", MetaValue::from(self.zarr_format)),
        ];
        if self.consolidated {
            fields.push(("consolidated", MetaValue::Bool(true)));
        }
        fields.push(("attributes", Value::Object(self.attributes.clone()).to_meta()));
        if let Some(array) = &self.array {
            fields.push(("array", array.to_meta()));
        }
        if self.kind == NodeKind::Group {
            let children = self
                .children
                .iter()
                .map(|c| {
                    let name = c.path.rsplit('/').next().unwrap_or_default().to_string();
                    (name, c.to_meta())
                })
                .collect();
            fields.push(("children", MetaValue::Map(children)));
        }
        MetaValue::map(fields)
    }
}

impl ToMeta for ZarrSummary {
    fn to_meta(&self) -> MetaValue {
        MetaValue::map([
            ("groups", MetaValue::from(self.groups)),
            ("arrays", MetaValue::from(self.arrays)),
            ("depth", MetaValue::from(self.depth)),
        ])
    }
}

#[cfg(test)]
mod test_zarr {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write(path: &Path, value: Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
    }

    #[test]
    #[rustfmt::skip]
    fn test_checked_product() {
        let cases: [(&[u64], Option<u64>); 4] = [
            (&[4, 2],             Some(8)),
            (&[],                 Some(1)),
            (&[0, 1 << 40],       Some(0)),
            (&[1 << 33, 1 << 33], None),
        ];
        for (dims, expected) in cases {
            assert_eq!(checked_product(dims), expected, "{dims:?}");
        }
    }

    #[test]
    fn test_v2_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join(".zgroup"), json!({"zarr_format": 2}));
        write(&root.join(".zattrs"), json!({"multiscales": [{"version": "0.4"}]}));
        write(&root.join(".zmetadata"), json!({}));
        write(
            &root.join("s0/.zarray"),
            json!({
                "zarr_format": 2, "shape": [4, 6], "chunks": [2, 3], "dtype": "<i2",
                "compressor": {"id": "gzip", "level": 1}, "fill_value": 0,
                "order": "C", "filters": null, "dimension_separator": "/"
            }),
        );
        fs::create_dir_all(root.join("s0/0")).unwrap();
        fs::write(root.join("s0/0/0"), b"x").unwrap();
        fs::write(root.join("s0/0/1"), b"x").unwrap();
        fs::create_dir_all(root.join("not_zarr")).unwrap();

        let node = ZarrNode::open(root).unwrap();
        assert_eq!(node.kind, NodeKind::Group);
        assert_eq!(node.zarr_format, 2);
        assert!(node.consolidated);
        assert!(node.attributes.contains_key("multiscales"));
        assert_eq!(node.children.len(), 1);
        let s0 = &node.children[0];
        assert_eq!(s0.path, "s0");
        let array = s0.array.as_ref().unwrap();
        assert_eq!(array.shape, vec![4, 6]);
        assert_eq!(array.chunks, vec![2, 3]);
        assert_eq!(array.nchunks, Some(4));
        assert_eq!(array.nchunks_initialized, 2);
        assert_eq!(array.dimension_separator, "/");
        assert_eq!(array.order.as_deref(), Some("C"));
        assert_eq!(array.filters, None);
        assert_eq!(
            node.summary(),
            ZarrSummary {
                groups: 1,
                arrays: 1,
                depth: 1
            }
        );

        let meta = node.to_meta();
        assert_eq!(meta.get("path"), Some(&MetaValue::from("/")));
        let child = meta.get("children").and_then(|c| c.get("s0")).unwrap();
        assert_eq!(
            child.get("array").and_then(|a| a.get("nchunks")),
            Some(&MetaValue::UInt(4))
        );
    }

    #[test]
    fn test_v3_array() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("zarr.json"),
            json!({"zarr_format": 3, "node_type": "group", "attributes": {"a": 1}}),
        );
        write(
            &root.join("raw/zarr.json"),
            json!({
                "zarr_format": 3, "node_type": "array", "shape": [5], "data_type": "uint8",
                "chunk_grid": {"name": "regular", "configuration": {"chunk_shape": [2]}},
                "chunk_key_encoding": {"name": "default"},
                "fill_value": 0, "codecs": [{"name": "bytes"}],
                "dimension_names": ["x"]
            }),
        );
        fs::create_dir_all(root.join("raw/c")).unwrap();
        fs::write(root.join("raw/c/0"), b"x").unwrap();

        let node = ZarrNode::open(root).unwrap();
        assert_eq!(node.zarr_format, 3);
        assert_eq!(node.attributes.get("a"), Some(&json!(1)));
        let array = node.children[0].array.as_ref().unwrap();
        assert_eq!(array.chunks, vec![2]);
        assert_eq!(array.dtype, json!("uint8"));
        assert_eq!(array.nchunks, Some(3));
        assert_eq!(array.nchunks_initialized, 1);
        assert_eq!(array.dimension_separator, "/");
        assert_eq!(array.dimension_names, Some(json!(["x"])));
        assert!(array.codecs.is_some());
    }

    #[test]
    fn test_chunk_count_overflow() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("zarr.json"),
            json!({
                "zarr_format": 3, "node_type": "array",
                "shape": [1u64 << 40, 1u64 << 40], "data_type": "uint8",
                "chunk_grid": {"name": "regular", "configuration": {"chunk_shape": [1, 1]}},
                "chunk_key_encoding": {"name": "default"},
                "fill_value": 0, "codecs": [{"name": "bytes"}]
            }),
        );
        let node = ZarrNode::open(dir.path()).unwrap();
        let array = node.array.as_ref().unwrap();
        assert_eq!(array.nchunks, None);
        assert_eq!(
            node.to_meta().get("array").and_then(|a| a.get("nchunks")),
            Some(&MetaValue::Null)
        );
    }

    #[test]
    fn test_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ZarrNode::open(dir.path()),
            Err(crate::DatasetError::FormatError(FormatError::ZarrMetadataMissing(_)))
        ));
        write(&dir.path().join(".zarray"), json!({"zarr_format": 2}));
        assert!(matches!(
            ZarrNode::open(dir.path()),
            Err(crate::DatasetError::FormatError(FormatError::ZarrMetadataInvalid { .. }))
        ));
    }
}
