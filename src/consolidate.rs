//! Cross-dataset attribute report.
//!
//! Every metadata file is flattened into dotted attribute paths
//! (`global_info.is_bigtiff`, `pages[].page_tiff_tags.ImageWidth`), then
//! paths are mapped to the datasets that carry them and grouped by their
//! first segment.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::Path,
    time::Instant,
};

use log::{info, warn};
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::{
    error::DatasetResult,
    metadata::{save_metadata_as_json, Outcome},
    normalize::SUMMARY_KEY,
    util::elapsed_secs,
};

/// Depth-first attribute paths of the leaves of `value`, first occurrence
/// order, without duplicates. Array elements collapse to `[]`; summary
/// objects count as leaves.
pub fn collect_attribute_paths(value: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    let mut seen = HashSet::new();
    walk(value, String::new(), &mut paths, &mut seen);
    paths
}

fn walk(value: &Value, prefix: String, paths: &mut Vec<String>, seen: &mut HashSet<String>) {
    match value {
        Value::Object(map) if !map.is_empty() && !map.contains_key(SUMMARY_KEY) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                walk(child, path, paths, seen);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            let path = format!("{prefix}[]");
            for item in items {
                walk(item, path.clone(), paths, seen);
            }
        }
        _ => {
            if !prefix.is_empty() && seen.insert(prefix.clone()) {
                paths.push(prefix);
            }
        }
    }
}

/// First segment of an attribute path
pub fn category(path: &str) -> &str {
    let end = path.find(['.', '[']).unwrap_or(path.len());
    &path[..end]
}

/// Attribute path → datasets and category → attribute paths
#[derive(Debug, Default, Clone)]
pub struct Consolidator {
    datasets: BTreeSet<String>,
    attributes: BTreeMap<String, BTreeSet<String>>,
    categories: BTreeMap<String, BTreeSet<String>>,
}

impl Consolidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, dataset: &str, metadata: &Value) {
        self.datasets.insert(dataset.to_string());
        for path in collect_attribute_paths(metadata) {
            self.categories
                .entry(category(&path).to_string())
                .or_default()
                .insert(path.clone());
            self.attributes
                .entry(path)
                .or_default()
                .insert(dataset.to_string());
        }
    }

    /// Reads a metadata JSON file and adds it under `dataset`
    pub fn add_file(&mut self, dataset: &str, path: &Path) -> DatasetResult<()> {
        let buf = std::fs::read(path)?;
        let metadata: Value = serde_json::from_slice(&buf)?;
        self.add(dataset, &metadata);
        Ok(())
    }

    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.datasets.iter().map(String::as_str)
    }

    /// Datasets carrying `path`
    pub fn datasets_with(&self, path: &str) -> Option<&BTreeSet<String>> {
        self.attributes.get(path)
    }

    /// Paths every added dataset carries
    pub fn common_attributes(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(_, sets)| sets.len() == self.datasets.len())
            .map(|(path, _)| path.as_str())
            .collect()
    }

    pub fn report(&self) -> Value {
        json!({
            "datasets": self.datasets,
            "attributes": self.attributes,
            "categories": self.categories,
            "common_attributes": self.common_attributes(),
        })
    }
}

/// Dataset name of a metadata file: its path below the outputs directory
/// without the `_metadata.json` or `.json` suffix
fn dataset_name(outputs_dir: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(outputs_dir).unwrap_or(file);
    let name = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let name = name.strip_suffix(".json").unwrap_or(&name);
    name.strip_suffix("_metadata").unwrap_or(name).to_string()
}

/// Consolidates every `*.json` file below `outputs_dir` into `out_file`.
///
/// Files that are not valid JSON are logged and left out. `out_file` itself
/// is never read.
pub fn consolidate_dir(outputs_dir: &Path, out_file: &Path) -> DatasetResult<Outcome> {
    let start = Instant::now();
    let mut consolidator = Consolidator::new();
    for entry in WalkDir::new(outputs_dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || !path.extension().is_some_and(|e| e == "json")
            || path == out_file
        {
            continue;
        }
        let dataset = dataset_name(outputs_dir, path);
        if let Err(e) = consolidator.add_file(&dataset, path) {
            warn!("skipping {}: {e}", path.display());
        }
    }
    info!(
        "Consolidated {} metadata files in {} seconds.",
        consolidator.datasets.len(),
        elapsed_secs(start)
    );
    save_metadata_as_json(&consolidator.report(), out_file)
}

#[cfg(test)]
mod test_consolidate {
    use super::*;

    #[test]
    fn test_collect_attribute_paths() {
        let value = json!({
            "global_info": {"is_bigtiff": false, "pages_count": 2},
            "pages": [
                {"page_index": 0, "page_tiff_tags": {"ImageWidth": 8}},
                {"page_index": 1, "page_tiff_tags": {"ImageWidth": 8, "Software": "x"}}
            ],
            "empty": {},
            "blob": {"__summary__": "bytes", "len": 9000}
        });
        assert_eq!(
            collect_attribute_paths(&value),
            [
                "global_info.is_bigtiff",
                "global_info.pages_count",
                "pages[].page_index",
                "pages[].page_tiff_tags.ImageWidth",
                "pages[].page_tiff_tags.Software",
                "empty",
                "blob",
            ]
        );
        assert!(collect_attribute_paths(&json!(3)).is_empty());
    }

    #[test]
    #[rustfmt::skip]
    fn test_category() {
        let cases = [
            ("global_info.is_bigtiff", "global_info"),
            ("pages[].page_index",     "pages"),
            ("ImageWidth",             "ImageWidth"),
        ];
        for (path, expected) in cases {
            assert_eq!(category(path), expected);
        }
    }

    #[test]
    fn test_consolidator_report() {
        let mut c = Consolidator::new();
        c.add("epfl", &json!({"global_info": {"is_bigtiff": false}, "pages": [1]}));
        c.add("u2os", &json!({"global_info": {"is_bigtiff": true, "is_ome": false}}));
        assert_eq!(c.common_attributes(), ["global_info.is_bigtiff"]);
        assert_eq!(c.datasets_with("pages[]").unwrap().len(), 1);
        let report = c.report();
        assert_eq!(report["datasets"], json!(["epfl", "u2os"]));
        assert_eq!(
            report["categories"]["global_info"],
            json!(["global_info.is_bigtiff", "global_info.is_ome"])
        );
        assert_eq!(report["attributes"]["pages[]"], json!(["epfl"]));
    }

    #[test]
    fn test_dataset_name() {
        let out = Path::new("outputs");
        assert_eq!(
            dataset_name(out, Path::new("outputs/epfl_hippocampus_metadata.json")),
            "epfl_hippocampus"
        );
        assert_eq!(
            dataset_name(out, Path::new("outputs/u2os_chromatin_metadata/a_metadata.json")),
            "u2os_chromatin_metadata/a"
        );
    }

    #[test]
    fn test_consolidate_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a_metadata.json"), r#"{"x": 1}"#).unwrap();
        std::fs::write(dir.path().join("b_metadata.json"), r#"{"x": 2, "y": 3}"#).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let out = dir.path().join("consolidated.json");
        assert_eq!(consolidate_dir(dir.path(), &out).unwrap(), Outcome::Written);
        let report: Value = serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(report["datasets"], json!(["a", "b"]));
        assert_eq!(report["common_attributes"], json!(["x"]));
    }
}
