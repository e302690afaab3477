use std::{fs, path::Path};

use bioimage_datasets::{
    config::Config,
    consolidate::consolidate_dir,
    metadata::{
        extract_all_tif_metadata, extract_dm3_metadata, extract_zarr_metadata,
        get_brief_tif_metadata, Outcome,
    },
};
use serde_json::{json, Value};

/// (tag, type, count, value bytes); values over 4 bytes go after the IFD
type Entry = (u16, u16, u32, Vec<u8>);

fn short(tag: u16, v: u16) -> Entry {
    (tag, 3, 1, v.to_le_bytes().to_vec())
}

/// Little-endian classic TIFF, one IFD per page
fn build_tiff(pages: &[Vec<Entry>]) -> Vec<u8> {
    build_tiff_in(false, pages)
}

/// Classic TIFF in either byte order. Entry values must already be encoded
/// in that order.
fn build_tiff_in(big_endian: bool, pages: &[Vec<Entry>]) -> Vec<u8> {
    let u16b = |v: u16| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
    let u32b = |v: u32| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
    let mut buf = if big_endian { b"MM".to_vec() } else { b"II".to_vec() };
    buf.extend(u16b(42));
    buf.extend(u32b(8));
    for (i, entries) in pages.iter().enumerate() {
        let ifd_start = buf.len();
        let mut extra_at = ifd_start + 2 + 12 * entries.len() + 4;
        let mut extras: Vec<u8> = Vec::new();
        buf.extend(u16b(entries.len() as u16));
        for (tag, tag_type, count, value) in entries {
            buf.extend(u16b(*tag));
            buf.extend(u16b(*tag_type));
            buf.extend(u32b(*count));
            if value.len() <= 4 {
                let mut field = value.clone();
                field.resize(4, 0);
                buf.extend(field);
            } else {
                buf.extend(u32b(extra_at as u32));
                extra_at += value.len();
                extras.extend_from_slice(value);
            }
        }
        let next = if i + 1 == pages.len() { 0 } else { extra_at as u32 };
        buf.extend(u32b(next));
        buf.extend(extras);
    }
    buf
}

fn ascii(tag: u16, text: &str) -> Entry {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    (tag, 2, bytes.len() as u32, bytes)
}

fn page(description: &str) -> Vec<Entry> {
    let mut text = description.as_bytes().to_vec();
    text.push(0);
    let offsets: Vec<u8> = (0..100u32).flat_map(|i| (i * 8).to_le_bytes()).collect();
    vec![
        short(256, 8),
        short(257, 4),
        short(258, 8),
        short(259, 1),
        short(262, 1),
        (270, 2, text.len() as u32, text),
        (273, 4, 100, offsets),
        short(277, 1),
    ]
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

#[test]
fn tiff_full_and_brief_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let tif = dir.path().join("volumedata.tif");
    fs::write(&tif, build_tiff(&[page("first page"), page("second page")])).unwrap();
    let config = Config::default();

    let out = dir.path().join("outputs/volumedata_metadata.json");
    assert_eq!(
        extract_all_tif_metadata(&tif, &out, &config).unwrap(),
        Outcome::Written
    );
    let meta = read_json(&out);
    assert_eq!(
        meta["global_info"],
        json!({
            "is_bigtiff": false, "is_ome": false, "is_lsm": false, "is_fei": false,
            "byteorder": "<", "series_count": 1, "pages_count": 2
        })
    );
    assert_eq!(meta["ome_xml_global"], "No OME-XML metadata found at global level.");
    let first = &meta["pages"][0];
    assert_eq!(first["page_index"], 0);
    assert_eq!(first["shape"], json!([4, 8]));
    assert_eq!(first["dtype"], "uint8");
    assert_eq!(first["compression"], "NONE");
    assert_eq!(first["photometric"], "MINISBLACK");
    assert_eq!(first["resolution_unit"], "NONE");
    assert_eq!(first["image_description"], "first page");
    assert_eq!(first["page_tiff_tags"]["ImageWidth"], 8);
    // 100 strip offsets exceed the default sequence bound
    assert_eq!(first["page_tiff_tags"]["StripOffsets"]["__summary__"], "array");
    assert_eq!(first["page_tiff_tags"]["StripOffsets"]["len"], 100);
    assert_eq!(meta["pages"][1]["image_description"], "second page");

    assert_eq!(
        extract_all_tif_metadata(&tif, &out, &config).unwrap(),
        Outcome::Skipped
    );

    let brief = dir.path().join("outputs/volumedata_brief.json");
    get_brief_tif_metadata(&tif, &brief, &config).unwrap();
    let meta = read_json(&brief);
    assert_eq!(meta["ImageSize"], json!([8, 4]));
    assert_eq!(meta["Format"], "TIFF");
    assert_eq!(meta["Mode"], "L");
    assert_eq!(meta["Frames"], json!([2]));
    assert_eq!(meta["IsMultiPage"], true);
    assert_eq!(meta["Info"]["compression"], "raw");
    assert_eq!(meta["ImageDescription"], "first page");
}

#[test]
fn lsm_and_fei_tiff_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default();

    let mut record = vec![0u8; 96];
    record[..4].copy_from_slice(&0x0040_0494_C0u32.to_le_bytes());
    record[8..12].copy_from_slice(&512i32.to_le_bytes());
    record[40..48].copy_from_slice(&0.25f64.to_le_bytes());
    let mut lsm_page = page("");
    lsm_page.push((34412, 7, 96, record));
    let lsm = dir.path().join("scan.lsm");
    fs::write(&lsm, build_tiff(&[lsm_page.clone(), lsm_page])).unwrap();
    let out = dir.path().join("scan_metadata.json");
    extract_all_tif_metadata(&lsm, &out, &config).unwrap();
    let meta = read_json(&out);
    assert_eq!(meta["global_info"]["is_lsm"], true);
    assert_eq!(meta["global_info"]["is_fei"], false);
    // an LSM file is one series however many pages it has
    assert_eq!(meta["global_info"]["series_count"], 1);
    assert_eq!(meta["lsm_metadata"]["MagicNumber"], 0x0040_0494_C0u32);
    assert_eq!(meta["lsm_metadata"]["DimensionX"], 512);
    assert_eq!(meta["lsm_metadata"]["VoxelSizeX"], 0.25);
    assert!(meta.get("fei_metadata").is_none());

    let mut fei_page = page("");
    fei_page.push(ascii(34682, "[User]\r\nDate=12/01/2019\r\n[Beam]\r\nHV=2000\r\nWD=0.0041\r\n"));
    let fei = dir.path().join("helios.tif");
    fs::write(&fei, build_tiff(&[fei_page])).unwrap();
    let out = dir.path().join("helios_metadata.json");
    extract_all_tif_metadata(&fei, &out, &config).unwrap();
    let meta = read_json(&out);
    assert_eq!(meta["global_info"]["is_fei"], true);
    assert_eq!(meta["global_info"]["is_lsm"], false);
    assert_eq!(meta["fei_metadata"]["User"]["Date"], "12/01/2019");
    assert_eq!(meta["fei_metadata"]["Beam"]["HV"], 2000);
    assert_eq!(meta["fei_metadata"]["Beam"]["WD"], 0.0041);
    assert!(meta.get("lsm_metadata").is_none());
}

#[test]
fn ome_tiff_series_and_global_xml() {
    let dir = tempfile::tempdir().unwrap();
    let xml = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">"#,
        r#"<Image ID="Image:0" Name="a"><Pixels SizeX="8" SizeY="4"/></Image>"#,
        r#"<Image ID="Image:1" Name="b"><Pixels SizeX="8" SizeY="4"/></Image>"#,
        "</OME>"
    );
    let tif = dir.path().join("cells.ome.tif");
    fs::write(&tif, build_tiff(&[page(xml), page("")])).unwrap();
    let out = dir.path().join("cells_metadata.json");
    extract_all_tif_metadata(&tif, &out, &Config::default()).unwrap();

    let meta = read_json(&out);
    assert_eq!(meta["global_info"]["is_ome"], true);
    assert_eq!(meta["global_info"]["series_count"], 2);
    assert_eq!(meta["global_info"]["pages_count"], 2);
    assert_eq!(meta["ome_xml_global"], xml);
}

#[test]
fn big_endian_tiff_metadata() {
    let short_be = |tag: u16, v: u16| -> Entry { (tag, 3, 1, v.to_be_bytes().to_vec()) };
    let mut description = b"big endian".to_vec();
    description.push(0);
    let entries = vec![
        short_be(256, 8),
        short_be(257, 4),
        short_be(258, 16),
        short_be(259, 1),
        short_be(262, 1),
        (270, 2, description.len() as u32, description),
        (273, 4, 1, 64u32.to_be_bytes().to_vec()),
        short_be(277, 1),
        (282, 5, 1, [72u32.to_be_bytes(), 1u32.to_be_bytes()].concat()),
        short_be(296, 2),
    ];
    let dir = tempfile::tempdir().unwrap();
    let tif = dir.path().join("motorola.tif");
    fs::write(&tif, build_tiff_in(true, &[entries])).unwrap();
    let config = Config::default();

    let out = dir.path().join("motorola_metadata.json");
    extract_all_tif_metadata(&tif, &out, &config).unwrap();
    let meta = read_json(&out);
    assert_eq!(meta["global_info"]["byteorder"], ">");
    let first = &meta["pages"][0];
    assert_eq!(first["shape"], json!([4, 8]));
    assert_eq!(first["dtype"], "uint16");
    assert_eq!(first["image_description"], "big endian");
    assert_eq!(first["resolution_unit"], "INCH");
    assert_eq!(first["page_tiff_tags"]["ImageWidth"], 8);
    assert_eq!(first["page_tiff_tags"]["StripOffsets"], 64);
    assert_eq!(first["page_tiff_tags"]["XResolution"], json!([72, 1]));

    let brief = dir.path().join("motorola_brief.json");
    get_brief_tif_metadata(&tif, &brief, &config).unwrap();
    let meta = read_json(&brief);
    assert_eq!(meta["Mode"], "I;16B");
    assert_eq!(meta["Info"]["dpi"], json!([72.0, 1.0]));
}

#[test]
fn invalid_tiff_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let tif = dir.path().join("broken.tif");
    fs::write(&tif, b"PK\x03\x04").unwrap();
    let out = dir.path().join("broken.json");
    assert!(extract_all_tif_metadata(&tif, &out, &Config::default()).is_err());
    assert!(!out.exists());
}

/// DM3 file with little-endian data:
/// `{Exposure: 0.5, Microscope: {Voltage: 200000}}`
fn build_dm3() -> Vec<u8> {
    fn label(buf: &mut Vec<u8>, kind: u8, name: &str) {
        buf.push(kind);
        buf.extend((name.len() as u16).to_be_bytes());
        buf.extend(name.as_bytes());
    }
    fn data(buf: &mut Vec<u8>, name: &str, dm_type: u32, payload: &[u8]) {
        label(buf, 21, name);
        buf.extend(b"%%%%");
        buf.extend(1u32.to_be_bytes());
        buf.extend(dm_type.to_be_bytes());
        buf.extend(payload);
    }
    let mut buf = Vec::new();
    buf.extend(3u32.to_be_bytes());
    buf.extend(0u32.to_be_bytes());
    buf.extend(1u32.to_be_bytes());
    buf.extend([0, 1]);
    buf.extend(2u32.to_be_bytes());
    data(&mut buf, "Exposure", 7, &0.5f64.to_le_bytes());
    label(&mut buf, 20, "Microscope");
    buf.extend([0, 1]);
    buf.extend(1u32.to_be_bytes());
    data(&mut buf, "Voltage", 5, &200_000u32.to_le_bytes());
    buf
}

#[test]
fn dm3_metadata_goes_to_stem_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("raw/grid_01.dm3");
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(&file, build_dm3()).unwrap();
    let folder = dir.path().join("outputs/empiar_11759_metadata");

    extract_dm3_metadata(&file, &folder, &Config::default()).unwrap();
    let meta = read_json(&folder.join("grid_01_metadata.json"));
    assert_eq!(meta["version"], 3);
    assert_eq!(meta["byte_order"], "little");
    assert_eq!(meta["tags"]["Exposure"], 0.5);
    assert_eq!(meta["tags"]["Microscope"]["Voltage"], 200_000);
}

fn write_json(path: &Path, value: Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
}

#[test]
fn zarr_metadata_and_consolidation() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("raw/jrc_mus_nacc_2.zarr");
    write_json(&root.join(".zgroup"), json!({"zarr_format": 2}));
    write_json(
        &root.join(".zattrs"),
        json!({"multiscales": [{"name": "fibsem-int16", "datasets": [{"path": "s0"}]}]}),
    );
    write_json(
        &root.join("s0/.zarray"),
        json!({
            "zarr_format": 2, "shape": [4, 4], "chunks": [2, 2], "dtype": "<i2",
            "compressor": {"id": "gzip", "level": 5}, "fill_value": 0,
            "order": "C", "filters": null
        }),
    );
    fs::write(root.join("s0/0.0"), b"chunk").unwrap();
    let config = Config::default();

    let outputs = dir.path().join("outputs");
    let out = outputs.join("jrc_mus_nacc_zarr_metadata.json");
    extract_zarr_metadata(&root, &out, &config).unwrap();
    let meta = read_json(&out);
    assert_eq!(meta["summary"], json!({"groups": 1, "arrays": 1, "depth": 1}));
    let hierarchy = &meta["hierarchy"];
    assert_eq!(hierarchy["node_type"], "group");
    assert_eq!(hierarchy["attributes"]["multiscales"][0]["name"], "fibsem-int16");
    let array = &hierarchy["children"]["s0"]["array"];
    assert_eq!(array["shape"], json!([4, 4]));
    assert_eq!(array["dimension_separator"], ".");
    assert_eq!(array["nchunks"], 4);
    assert_eq!(array["nchunks_initialized"], 1);

    write_json(&outputs.join("other_metadata.json"), json!({"summary": {"groups": 0}}));
    let report_file = dir.path().join("report.json");
    consolidate_dir(&outputs, &report_file).unwrap();
    let report = read_json(&report_file);
    assert_eq!(report["datasets"], json!(["jrc_mus_nacc_zarr", "other"]));
    assert_eq!(report["common_attributes"], json!(["summary.groups"]));
    assert_eq!(report["attributes"]["hierarchy.children.s0.array.nchunks"], json!(["jrc_mus_nacc_zarr"]));
}

#[test]
fn missing_zarr_is_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let result = extract_zarr_metadata(
        &dir.path().join("absent.zarr"),
        &dir.path().join("out.json"),
        &Config::default(),
    );
    assert!(matches!(
        result,
        Err(bioimage_datasets::DatasetError::MissingInput(_))
    ));
}
