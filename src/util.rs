use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use crate::ByteOrder;

impl ByteOrder {
    /// Byte order of the host
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }
}

/// Fix endianness. If `byte_order` matches the host, then conversion is a no-op.
///
/// `bit_depth` is the width of one primitive; rationals are two 32-bit
/// primitives, not one 64-bit value.
pub fn fix_endianness(buf: &mut [u8], byte_order: ByteOrder, bit_depth: u8) {
    if byte_order == ByteOrder::native() {
        return;
    }
    let width = match bit_depth {
        0..=8 => return,
        9..=16 => 2,
        17..=32 => 4,
        _ => 8,
    };
    buf.chunks_exact_mut(width).for_each(<[u8]>::reverse);
}

/// Seconds since `start`, formatted like the rest of the progress logs
pub fn elapsed_secs(start: Instant) -> String {
    format!("{:.2}", start.elapsed().as_secs_f64())
}

/// `<folder>/<file stem>_metadata.json`
pub fn metadata_file_for(folder: &Path, file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    folder.join(format!("{stem}_metadata.json"))
}
