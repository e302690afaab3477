//! Metadata-only TIFF reading: the header, the IFD chain and tag values.

pub mod entry;
pub mod file;
pub mod ifd;
mod proprietary;
pub mod tags;
pub mod value;

pub use file::{Page, TiffFile};
pub use ifd::Ifd;
pub use tags::{Tag, TagType};
pub use value::Value;
