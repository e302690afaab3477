use std::io::{self, Read, Seek, SeekFrom};

use crate::ByteOrder;

/// Reader that decodes primitives in a runtime-chosen byte order.
///
/// Used by the TIFF parser (order fixed by the header) and the DM parser,
/// which switches between big-endian structure fields and tag data in the
/// order the file declares.
pub struct EndianReader<R> {
    pub(crate) reader: R,
    pub byte_order: ByteOrder,
}

impl<R: io::Read> io::Read for EndianReader<R> {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl<R: io::Seek> io::Seek for EndianReader<R> {
    #[inline]
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.reader.seek(pos)
    }
}

macro_rules! read_fn {
    ($name:ident, $type:ty) => {
        /// reads an $type, respecting byte order
        #[inline(always)]
        pub fn $name(&mut self) -> Result<$type, io::Error> {
            let mut n = [0u8; std::mem::size_of::<$type>()];
            self.read_exact(&mut n)?;
            Ok(match self.byte_order {
                ByteOrder::LittleEndian => <$type>::from_le_bytes(n),
                ByteOrder::BigEndian => <$type>::from_be_bytes(n),
            })
        }
    };
}

impl<R: io::Read> EndianReader<R> {
    /// Wraps a reader
    pub fn wrap(reader: R, byte_order: ByteOrder) -> Self {
        EndianReader { reader, byte_order }
    }

    read_fn!(read_u8, u8);
    read_fn!(read_i8, i8);
    read_fn!(read_u16, u16);
    read_fn!(read_i16, i16);
    read_fn!(read_u32, u32);
    read_fn!(read_i32, i32);
    read_fn!(read_u64, u64);
    read_fn!(read_i64, i64);

    read_fn!(read_f32, f32);
    read_fn!(read_f64, f64);

    /// reads `n` raw bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, io::Error> {
        let mut buf = vec![0u8; n];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl<R: io::Read + io::Seek> EndianReader<R> {
    /// Moves the cursor to an absolute offset
    pub fn goto_offset(&mut self, offset: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    /// Moves the cursor forward without reading
    pub fn skip(&mut self, n: u64) -> io::Result<()> {
        let n = i64::try_from(n).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.seek(SeekFrom::Current(n)).map(|_| ())
    }

    pub fn position(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}
