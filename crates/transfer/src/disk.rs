//! Seekable, sized byte streams over a disk image.
//!
//! Decoding a virtual-disk container is not done here; anything that can
//! seek, read and report its size can be uploaded.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use crate::range::IndexRange;

/// A random-access disk image.
///
/// Implementations must return an error (never a silent short read) when the
/// underlying storage fails.
pub trait DiskStream: Read + Seek + Send {
    /// Total size of the disk in bytes.
    fn size(&self) -> u64;

    /// Ranges of the disk that may contain data, sorted and non-overlapping.
    ///
    /// Streams over sparse formats can narrow this down to allocated blocks;
    /// the default covers the whole disk.
    fn extents(&self) -> Vec<IndexRange> {
        IndexRange::from_length(0, self.size())
            .map(|whole| vec![whole])
            .unwrap_or_default()
    }
}

/// A raw disk image file.
pub struct FileDiskStream {
    file: File,
    size: u64,
}

impl FileDiskStream {
    /// Opens `path` for reading.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl Read for FileDiskStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileDiskStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl DiskStream for FileDiskStream {
    fn size(&self) -> u64 {
        self.size
    }
}

impl<T: AsRef<[u8]> + Send> DiskStream for Cursor<T> {
    fn size(&self) -> u64 {
        self.get_ref().as_ref().len() as u64
    }
}
