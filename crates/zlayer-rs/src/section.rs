//! Positional-read access to the compressed layer.
//!
//! A [`SectionReader`] exposes a window of an underlying positional reader,
//! so that the metadata store and file extractor can address the compressed
//! layer bytes without owning the whole blob or sharing a file cursor. Each
//! clone addresses the same window independently.

use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

/// Positional reads over some byte source.
///
/// Unlike `std::io::Read`, reads do not move a shared cursor, so one source
/// can serve concurrent readers.
pub trait ReadAt: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`, returning the number of
    /// bytes read. A return of 0 means end of source.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

impl ReadAt for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        FileExt::read_at(self, buf, offset)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.len() as u64 {
            return Ok(0);
        }
        let available = &self[offset as usize..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }
}

/// A fixed `[offset, offset+length)` window over a [`ReadAt`] source.
#[derive(Clone)]
pub struct SectionReader {
    inner: Arc<dyn ReadAt>,
    offset: u64,
    length: u64,
}

impl std::fmt::Debug for SectionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionReader")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}

impl SectionReader {
    /// Create a section over `[offset, offset+length)` of `inner`.
    pub fn new(inner: Arc<dyn ReadAt>, offset: u64, length: u64) -> Self {
        Self {
            inner,
            offset,
            length,
        }
    }

    /// Length of the section in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Returns true if the section is empty.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Read up to `buf.len()` bytes at `offset` relative to the section
    /// start. Reads never cross the end of the section.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.length {
            return Ok(0);
        }
        let remaining = (self.length - offset) as usize;
        let want = buf.len().min(remaining);
        self.inner.read_at(&mut buf[..want], self.offset + offset)
    }

    /// Read the entire section into a vector.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut out = vec![0u8; self.length as usize];
        let mut filled = 0usize;
        while filled < out.len() {
            let n = self.read_at(&mut out[filled..], filled as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "section source ended after {filled} of {} bytes",
                        self.length
                    ),
                ));
            }
            filled += n;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_section_over_vec() {
        let data: Vec<u8> = (0u8..32).collect();
        let section = SectionReader::new(Arc::new(data), 4, 8);

        let mut buf = [0u8; 8];
        let n = section.read_at(&mut buf, 0).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf, &[4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_read_clamped_to_section_end() {
        let data: Vec<u8> = (0u8..32).collect();
        let section = SectionReader::new(Arc::new(data), 0, 10);

        let mut buf = [0u8; 16];
        let n = section.read_at(&mut buf, 6).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..n], &[6, 7, 8, 9]);
    }

    #[test]
    fn test_read_past_end_returns_zero() {
        let data: Vec<u8> = vec![1, 2, 3];
        let section = SectionReader::new(Arc::new(data), 0, 3);

        let mut buf = [0u8; 4];
        assert_eq!(section.read_at(&mut buf, 3).unwrap(), 0);
        assert_eq!(section.read_at(&mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn test_read_all_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello section reader").unwrap();

        let f = std::fs::File::open(file.path()).unwrap();
        let section = SectionReader::new(Arc::new(f), 6, 7);
        assert_eq!(section.read_all().unwrap(), b"section");
    }

    #[test]
    fn test_read_all_reports_truncated_source() {
        // Section claims more bytes than the source holds.
        let data: Vec<u8> = vec![1, 2, 3];
        let section = SectionReader::new(Arc::new(data), 0, 10);
        let err = section.read_all().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_clones_share_source() {
        let data: Vec<u8> = (0u8..8).collect();
        let section = SectionReader::new(Arc::new(data), 2, 4);
        let clone = section.clone();

        assert_eq!(section.read_all().unwrap(), clone.read_all().unwrap());
    }
}
