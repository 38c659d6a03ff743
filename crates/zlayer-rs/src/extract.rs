//! File extraction from the compressed layer.
//!
//! The [`FileExtractor`] trait is the seam between the metadata store's file
//! handles and the decompression machinery: given a section of the
//! compressed layer and a [`FileExtractConfig`], it returns the file's
//! decompressed bytes. [`GzipExtractor`] is the production implementation
//! for gzip layers; it decompresses the section as one stream and slices
//! the file's range out of it. A span-aware extractor can use the config's
//! span ids and index bytes to decompress only the covering spans instead.

use std::io::Read;

use flate2::read::GzDecoder;

use crate::error::{LayerError, Result};
use crate::section::SectionReader;
use crate::ztoc::FileExtractConfig;

/// Decompresses one file's bytes out of a compressed layer section.
pub trait FileExtractor: Send + Sync {
    /// Return the decompressed bytes of the file described by `config`,
    /// reading compressed input from `sr`.
    fn extract_file(&self, sr: &SectionReader, config: &FileExtractConfig) -> Result<Vec<u8>>;
}

/// Whole-layer gzip extractor.
///
/// Inflates the full section and slices out
/// `[uncompressed_offset, uncompressed_offset + uncompressed_size)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipExtractor;

impl FileExtractor for GzipExtractor {
    fn extract_file(&self, sr: &SectionReader, config: &FileExtractConfig) -> Result<Vec<u8>> {
        let compressed = sr.read_all()?;
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut uncompressed = Vec::new();
        decoder.read_to_end(&mut uncompressed)?;

        let start = config.uncompressed_offset as usize;
        let end = start.saturating_add(config.uncompressed_size as usize);
        if end > uncompressed.len() {
            return Err(LayerError::Extract(format!(
                "file range {start}..{end} exceeds decompressed layer of {} bytes",
                uncompressed.len()
            )));
        }
        Ok(uncompressed[start..end].to_vec())
    }
}
