//! ZTOC: the table of contents describing a compressed image layer.
//!
//! A ZTOC maps file paths and logical offsets inside a layer to
//! compressed-byte spans, so that individual files can be served without
//! fetching or decompressing the whole layer. It is produced out of band
//! (at index-build time) and consumed here by the metadata store and the
//! file extractor.
//!
//! The span index itself (`index_byte_data`) is opaque to this crate; it is
//! carried through the metadata store and handed back to the
//! [`FileExtractor`](crate::extract::FileExtractor) as part of a
//! [`FileExtractConfig`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{LayerError, Result};

/// Identifier of a span: a fixed-size window of the compressed layer that is
/// independently decompressible given a prior-state hint.
pub type SpanId = u32;

/// A byte size or byte offset within the uncompressed layer.
pub type FileSize = u64;

/// Type-bit mask of a unix file mode.
pub const MODE_TYPE_MASK: u32 = 0o170000;
/// Directory type bits.
pub const MODE_DIR: u32 = 0o040000;
/// Regular-file type bits.
pub const MODE_REG: u32 = 0o100000;
/// Symlink type bits.
pub const MODE_SYMLINK: u32 = 0o120000;
/// Character-device type bits.
pub const MODE_CHAR: u32 = 0o020000;
/// Block-device type bits.
pub const MODE_BLOCK: u32 = 0o060000;
/// FIFO type bits.
pub const MODE_FIFO: u32 = 0o010000;

/// Returns true if the mode describes a regular file.
pub fn is_regular(mode: u32) -> bool {
    mode & MODE_TYPE_MASK == MODE_REG
}

/// Returns true if the mode describes a directory.
pub fn is_dir(mode: u32) -> bool {
    mode & MODE_TYPE_MASK == MODE_DIR
}

/// Type of a ZTOC entry.
///
/// Matches the eStargz specification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Regular file
    Reg,
    /// Directory
    Dir,
    /// Symbolic link
    Symlink,
    /// Hard link
    Hardlink,
    /// Character device
    Char,
    /// Block device
    Block,
    /// FIFO (named pipe)
    Fifo,
}

impl EntryType {
    /// The unix type bits for this entry type.
    ///
    /// Hardlinks carry the type of their target and contribute no type bits
    /// of their own.
    pub fn mode_bits(self) -> u32 {
        match self {
            EntryType::Reg | EntryType::Hardlink => MODE_REG,
            EntryType::Dir => MODE_DIR,
            EntryType::Symlink => MODE_SYMLINK,
            EntryType::Char => MODE_CHAR,
            EntryType::Block => MODE_BLOCK,
            EntryType::Fifo => MODE_FIFO,
        }
    }
}

/// The table of contents of one compressed layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ztoc {
    /// Version of the ZTOC format.
    pub version: String,

    /// Opaque span-index bytes consumed by the file extractor.
    pub index_byte_data: Vec<u8>,

    /// Total size of the compressed layer in bytes.
    pub compressed_file_size: FileSize,

    /// Highest span id present in the layer.
    pub max_span_id: SpanId,

    /// Per-file metadata, in layer order.
    pub file_metadata: Vec<FileMetadata>,
}

/// Metadata of a single entry in the layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Complete path in the layer (e.g., "usr/bin/bash").
    pub name: String,

    /// Type of this entry.
    #[serde(rename = "type")]
    pub kind: EntryType,

    /// Absolute offset of the file's first byte within the uncompressed
    /// layer. Zero for entries without payload.
    #[serde(default)]
    pub uncompressed_offset: FileSize,

    /// Uncompressed size in bytes. Zero for entries without payload.
    #[serde(default)]
    pub uncompressed_size: FileSize,

    /// Link target for symlinks and hardlinks.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub linkname: String,

    /// Permission bits (type bits are derived from `kind`).
    pub mode: u32,

    /// User ID of the owner.
    pub uid: u32,

    /// Group ID of the owner.
    pub gid: u32,

    /// Modification time in nanoseconds since the unix epoch.
    #[serde(default)]
    pub mod_time: i64,

    /// Major device number for char/block devices.
    #[serde(default)]
    pub dev_major: u32,

    /// Minor device number for char/block devices.
    #[serde(default)]
    pub dev_minor: u32,

    /// Extended attributes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub xattrs: HashMap<String, String>,

    /// First span holding this file's bytes.
    #[serde(default)]
    pub span_start: SpanId,

    /// Last span holding this file's bytes (inclusive).
    #[serde(default)]
    pub span_end: SpanId,

    /// Whether the file's first byte is not span-aligned, so the
    /// decompressor must preserve leading bits from the prior span.
    #[serde(default)]
    pub first_span_has_bits: bool,
}

impl FileMetadata {
    /// The full unix mode of this entry: type bits merged with permissions.
    pub fn file_mode(&self) -> u32 {
        self.kind.mode_bits() | (self.mode & !MODE_TYPE_MASK)
    }
}

/// Everything the file extractor needs to locate and decompress one file.
///
/// Combines the file's extent descriptor with the ZTOC record it
/// references.
#[derive(Debug, Clone)]
pub struct FileExtractConfig {
    /// Uncompressed size of the file.
    pub uncompressed_size: FileSize,
    /// Absolute uncompressed offset of the file within the layer.
    pub uncompressed_offset: FileSize,
    /// First span holding the file's bytes.
    pub span_start: SpanId,
    /// Last span holding the file's bytes (inclusive).
    pub span_end: SpanId,
    /// Whether decompression of the first span needs leading bits from the
    /// prior span.
    pub first_span_has_bits: bool,
    /// Opaque span-index bytes of the referenced ZTOC.
    pub index_byte_data: Vec<u8>,
    /// Total compressed layer size.
    pub compressed_file_size: FileSize,
    /// Highest span id of the layer.
    pub max_span_id: SpanId,
    /// ZTOC format version.
    pub version: String,
}

/// Normalize an entry name to a root-relative forward-slash path.
///
/// Collapses repeated separators, removes `.` segments, and strips a leading
/// slash. `..` segments are rejected: a ZTOC naming a parent directory is
/// malformed and resolving it would let one entry escape the layer root.
pub fn clean_entry_name(name: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(LayerError::Ingest(format!(
                    "entry name {name:?} contains a parent directory segment"
                )))
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}
