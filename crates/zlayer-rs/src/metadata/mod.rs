//! Filesystem metadata for one image layer.
//!
//! The metadata store ingests a ZTOC once, lays out a filesystem tree in an
//! embedded key-value store, and serves random-access queries over inodes,
//! directory entries, and file extent descriptors. Ingest happens at
//! construction; the store is read-only thereafter and its namespace is
//! deleted on close.
//!
//! [`MetadataReader`] is the capability set consumed by the layer reader;
//! [`MetadataStore`] is the production implementation backed by
//! [`jammdb`].

mod schema;
mod store;

pub use store::MetadataStore;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::extract::FileExtractor;
use crate::section::SectionReader;
use crate::ztoc::FileSize;

/// Attribute record of one inode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attr {
    /// Size in bytes.
    pub size: i64,
    /// Unix mode: type bits merged with permission bits.
    pub mode: u32,
    /// Link count.
    pub num_link: u32,
    /// Modification time in nanoseconds since the unix epoch.
    pub mod_time: i64,
    /// User ID of the owner.
    pub uid: u32,
    /// Group ID of the owner.
    pub gid: u32,
    /// Major device number for device nodes.
    pub dev_major: u32,
    /// Minor device number for device nodes.
    pub dev_minor: u32,
    /// Symlink target, empty otherwise.
    pub link_name: String,
    /// Extended attributes.
    pub xattrs: HashMap<String, Vec<u8>>,
}

/// Random-access byte view of one regular file.
///
/// Handles returned by [`MetadataReader::open_file`] read through the file
/// extractor; handles returned by the layer reader read through the span
/// manager. Both expose the extent geometry the outer reader needs.
pub trait FileRead: Send + Sync + std::fmt::Debug {
    /// Read up to `buf.len()` bytes at `offset` into `buf`, returning the
    /// number of bytes read. `Ok(0)` signals end of file; negative offsets
    /// fail with an invalid-offset error.
    fn read_at(&self, buf: &mut [u8], offset: i64) -> Result<usize>;

    /// Uncompressed size of the file.
    fn uncompressed_size(&self) -> FileSize;

    /// Absolute offset of the file's bytes within the uncompressed layer.
    fn uncompressed_offset(&self) -> FileSize;
}

/// Query surface over one layer's ingested metadata.
///
/// Every operation is callable from multiple threads. Operations block on
/// the initialization barrier until ingest has completed, except the
/// root-attribute fast path.
pub trait MetadataReader: Send + Sync {
    /// Id of the root directory inode.
    fn root_id(&self) -> u32;

    /// Attribute record of `id`. Fails with not-found if the inode does not
    /// exist.
    fn get_attr(&self, id: u32) -> Result<Attr>;

    /// Child of directory `pid` with base name `base`.
    fn get_child(&self, pid: u32, base: &str) -> Result<(u32, Attr)>;

    /// Visit each child of `id` as `(base name, child id, mode)`. The
    /// callback returns `false` to stop iteration. Iteration order is
    /// unspecified but stable within one call.
    fn for_each_child(&self, id: u32, f: &mut dyn FnMut(&str, u32, u32) -> bool) -> Result<()>;

    /// Open a random-access view of the regular file `id`, of length equal
    /// to its uncompressed size. Fails with not-regular-file for any other
    /// inode type.
    fn open_file(&self, id: u32) -> Result<Box<dyn FileRead>>;

    /// A reader over the same metadata with a different compressed-layer
    /// section reader.
    fn clone_with_reader(&self, sr: SectionReader) -> Result<Arc<dyn MetadataReader>>;

    /// Number of inodes in the store. Intended for tests.
    fn num_of_nodes(&self) -> Result<usize>;

    /// Delete this layer's metadata namespace from the store.
    fn close(&self) -> Result<()>;
}

/// Telemetry callbacks invoked by the metadata store.
#[derive(Default)]
pub struct Telemetry {
    /// Receives the ingest start time, for init-latency measurement.
    pub init_metadata_store_latency: Option<Box<dyn Fn(Instant) + Send + Sync>>,
}

/// Options for building a [`MetadataStore`].
#[derive(Default)]
pub struct StoreOptions {
    /// Telemetry callbacks, if any.
    pub telemetry: Option<Telemetry>,

    /// File extractor used by `open_file` handles.
    ///
    /// Defaults to [`GzipExtractor`](crate::extract::GzipExtractor).
    pub extractor: Option<Arc<dyn FileExtractor>>,
}

impl std::fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreOptions")
            .field("telemetry", &self.telemetry.is_some())
            .field("extractor", &self.extractor.is_some())
            .finish()
    }
}
