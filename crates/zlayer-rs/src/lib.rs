#![forbid(unsafe_code)]
//! Lazy-loading access to compressed container image layers.
//!
//! This library exposes a random-access byte interface over a compressed
//! image layer whose contents are fetched on demand from remote storage.
//! The layer is described by an out-of-band index (the ZTOC, "zipped table
//! of contents") mapping file paths and logical offsets to compressed-byte
//! spans. Three pieces are bound together:
//!
//! - An embedded **metadata store** ([`MetadataStore`]) that ingests the
//!   ZTOC once, lays out a filesystem tree in a [`jammdb`] database, and
//!   serves random-access queries over inodes, directory entries, and file
//!   extent descriptors.
//! - A **layer reader** ([`Reader`]) that, given an inode id, produces a
//!   random-access byte stream for that file, delegating byte retrieval to
//!   an external [`SpanManager`] which owns span fetching, caching, and
//!   decompression.
//! - A **verification gate** ([`VerifiableReader`]) in front of the reader
//!   that requires a TOC digest to be presented before any caller-visible
//!   read is permitted.
//!
//! Span fetching, cache eviction, network transport, and user-visible
//! mount surfaces are out of scope; they plug in through the
//! [`SpanManager`], [`FileExtractor`], and [`MetricsSink`] seams.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zlayer_rs::{
//!     FileRead, MetadataReader, MetadataStore, Reader, SectionReader, StoreOptions,
//!     VerifiableReader,
//! };
//!
//! # fn span_manager() -> Arc<dyn zlayer_rs::SpanManager> { unimplemented!() }
//! # fn load_ztoc() -> zlayer_rs::Ztoc { unimplemented!() }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = jammdb::DB::open("metadata.db")?;
//! let layer = std::fs::File::open("layer.tar.gz")?;
//! let size = layer.metadata()?.len();
//! let sr = SectionReader::new(Arc::new(layer), 0, size);
//!
//! let metadata = MetadataStore::new(db, sr, &load_ztoc(), StoreOptions::default())?;
//! let gate = VerifiableReader::new(Arc::new(metadata), "sha256:...", span_manager());
//!
//! // Attest the TOC digest, then serve file bytes on demand.
//! let reader = gate.verify_toc("sha256:...")?;
//! let meta = reader.metadata();
//! let (id, _attr) = meta.get_child(meta.root_id(), "etc")?;
//! let file = reader.open_file(id)?;
//! let mut buf = vec![0u8; file.uncompressed_size() as usize];
//! file.read_at(&mut buf, 0)?;
//! # Ok(()) }
//! ```
//!
//! # Concurrency
//!
//! Every public operation is callable from multiple threads. Queries
//! issued before ingest completes block on an initialization barrier; the
//! store is read-only afterwards. Closing is idempotent, and subsequent
//! operations fail with [`LayerError::Closed`].

// Core metadata and reading
pub mod error;
pub mod metadata;
pub mod reader;
pub mod ztoc;

// Byte access seams
pub mod extract;
pub mod section;
pub mod span;

// Verification and observability
pub mod metrics;
pub mod verify;

// Re-export commonly used types
pub use error::{LayerError, Result};
pub use extract::{FileExtractor, GzipExtractor};
pub use metadata::{Attr, FileRead, MetadataReader, MetadataStore, StoreOptions, Telemetry};
pub use metrics::{
    MetricsSink, NopMetrics, ON_DEMAND_BYTES_SERVED, ON_DEMAND_REMOTE_REGISTRY_FETCH_COUNT,
};
pub use reader::{Reader, VerifiableReader};
pub use section::{ReadAt, SectionReader};
pub use span::SpanManager;
pub use verify::{digest_verifier, sha256_digest, ChunkVerifier, Sha256Verifier, VerifierFactory};
pub use ztoc::{
    clean_entry_name, EntryType, FileExtractConfig, FileMetadata, FileSize, SpanId, Ztoc,
};
