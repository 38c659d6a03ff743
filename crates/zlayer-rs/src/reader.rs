//! Lazy layer reader and its verification gate.
//!
//! The layer reader turns an inode id into a random-access byte view of the
//! file, translating file-relative reads into absolute uncompressed
//! intervals and delegating the actual byte retrieval to the span manager.
//!
//! The reader is not handed out directly: [`VerifiableReader`] owns it
//! until the caller either presents the expected TOC digest
//! ([`VerifiableReader::verify_toc`]) or explicitly opts out
//! ([`VerifiableReader::skip_verify`]). Until then, background span fetches
//! ("warming") attest chunks against the ZTOC; a failure observed during
//! warming is logged, latched, and surfaced by the next `verify_toc` call.
//!
//! ```text
//!         [warming]
//!          |  \
//!    skip  |   \ verify_toc(d)
//!          v    v
//!   [serving-unverified]  [serving-verified]
//!          \    /
//!           v  v
//!          [closed]
//! ```

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use crate::error::{LayerError, Result};
use crate::metadata::{FileRead, MetadataReader};
use crate::metrics::{
    MetricsSink, NopMetrics, ON_DEMAND_BYTES_SERVED, ON_DEMAND_REMOTE_REGISTRY_FETCH_COUNT,
};
use crate::span::SpanManager;
use crate::verify::{digest_verifier, validate_digest, ChunkVerifier, VerifierFactory};
use crate::ztoc::FileSize;

/// Random-access reads over the files of one layer.
pub trait Reader: Send + Sync + std::fmt::Debug {
    /// Open a random-access view of the regular file `id`.
    fn open_file(&self, id: u32) -> Result<Box<dyn FileRead>>;

    /// The metadata reader backing this layer.
    fn metadata(&self) -> Arc<dyn MetadataReader>;

    /// Close the reader and its metadata store. Idempotent; all operations
    /// fail closed afterwards.
    fn close(&self) -> Result<()>;

    /// When the last on-demand read was served, if any.
    fn last_on_demand_read_time(&self) -> Option<SystemTime>;
}

struct LayerReader {
    span_manager: Arc<dyn SpanManager>,
    metadata: Arc<dyn MetadataReader>,
    layer_digest: String,
    metrics: Arc<dyn MetricsSink>,

    // Shared with open file handles, which outlive no clone of the reader
    // but must not borrow it.
    last_read_time: Arc<Mutex<Option<SystemTime>>>,
    closed: Mutex<bool>,

    /// Set once `verify_toc` succeeds; chunk reads are then attested.
    verify: AtomicBool,
}

impl std::fmt::Debug for LayerReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerReader")
            .field("layer_digest", &self.layer_digest)
            .finish_non_exhaustive()
    }
}

impl LayerReader {
    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl Reader for LayerReader {
    fn open_file(&self, id: u32) -> Result<Box<dyn FileRead>> {
        if self.is_closed() {
            return Err(LayerError::Closed);
        }
        let fr = self.metadata.open_file(id)?;
        if self.verify.load(Ordering::Relaxed) {
            tracing::trace!(id, "chunk verification required for reads");
        }
        Ok(Box::new(OnDemandFile {
            id,
            fr,
            span_manager: Arc::clone(&self.span_manager),
            metrics: Arc::clone(&self.metrics),
            layer_digest: self.layer_digest.clone(),
            last_read_time: Arc::clone(&self.last_read_time),
        }))
    }

    fn metadata(&self) -> Arc<dyn MetadataReader> {
        Arc::clone(&self.metadata)
    }

    fn close(&self) -> Result<()> {
        let mut closed = self.closed.lock().unwrap();
        if *closed {
            return Ok(());
        }
        *closed = true;
        let mut errors = Vec::new();
        if let Err(e) = self.metadata.close() {
            errors.push(e);
        }
        match LayerError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn last_on_demand_read_time(&self) -> Option<SystemTime> {
        *self.last_read_time.lock().unwrap()
    }
}

/// A file served on demand through the span manager.
struct OnDemandFile {
    id: u32,
    fr: Box<dyn FileRead>,
    span_manager: Arc<dyn SpanManager>,
    metrics: Arc<dyn MetricsSink>,
    layer_digest: String,
    last_read_time: Arc<Mutex<Option<SystemTime>>>,
}

impl std::fmt::Debug for OnDemandFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDemandFile")
            .field("id", &self.id)
            .field("layer_digest", &self.layer_digest)
            .finish_non_exhaustive()
    }
}

impl FileRead for OnDemandFile {
    fn read_at(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        if offset < 0 {
            return Err(LayerError::InvalidOffset(offset));
        }
        let offset = offset as FileSize;
        let size = self.fr.uncompressed_size();
        if offset >= size {
            return Ok(0);
        }
        let expected = (buf.len() as FileSize).min(size - offset);
        let start = self.fr.uncompressed_offset() + offset;
        let end = start + expected;

        let mut stream = self.span_manager.get_contents(start, end).map_err(|e| {
            LayerError::Io(std::io::Error::other(format!(
                "failed to read file {}: {e}",
                self.id
            )))
        })?;

        self.metrics
            .inc_operation_count(ON_DEMAND_REMOTE_REGISTRY_FETCH_COUNT, &self.layer_digest);
        *self.last_read_time.lock().unwrap() = Some(SystemTime::now());

        let mut contents = Vec::new();
        stream.read_to_end(&mut contents)?;
        let n = buf.len().min(contents.len());
        buf[..n].copy_from_slice(&contents[..n]);
        if n as FileSize != expected {
            return Err(LayerError::ShortRead {
                read: n as u64,
                expected,
            });
        }
        self.metrics
            .add_bytes_count(ON_DEMAND_BYTES_SERVED, &self.layer_digest, n as u64);
        Ok(n)
    }

    fn uncompressed_size(&self) -> FileSize {
        self.fr.uncompressed_size()
    }

    fn uncompressed_offset(&self) -> FileSize {
        self.fr.uncompressed_offset()
    }
}

/// Gate in front of the layer reader requiring a TOC digest attestation.
pub struct VerifiableReader {
    inner: Arc<LayerReader>,

    last_verify_err: Mutex<Option<String>>,
    prohibit_verify_failure: RwLock<bool>,

    closed: Mutex<bool>,

    verifier: VerifierFactory,
}

impl VerifiableReader {
    /// Wrap a new layer reader for `layer_digest`, serving bytes through
    /// `span_manager`.
    pub fn new(
        metadata: Arc<dyn MetadataReader>,
        layer_digest: impl Into<String>,
        span_manager: Arc<dyn SpanManager>,
    ) -> Self {
        Self::with_metrics(metadata, layer_digest, span_manager, Arc::new(NopMetrics))
    }

    /// Like [`VerifiableReader::new`] with an explicit metrics sink.
    pub fn with_metrics(
        metadata: Arc<dyn MetadataReader>,
        layer_digest: impl Into<String>,
        span_manager: Arc<dyn SpanManager>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            inner: Arc::new(LayerReader {
                span_manager,
                metadata,
                layer_digest: layer_digest.into(),
                metrics,
                last_read_time: Arc::new(Mutex::new(None)),
                closed: Mutex::new(false),
                verify: AtomicBool::new(false),
            }),
            last_verify_err: Mutex::new(None),
            prohibit_verify_failure: RwLock::new(false),
            closed: Mutex::new(false),
            verifier: digest_verifier,
        }
    }

    /// Skip digest verification and hand out the reader as-is.
    pub fn skip_verify(&self) -> Arc<dyn Reader> {
        self.inner.clone()
    }

    /// Present the expected TOC digest and transition to serving.
    ///
    /// Fails closed after [`VerifiableReader::close`], and fails with any
    /// verification error latched during warming. The write lock over the
    /// prohibition flag makes the transition race-free: a concurrent
    /// warming failure either latches before the flag is read or observes
    /// the prohibition.
    pub fn verify_toc(&self, toc_digest: &str) -> Result<Arc<dyn Reader>> {
        if self.is_closed() {
            return Err(LayerError::Closed);
        }
        let latched = {
            let mut prohibit = self.prohibit_verify_failure.write().unwrap();
            *prohibit = true;
            self.last_verify_err.lock().unwrap().clone()
        };
        if let Some(cause) = latched {
            return Err(LayerError::VerificationFailed(format!(
                "content error during caching contents: {cause}"
            )));
        }
        validate_digest(toc_digest)?;
        self.inner.verify.store(true, Ordering::SeqCst);
        tracing::debug!(digest = toc_digest, "TOC digest attested");
        Ok(self.inner.clone())
    }

    /// The metadata reader backing the gated layer reader.
    // TODO: this shouldn't be called before verified
    pub fn metadata(&self) -> Arc<dyn MetadataReader> {
        self.inner.metadata()
    }

    /// Record a chunk verification failure observed during warming.
    ///
    /// Before `verify_toc` arms the prohibition this is a warning; the
    /// failure is latched either way and surfaced by the next `verify_toc`.
    pub fn report_verify_failure(&self, cause: impl std::fmt::Display) {
        let prohibit = self.prohibit_verify_failure.read().unwrap();
        let cause = cause.to_string();
        *self.last_verify_err.lock().unwrap() = Some(cause.clone());
        if *prohibit {
            tracing::error!(%cause, "chunk verification failed after TOC attestation");
        } else {
            tracing::warn!(%cause, "chunk verification failed during warming");
        }
    }

    /// Build a verifier for one chunk against its expected digest.
    pub fn chunk_verifier(&self, chunk_id: u32, chunk_digest: &str) -> Result<Box<dyn ChunkVerifier>> {
        (self.verifier)(chunk_id, chunk_digest)
    }

    /// Close the gate and the reader behind it. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut closed = self.closed.lock().unwrap();
        if *closed {
            return Ok(());
        }
        *closed = true;
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Attr;
    use crate::metrics::CountingMetrics;
    use crate::section::SectionReader;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Arc;

    /// Metadata double serving a fixed set of files out of a shared
    /// uncompressed "layer".
    struct FakeMetadata {
        files: HashMap<u32, (FileSize, FileSize)>, // id -> (offset, size)
    }

    #[derive(Debug)]
    struct FakeFile {
        offset: FileSize,
        size: FileSize,
    }

    impl FileRead for FakeFile {
        fn read_at(&self, _buf: &mut [u8], _offset: i64) -> Result<usize> {
            unimplemented!("layer reader reads through the span manager")
        }

        fn uncompressed_size(&self) -> FileSize {
            self.size
        }

        fn uncompressed_offset(&self) -> FileSize {
            self.offset
        }
    }

    impl MetadataReader for FakeMetadata {
        fn root_id(&self) -> u32 {
            1
        }

        fn get_attr(&self, _id: u32) -> Result<Attr> {
            Ok(Attr::default())
        }

        fn get_child(&self, _pid: u32, base: &str) -> Result<(u32, Attr)> {
            Err(LayerError::NotFound(format!("child {base:?}")))
        }

        fn for_each_child(
            &self,
            _id: u32,
            _f: &mut dyn FnMut(&str, u32, u32) -> bool,
        ) -> Result<()> {
            Ok(())
        }

        fn open_file(&self, id: u32) -> Result<Box<dyn FileRead>> {
            let (offset, size) = self
                .files
                .get(&id)
                .copied()
                .ok_or_else(|| LayerError::NotFound(format!("file bucket {id}")))?;
            Ok(Box::new(FakeFile { offset, size }))
        }

        fn clone_with_reader(&self, _sr: SectionReader) -> Result<Arc<dyn MetadataReader>> {
            Err(LayerError::NotFound("clone unsupported".to_string()))
        }

        fn num_of_nodes(&self) -> Result<usize> {
            Ok(self.files.len())
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Span manager double backed by the uncompressed layer bytes.
    struct FakeSpanManager {
        layer: Vec<u8>,
        /// Truncate every stream by this many bytes to provoke short reads.
        truncate: usize,
    }

    impl SpanManager for FakeSpanManager {
        fn get_contents(&self, start: u64, end: u64) -> Result<Box<dyn Read + Send>> {
            let end = (end as usize).min(self.layer.len());
            let mut bytes = self.layer[start as usize..end].to_vec();
            bytes.truncate(bytes.len().saturating_sub(self.truncate));
            Ok(Box::new(Cursor::new(bytes)))
        }
    }

    fn test_reader(truncate: usize) -> (VerifiableReader, Vec<u8>) {
        let layer = b"aaaabbbbbbccphantom".to_vec();
        let mut files = HashMap::new();
        files.insert(10, (0, 4)); // "aaaa"
        files.insert(11, (4, 6)); // "bbbbbb"
        files.insert(12, (10, 2)); // "cc"
        let metadata = Arc::new(FakeMetadata { files });
        let span_manager = Arc::new(FakeSpanManager {
            layer: layer.clone(),
            truncate,
        });
        (
            VerifiableReader::new(metadata, "sha256:layerdigest", span_manager),
            layer,
        )
    }

    #[test]
    fn test_read_whole_file() {
        let (vr, _) = test_reader(0);
        let reader = vr.skip_verify();
        let file = reader.open_file(11).unwrap();

        let mut buf = [0u8; 6];
        let n = file.read_at(&mut buf, 0).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf, b"bbbbbb");
    }

    #[test]
    fn test_read_at_offset_and_eof() {
        let (vr, _) = test_reader(0);
        let reader = vr.skip_verify();
        let file = reader.open_file(11).unwrap();

        let mut buf = [0u8; 16];
        let n = file.read_at(&mut buf, 4).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], b"bb");

        // At and past the end.
        assert_eq!(file.read_at(&mut buf, 6).unwrap(), 0);
        assert_eq!(file.read_at(&mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn test_negative_offset_fails() {
        let (vr, _) = test_reader(0);
        let reader = vr.skip_verify();
        let file = reader.open_file(10).unwrap();

        let mut buf = [0u8; 4];
        let err = file.read_at(&mut buf, -1).unwrap_err();
        assert!(matches!(err, LayerError::InvalidOffset(-1)));
    }

    #[test]
    fn test_chunked_reads_reassemble_file() {
        let (vr, layer) = test_reader(0);
        let reader = vr.skip_verify();
        let file = reader.open_file(11).unwrap();

        for chunk_size in [1usize, 2, 3, 4, 6, 7] {
            let mut assembled = Vec::new();
            let mut offset = 0i64;
            loop {
                let mut buf = vec![0u8; chunk_size];
                let n = file.read_at(&mut buf, offset).unwrap();
                if n == 0 {
                    break;
                }
                assembled.extend_from_slice(&buf[..n]);
                offset += n as i64;
            }
            assert_eq!(assembled, layer[4..10].to_vec(), "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_short_read_detected() {
        let (vr, _) = test_reader(1);
        let reader = vr.skip_verify();
        let file = reader.open_file(10).unwrap();

        let mut buf = [0u8; 4];
        let err = file.read_at(&mut buf, 0).unwrap_err();
        assert!(err
            .to_string()
            .contains("unexpected copied data size"));
    }

    #[test]
    fn test_metrics_and_last_read_time() {
        let metrics = Arc::new(CountingMetrics::default());
        let layer = b"payload".to_vec();
        let mut files = HashMap::new();
        files.insert(7, (0u64, 7u64));
        let vr = VerifiableReader::with_metrics(
            Arc::new(FakeMetadata { files }),
            "sha256:layerdigest",
            Arc::new(FakeSpanManager { layer, truncate: 0 }),
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        );
        let reader = vr.skip_verify();
        assert!(reader.last_on_demand_read_time().is_none());

        let file = reader.open_file(7).unwrap();
        let mut buf = [0u8; 7];
        file.read_at(&mut buf, 0).unwrap();

        assert_eq!(metrics.fetch_count(), 1);
        assert_eq!(metrics.bytes_served(), 7);
        assert!(reader.last_on_demand_read_time().is_some());
    }

    #[test]
    fn test_open_file_after_close_fails_closed() {
        let (vr, _) = test_reader(0);
        let reader = vr.skip_verify();
        reader.close().unwrap();
        // Idempotent.
        reader.close().unwrap();

        let err = reader.open_file(10).unwrap_err();
        assert!(matches!(err, LayerError::Closed));
    }

    #[test]
    fn test_verify_toc_happy_path_is_idempotent() {
        let (vr, _) = test_reader(0);
        let digest = crate::verify::sha256_digest(b"the toc");
        let first = vr.verify_toc(&digest).unwrap();
        let second = vr.verify_toc(&digest).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.open_file(10).is_ok());
    }

    #[test]
    fn test_verify_toc_rejects_malformed_digest() {
        let (vr, _) = test_reader(0);
        let err = vr.verify_toc("not-a-digest").unwrap_err();
        assert!(matches!(err, LayerError::InvalidChunkDigest(_)));
    }

    #[test]
    fn test_latched_warming_failure_surfaces() {
        let (vr, _) = test_reader(0);
        vr.report_verify_failure("span 3 digest mismatch");

        let digest = crate::verify::sha256_digest(b"the toc");
        let err = vr.verify_toc(&digest).unwrap_err();
        assert!(matches!(err, LayerError::VerificationFailed(_)));
        assert!(err.to_string().contains("span 3 digest mismatch"));

        // The error stays latched for repeat calls.
        let err = vr.verify_toc(&digest).unwrap_err();
        assert!(matches!(err, LayerError::VerificationFailed(_)));
    }

    #[test]
    fn test_verify_toc_after_close_fails_closed() {
        let (vr, _) = test_reader(0);
        vr.close().unwrap();
        let digest = crate::verify::sha256_digest(b"the toc");
        assert!(matches!(
            vr.verify_toc(&digest).unwrap_err(),
            LayerError::Closed
        ));
    }

    #[test]
    fn test_chunk_verifier_factory() {
        let (vr, _) = test_reader(0);
        let digest = crate::verify::sha256_digest(b"chunk bytes");
        let mut verifier = vr.chunk_verifier(0, &digest).unwrap();
        verifier.update(b"chunk bytes");
        assert!(verifier.verified());
        assert!(vr.chunk_verifier(0, "bogus").is_err());
    }
}
