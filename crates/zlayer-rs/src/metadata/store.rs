//! jammdb-backed metadata store.
//!
//! [`MetadataStore::new`] projects a ZTOC into the database in three phases,
//! each one batched write transaction:
//!
//! 1. **Root**: create the `/filesystems/<fsID>/{ztocs,metadata,nodes}`
//!    namespace and the root directory inode. A colliding fsID is retried
//!    with a fresh one.
//! 2. **Tree**: write the ZTOC record, then walk the entries in order,
//!    allocating ids, writing attribute records, attaching children and
//!    creating missing intermediate directories. An in-memory path→id index
//!    is the source of truth for intra-ingest lookups (hardlink targets,
//!    forward directory references).
//! 3. **Extents**: write the buffered child indexes and extent descriptors
//!    in ascending big-endian key order, which keeps the underlying B+-tree
//!    on its append-only hot path.
//!
//! The store is read-only after ingest. Queries run in view transactions
//! and block on the initialization barrier; closing deletes the fsID
//! namespace, so the metadata is ephemeral to the process that created it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use jammdb::{Data, DB};

use crate::error::{LayerError, Result};
use crate::extract::{FileExtractor, GzipExtractor};
use crate::metadata::schema::{self, Extent, MetadataEntry};
use crate::metadata::{Attr, FileRead, MetadataReader, StoreOptions};
use crate::section::SectionReader;
use crate::ztoc::{
    clean_entry_name, is_regular, EntryType, FileExtractConfig, FileMetadata, FileSize, Ztoc,
    MODE_DIR,
};

/// How many fresh filesystem ids to try before giving up on ingest.
const FS_ID_RETRIES: usize = 100;

/// One-shot latch publishing the ingest result to pending queries.
struct InitBarrier {
    state: Mutex<Option<std::result::Result<(), String>>>,
    cond: Condvar,
}

impl InitBarrier {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    fn completed() -> Self {
        Self {
            state: Mutex::new(Some(Ok(()))),
            cond: Condvar::new(),
        }
    }

    fn complete(&self, result: std::result::Result<(), String>) {
        *self.state.lock().unwrap() = Some(result);
        self.cond.notify_all();
    }

    // TODO: add a timeout.
    fn wait(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while state.is_none() {
            state = self.cond.wait(state).unwrap();
        }
        match state.as_ref().unwrap() {
            Ok(()) => Ok(()),
            Err(msg) => Err(LayerError::Ingest(format!("initialization failed: {msg}"))),
        }
    }
}

/// Metadata store for one ingested layer, namespaced by its fsID inside a
/// shared database.
pub struct MetadataStore {
    db: DB,
    fs_id: String,
    root_id: u32,
    sr: SectionReader,
    cur_id: Mutex<u32>,
    init: Arc<InitBarrier>,
    extractor: Arc<dyn FileExtractor>,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("fs_id", &self.fs_id)
            .field("root_id", &self.root_id)
            .finish()
    }
}

impl MetadataStore {
    /// Ingest `ztoc` into `db` and return a query handle over it.
    ///
    /// `sr` addresses the compressed layer and is handed to the file
    /// handles returned by [`MetadataReader::open_file`].
    pub fn new(db: DB, sr: SectionReader, ztoc: &Ztoc, opts: StoreOptions) -> Result<Self> {
        let extractor = opts
            .extractor
            .unwrap_or_else(|| Arc::new(GzipExtractor));
        let mut store = MetadataStore {
            db,
            fs_id: String::new(),
            root_id: 0,
            sr,
            cur_id: Mutex::new(0),
            init: Arc::new(InitBarrier::new()),
            extractor,
        };

        let start = Instant::now();
        if let Some(telemetry) = &opts.telemetry {
            if let Some(cb) = &telemetry.init_metadata_store_latency {
                cb(start);
            }
        }

        let result = store.init(ztoc);
        store
            .init
            .complete(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        result.map(|_| store)
    }

    /// The filesystem id namespacing this layer's metadata.
    pub fn fs_id(&self) -> &str {
        &self.fs_id
    }

    fn next_id(&self) -> Result<u32> {
        let mut cur = self.cur_id.lock().unwrap();
        if *cur == u32::MAX {
            return Err(LayerError::IdExhausted);
        }
        *cur += 1;
        Ok(*cur)
    }

    fn init(&mut self, ztoc: &Ztoc) -> Result<()> {
        let mut initialized = false;
        for _ in 0..FS_ID_RETRIES {
            let fs_id = generate_fs_id();
            match self.init_root_node(&fs_id) {
                Ok(()) => {
                    initialized = true;
                    break;
                }
                // Another layer owns this id, try a fresh one.
                Err(LayerError::Db(jammdb::Error::BucketExists)) => continue,
                Err(e) => {
                    return Err(LayerError::Ingest(format!(
                        "failed to initialize root node {fs_id:?}: {e}"
                    )))
                }
            }
        }
        if !initialized {
            return Err(LayerError::Ingest(
                "failed to get a unique id for metadata store".to_string(),
            ));
        }
        self.init_nodes(ztoc)
    }

    fn init_root_node(&mut self, fs_id: &str) -> Result<()> {
        let root_id;
        let tx = self.db.tx(true)?;
        {
            let filesystems = match tx.get_bucket(schema::BUCKET_FILESYSTEMS) {
                Ok(bucket) => bucket,
                Err(jammdb::Error::BucketMissing) => tx.create_bucket(schema::BUCKET_FILESYSTEMS)?,
                Err(e) => return Err(e.into()),
            };
            let layer = filesystems.create_bucket(fs_id.as_bytes().to_vec())?;
            layer.create_bucket(schema::BUCKET_ZTOCS)?;
            layer.create_bucket(schema::BUCKET_METADATA)?;
            let nodes = layer.create_bucket(schema::BUCKET_NODES)?;
            root_id = self.next_id()?;
            let root = nodes.create_bucket(schema::encode_id(root_id))?;
            schema::write_attr(&root, &default_dir_attr())?;
        }
        tx.commit()?;
        self.fs_id = fs_id.to_string();
        self.root_id = root_id;
        Ok(())
    }

    fn init_nodes(&self, ztoc: &Ztoc) -> Result<()> {
        let mut md: HashMap<u32, MetadataEntry> = HashMap::new();
        let ztoc_id = self.next_id()?;

        let tx = self.db.tx(true)?;
        {
            let filesystems = tx.get_bucket(schema::BUCKET_FILESYSTEMS)?;
            let layer = filesystems.get_bucket(self.fs_id.as_bytes().to_vec())?;
            let ztocs = layer.get_bucket(schema::BUCKET_ZTOCS).map_err(|e| {
                LayerError::NotFound(format!("ztocs bucket of {:?}: {e}", self.fs_id))
            })?;
            let ztoc_bucket = ztocs.create_bucket(schema::encode_id(ztoc_id))?;
            schema::write_ztoc_record(&ztoc_bucket, ztoc)?;

            let nodes = layer.get_bucket(schema::BUCKET_NODES).map_err(|e| {
                LayerError::NotFound(format!("nodes bucket of {:?}: {e}", self.fs_id))
            })?;

            for entry in &ztoc.file_metadata {
                let name = clean_entry_name(&entry.name)?;
                if name.is_empty() {
                    // Root directory marker, nothing to record.
                    tracing::debug!(name = %entry.name, "skipping empty entry name");
                    continue;
                }
                let is_link = entry.kind == EntryType::Hardlink;
                let id = if is_link {
                    let id =
                        get_id_by_name(&md, &entry.linkname, self.root_id).map_err(|e| {
                            LayerError::Ingest(format!(
                                "{name:?} is a hardlink but cannot get link destination {:?}: {e}",
                                entry.linkname
                            ))
                        })?;
                    let target = nodes.get_bucket(schema::encode_id(id)).map_err(|e| {
                        LayerError::Ingest(format!(
                            "cannot get hardlink destination {name:?} ==> {:?} ({id}): {e}",
                            entry.linkname
                        ))
                    })?;
                    schema::bump_num_link(&target)?;
                    id
                } else {
                    // A directory may already exist from a forward reference;
                    // reuse its id and keep the accumulated link count.
                    let existing = if entry.kind == EntryType::Dir {
                        get_id_by_name(&md, &name, self.root_id).ok()
                    } else {
                        None
                    };
                    let (id, num_link) = match existing {
                        Some(id) => {
                            let bucket =
                                nodes.get_bucket(schema::encode_id(id)).map_err(|e| {
                                    LayerError::NotFound(format!("directory bucket {id}: {e}"))
                                })?;
                            (id, schema::read_num_link(&bucket))
                        }
                        None => {
                            let id = self.next_id()?;
                            nodes.create_bucket(schema::encode_id(id))?;
                            // The parent reference, plus "." for directories.
                            let num_link = if entry.kind == EntryType::Dir { 2 } else { 1 };
                            (id, num_link)
                        }
                    };
                    let bucket = nodes.get_bucket(schema::encode_id(id)).map_err(|e| {
                        LayerError::NotFound(format!("node bucket {id}: {e}"))
                    })?;
                    schema::write_attr(&bucket, &attr_from_entry(entry, num_link)).map_err(
                        |e| {
                            LayerError::Ingest(format!(
                                "failed to set attr to {id} ({name:?}): {e}"
                            ))
                        },
                    )?;
                    id
                };

                let parent = parent_dir(&name);
                let pid = self.get_or_create_dir(&nodes, &mut md, parent).map_err(|e| {
                    LayerError::Ingest(format!(
                        "failed to create parent directory {parent:?} of {name:?}: {e}"
                    ))
                })?;
                set_child(
                    &nodes,
                    &mut md,
                    pid,
                    base_name(&name),
                    id,
                    entry.kind == EntryType::Dir,
                )?;

                if !is_link && entry.kind == EntryType::Reg {
                    md.entry(id).or_default().extent = Some(Extent {
                        uncompressed_offset: entry.uncompressed_offset,
                        span_start: entry.span_start,
                        span_end: entry.span_end,
                        first_span_has_bits: entry.first_span_has_bits,
                        ztoc_id,
                    });
                }
            }
        }
        tx.commit()?;

        // Ascending id order yields ascending big-endian keys, so the
        // metadata bucket is written append-only.
        let mut addendum: Vec<(u32, MetadataEntry)> = md.into_iter().collect();
        addendum.sort_by_key(|(id, _)| *id);

        let tx = self.db.tx(true)?;
        {
            let filesystems = tx.get_bucket(schema::BUCKET_FILESYSTEMS)?;
            let layer = filesystems.get_bucket(self.fs_id.as_bytes().to_vec())?;
            let metadata = layer.get_bucket(schema::BUCKET_METADATA).map_err(|e| {
                LayerError::NotFound(format!("metadata bucket of {:?}: {e}", self.fs_id))
            })?;
            for (id, entry) in &addendum {
                let bucket = metadata.create_bucket(schema::encode_id(*id))?;
                schema::write_metadata_entry(&bucket, entry)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Resolve `dir` to an id, creating it and any missing ancestors with
    /// `dir|0755` and link count 2.
    fn get_or_create_dir(
        &self,
        nodes: &jammdb::Bucket<'_, '_>,
        md: &mut HashMap<u32, MetadataEntry>,
        dir: &str,
    ) -> Result<u32> {
        if let Ok(id) = get_id_by_name(md, dir, self.root_id) {
            return Ok(id);
        }
        let id = self.next_id()?;
        let bucket = nodes.create_bucket(schema::encode_id(id))?;
        schema::write_attr(&bucket, &default_dir_attr())?;
        if !dir.is_empty() {
            let pid = self.get_or_create_dir(nodes, md, parent_dir(dir))?;
            set_child(nodes, md, pid, base_name(dir), id, true)?;
        }
        Ok(id)
    }
}

impl MetadataReader for MetadataStore {
    fn root_id(&self) -> u32 {
        self.root_id
    }

    fn get_attr(&self, id: u32) -> Result<Attr> {
        // The root directory is written before ingest completes, so serving
        // it must not wait on the barrier.
        if id != self.root_id {
            self.init.wait()?;
        }
        let tx = self.db.tx(false)?;
        let filesystems = tx.get_bucket(schema::BUCKET_FILESYSTEMS)?;
        let layer = filesystems
            .get_bucket(self.fs_id.as_bytes().to_vec())
            .map_err(|e| LayerError::NotFound(format!("filesystem {:?}: {e}", self.fs_id)))?;
        let nodes = layer.get_bucket(schema::BUCKET_NODES).map_err(|e| {
            LayerError::NotFound(format!(
                "nodes bucket of {:?} for searching attr {id}: {e}",
                self.fs_id
            ))
        })?;
        let bucket = nodes
            .get_bucket(schema::encode_id(id))
            .map_err(|e| LayerError::NotFound(format!("attr bucket {id}: {e}")))?;
        Ok(schema::read_attr(&bucket))
    }

    fn get_child(&self, pid: u32, base: &str) -> Result<(u32, Attr)> {
        self.init.wait()?;
        let tx = self.db.tx(false)?;
        let filesystems = tx.get_bucket(schema::BUCKET_FILESYSTEMS)?;
        let layer = filesystems
            .get_bucket(self.fs_id.as_bytes().to_vec())
            .map_err(|e| LayerError::NotFound(format!("filesystem {:?}: {e}", self.fs_id)))?;
        let metadata = layer.get_bucket(schema::BUCKET_METADATA).map_err(|e| {
            LayerError::NotFound(format!(
                "metadata bucket of {:?} for getting child of {pid}: {e}",
                self.fs_id
            ))
        })?;
        let md = metadata
            .get_bucket(schema::encode_id(pid))
            .map_err(|e| LayerError::NotFound(format!("parent metadata {pid}: {e}")))?;
        let id = schema::read_child(&md, base)
            .ok_or_else(|| LayerError::NotFound(format!("child {base:?} of {pid}")))?;
        let nodes = layer.get_bucket(schema::BUCKET_NODES).map_err(|e| {
            LayerError::NotFound(format!(
                "nodes bucket of {:?} for getting child of {pid}: {e}",
                self.fs_id
            ))
        })?;
        let child = nodes
            .get_bucket(schema::encode_id(id))
            .map_err(|e| LayerError::NotFound(format!("child bucket {id}: {e}")))?;
        Ok((id, schema::read_attr(&child)))
    }

    fn for_each_child(&self, id: u32, f: &mut dyn FnMut(&str, u32, u32) -> bool) -> Result<()> {
        self.init.wait()?;
        let mut children: Vec<(String, u32, u32)> = Vec::new();
        {
            let tx = self.db.tx(false)?;
            let filesystems = tx.get_bucket(schema::BUCKET_FILESYSTEMS)?;
            let layer = filesystems
                .get_bucket(self.fs_id.as_bytes().to_vec())
                .map_err(|e| LayerError::NotFound(format!("filesystem {:?}: {e}", self.fs_id)))?;
            let metadata = layer.get_bucket(schema::BUCKET_METADATA).map_err(|e| {
                LayerError::NotFound(format!(
                    "metadata bucket of {:?} for getting children of {id}: {e}",
                    self.fs_id
                ))
            })?;
            let md = match metadata.get_bucket(schema::encode_id(id)) {
                Ok(bucket) => bucket,
                // No metadata entry means no children.
                Err(_) => return Ok(()),
            };
            let nodes = layer.get_bucket(schema::BUCKET_NODES).map_err(|e| {
                LayerError::NotFound(format!(
                    "nodes bucket of {:?} for getting children of {id}: {e}",
                    self.fs_id
                ))
            })?;

            let first_name = schema::get_value(&md, schema::KEY_CHILD_NAME);
            if !first_name.is_empty() {
                let first_id = schema::decode_id(&schema::get_value(&md, schema::KEY_CHILD_ID));
                let child = nodes.get_bucket(schema::encode_id(first_id)).map_err(|e| {
                    LayerError::NotFound(format!("first child bucket {first_id}: {e}"))
                })?;
                children.push((
                    String::from_utf8_lossy(&first_name).into_owned(),
                    first_id,
                    schema::read_mode(&child),
                ));
            }

            if let Ok(extra) = md.get_bucket(schema::BUCKET_CHILDREN_EXTRA) {
                for data in extra.cursor() {
                    if let Data::KeyValue(kv) = data {
                        let child_id = schema::decode_id(kv.value());
                        let name = String::from_utf8_lossy(kv.key()).into_owned();
                        let child =
                            nodes.get_bucket(schema::encode_id(child_id)).map_err(|e| {
                                LayerError::NotFound(format!("child bucket {child_id}: {e}"))
                            })?;
                        children.push((name, child_id, schema::read_mode(&child)));
                    }
                }
            }
        }
        for (name, child_id, mode) in children {
            if !f(&name, child_id, mode) {
                break;
            }
        }
        Ok(())
    }

    fn open_file(&self, id: u32) -> Result<Box<dyn FileRead>> {
        self.init.wait()?;
        let config: FileExtractConfig;
        {
            let tx = self.db.tx(false)?;
            let filesystems = tx.get_bucket(schema::BUCKET_FILESYSTEMS)?;
            let layer = filesystems
                .get_bucket(self.fs_id.as_bytes().to_vec())
                .map_err(|e| LayerError::NotFound(format!("filesystem {:?}: {e}", self.fs_id)))?;
            let nodes = layer.get_bucket(schema::BUCKET_NODES).map_err(|e| {
                LayerError::NotFound(format!(
                    "nodes bucket of {:?} for opening {id}: {e}",
                    self.fs_id
                ))
            })?;
            let node = nodes
                .get_bucket(schema::encode_id(id))
                .map_err(|e| LayerError::NotFound(format!("file bucket {id}: {e}")))?;
            let size = schema::decode_varint(&schema::get_value(&node, schema::KEY_SIZE));
            if !is_regular(schema::read_mode(&node)) {
                return Err(LayerError::NotRegularFile(id));
            }
            let ztocs = layer.get_bucket(schema::BUCKET_ZTOCS).map_err(|e| {
                LayerError::NotFound(format!(
                    "ztocs bucket of {:?} for opening {id}: {e}",
                    self.fs_id
                ))
            })?;
            let metadata = layer.get_bucket(schema::BUCKET_METADATA).map_err(|e| {
                LayerError::NotFound(format!(
                    "metadata bucket of {:?} for opening {id}: {e}",
                    self.fs_id
                ))
            })?;
            let md = metadata
                .get_bucket(schema::encode_id(id))
                .map_err(|e| LayerError::NotFound(format!("metadata of {id}: {e}")))?;
            config = schema::read_extract_config(&md, &ztocs, size as FileSize)
                .map_err(|e| LayerError::NotFound(format!("file extract config for {id}: {e}")))?;
        }
        Ok(Box::new(StoreFile {
            sr: self.sr.clone(),
            extractor: Arc::clone(&self.extractor),
            config,
        }))
    }

    fn clone_with_reader(&self, sr: SectionReader) -> Result<Arc<dyn MetadataReader>> {
        self.init.wait()?;
        Ok(Arc::new(MetadataStore {
            db: self.db.clone(),
            fs_id: self.fs_id.clone(),
            root_id: self.root_id,
            sr,
            cur_id: Mutex::new(*self.cur_id.lock().unwrap()),
            init: Arc::new(InitBarrier::completed()),
            extractor: Arc::clone(&self.extractor),
        }))
    }

    fn num_of_nodes(&self) -> Result<usize> {
        self.init.wait()?;
        let tx = self.db.tx(false)?;
        let filesystems = tx.get_bucket(schema::BUCKET_FILESYSTEMS)?;
        let layer = filesystems
            .get_bucket(self.fs_id.as_bytes().to_vec())
            .map_err(|e| LayerError::NotFound(format!("filesystem {:?}: {e}", self.fs_id)))?;
        let nodes = layer.get_bucket(schema::BUCKET_NODES).map_err(|e| {
            LayerError::NotFound(format!("nodes bucket of {:?}: {e}", self.fs_id))
        })?;
        let mut count = 0;
        for data in nodes.cursor() {
            if let Data::Bucket(node) = data {
                let bucket = nodes.get_bucket(node.name().to_vec()).map_err(|e| {
                    LayerError::NotFound(format!("entry bucket {:?}: {e}", node.name()))
                })?;
                // A node bucket with no attr record would decode to junk;
                // touch it so corruption shows up in tests.
                let _ = schema::read_attr(&bucket);
                count += 1;
            }
        }
        Ok(count)
    }

    fn close(&self) -> Result<()> {
        self.init.wait()?;
        let tx = self.db.tx(true)?;
        {
            let filesystems = match tx.get_bucket(schema::BUCKET_FILESYSTEMS) {
                Ok(bucket) => bucket,
                Err(jammdb::Error::BucketMissing) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            match filesystems.delete_bucket(self.fs_id.as_bytes().to_vec()) {
                // Already deleted by an earlier close.
                Ok(()) | Err(jammdb::Error::BucketMissing) => {}
                Err(e) => return Err(e.into()),
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Random-access view of one regular file, served through the extractor.
struct StoreFile {
    sr: SectionReader,
    extractor: Arc<dyn FileExtractor>,
    config: FileExtractConfig,
}

impl std::fmt::Debug for StoreFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFile").finish_non_exhaustive()
    }
}

impl FileRead for StoreFile {
    fn read_at(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        if offset < 0 {
            return Err(LayerError::InvalidOffset(offset));
        }
        let offset = offset as u64;
        if offset >= self.config.uncompressed_size {
            return Ok(0);
        }
        let decompressed = self.extractor.extract_file(&self.sr, &self.config)?;
        let available = decompressed.get(offset as usize..).unwrap_or(&[]);
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn uncompressed_size(&self) -> FileSize {
        self.config.uncompressed_size
    }

    fn uncompressed_offset(&self) -> FileSize {
        self.config.uncompressed_offset
    }
}

fn default_dir_attr() -> Attr {
    Attr {
        mode: MODE_DIR | 0o755,
        // The directory itself (".") and the parent link to it.
        num_link: 2,
        ..Default::default()
    }
}

fn attr_from_entry(entry: &FileMetadata, num_link: u32) -> Attr {
    Attr {
        size: entry.uncompressed_size as i64,
        mode: entry.file_mode(),
        num_link,
        mod_time: entry.mod_time,
        uid: entry.uid,
        gid: entry.gid,
        dev_major: entry.dev_major,
        dev_minor: entry.dev_minor,
        link_name: entry.linkname.clone(),
        xattrs: entry
            .xattrs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().into_bytes()))
            .collect(),
    }
}

/// Resolve a path against the in-memory ingest index.
fn get_id_by_name(
    md: &HashMap<u32, MetadataEntry>,
    name: &str,
    root_id: u32,
) -> Result<u32> {
    let name = clean_entry_name(name)?;
    if name.is_empty() {
        return Ok(root_id);
    }
    let mut id = root_id;
    for segment in name.split('/') {
        let entry = md
            .get(&id)
            .ok_or_else(|| LayerError::NotFound(format!("metadata of {id}")))?;
        id = *entry
            .children
            .get(segment)
            .ok_or_else(|| LayerError::NotFound(format!("child {segment:?} in {id}")))?;
    }
    Ok(id)
}

/// Attach `id` under `pid` as `base`, bumping the parent's link count for
/// directory children.
fn set_child(
    nodes: &jammdb::Bucket<'_, '_>,
    md: &mut HashMap<u32, MetadataEntry>,
    pid: u32,
    base: &str,
    id: u32,
    is_dir: bool,
) -> Result<()> {
    md.entry(pid).or_default().children.insert(base.to_string(), id);
    if is_dir {
        let parent = nodes
            .get_bucket(schema::encode_id(pid))
            .map_err(|e| LayerError::NotFound(format!("parent bucket {pid}: {e}")))?;
        schema::bump_num_link(&parent)
            .map_err(|e| LayerError::Ingest(format!("cannot add numLink of {pid}: {e}")))?;
    }
    Ok(())
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, base)| base).unwrap_or(path)
}

fn generate_fs_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let count = u128::from(COUNTER.fetch_add(1, Ordering::Relaxed));
    let seed = nanos ^ (count << 96) ^ count.wrapping_mul(0x9e37_79b9_7f4a_7c15);

    let mut id = String::with_capacity(16);
    for i in 0..8 {
        let byte =
            ((seed >> ((i * 13) % 120)) ^ (seed >> (((i * 7) + 31) % 120)) ^ ((i as u128) * 29))
                as u8;
        id.push_str(&format!("{byte:02x}"));
    }
    id
}
