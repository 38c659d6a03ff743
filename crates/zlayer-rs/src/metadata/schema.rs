//! Bucket layout and value codecs for the metadata store.
//!
//! One layer's namespace inside the shared database:
//!
//! ```text
//! /filesystems/<fsID>/
//!     ztocs/<be32 id>/       indexByteData, compressedFileSize, maxSpanID, version
//!     metadata/<be32 id>/    childName, childID, childrenExtra/<name> = <be32 id>,
//!                            uncompressedOffset, spanStart, spanEnd,
//!                            firstSpanHasBits, ztocID
//!     nodes/<be32 id>/       size, mode, numLink, modTime, uid, gid,
//!                            devMajor, devMinor, linkName, xattrs/<k> = <v>
//! ```
//!
//! Inode ids are encoded as 4-byte big-endian keys so lexical key order
//! matches numeric order. Sizes and offsets use zig-zag varints; mode and
//! numLink use unsigned varints. The first child of a directory is stored
//! inline (`childName`/`childID`) and only the remainder spills into the
//! `childrenExtra` sub-bucket, so files in small directories resolve without
//! descending into a sub-bucket.

use std::collections::BTreeMap;

use jammdb::{Bucket, Data};

use crate::error::{LayerError, Result};
use crate::metadata::Attr;
use crate::ztoc::{FileExtractConfig, FileSize, SpanId, Ztoc};

pub(crate) const BUCKET_FILESYSTEMS: &[u8] = b"filesystems";
pub(crate) const BUCKET_ZTOCS: &[u8] = b"ztocs";
pub(crate) const BUCKET_METADATA: &[u8] = b"metadata";
pub(crate) const BUCKET_NODES: &[u8] = b"nodes";
pub(crate) const BUCKET_CHILDREN_EXTRA: &[u8] = b"childrenExtra";
pub(crate) const BUCKET_XATTRS: &[u8] = b"xattrs";

pub(crate) const KEY_CHILD_NAME: &[u8] = b"childName";
pub(crate) const KEY_CHILD_ID: &[u8] = b"childID";
pub(crate) const KEY_UNCOMPRESSED_OFFSET: &[u8] = b"uncompressedOffset";
pub(crate) const KEY_SPAN_START: &[u8] = b"spanStart";
pub(crate) const KEY_SPAN_END: &[u8] = b"spanEnd";
pub(crate) const KEY_FIRST_SPAN_HAS_BITS: &[u8] = b"firstSpanHasBits";
pub(crate) const KEY_ZTOC_ID: &[u8] = b"ztocID";
pub(crate) const KEY_INDEX_BYTE_DATA: &[u8] = b"indexByteData";
pub(crate) const KEY_COMPRESSED_FILE_SIZE: &[u8] = b"compressedFileSize";
pub(crate) const KEY_MAX_SPAN_ID: &[u8] = b"maxSpanID";
pub(crate) const KEY_VERSION: &[u8] = b"version";
pub(crate) const KEY_SIZE: &[u8] = b"size";
pub(crate) const KEY_MODE: &[u8] = b"mode";
pub(crate) const KEY_NUM_LINK: &[u8] = b"numLink";
pub(crate) const KEY_MOD_TIME: &[u8] = b"modTime";
pub(crate) const KEY_UID: &[u8] = b"uid";
pub(crate) const KEY_GID: &[u8] = b"gid";
pub(crate) const KEY_DEV_MAJOR: &[u8] = b"devMajor";
pub(crate) const KEY_DEV_MINOR: &[u8] = b"devMinor";
pub(crate) const KEY_LINK_NAME: &[u8] = b"linkName";

/// Encode an inode id as a big-endian bucket key.
pub(crate) fn encode_id(id: u32) -> [u8; 4] {
    id.to_be_bytes()
}

/// Decode a big-endian inode id key. Short input decodes to 0 (invalid).
pub(crate) fn decode_id(buf: &[u8]) -> u32 {
    match buf.try_into() {
        Ok(bytes) => u32::from_be_bytes(bytes),
        Err(_) => 0,
    }
}

/// Encode an unsigned varint (LEB128, 7 bits per byte).
pub(crate) fn encode_uvarint(mut v: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
    out
}

/// Decode an unsigned varint. Empty or malformed input decodes to 0.
pub(crate) fn decode_uvarint(buf: &[u8]) -> u64 {
    let mut x = 0u64;
    let mut shift = 0u32;
    for &b in buf {
        if shift >= 64 {
            return 0;
        }
        if b < 0x80 {
            return x | (u64::from(b) << shift);
        }
        x |= u64::from(b & 0x7f) << shift;
        shift += 7;
    }
    0
}

/// Encode a signed varint (zig-zag then LEB128).
pub(crate) fn encode_varint(v: i64) -> Vec<u8> {
    encode_uvarint(((v << 1) ^ (v >> 63)) as u64)
}

/// Decode a signed varint.
pub(crate) fn decode_varint(buf: &[u8]) -> i64 {
    let ux = decode_uvarint(buf);
    ((ux >> 1) as i64) ^ -((ux & 1) as i64)
}

/// Fetch a plain value from a bucket, empty if missing.
pub(crate) fn get_value(bucket: &Bucket<'_, '_>, key: &'static [u8]) -> Vec<u8> {
    match bucket.get(key) {
        Some(Data::KeyValue(kv)) => kv.value().to_vec(),
        _ => Vec::new(),
    }
}

/// Write one inode's attribute record into its node bucket.
pub(crate) fn write_attr(bucket: &Bucket<'_, '_>, attr: &Attr) -> Result<()> {
    bucket.put(KEY_SIZE, encode_varint(attr.size))?;
    bucket.put(KEY_MODE, encode_uvarint(u64::from(attr.mode)))?;
    bucket.put(KEY_NUM_LINK, encode_uvarint(u64::from(attr.num_link)))?;
    bucket.put(KEY_MOD_TIME, encode_varint(attr.mod_time))?;
    bucket.put(KEY_UID, encode_uvarint(u64::from(attr.uid)))?;
    bucket.put(KEY_GID, encode_uvarint(u64::from(attr.gid)))?;
    bucket.put(KEY_DEV_MAJOR, encode_uvarint(u64::from(attr.dev_major)))?;
    bucket.put(KEY_DEV_MINOR, encode_uvarint(u64::from(attr.dev_minor)))?;
    if !attr.link_name.is_empty() {
        bucket.put(KEY_LINK_NAME, attr.link_name.clone().into_bytes())?;
    }
    if !attr.xattrs.is_empty() {
        // A directory entry may overwrite an earlier one that already
        // carried xattrs.
        let xattrs = match bucket.create_bucket(BUCKET_XATTRS) {
            Ok(b) => b,
            Err(jammdb::Error::BucketExists) => bucket.get_bucket(BUCKET_XATTRS)?,
            Err(e) => return Err(e.into()),
        };
        for (k, v) in &attr.xattrs {
            xattrs.put(k.clone().into_bytes(), v.clone())?;
        }
    }
    Ok(())
}

/// Read one inode's attribute record. Missing keys decode to defaults.
pub(crate) fn read_attr(bucket: &Bucket<'_, '_>) -> Attr {
    let mut attr = Attr {
        size: decode_varint(&get_value(bucket, KEY_SIZE)),
        mode: decode_uvarint(&get_value(bucket, KEY_MODE)) as u32,
        num_link: decode_uvarint(&get_value(bucket, KEY_NUM_LINK)) as u32,
        mod_time: decode_varint(&get_value(bucket, KEY_MOD_TIME)),
        uid: decode_uvarint(&get_value(bucket, KEY_UID)) as u32,
        gid: decode_uvarint(&get_value(bucket, KEY_GID)) as u32,
        dev_major: decode_uvarint(&get_value(bucket, KEY_DEV_MAJOR)) as u32,
        dev_minor: decode_uvarint(&get_value(bucket, KEY_DEV_MINOR)) as u32,
        link_name: String::from_utf8_lossy(&get_value(bucket, KEY_LINK_NAME)).into_owned(),
        xattrs: Default::default(),
    };
    if let Ok(xattrs) = bucket.get_bucket(BUCKET_XATTRS) {
        for data in xattrs.cursor() {
            if let Data::KeyValue(kv) = data {
                attr.xattrs.insert(
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    kv.value().to_vec(),
                );
            }
        }
    }
    attr
}

/// Read an inode's link count.
pub(crate) fn read_num_link(bucket: &Bucket<'_, '_>) -> u32 {
    decode_uvarint(&get_value(bucket, KEY_NUM_LINK)) as u32
}

/// Read an inode's mode.
pub(crate) fn read_mode(bucket: &Bucket<'_, '_>) -> u32 {
    decode_uvarint(&get_value(bucket, KEY_MODE)) as u32
}

/// Increment an inode's link count by one.
pub(crate) fn bump_num_link(bucket: &Bucket<'_, '_>) -> Result<()> {
    let num_link = read_num_link(bucket) + 1;
    bucket.put(KEY_NUM_LINK, encode_uvarint(u64::from(num_link)))?;
    Ok(())
}

/// Write the per-ZTOC record referenced by extent descriptors.
pub(crate) fn write_ztoc_record(bucket: &Bucket<'_, '_>, ztoc: &Ztoc) -> Result<()> {
    bucket.put(KEY_INDEX_BYTE_DATA, ztoc.index_byte_data.clone())?;
    bucket.put(
        KEY_COMPRESSED_FILE_SIZE,
        encode_uvarint(ztoc.compressed_file_size),
    )?;
    bucket.put(KEY_MAX_SPAN_ID, encode_uvarint(u64::from(ztoc.max_span_id)))?;
    bucket.put(KEY_VERSION, ztoc.version.clone().into_bytes())?;
    Ok(())
}

/// The compressed-byte span locating one regular file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Extent {
    pub uncompressed_offset: FileSize,
    pub span_start: SpanId,
    pub span_end: SpanId,
    pub first_span_has_bits: bool,
    pub ztoc_id: u32,
}

/// In-memory image of one `metadata/<id>` bucket, buffered during ingest.
#[derive(Debug, Default, Clone)]
pub(crate) struct MetadataEntry {
    pub children: BTreeMap<String, u32>,
    pub extent: Option<Extent>,
}

/// Write a buffered metadata entry: the child index plus, for regular
/// files, the extent descriptor.
pub(crate) fn write_metadata_entry(bucket: &Bucket<'_, '_>, entry: &MetadataEntry) -> Result<()> {
    let mut children = entry.children.iter();
    if let Some((name, id)) = children.next() {
        bucket.put(KEY_CHILD_NAME, name.clone().into_bytes())?;
        bucket.put(KEY_CHILD_ID, encode_id(*id))?;
        let rest: Vec<_> = children.collect();
        if !rest.is_empty() {
            let extra = bucket.create_bucket(BUCKET_CHILDREN_EXTRA)?;
            for (name, id) in rest {
                extra.put(name.clone().into_bytes(), encode_id(*id))?;
            }
        }
    }
    if let Some(extent) = &entry.extent {
        bucket.put(
            KEY_UNCOMPRESSED_OFFSET,
            encode_varint(extent.uncompressed_offset as i64),
        )?;
        bucket.put(KEY_SPAN_START, encode_varint(i64::from(extent.span_start)))?;
        bucket.put(KEY_SPAN_END, encode_varint(i64::from(extent.span_end)))?;
        let has_bits: &[u8] = if extent.first_span_has_bits {
            b"true"
        } else {
            b"false"
        };
        bucket.put(KEY_FIRST_SPAN_HAS_BITS, has_bits.to_vec())?;
        bucket.put(KEY_ZTOC_ID, encode_id(extent.ztoc_id))?;
    }
    Ok(())
}

/// Resolve a child id by base name: the inline first-child slot, then the
/// overflow bucket.
pub(crate) fn read_child(bucket: &Bucket<'_, '_>, base: &str) -> Option<u32> {
    if let Some(Data::KeyValue(kv)) = bucket.get(KEY_CHILD_NAME) {
        if kv.value() == base.as_bytes() {
            return Some(decode_id(&get_value(bucket, KEY_CHILD_ID)));
        }
    }
    let extra = bucket.get_bucket(BUCKET_CHILDREN_EXTRA).ok()?;
    match extra.get(base.as_bytes().to_vec()) {
        Some(Data::KeyValue(kv)) => Some(decode_id(kv.value())),
        _ => None,
    }
}

/// Assemble a [`FileExtractConfig`] from a file's metadata bucket and the
/// ZTOC record it references.
pub(crate) fn read_extract_config(
    metadata: &Bucket<'_, '_>,
    ztocs: &Bucket<'_, '_>,
    uncompressed_size: FileSize,
) -> Result<FileExtractConfig> {
    let ztoc_id = decode_id(&get_value(metadata, KEY_ZTOC_ID));
    let ztoc = ztocs.get_bucket(encode_id(ztoc_id)).map_err(|e| {
        LayerError::NotFound(format!("ztoc record {ztoc_id}: {e}"))
    })?;
    Ok(FileExtractConfig {
        uncompressed_size,
        uncompressed_offset: decode_varint(&get_value(metadata, KEY_UNCOMPRESSED_OFFSET)) as u64,
        span_start: decode_varint(&get_value(metadata, KEY_SPAN_START)) as SpanId,
        span_end: decode_varint(&get_value(metadata, KEY_SPAN_END)) as SpanId,
        first_span_has_bits: get_value(metadata, KEY_FIRST_SPAN_HAS_BITS) == b"true",
        index_byte_data: get_value(&ztoc, KEY_INDEX_BYTE_DATA),
        compressed_file_size: decode_uvarint(&get_value(&ztoc, KEY_COMPRESSED_FILE_SIZE)),
        max_span_id: decode_uvarint(&get_value(&ztoc, KEY_MAX_SPAN_ID)) as SpanId,
        version: String::from_utf8_lossy(&get_value(&ztoc, KEY_VERSION)).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jammdb::DB;
    use tempfile::TempDir;

    #[test]
    fn test_uvarint_roundtrip() {
        for v in [0u64, 1, 127, 128, 300, u64::from(u32::MAX), u64::MAX] {
            assert_eq!(decode_uvarint(&encode_uvarint(v)), v, "value {v}");
        }
    }

    #[test]
    fn test_varint_roundtrip() {
        for v in [0i64, 1, -1, 63, -64, 1 << 40, -(1 << 40), i64::MAX, i64::MIN] {
            assert_eq!(decode_varint(&encode_varint(v)), v, "value {v}");
        }
    }

    #[test]
    fn test_decode_empty_is_zero() {
        assert_eq!(decode_uvarint(&[]), 0);
        assert_eq!(decode_varint(&[]), 0);
        assert_eq!(decode_id(&[]), 0);
    }

    #[test]
    fn test_encoded_ids_sort_numerically() {
        let mut keys: Vec<[u8; 4]> = [1u32, 300, 2, 65536, 255, 256]
            .iter()
            .map(|&id| encode_id(id))
            .collect();
        keys.sort();
        let ids: Vec<u32> = keys.iter().map(|k| decode_id(k)).collect();
        assert_eq!(ids, vec![1, 2, 255, 256, 300, 65536]);
    }

    #[test]
    fn test_attr_roundtrip() {
        let dir = TempDir::new().unwrap();
        let db = DB::open(dir.path().join("meta.db")).unwrap();

        let mut attr = Attr {
            size: 1234,
            mode: crate::ztoc::MODE_REG | 0o644,
            num_link: 3,
            mod_time: -42,
            uid: 1000,
            gid: 1000,
            dev_major: 8,
            dev_minor: 1,
            link_name: "target".to_string(),
            xattrs: Default::default(),
        };
        attr.xattrs
            .insert("user.test".to_string(), b"value".to_vec());

        {
            let tx = db.tx(true).unwrap();
            let bucket = tx.create_bucket(b"node".to_vec()).unwrap();
            write_attr(&bucket, &attr).unwrap();
            tx.commit().unwrap();
        }

        let tx = db.tx(false).unwrap();
        let bucket = tx.get_bucket(b"node".to_vec()).unwrap();
        assert_eq!(read_attr(&bucket), attr);
        assert_eq!(read_num_link(&bucket), 3);
    }

    #[test]
    fn test_metadata_entry_child_lookup() {
        let dir = TempDir::new().unwrap();
        let db = DB::open(dir.path().join("meta.db")).unwrap();

        let mut entry = MetadataEntry::default();
        entry.children.insert("alpha".to_string(), 4);
        entry.children.insert("beta".to_string(), 5);
        entry.children.insert("gamma".to_string(), 6);

        {
            let tx = db.tx(true).unwrap();
            let bucket = tx.create_bucket(b"md".to_vec()).unwrap();
            write_metadata_entry(&bucket, &entry).unwrap();
            tx.commit().unwrap();
        }

        let tx = db.tx(false).unwrap();
        let bucket = tx.get_bucket(b"md".to_vec()).unwrap();
        // "alpha" sorts first, so it lands in the inline slot.
        assert_eq!(read_child(&bucket, "alpha"), Some(4));
        assert_eq!(read_child(&bucket, "beta"), Some(5));
        assert_eq!(read_child(&bucket, "gamma"), Some(6));
        assert_eq!(read_child(&bucket, "delta"), None);
    }
}
