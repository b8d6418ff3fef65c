//! Data file format.
//!
//! ```text
//! +-------------+-------------+----------------------------------+
//! | meta slot 0 | meta slot 1 | data images (page aligned)       |
//! +-------------+-------------+----------------------------------+
//! ```
//!
//! A meta slot occupies one page and records where the committed image of
//! its transaction lives:
//!
//! ```text
//! [magic: u32][version: u32][page_size: u32][flags: u32]
//! [txid: u64][offset: u64][len: u64][image_crc: u32][crc: u32]
//! ```
//!
//! A commit writes the new image where it cannot overlap the image the
//! current meta points to, then stores its meta in slot `txid % 2`. On open
//! the newest slot whose meta and image both verify wins.

use super::node::BucketNode;
use crate::config::{Options, Settings, DEFAULT_PAGE_SIZE};
use crate::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Identifies a luabolt data file.
pub(crate) const MAGIC: u32 = 0xED0C_DAED;

/// Current on-disk format version.
pub(crate) const VERSION: u32 = 2;

/// Encoded size of a meta slot.
pub(crate) const META_SIZE: usize = 48;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Contents of a meta slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Meta {
    pub(crate) page_size: u32,
    pub(crate) txid: u64,
    pub(crate) offset: u64,
    pub(crate) len: u64,
    pub(crate) image_checksum: u32,
}

impl Meta {
    /// Encode the meta slot into bytes.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(META_SIZE);
        buf.put_u32_le(MAGIC);
        buf.put_u32_le(VERSION);
        buf.put_u32_le(self.page_size);
        buf.put_u32_le(0);
        buf.put_u64_le(self.txid);
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.len);
        buf.put_u32_le(self.image_checksum);

        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);
        buf.to_vec()
    }

    /// Decode a meta slot from bytes.
    pub(crate) fn decode(data: &[u8]) -> Result<Meta> {
        if data.len() < META_SIZE {
            return Err(Error::Invalid);
        }
        let mut buf = &data[..META_SIZE];

        if buf.get_u32_le() != MAGIC {
            return Err(Error::Invalid);
        }
        if buf.get_u32_le() != VERSION {
            return Err(Error::VersionMismatch);
        }
        let page_size = buf.get_u32_le();
        let _flags = buf.get_u32_le();
        let txid = buf.get_u64_le();
        let offset = buf.get_u64_le();
        let len = buf.get_u64_le();
        let image_checksum = buf.get_u32_le();
        let checksum = buf.get_u32_le();

        if crc32fast::hash(&data[..META_SIZE - 4]) != checksum {
            return Err(Error::Checksum);
        }
        if page_size == 0 {
            return Err(Error::Invalid);
        }

        Ok(Meta { page_size, txid, offset, len, image_checksum })
    }
}

/// An open, locked data file.
#[derive(Debug)]
pub(crate) struct DataFile {
    file: File,
    meta: Meta,
    len: u64,
}

impl DataFile {
    /// Opens the data file at `path`, creating it with `mode` if missing, and
    /// returns it with the newest committed tree.
    pub(crate) fn open(path: &Path, mode: u32, options: &Options) -> Result<(DataFile, BucketNode)> {
        let file = open_file(path, mode, options.read_only)?;
        lock(&file, !options.read_only, options.timeout)?;

        let len = file.metadata()?.len();
        if len == 0 {
            if options.read_only {
                return Err(Error::Invalid);
            }
            return Self::init(file);
        }
        Self::load(file, len)
    }

    fn init(mut file: File) -> Result<(DataFile, BucketNode)> {
        let root = BucketNode::default();
        let meta = write_fresh(&mut file, &root, 0, DEFAULT_PAGE_SIZE)?;
        let len = file.metadata()?.len();
        log::debug!("initialized new data file ({} bytes)", len);
        Ok((DataFile { file, meta, len }, root))
    }

    fn load(mut file: File, len: u64) -> Result<(DataFile, BucketNode)> {
        // Slot 0 tells where slot 1 lives; a damaged slot 0 falls back to the default page size.
        let first = read_meta(&mut file, 0);
        let page_size = first
            .as_ref()
            .map(|m| m.page_size as u64)
            .unwrap_or(DEFAULT_PAGE_SIZE as u64);
        let second = read_meta(&mut file, page_size);

        let mut last_err = None;
        let mut candidates = Vec::with_capacity(2);
        for slot in [first, second] {
            match slot {
                Ok(meta) => candidates.push(meta),
                Err(e) => last_err = Some(e),
            }
        }
        candidates.sort_by(|a, b| b.txid.cmp(&a.txid));

        for meta in candidates {
            match read_image(&mut file, &meta, len) {
                Ok(root) => return Ok((DataFile { file, meta, len }, root)),
                Err(e) => {
                    log::warn!("meta for txid {} unusable: {}", meta.txid, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(Error::Invalid))
    }

    /// Persists `root` as transaction `txid`. Returns the image size in bytes.
    pub(crate) fn commit(&mut self, root: &BucketNode, txid: u64, settings: &Settings) -> Result<usize> {
        let image = encode_image(root)?;
        let page_size = self.page_size() as u64;

        // Never overwrite the image the current meta points at.
        let start = 2 * page_size;
        let offset = if start + image.len() as u64 <= self.meta.offset {
            start
        } else {
            align_up(self.meta.offset + self.meta.len, page_size)
        };

        let end = offset + image.len() as u64;
        if end > self.len {
            let step = (settings.alloc_size as u64).max(page_size);
            let new_len = align_up(end, step);
            self.file.set_len(new_len)?;
            if !settings.no_grow_sync {
                self.file.sync_all()?;
            }
            log::debug!("grew data file from {} to {} bytes", self.len, new_len);
            self.len = new_len;
        }

        write_at(&mut self.file, offset, &image)?;
        if !settings.skip_sync() {
            self.file.sync_data()?;
        }

        let meta = Meta {
            page_size: self.meta.page_size,
            txid,
            offset,
            len: image.len() as u64,
            image_checksum: crc32fast::hash(&image),
        };
        write_at(&mut self.file, slot_offset(txid, page_size), &meta.encode())?;
        if !settings.skip_sync() {
            self.file.sync_data()?;
        }

        self.meta = meta;
        Ok(image.len())
    }

    /// Flushes file contents and metadata to disk.
    pub(crate) fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub(crate) fn meta(&self) -> Meta {
        self.meta
    }

    pub(crate) fn page_size(&self) -> usize {
        self.meta.page_size as usize
    }
}

/// Writes a standalone data file holding `root` as transaction `txid`.
pub(crate) fn write_copy(path: &Path, mode: u32, root: &BucketNode, txid: u64, page_size: usize) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path)?;
    write_fresh(&mut file, root, txid, page_size)?;
    Ok(())
}

/// Lays out a file from scratch: image after the meta pages, both slots
/// pointing at it.
fn write_fresh(file: &mut File, root: &BucketNode, txid: u64, page_size: usize) -> Result<Meta> {
    let image = encode_image(root)?;
    let offset = 2 * page_size as u64;
    let meta = Meta {
        page_size: page_size as u32,
        txid,
        offset,
        len: image.len() as u64,
        image_checksum: crc32fast::hash(&image),
    };

    write_at(file, offset, &image)?;
    let encoded = meta.encode();
    write_at(file, 0, &encoded)?;
    write_at(file, page_size as u64, &encoded)?;
    file.sync_all()?;
    Ok(meta)
}

pub(crate) fn encode_image(root: &BucketNode) -> Result<Vec<u8>> {
    Ok(bincode::serialize(root)?)
}

pub(crate) fn decode_image(data: &[u8]) -> Result<BucketNode> {
    Ok(bincode::deserialize(data)?)
}

fn read_meta(file: &mut File, offset: u64) -> Result<Meta> {
    let mut buf = [0u8; META_SIZE];
    file.seek(SeekFrom::Start(offset))?;
    match file.read_exact(&mut buf) {
        Ok(()) => Meta::decode(&buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::Invalid),
        Err(e) => Err(e.into()),
    }
}

fn read_image(file: &mut File, meta: &Meta, file_len: u64) -> Result<BucketNode> {
    if meta.offset.checked_add(meta.len).map_or(true, |end| end > file_len) {
        return Err(Error::Invalid);
    }
    let mut image = vec![0u8; meta.len as usize];
    file.seek(SeekFrom::Start(meta.offset))?;
    file.read_exact(&mut image)?;
    if crc32fast::hash(&image) != meta.image_checksum {
        return Err(Error::Checksum);
    }
    decode_image(&image)
}

fn write_at(file: &mut File, offset: u64, data: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    Ok(())
}

fn open_file(path: &Path, mode: u32, read_only: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    if !read_only {
        options.write(true).create(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(options.open(path)?)
}

/// Takes an advisory lock, polling until `timeout` (zero waits forever).
fn lock(file: &File, exclusive: bool, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    let contended = fs2::lock_contended_error().raw_os_error();
    loop {
        let attempt = if exclusive {
            FileExt::try_lock_exclusive(file)
        } else {
            FileExt::try_lock_shared(file)
        };
        match attempt {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == contended => {}
            Err(e) => return Err(e.into()),
        }
        if !timeout.is_zero() && started.elapsed() >= timeout {
            return Err(Error::Timeout);
        }
        thread::sleep(LOCK_POLL_INTERVAL);
    }
}

fn slot_offset(txid: u64, page_size: u64) -> u64 {
    (txid % 2) * page_size
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::node::Entry;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn sample_tree() -> BucketNode {
        let mut child = BucketNode { sequence: 7, ..Default::default() };
        child
            .entries
            .insert(Bytes::from_static(b"key"), Entry::Value(Bytes::from_static(b"value")));
        child.entries.insert(Bytes::from_static(b"empty"), Entry::Value(Bytes::new()));
        let mut root = BucketNode::default();
        root.entries
            .insert(Bytes::from_static(b"meow"), Entry::Bucket(std::sync::Arc::new(child)));
        root
    }

    #[test]
    fn test_meta_encode_decode() {
        let meta = Meta { page_size: 4096, txid: 9, offset: 8192, len: 77, image_checksum: 0xABCD };
        let encoded = meta.encode();
        assert_eq!(encoded.len(), META_SIZE);
        assert_eq!(Meta::decode(&encoded).unwrap(), meta);
    }

    #[test]
    fn test_meta_corruption_detected() {
        let meta = Meta { page_size: 4096, txid: 1, offset: 8192, len: 10, image_checksum: 1 };
        let mut encoded = meta.encode();
        encoded[20] ^= 0xFF;
        assert!(matches!(Meta::decode(&encoded), Err(Error::Checksum)));

        let mut encoded = meta.encode();
        encoded[0] = 0;
        assert!(matches!(Meta::decode(&encoded), Err(Error::Invalid)));

        let mut encoded = meta.encode();
        encoded[4] = 9;
        assert!(matches!(Meta::decode(&encoded), Err(Error::VersionMismatch)));
    }

    #[test]
    fn test_commit_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        let settings = Settings::default();

        {
            let (mut file, root) = DataFile::open(&path, 0o600, &Options::default()).unwrap();
            assert!(root.entries.is_empty());
            file.commit(&sample_tree(), 1, &settings).unwrap();
            file.commit(&BucketNode::default(), 2, &settings).unwrap();
            file.commit(&sample_tree(), 3, &settings).unwrap();
        }

        let (file, root) = DataFile::open(&path, 0o600, &Options::default()).unwrap();
        assert_eq!(file.meta().txid, 3);
        assert_eq!(root, sample_tree());
    }

    #[test]
    fn test_damaged_newest_image_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        let offset;
        {
            let (mut file, _) = DataFile::open(&path, 0o600, &Options::default()).unwrap();
            file.commit(&sample_tree(), 1, &Settings::default()).unwrap();
            file.commit(&BucketNode::default(), 2, &Settings::default()).unwrap();
            offset = file.meta().offset;
        }

        let mut raw = OpenOptions::new().write(true).open(&path).unwrap();
        write_at(&mut raw, offset, b"garbage!").unwrap();
        drop(raw);

        let (file, root) = DataFile::open(&path, 0o600, &Options::default()).unwrap();
        assert_eq!(file.meta().txid, 1);
        assert_eq!(root, sample_tree());
    }

    #[test]
    fn test_read_only_open_of_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.db");
        let options = Options::new().read_only(true);
        assert!(DataFile::open(&path, 0o600, &options).is_err());
    }

    #[test]
    fn test_lock_timeout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        let (_held, _) = DataFile::open(&path, 0o600, &Options::default()).unwrap();

        let options = Options::new().timeout(Duration::from_millis(100));
        let result = DataFile::open(&path, 0o600, &options);
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[test]
    fn test_write_copy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("copy.db");
        write_copy(&path, 0o600, &sample_tree(), 5, DEFAULT_PAGE_SIZE).unwrap();

        let (file, root) = DataFile::open(&path, 0o600, &Options::default()).unwrap();
        assert_eq!(file.meta().txid, 5);
        assert_eq!(root, sample_tree());
    }
}
