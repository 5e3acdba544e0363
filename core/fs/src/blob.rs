//! Blob content access strategies.
//!
//! Two orthogonal options decide how a blob reaches the kernel:
//! `lazy` defers content preparation to the first read, and `disk`
//! stages content into a per-mount directory instead of holding it in
//! memory. Staged files are content-addressed by hex oid, so creation
//! is idempotent and an existing file is trusted.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::Oid;
use tracing::debug;

use gitmount_common::Result;
use gitmount_store::GitStore;

use crate::node::FileHandle;

/// Content-access configuration for blob nodes.
#[derive(Debug, Clone, Copy)]
pub struct BlobOptions {
    /// Defer content preparation from `open(2)` to the first `read(2)`.
    pub lazy: bool,
    /// Stage content to a per-mount temp file instead of memory.
    pub disk: bool,
}

impl Default for BlobOptions {
    fn default() -> Self {
        Self {
            lazy: true,
            disk: false,
        }
    }
}

/// Constructor for the underlying handle of a lazy file.
pub type HandleCtor = Box<dyn Fn() -> Result<Arc<dyn FileHandle>> + Send + Sync>;

/// Blob content held in memory; reads slice the buffer.
pub struct MemoryFile {
    bytes: Vec<u8>,
}

impl MemoryFile {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl FileHandle for MemoryFile {
    fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>> {
        let start = (offset as usize).min(self.bytes.len());
        let end = (start + size as usize).min(self.bytes.len());
        Ok(self.bytes[start..end].to_vec())
    }
}

/// A handle backed by an open host file: staged blobs and loopback
/// content.
pub struct LoopbackFile {
    file: File,
}

impl LoopbackFile {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Open a host path read-only.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }
}

impl FileHandle for LoopbackFile {
    fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// A handle that defers construction of the real handle to the first
/// read. The mutex is held only for the initialization window; a
/// failed initialization is retried by the next read.
pub struct LazyFile {
    ctor: HandleCtor,
    inner: Mutex<Option<Arc<dyn FileHandle>>>,
}

impl LazyFile {
    pub fn new(ctor: HandleCtor) -> Self {
        Self {
            ctor,
            inner: Mutex::new(None),
        }
    }
}

impl FileHandle for LazyFile {
    fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>> {
        let handle = {
            let mut inner = self.inner.lock().unwrap();
            match &*inner {
                Some(handle) => handle.clone(),
                None => {
                    let handle = (self.ctor)()?;
                    *inner = Some(handle.clone());
                    handle
                }
            }
        };
        handle.read(offset, size)
    }
}

/// Ensure the staged copy of a blob exists and return its path.
///
/// The file is named by hex oid inside the per-mount staging
/// directory. Concurrent stagings of the same oid write identical
/// bytes, so an already-present file is used as-is.
pub fn stage_blob(dir: &Path, store: &GitStore, oid: Oid) -> Result<PathBuf> {
    let path = dir.join(oid.to_string());
    if !path.exists() {
        let bytes = store.blob_bytes(oid)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&path)?;
        file.write_all(&bytes)?;
        debug!(oid = %oid, path = %path.display(), "staged blob");
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_memory_file_slicing() {
        let file = MemoryFile::new(b"hello".to_vec());
        assert_eq!(file.read(0, 5).unwrap(), b"hello");
        assert_eq!(file.read(0, 2).unwrap(), b"he");
        assert_eq!(file.read(3, 10).unwrap(), b"lo");
        assert_eq!(file.read(5, 1).unwrap(), b"");
        assert_eq!(file.read(99, 1).unwrap(), b"");
    }

    #[test]
    fn test_loopback_file_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"staged content").unwrap();

        let file = LoopbackFile::open(&path).unwrap();
        assert_eq!(file.read(0, 6).unwrap(), b"staged");
        assert_eq!(file.read(7, 100).unwrap(), b"content");
        assert_eq!(file.read(100, 4).unwrap(), b"");
    }

    #[test]
    fn test_lazy_file_initializes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let lazy = LazyFile::new(Box::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryFile::new(b"lazy bytes".to_vec())) as Arc<dyn FileHandle>)
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(lazy.read(0, 4).unwrap(), b"lazy");
        assert_eq!(lazy.read(5, 5).unwrap(), b"bytes");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lazy_file_retries_after_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let lazy = LazyFile::new(Box::new(move || {
            if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(gitmount_common::Error::Git("transient".to_string()))
            } else {
                Ok(Arc::new(MemoryFile::new(b"ok".to_vec())) as Arc<dyn FileHandle>)
            }
        }));

        assert!(lazy.read(0, 2).is_err());
        assert_eq!(lazy.read(0, 2).unwrap(), b"ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_blob_options() {
        let options = BlobOptions::default();
        assert!(options.lazy);
        assert!(!options.disk);
    }
}
