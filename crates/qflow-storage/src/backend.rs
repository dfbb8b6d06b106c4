//! Archive Storage Backends
//!
//! Everything above this module addresses files by string path and never
//! touches `std::fs` or an object store directly. A path is either a local
//! filesystem path (`~/data/flow/host/20171220/...`) or an object store URL
//! (`s3://bucket/flow/host/20171220/...`).
//!
//! ## Backends
//!
//! ```text
//!                 ┌──────────────────────┐
//!   path ───────► │   ArchiveBackend     │
//!                 └──────────┬───────────┘
//!              ┌─────────────┴──────────────┐
//!              ▼                            ▼
//!   ┌────────────────────┐      ┌──────────────────────────┐
//!   │   LocalBackend     │      │   ObjectStoreBackend     │
//!   │   std::fs          │      │   Arc<dyn ObjectStore>   │
//!   │   appends in place │      │   whole-object get/put   │
//!   └────────────────────┘      └──────────────────────────┘
//! ```
//!
//! The archive API is synchronous and poll based. `ObjectStoreBackend` owns a
//! current-thread tokio runtime and blocks on each object store call, so it
//! must not be used from inside another tokio runtime.
//!
//! Object stores cannot append. Writers opened on an object buffer the full
//! object (prefilled with any existing content) and `put` it on every flush.
//!
//! ## Usage
//!
//! ```ignore
//! let backend = backend_for_path("s3://market-data/flow")?;
//! for machine in backend.iter_dir("s3://market-data/flow")? {
//!     println!("{}", machine);
//! }
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// URL scheme handled by [`ObjectStoreBackend`]
pub const S3_SCHEME: &str = "s3://";

/// Which family of backend serves a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    ObjectStore,
}

impl BackendKind {
    pub fn of_path(path: &str) -> Self {
        if path.starts_with(S3_SCHEME) {
            BackendKind::ObjectStore
        } else {
            BackendKind::Local
        }
    }
}

/// Metadata for a single path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
}

/// Storage operations the archive needs.
///
/// Listing operations return entry names (not full paths), sorted. Listing a
/// directory that does not exist yields no entries.
pub trait ArchiveBackend: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn stat(&self, path: &str) -> Result<FileStat>;

    fn exists(&self, path: &str) -> Result<bool>;

    /// Names of the regular files directly inside `dir`
    fn iter_file(&self, dir: &str) -> Result<Vec<String>>;

    /// Names of the directories directly inside `dir`
    fn iter_dir(&self, dir: &str) -> Result<Vec<String>>;

    fn normpath(&self, path: &str) -> String;

    /// Create `dir` and its parents; a no-op when it already exists
    fn ensure_dir(&self, dir: &str) -> Result<()>;

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Open `path` for appending, creating it if needed
    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send>>;
}

/// Join a directory and an entry name with a single `/`.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Pick a backend from the path scheme.
///
/// `s3://bucket/...` gets an S3 backend configured from the environment
/// (`AWS_ACCESS_KEY_ID`, `AWS_REGION`, `AWS_ENDPOINT`, ...); anything else is
/// local.
pub fn backend_for_path(path: &str) -> Result<Arc<dyn ArchiveBackend>> {
    match BackendKind::of_path(path) {
        BackendKind::Local => Ok(Arc::new(LocalBackend::new())),
        BackendKind::ObjectStore => {
            let (bucket, _) = split_s3_url(path)?;
            Ok(Arc::new(ObjectStoreBackend::s3_from_env(bucket)?))
        }
    }
}

fn split_s3_url(path: &str) -> Result<(&str, &str)> {
    let rest = path
        .strip_prefix(S3_SCHEME)
        .ok_or_else(|| Error::InvalidPath(format!("not an s3 url: {}", path)))?;
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(Error::InvalidPath(format!("missing bucket: {}", path)));
    }
    Ok((bucket, key))
}

// ============================================================================
// Local filesystem
// ============================================================================

/// Backend over the local filesystem
#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    fn list(&self, dir: &str, want_dir: bool) -> Result<Vec<String>> {
        let entries = match fs::read_dir(self.normpath(dir)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let matches = if want_dir {
                path.is_dir()
            } else {
                path.is_file()
            };
            if !matches {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => warn!(name = ?name, "Skipping non UTF-8 archive entry"),
            }
        }
        names.sort();
        Ok(names)
    }
}

impl ArchiveBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn stat(&self, path: &str) -> Result<FileStat> {
        let meta = fs::metadata(self.normpath(path))?;
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn exists(&self, path: &str) -> Result<bool> {
        match fs::metadata(self.normpath(path)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn iter_file(&self, dir: &str) -> Result<Vec<String>> {
        self.list(dir, false)
    }

    fn iter_dir(&self, dir: &str) -> Result<Vec<String>> {
        self.list(dir, true)
    }

    fn normpath(&self, path: &str) -> String {
        let expanded = match path.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
                Some(home) => format!("{}{}", home.display(), rest),
                None => path.to_string(),
            },
            _ => path.to_string(),
        };

        let trimmed = expanded.trim_end_matches('/');
        if trimmed.is_empty() && expanded.starts_with('/') {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }

    fn ensure_dir(&self, dir: &str) -> Result<()> {
        fs::create_dir_all(self.normpath(dir))?;
        Ok(())
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(self.normpath(path))?;
        Ok(Box::new(file))
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.normpath(path))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

// ============================================================================
// Object store
// ============================================================================

/// Backend over one bucket of an object store, addressed as `s3://bucket/key`
#[derive(Debug)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    runtime: Arc<Runtime>,
}

impl ObjectStoreBackend {
    /// Serve `s3://<bucket>/...` paths from `store`.
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            store,
            bucket: bucket.into(),
            runtime: Arc::new(runtime),
        })
    }

    /// S3 (or any S3-compatible endpoint) configured from `AWS_*` variables.
    pub fn s3_from_env(bucket: &str) -> Result<Self> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        debug!(bucket = %bucket, "Created S3 archive backend");
        Self::new(Arc::new(store), bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn key<'a>(&self, path: &'a str) -> Result<&'a str> {
        let (bucket, key) = split_s3_url(path)?;
        if bucket != self.bucket {
            return Err(Error::InvalidPath(format!(
                "{} is outside bucket {}",
                path, self.bucket
            )));
        }
        Ok(key.trim_matches('/'))
    }

    fn location(&self, path: &str) -> Result<ObjectPath> {
        Ok(ObjectPath::from(self.key(path)?))
    }

    fn list(&self, dir: &str) -> Result<object_store::ListResult> {
        let key = self.key(dir)?;
        let prefix = if key.is_empty() {
            None
        } else {
            Some(ObjectPath::from(key))
        };
        Ok(self
            .runtime
            .block_on(self.store.list_with_delimiter(prefix.as_ref()))?)
    }

    /// Directories exist only as key prefixes
    fn has_children(&self, dir: &str) -> Result<bool> {
        let listing = self.list(dir)?;
        Ok(!listing.objects.is_empty() || !listing.common_prefixes.is_empty())
    }
}

impl ArchiveBackend for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    fn stat(&self, path: &str) -> Result<FileStat> {
        let location = self.location(path)?;
        match self.runtime.block_on(self.store.head(&location)) {
            Ok(meta) => Ok(FileStat {
                size: meta.size as u64,
                is_dir: false,
            }),
            Err(e @ object_store::Error::NotFound { .. }) => {
                if self.has_children(path)? {
                    Ok(FileStat {
                        size: 0,
                        is_dir: true,
                    })
                } else {
                    Err(e.into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let location = self.location(path)?;
        match self.runtime.block_on(self.store.head(&location)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => self.has_children(path),
            Err(e) => Err(e.into()),
        }
    }

    fn iter_file(&self, dir: &str) -> Result<Vec<String>> {
        let listing = self.list(dir)?;
        let mut names: Vec<String> = listing
            .objects
            .iter()
            .filter_map(|meta| meta.location.filename().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    fn iter_dir(&self, dir: &str) -> Result<Vec<String>> {
        let listing = self.list(dir)?;
        let mut names: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|prefix| prefix.filename().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    fn normpath(&self, path: &str) -> String {
        match split_s3_url(path) {
            Ok((bucket, key)) => {
                let key: Vec<&str> = key.split('/').filter(|part| !part.is_empty()).collect();
                if key.is_empty() {
                    format!("{}{}", S3_SCHEME, bucket)
                } else {
                    format!("{}{}/{}", S3_SCHEME, bucket, key.join("/"))
                }
            }
            Err(_) => path.trim_end_matches('/').to_string(),
        }
    }

    fn ensure_dir(&self, dir: &str) -> Result<()> {
        // Prefixes come into existence with their first object
        self.location(dir)?;
        Ok(())
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let location = self.location(path)?;
        let bytes = self.runtime.block_on(async {
            let result = self.store.get(&location).await?;
            result.bytes().await
        })?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        let location = self.location(path)?;
        let existing = self.runtime.block_on(async {
            match self.store.get(&location).await {
                Ok(result) => result.bytes().await.map(|b| b.to_vec()),
                Err(object_store::Error::NotFound { .. }) => Ok(Vec::new()),
                Err(e) => Err(e),
            }
        })?;

        Ok(Box::new(ObjectWriter {
            store: Arc::clone(&self.store),
            runtime: Arc::clone(&self.runtime),
            location,
            buffer: existing,
            dirty: false,
        }))
    }
}

/// Buffers a whole object and uploads it on flush
struct ObjectWriter {
    store: Arc<dyn ObjectStore>,
    runtime: Arc<Runtime>,
    location: ObjectPath,
    buffer: Vec<u8>,
    dirty: bool,
}

impl Write for ObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.dirty = true;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let payload = Bytes::copy_from_slice(&self.buffer);
        self.runtime
            .block_on(self.store.put(&self.location, payload))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.dirty = false;
        Ok(())
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(location = %self.location, error = %e, "Failed to upload object on drop");
        }
    }
}
