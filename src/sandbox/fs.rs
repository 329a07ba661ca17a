//! Read-only virtual filesystems mounted into the sandbox.
//!
//! Nothing here touches the host filesystem for the input document: the
//! document is served from the caller's stream through [`SingleFileFs`].
//! The charset tables come from a host directory through [`HostDirFs`].

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

/// Stat-like metadata for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Entry kind.
    pub kind: EntryKind,
    /// Size in bytes, zero for directories.
    pub size: u64,
}

/// A readable, seekable handle the sandbox can hold on to.
pub trait FileHandle: Read + Seek + Send {}

impl<T: Read + Seek + Send> FileHandle for T {}

/// What opening a path produced.
pub enum Entry {
    /// An open file with its own read position.
    File(Box<dyn FileHandle>),
    /// A directory. Listing is not supported, so there is nothing to hold.
    Directory,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::File(_) => f.write_str("Entry::File"),
            Entry::Directory => f.write_str("Entry::Directory"),
        }
    }
}

/// A read-only tree the sandbox can open files from.
///
/// Paths are relative to the mount root, already normalized by
/// [`normalize`]; `"."` names the root itself.
pub trait VirtualFs: Send + Sync {
    /// Open the entry at `path`.
    fn open(&self, path: &str) -> io::Result<Entry>;

    /// Describe the entry at `path`.
    fn stat(&self, path: &str) -> io::Result<Metadata>;
}

/// Normalize a guest path relative to a mount root.
///
/// Empty segments and `.` are dropped, `..` pops. Returns `None` when the
/// path would climb above the root.
pub fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        Some(".".to_string())
    } else {
        Some(parts.join("/"))
    }
}

struct Source {
    reader: Mutex<Box<dyn FileHandle>>,
    start: u64,
    len: u64,
}

/// One caller-supplied stream exposed as a single file.
///
/// The mount root *is* the file: the program opens `/input_file` and the
/// adapter answers `"."`. Each open gets an independent read position over
/// the bytes that followed the stream's position at construction time.
#[derive(Clone)]
pub struct SingleFileFs {
    source: Arc<Source>,
}

impl SingleFileFs {
    /// Wrap a stream, measuring it once by seeking to the end and back.
    ///
    /// The stream is owned by the mount for as long as any call holds it,
    /// hence `'static`. Use [`buffered`](Self::buffered) for a borrowed or
    /// unseekable reader.
    pub fn new<R>(mut reader: R) -> io::Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let start = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(start))?;
        Ok(Self {
            source: Arc::new(Source {
                reader: Mutex::new(Box::new(reader)),
                start,
                len: end.saturating_sub(start),
            }),
        })
    }

    /// Read the rest of `reader` into memory and serve that.
    pub fn buffered<R: Read + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::new(io::Cursor::new(bytes))
    }

    /// Size of the logical file.
    pub fn len(&self) -> u64 {
        self.source.len
    }

    /// Check if the logical file is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SingleFileFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFileFs")
            .field("start", &self.source.start)
            .field("len", &self.source.len)
            .finish()
    }
}

impl VirtualFs for SingleFileFs {
    fn open(&self, path: &str) -> io::Result<Entry> {
        self.stat(path)?;
        Ok(Entry::File(Box::new(SharedCursor {
            source: Arc::clone(&self.source),
            pos: 0,
        })))
    }

    fn stat(&self, path: &str) -> io::Result<Metadata> {
        if path != "." {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such entry: {path}"),
            ));
        }
        Ok(Metadata {
            kind: EntryKind::File,
            size: self.source.len,
        })
    }
}

/// Read handle with a private position over a shared stream.
struct SharedCursor {
    source: Arc<Source>,
    pos: u64,
}

impl Read for SharedCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.source.len.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let mut reader = self
            .source
            .reader
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "input stream lock poisoned"))?;
        reader.seek(SeekFrom::Start(self.source.start + self.pos))?;
        let n = reader.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SharedCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.source.len.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        self.pos = target;
        Ok(target)
    }
}

/// A host directory exposed read-only.
#[derive(Debug, Clone)]
pub struct HostDirFs {
    root: PathBuf,
}

impl HostDirFs {
    /// Expose `root`. The directory is not checked until something opens it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("path escapes mount: {path}"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl VirtualFs for HostDirFs {
    fn open(&self, path: &str) -> io::Result<Entry> {
        let full = self.resolve(path)?;
        if std::fs::metadata(&full)?.is_dir() {
            return Ok(Entry::Directory);
        }
        Ok(Entry::File(Box::new(std::fs::File::open(full)?)))
    }

    fn stat(&self, path: &str) -> io::Result<Metadata> {
        let meta = std::fs::metadata(self.resolve(path)?)?;
        Ok(if meta.is_dir() {
            Metadata {
                kind: EntryKind::Directory,
                size: 0,
            }
        } else {
            Metadata {
                kind: EntryKind::File,
                size: meta.len(),
            }
        })
    }
}

/// A directory with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyFs;

impl VirtualFs for EmptyFs {
    fn open(&self, path: &str) -> io::Result<Entry> {
        self.stat(path).map(|_| Entry::Directory)
    }

    fn stat(&self, path: &str) -> io::Result<Metadata> {
        if path == "." {
            Ok(Metadata {
                kind: EntryKind::Directory,
                size: 0,
            })
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such entry: {path}"),
            ))
        }
    }
}

/// A virtual tree attached at a fixed guest path.
#[derive(Clone)]
pub struct Mount {
    /// Absolute guest path, reported to the program as a preopen.
    pub guest_path: String,
    /// The tree behind it.
    pub fs: Arc<dyn VirtualFs>,
}

impl Mount {
    /// Attach `fs` at `guest_path`.
    pub fn new(guest_path: impl Into<String>, fs: impl VirtualFs + 'static) -> Self {
        Self {
            guest_path: guest_path.into(),
            fs: Arc::new(fs),
        }
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("guest_path", &self.guest_path)
            .finish_non_exhaustive()
    }
}
