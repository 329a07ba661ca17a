//! WASI preview 1 for catdoc instances, provided by `wasi-common`.
//!
//! `wasi-common` takes any [`WasiDir`] as a preopen, so the virtual mounts
//! from [`fs`](crate::sandbox::fs) are adapted here rather than exposing
//! host directories. Descriptor layout: 0 is an empty stdin, 1 and 2 are
//! the captured sinks, and one preopen per mount follows in mount order.

use std::any::Any;
use std::io::{self, IoSliceMut, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use wasi_common::dir::{OpenResult, ReaddirCursor, ReaddirEntity};
use wasi_common::file::{FdFlags, FileType, Filestat, OFlags};
use wasi_common::pipe::{ReadPipe, WritePipe};
use wasi_common::sync::WasiCtxBuilder;
use wasi_common::{Error, ErrorExt, WasiCtx, WasiDir, WasiFile};
use wasmtime::{Engine, Linker, Store};

use crate::sandbox::fs::{normalize, Entry, EntryKind, FileHandle, Metadata, Mount, VirtualFs};
use crate::sandbox::io::CallIo;
use crate::sandbox::limits::StoreData;

/// Import module name for WASI preview 1.
pub const MODULE: &str = "wasi_snapshot_preview1";
/// Pre-snapshot module name, registered alongside preview 1.
pub const LEGACY_MODULE: &str = "wasi_unstable";

fn to_wasi(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::not_found(),
        io::ErrorKind::PermissionDenied => Error::perm(),
        io::ErrorKind::InvalidInput => Error::invalid_argument(),
        _ => Error::io(),
    }
}

fn filestat(filetype: FileType, size: u64) -> Filestat {
    Filestat {
        device_id: 0,
        inode: 0,
        filetype,
        nlink: 1,
        size,
        atim: None,
        mtim: None,
        ctim: None,
    }
}

fn filestat_of(meta: Metadata) -> Filestat {
    match meta.kind {
        EntryKind::File => filestat(FileType::RegularFile, meta.size),
        EntryKind::Directory => filestat(FileType::Directory, 0),
    }
}

/// An open file on a mount. Reads only.
struct MountFile {
    handle: Mutex<Box<dyn FileHandle>>,
    size: u64,
}

impl MountFile {
    fn new(handle: Box<dyn FileHandle>, size: u64) -> Self {
        Self {
            handle: Mutex::new(handle),
            size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn FileHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read at the current position, or at `offset` leaving the position
    /// where it was.
    fn read_into(&self, bufs: &mut [IoSliceMut<'_>], offset: Option<u64>) -> io::Result<u64> {
        let mut handle = self.lock();
        let saved = match offset {
            Some(at) => {
                let saved = handle.stream_position()?;
                handle.seek(SeekFrom::Start(at))?;
                Some(saved)
            }
            None => None,
        };
        let read = handle.read_vectored(bufs);
        if let Some(saved) = saved {
            handle.seek(SeekFrom::Start(saved))?;
        }
        Ok(read? as u64)
    }

    fn seek_to(&self, pos: SeekFrom) -> io::Result<u64> {
        self.lock().seek(pos)
    }
}

#[async_trait::async_trait]
impl WasiFile for MountFile {
    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn get_filetype(&self) -> Result<FileType, Error> {
        Ok(FileType::RegularFile)
    }

    async fn get_filestat(&self) -> Result<Filestat, Error> {
        Ok(filestat(FileType::RegularFile, self.size))
    }

    async fn read_vectored<'a>(&self, bufs: &mut [IoSliceMut<'a>]) -> Result<u64, Error> {
        self.read_into(bufs, None).map_err(to_wasi)
    }

    async fn read_vectored_at<'a>(
        &self,
        bufs: &mut [IoSliceMut<'a>],
        offset: u64,
    ) -> Result<u64, Error> {
        self.read_into(bufs, Some(offset)).map_err(to_wasi)
    }

    async fn seek(&self, pos: SeekFrom) -> Result<u64, Error> {
        self.seek_to(pos).map_err(to_wasi)
    }
}

/// A directory on a mount: the root, or one opened below it.
struct MountDir {
    fs: Arc<dyn VirtualFs>,
    path: String,
}

impl MountDir {
    fn root(fs: Arc<dyn VirtualFs>) -> Self {
        Self {
            fs,
            path: ".".to_string(),
        }
    }

    /// Join `path` onto this directory; climbing above the mount root is
    /// refused.
    fn resolve(&self, path: &str) -> Result<String, Error> {
        normalize(&format!("{}/{}", self.path, path)).ok_or_else(Error::perm)
    }

    fn open(&self, path: &str, oflags: OFlags) -> Result<OpenResult, Error> {
        let path = self.resolve(path)?;
        match self.fs.open(&path).map_err(to_wasi)? {
            Entry::Directory => Ok(OpenResult::Dir(Box::new(MountDir {
                fs: Arc::clone(&self.fs),
                path,
            }))),
            Entry::File(_) if oflags.contains(OFlags::DIRECTORY) => Err(Error::not_dir()),
            Entry::File(handle) => {
                let size = self.fs.stat(&path).map_err(to_wasi)?.size;
                Ok(OpenResult::File(Box::new(MountFile::new(handle, size))))
            }
        }
    }
}

#[async_trait::async_trait]
impl WasiDir for MountDir {
    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn open_file(
        &self,
        _symlink_follow: bool,
        path: &str,
        oflags: OFlags,
        _read: bool,
        write: bool,
        fdflags: FdFlags,
    ) -> Result<OpenResult, Error> {
        if write
            || oflags.intersects(OFlags::CREATE | OFlags::EXCLUSIVE | OFlags::TRUNCATE)
            || fdflags.contains(FdFlags::APPEND)
        {
            return Err(Error::perm());
        }
        self.open(path, oflags)
    }

    // Listings are always empty; catdoc only opens known names.
    async fn readdir(
        &self,
        _cursor: ReaddirCursor,
    ) -> Result<Box<dyn Iterator<Item = Result<ReaddirEntity, Error>> + Send>, Error> {
        Ok(Box::new(std::iter::empty()))
    }

    async fn get_filestat(&self) -> Result<Filestat, Error> {
        Ok(filestat(FileType::Directory, 0))
    }

    async fn get_path_filestat(
        &self,
        path: &str,
        _follow_symlinks: bool,
    ) -> Result<Filestat, Error> {
        let path = self.resolve(path)?;
        self.fs.stat(&path).map(filestat_of).map_err(to_wasi)
    }
}

/// Build the WASI context for one instance.
///
/// argv is just `program`; `env` pairs are passed through unmodified; stdin
/// is empty; stdout and stderr go to `sinks`; `mounts` become preopens in
/// order.
pub fn build_ctx<K, V>(
    program: &str,
    env: impl IntoIterator<Item = (K, V)>,
    mounts: Vec<Mount>,
    sinks: &CallIo,
) -> anyhow::Result<WasiCtx>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut builder = WasiCtxBuilder::new();
    builder
        .stdin(Box::new(ReadPipe::new(io::empty())))
        .stdout(Box::new(WritePipe::new(sinks.stdout.clone())))
        .stderr(Box::new(WritePipe::new(sinks.stderr.clone())))
        .arg(program)?;
    for (key, value) in env {
        builder.env(key.as_ref(), value.as_ref())?;
    }
    let ctx = builder.build();

    for mount in mounts {
        ctx.push_preopened_dir(Box::new(MountDir::root(mount.fs)), &mount.guest_path)
            .map_err(|e| anyhow!("failed to mount {}: {:?}", mount.guest_path, e))?;
    }
    Ok(ctx)
}

/// Register every preview 1 (and `wasi_unstable`) function on `linker`.
pub fn add_to_linker(linker: &mut Linker<StoreData>) -> anyhow::Result<()> {
    wasi_common::sync::add_to_linker(linker, |data: &mut StoreData| &mut data.wasi)
}

/// A store with an empty context, for asking a linker what it defines.
pub fn scratch_store(engine: &Engine) -> Store<StoreData> {
    Store::new(engine, StoreData::new(0, WasiCtxBuilder::new().build(), None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fs::{EmptyFs, HostDirFs, SingleFileFs};
    use std::io::Cursor;
    use tokio_test::block_on;

    fn input_dir(bytes: &[u8]) -> MountDir {
        let input = SingleFileFs::new(Cursor::new(bytes.to_vec())).unwrap();
        MountDir::root(Arc::new(input))
    }

    fn open_file(dir: &MountDir, path: &str) -> Box<dyn WasiFile> {
        let opened = block_on(dir.open_file(
            false,
            path,
            OFlags::empty(),
            true,
            false,
            FdFlags::empty(),
        ));
        match opened {
            Ok(OpenResult::File(file)) => file,
            Ok(OpenResult::Dir(_)) => panic!("{path} opened as a directory"),
            Err(e) => panic!("{path} failed to open: {e:?}"),
        }
    }

    #[test]
    fn test_input_root_is_the_file() {
        let dir = input_dir(b"text-inside-doc");
        let file = open_file(&dir, ".");

        let mut buf = [0u8; 64];
        let n = block_on(file.read_vectored(&mut [IoSliceMut::new(&mut buf)])).unwrap();
        assert_eq!(&buf[..n as usize], b"text-inside-doc");

        let stat = block_on(file.get_filestat()).unwrap();
        assert_eq!(stat.size, 15);
        assert_eq!(stat.filetype, FileType::RegularFile);
    }

    #[test]
    fn test_read_at_keeps_position() {
        let dir = input_dir(b"0123456789");
        let file = open_file(&dir, ".");

        let mut buf = [0u8; 3];
        block_on(file.read_vectored_at(&mut [IoSliceMut::new(&mut buf)], 5)).unwrap();
        assert_eq!(&buf, b"567");
        block_on(file.read_vectored(&mut [IoSliceMut::new(&mut buf)])).unwrap();
        assert_eq!(&buf, b"012");
        assert_eq!(block_on(file.seek(SeekFrom::End(-1))).unwrap(), 9);
    }

    #[test]
    fn test_writes_are_refused() {
        let dir = input_dir(b"doc");
        let write = block_on(dir.open_file(false, ".", OFlags::empty(), true, true, FdFlags::empty()));
        assert!(write.is_err());
        let create = block_on(dir.open_file(false, "new", OFlags::CREATE, true, false, FdFlags::empty()));
        assert!(create.is_err());
        let append = block_on(dir.open_file(false, ".", OFlags::empty(), true, false, FdFlags::APPEND));
        assert!(append.is_err());
    }

    #[test]
    fn test_paths_cannot_escape_mount() {
        let dir = MountDir::root(Arc::new(HostDirFs::new(std::env::temp_dir())));
        let escaped = block_on(dir.open_file(
            false,
            "../etc/passwd",
            OFlags::empty(),
            true,
            false,
            FdFlags::empty(),
        ));
        assert!(escaped.is_err());
        assert!(block_on(dir.get_path_filestat("../..", false)).is_err());
    }

    #[test]
    fn test_empty_mount() {
        let dir = MountDir::root(Arc::new(EmptyFs));
        let stat = block_on(dir.get_path_filestat(".", false)).unwrap();
        assert_eq!(stat.filetype, FileType::Directory);
        assert!(block_on(dir.get_path_filestat("koi8-r.txt", false)).is_err());
        assert_eq!(block_on(dir.readdir(ReaddirCursor::from(0))).unwrap().count(), 0);
    }

    #[test]
    fn test_build_ctx_with_mounts() {
        let input = SingleFileFs::new(Cursor::new(b"doc".to_vec())).unwrap();
        let mounts = vec![
            Mount::new("/input_file", input),
            Mount::new("/charsets", EmptyFs),
        ];
        let ctx = build_ctx(
            "catdoc",
            [("CATDOC_SRC_CHARSET", ""), ("CATDOC_DST_CHARSET", "utf-8")],
            mounts,
            &CallIo::new(),
        );
        assert!(ctx.is_ok());
    }
}
