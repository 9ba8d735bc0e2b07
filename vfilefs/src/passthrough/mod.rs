//! Path-based filesystem operations over a backing directory, with one virtual file
//! injected at the root.
//!
//! Every operation resolves its exposed path once, decides whether it addresses the
//! virtual file or the backing tree, and delegates. Host failures are returned with
//! their original errno.

pub mod attr;
pub mod dir;
pub mod handle;
pub mod resolver;
pub mod virtual_file;

use std::ffi::OsStr;
use std::fs::{self, OpenOptions, Permissions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use nix::sys::stat::{Mode, SFlag, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::AccessFlags;

pub use attr::{Attributes, FileTime};
pub use dir::{DirEntry, EntryKind, Listing};
pub use handle::{Descriptor, VIRTUAL_FH};
pub use resolver::{PathResolver, Target};
pub use virtual_file::VirtualFile;

use crate::error::{FsError, FsResult};
use handle::borrow_file;

/// Filesystem statistics of the backing filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub bsize: u64,
    pub frsize: u64,
    pub namelen: u64,
    pub flags: u64,
}

/// Passthrough filesystem exposing `root` plus one [`VirtualFile`].
///
/// Holds nothing but the resolver and the virtual file; open sessions live in the
/// descriptors handed back to the caller.
#[derive(Debug, Clone)]
pub struct PassthroughFs {
    resolver: PathResolver,
    vfile: VirtualFile,
}

impl PassthroughFs {
    /// Mirrors `root` and injects the default virtual file.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_virtual_file(root, VirtualFile::default())
    }

    pub fn with_virtual_file(root: impl Into<PathBuf>, vfile: VirtualFile) -> Self {
        Self {
            resolver: PathResolver::new(root),
            vfile,
        }
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn virtual_file(&self) -> &VirtualFile {
        &self.vfile
    }

    pub fn resolve(&self, path: &OsStr) -> PathBuf {
        self.resolver.resolve(path)
    }

    pub fn target(&self, path: &OsStr) -> Target {
        self.resolver.target(path, &self.vfile)
    }

    pub fn access(&self, path: &OsStr, mask: i32) -> FsResult<()> {
        debug!("access: path={path:?} mask={mask:#o}");
        nix::unistd::access(&self.resolve(path), AccessFlags::from_bits_truncate(mask))?;
        Ok(())
    }

    pub fn chmod(&self, path: &OsStr, mode: u32) -> FsResult<()> {
        debug!("chmod: path={path:?} mode={mode:#o}");
        fs::set_permissions(self.resolve(path), Permissions::from_mode(mode))?;
        Ok(())
    }

    /// Changes owner and/or group; `None` leaves the id unchanged.
    pub fn chown(&self, path: &OsStr, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        debug!("chown: path={path:?} uid={uid:?} gid={gid:?}");
        std::os::unix::fs::chown(self.resolve(path), uid, gid)?;
        Ok(())
    }

    pub fn getattr(&self, path: &OsStr) -> FsResult<Attributes> {
        let attr = attr::attributes(&self.target(path), &self.vfile);
        debug!("getattr: path={path:?} attr={attr:?}");
        attr
    }

    /// Lists `path`: `.`, `..`, the virtual file, then the real children if the
    /// resolved path is an existing directory.
    pub fn readdir(&self, path: &OsStr) -> FsResult<Listing> {
        debug!("readdir: path={path:?}");
        dir::list(&self.resolve(path), &self.vfile)
    }

    /// Reads a symlink. Absolute targets are rewritten relative to the backing root.
    pub fn readlink(&self, path: &OsStr) -> FsResult<PathBuf> {
        let target = self.resolver.sanitize_link(fs::read_link(self.resolve(path))?);
        debug!("readlink: path={path:?} target={target:?}");
        Ok(target)
    }

    pub fn mknod(&self, path: &OsStr, mode: u32, rdev: u64) -> FsResult<()> {
        debug!("mknod: path={path:?} mode={mode:#o} rdev={rdev}");
        nix::sys::stat::mknod(
            &self.resolve(path),
            SFlag::from_bits_truncate(mode & libc::S_IFMT),
            Mode::from_bits_truncate(mode & 0o7777),
            rdev as libc::dev_t,
        )?;
        Ok(())
    }

    pub fn rmdir(&self, path: &OsStr) -> FsResult<()> {
        debug!("rmdir: path={path:?}");
        fs::remove_dir(self.resolve(path))?;
        Ok(())
    }

    pub fn mkdir(&self, path: &OsStr, mode: u32) -> FsResult<()> {
        debug!("mkdir: path={path:?} mode={mode:#o}");
        fs::DirBuilder::new().mode(mode).create(self.resolve(path))?;
        Ok(())
    }

    pub fn statfs(&self, path: &OsStr) -> FsResult<StatFs> {
        debug!("statfs: path={path:?}");
        let st = nix::sys::statvfs::statvfs(&self.resolve(path))?;
        Ok(StatFs {
            blocks: st.blocks() as u64,
            bfree: st.blocks_free() as u64,
            bavail: st.blocks_available() as u64,
            files: st.files() as u64,
            ffree: st.files_free() as u64,
            favail: st.files_available() as u64,
            bsize: st.block_size() as u64,
            frsize: st.fragment_size() as u64,
            namelen: st.name_max() as u64,
            flags: st.flags().bits() as u64,
        })
    }

    pub fn unlink(&self, path: &OsStr) -> FsResult<()> {
        debug!("unlink: path={path:?}");
        fs::remove_file(self.resolve(path))?;
        Ok(())
    }

    /// Creates a symlink at `path` whose content is `target`, stored verbatim.
    pub fn symlink(&self, path: &OsStr, target: &OsStr) -> FsResult<()> {
        debug!("symlink: path={path:?} target={target:?}");
        std::os::unix::fs::symlink(target, self.resolve(path))?;
        Ok(())
    }

    pub fn rename(&self, from: &OsStr, to: &OsStr) -> FsResult<()> {
        debug!("rename: from={from:?} to={to:?}");
        fs::rename(self.resolve(from), self.resolve(to))?;
        Ok(())
    }

    /// Creates `new_path` as a hard link to `existing`.
    pub fn link(&self, existing: &OsStr, new_path: &OsStr) -> FsResult<()> {
        debug!("link: existing={existing:?} new={new_path:?}");
        fs::hard_link(self.resolve(existing), self.resolve(new_path))?;
        Ok(())
    }

    /// Sets access and modification times; `None` leaves that time unchanged.
    pub fn utimens(
        &self,
        path: &OsStr,
        atime: Option<FileTime>,
        mtime: Option<FileTime>,
    ) -> FsResult<()> {
        debug!("utimens: path={path:?} atime={atime:?} mtime={mtime:?}");
        nix::sys::stat::utimensat(
            None,
            &self.resolve(path),
            &timespec(atime),
            &timespec(mtime),
            UtimensatFlags::FollowSymlink,
        )?;
        Ok(())
    }

    /// Opens `path`. The virtual file always yields [`Descriptor::Virtual`] without
    /// looking at `flags` or touching the backing tree.
    pub fn open(&self, path: &OsStr, flags: i32) -> FsResult<Descriptor> {
        let fh = match self.target(path) {
            Target::Virtual => Descriptor::Virtual,
            Target::Real(real) => Descriptor::from_file(open_options(flags).open(real)?),
        };
        debug!("open: path={path:?} flags={flags:#x} fh={fh:?}");
        Ok(fh)
    }

    /// Creates and opens a real file for writing. Never special-cased: a real file
    /// named like the virtual file may be created and leaves the virtual entry intact.
    pub fn create(&self, path: &OsStr, mode: u32) -> FsResult<Descriptor> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .mode(mode)
            .open(self.resolve(path))?;
        let fh = Descriptor::from_file(file);
        debug!("create: path={path:?} mode={mode:#o} fh={fh:?}");
        Ok(fh)
    }

    /// Reads up to `size` bytes at `offset`. Virtual reads are clamped to the content
    /// and never fail; real reads return fewer bytes at end of file.
    pub fn read(&self, path: &OsStr, size: u32, offset: u64, fh: Descriptor) -> FsResult<Bytes> {
        debug!("read: path={path:?} size={size} offset={offset} fh={fh:?}");
        match fh {
            Descriptor::Virtual => Ok(self.vfile.read(offset, size)),
            Descriptor::Real(fd) => {
                let mut file = borrow_file(fd);
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = Vec::with_capacity(size as usize);
                Read::by_ref(&mut *file)
                    .take(u64::from(size))
                    .read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Writes `data` at `offset` and returns the number of bytes written. The virtual
    /// file is read-only.
    pub fn write(&self, path: &OsStr, data: &[u8], offset: u64, fh: Descriptor) -> FsResult<usize> {
        debug!("write: path={path:?} len={} offset={offset} fh={fh:?}", data.len());
        match fh {
            Descriptor::Virtual => Err(FsError::InvalidOperation("write to virtual file")),
            Descriptor::Real(fd) => {
                let mut file = borrow_file(fd);
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(data)?;
                Ok(data.len())
            }
        }
    }

    /// Truncates to `length`, through the open descriptor when one is given, otherwise
    /// by opening the path for update.
    pub fn truncate(&self, path: &OsStr, length: u64, fh: Option<Descriptor>) -> FsResult<()> {
        debug!("truncate: path={path:?} length={length} fh={fh:?}");
        match (fh, self.target(path)) {
            (Some(Descriptor::Virtual), _) | (None, Target::Virtual) => {
                Err(FsError::InvalidOperation("truncate of virtual file"))
            }
            (Some(Descriptor::Real(fd)), _) => {
                borrow_file(fd).set_len(length)?;
                Ok(())
            }
            (None, Target::Real(real)) => {
                let file = OpenOptions::new().read(true).write(true).open(real)?;
                file.set_len(length)?;
                Ok(())
            }
        }
    }

    /// Syncs a real file to disk; a no-op for the virtual file.
    pub fn flush(&self, path: &OsStr, fh: Descriptor) -> FsResult<()> {
        debug!("flush: path={path:?} fh={fh:?}");
        match fh {
            Descriptor::Virtual => Ok(()),
            Descriptor::Real(fd) => Ok(borrow_file(fd).sync_all()?),
        }
    }

    /// Ends a session: closes the real descriptor, nothing to do for the virtual file.
    pub fn release(&self, path: &OsStr, fh: Descriptor) -> FsResult<()> {
        debug!("release: path={path:?} fh={fh:?}");
        match fh {
            Descriptor::Virtual => Ok(()),
            Descriptor::Real(fd) => handle::close(fd),
        }
    }

    pub fn fsync(&self, path: &OsStr, datasync: bool, fh: Descriptor) -> FsResult<()> {
        debug!("fsync: path={path:?} datasync={datasync} fh={fh:?}");
        match fh {
            Descriptor::Virtual => Ok(()),
            Descriptor::Real(fd) if datasync => Ok(borrow_file(fd).sync_data()?),
            Descriptor::Real(fd) => Ok(borrow_file(fd).sync_all()?),
        }
    }
}

/// Translates open(2) flags: the access mode selects read/write, the remaining bits
/// are passed through untouched.
fn open_options(flags: i32) -> OpenOptions {
    let mut opts = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => opts.write(true),
        libc::O_RDWR => opts.read(true).write(true),
        _ => opts.read(true),
    };
    opts.custom_flags(flags & !libc::O_ACCMODE);
    opts
}

fn timespec(time: Option<FileTime>) -> TimeSpec {
    match time {
        Some(t) => TimeSpec::new(t.sec as libc::time_t, t.nsec as libc::c_long),
        None => TimeSpec::new(0, libc::UTIME_OMIT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    fn setup() -> (tempfile::TempDir, PassthroughFs) {
        let dir = tempfile::tempdir().unwrap();
        let fs = PassthroughFs::new(dir.path());
        (dir, fs)
    }

    fn p(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    #[test]
    fn virtual_open_ignores_flags_and_disk() {
        let (dir, fs) = setup();
        for flags in [libc::O_RDONLY, libc::O_RDWR | libc::O_TRUNC, libc::O_WRONLY | libc::O_CREAT] {
            assert_eq!(fs.open(p("/nothing.txt"), flags).unwrap(), Descriptor::Virtual);
        }
        assert!(!dir.path().join("nothing.txt").exists());
    }

    #[test]
    fn virtual_read_write_lifecycle() {
        let (_dir, fs) = setup();
        let fh = fs.open(p("/nothing.txt"), libc::O_RDONLY).unwrap();
        let content = fs.virtual_file().content().clone();

        assert_eq!(fs.read(p("/nothing.txt"), 100, 0, fh).unwrap(), content);
        assert_eq!(fs.read(p("/nothing.txt"), 3, 3, fh).unwrap(), content.slice(3..6));
        assert!(fs.read(p("/nothing.txt"), 10, 1000, fh).unwrap().is_empty());

        let err = fs.write(p("/nothing.txt"), b"x", 0, fh).unwrap_err();
        assert_eq!(err.errno(), libc::EACCES);
        let err = fs.truncate(p("/nothing.txt"), 0, None).unwrap_err();
        assert!(matches!(err, FsError::InvalidOperation(_)));
        assert!(fs.truncate(p("/nothing.txt"), 0, Some(fh)).is_err());

        fs.flush(p("/nothing.txt"), fh).unwrap();
        fs.fsync(p("/nothing.txt"), true, fh).unwrap();
        fs.release(p("/nothing.txt"), fh).unwrap();
    }

    #[test]
    fn real_file_lifecycle() {
        let (dir, fs) = setup();
        let fh = fs.create(p("/f.txt"), 0o644).unwrap();
        assert!(!fh.is_virtual());
        assert_eq!(fs.write(p("/f.txt"), b"hello world", 0, fh).unwrap(), 11);
        assert_eq!(fs.write(p("/f.txt"), b"W", 6, fh).unwrap(), 1);
        fs.flush(p("/f.txt"), fh).unwrap();
        fs.fsync(p("/f.txt"), false, fh).unwrap();
        fs.release(p("/f.txt"), fh).unwrap();
        assert_eq!(fs::read(dir.path().join("f.txt")).unwrap(), b"hello World");

        let fh = fs.open(p("/f.txt"), libc::O_RDONLY).unwrap();
        assert_eq!(fs.read(p("/f.txt"), 5, 6, fh).unwrap().as_ref(), b"World");
        assert_eq!(fs.read(p("/f.txt"), 100, 9, fh).unwrap().as_ref(), b"ld");
        assert!(fs.read(p("/f.txt"), 100, 50, fh).unwrap().is_empty());
        fs.release(p("/f.txt"), fh).unwrap();

        fs.truncate(p("/f.txt"), 5, None).unwrap();
        assert_eq!(fs.getattr(p("/f.txt")).unwrap().size, 5);

        let fh = fs.open(p("/f.txt"), libc::O_RDWR).unwrap();
        fs.truncate(p("/f.txt"), 2, Some(fh)).unwrap();
        fs.release(p("/f.txt"), fh).unwrap();
        assert_eq!(fs::read(dir.path().join("f.txt")).unwrap(), b"he");
    }

    #[test]
    fn open_passes_flags_through() {
        let (dir, fs) = setup();
        fs::write(dir.path().join("t"), b"data").unwrap();
        let fh = fs.open(p("/t"), libc::O_WRONLY | libc::O_TRUNC).unwrap();
        fs.release(p("/t"), fh).unwrap();
        assert_eq!(fs::metadata(dir.path().join("t")).unwrap().len(), 0);

        let err = fs.open(p("/missing"), libc::O_RDONLY).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn real_file_under_virtual_name() {
        let (dir, fs) = setup();
        let fh = fs.create(p("/nothing.txt"), 0o644).unwrap();
        fs.write(p("/nothing.txt"), b"real", 0, fh).unwrap();
        fs.release(p("/nothing.txt"), fh).unwrap();
        assert_eq!(fs::read(dir.path().join("nothing.txt")).unwrap(), b"real");

        // The virtual entry still wins for path-based operations.
        let attr = fs.getattr(p("/nothing.txt")).unwrap();
        assert_eq!(attr, fs.virtual_file().attributes());
        let fh = fs.open(p("/nothing.txt"), libc::O_RDONLY).unwrap();
        assert_eq!(fs.read(p("/nothing.txt"), 100, 0, fh).unwrap(), fs.virtual_file().content());
    }

    #[test]
    fn namespace_operations() {
        let (dir, fs) = setup();
        fs.mkdir(p("/d"), 0o755).unwrap();
        assert!(fs.getattr(p("/d")).unwrap().is_dir());
        assert_eq!(fs.mkdir(p("/d"), 0o755).unwrap_err().errno(), libc::EEXIST);

        fs::write(dir.path().join("d/x"), b"1").unwrap();
        assert_eq!(fs.rmdir(p("/d")).unwrap_err().errno(), libc::ENOTEMPTY);

        fs.rename(p("/d/x"), p("/y")).unwrap();
        assert!(dir.path().join("y").exists());
        fs.rmdir(p("/d")).unwrap();

        fs.link(p("/y"), p("/z")).unwrap();
        assert_eq!(fs.getattr(p("/y")).unwrap().nlink, 2);
        fs.unlink(p("/z")).unwrap();
        assert_eq!(fs.getattr(p("/y")).unwrap().nlink, 1);

        fs.chmod(p("/y"), 0o600).unwrap();
        assert_eq!(fs.getattr(p("/y")).unwrap().permissions(), 0o600);
        fs.access(p("/y"), libc::R_OK).unwrap();

        let uid = fs.getattr(p("/y")).unwrap().uid;
        fs.chown(p("/y"), Some(uid), None).unwrap();

        fs.utimens(p("/y"), Some(FileTime::new(1_000, 5)), None).unwrap();
        let md = fs::metadata(dir.path().join("y")).unwrap();
        assert_eq!((md.atime(), md.atime_nsec()), (1_000, 5));
        fs.utimens(p("/y"), None, Some(FileTime::new(2_000, 0))).unwrap();
        let md = fs::metadata(dir.path().join("y")).unwrap();
        assert_eq!(md.atime(), 1_000);
        assert_eq!(md.mtime(), 2_000);
    }

    #[test]
    fn mknod_creates_fifo() {
        let (_dir, fs) = setup();
        fs.mknod(p("/fifo"), libc::S_IFIFO | 0o644, 0).unwrap();
        let attr = fs.getattr(p("/fifo")).unwrap();
        assert_eq!(attr.file_type(), libc::S_IFIFO);
    }

    #[test]
    fn symlinks_round_trip() {
        let (dir, fs) = setup();
        fs.symlink(p("/rel"), p("some/target")).unwrap();
        assert_eq!(fs.readlink(p("/rel")).unwrap(), PathBuf::from("some/target"));

        let inside = dir.path().join("a/b");
        fs.symlink(p("/abs"), inside.as_os_str()).unwrap();
        assert_eq!(fs.readlink(p("/abs")).unwrap(), PathBuf::from("a/b"));

        assert_eq!(fs.readlink(p("/missing")).unwrap_err().errno(), libc::ENOENT);
    }

    #[test]
    fn virtual_path_is_not_intercepted_by_namespace_ops() {
        let (_dir, fs) = setup();
        assert_eq!(fs.unlink(p("/nothing.txt")).unwrap_err().errno(), libc::ENOENT);
        assert_eq!(
            fs.rename(p("/nothing.txt"), p("/other")).unwrap_err().errno(),
            libc::ENOENT
        );
        assert_eq!(fs.chmod(p("/nothing.txt"), 0o777).unwrap_err().errno(), libc::ENOENT);
        assert_eq!(fs.access(p("/nothing.txt"), libc::F_OK).unwrap_err().errno(), libc::ENOENT);
        assert!(fs.getattr(p("/nothing.txt")).is_ok());
    }

    #[test]
    fn statfs_reports_backing_fs() {
        let (_dir, fs) = setup();
        let st = fs.statfs(p("/")).unwrap();
        assert!(st.bsize > 0);
        assert!(st.namelen > 0);
    }
}
