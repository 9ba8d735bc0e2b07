//! rfuse3 adapter.
//!
//! Translates the inode-based raw FUSE requests into calls on the path-based
//! [`PassthroughFs`]. Inode numbers are allocated per exposed path by [`InodeTable`];
//! file handles carry the encoded [`Descriptor`] of each open session.

pub mod inode;
pub mod mount;

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::os::unix::ffi::OsStrExt;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs,
    ReplyWrite,
};
use rfuse3::{FileType, Inode, Result as FuseResult, SetAttr, Timestamp};

use crate::error::FsError;
use crate::passthrough::{Attributes, Descriptor, EntryKind, FileTime, PassthroughFs};
use crate::util::open_options::OpenReplyFlags;
use inode::{InodeTable, join, parent};

const TTL: Duration = Duration::from_secs(1);
const MAX_WRITE: u32 = 1024 * 1024;
/// `d_ino` of listed names the kernel has not looked up.
const UNKNOWN_INO: Inode = 0xffff_ffff;

/// Raw FUSE front end of a [`PassthroughFs`].
#[derive(Debug)]
pub struct FuseAdapter {
    fs: PassthroughFs,
    inodes: InodeTable,
}

impl FuseAdapter {
    pub fn new(fs: PassthroughFs) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
        }
    }

    pub fn passthrough(&self) -> &PassthroughFs {
        &self.fs
    }

    fn path_of(&self, ino: Inode) -> FuseResult<OsString> {
        self.inodes.path_of(ino).ok_or_else(|| {
            debug!("unknown inode {ino}");
            libc::ENOENT.into()
        })
    }

    /// Path used for logging by handle-based calls. The inode may already be gone
    /// (unlinked while open); the descriptor alone decides the dispatch.
    fn handle_path(&self, ino: Inode) -> OsString {
        self.inodes.path_of(ino).unwrap_or_default()
    }

    fn entry(&self, path: &OsStr) -> FuseResult<ReplyEntry> {
        let attr = self.fs.getattr(path)?;
        let ino = self.inodes.lookup(path);
        Ok(ReplyEntry {
            ttl: TTL,
            attr: to_fuse_attr(ino, &attr),
            generation: 0,
        })
    }

    fn attr(&self, ino: Inode, path: &OsStr) -> FuseResult<ReplyAttr> {
        let attr = self.fs.getattr(path)?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(ino, &attr),
        })
    }

    /// Inode reported for a listed path without handing it to the kernel.
    fn listed_inode(&self, path: &OsStr) -> Inode {
        self.inodes.peek(path).unwrap_or(UNKNOWN_INO)
    }
}

impl Filesystem for FuseAdapter {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        info!(
            "init: mirroring {:?} with virtual file {:?}",
            self.fs.root(),
            self.fs.virtual_file().exposed_path()
        );
        let max_write = NonZeroU32::new(MAX_WRITE).unwrap_or(NonZeroU32::MIN);
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        info!("destroy: {} inodes known", self.inodes.len());
    }

    async fn lookup(&self, _req: Request, parent: Inode, name: &OsStr) -> FuseResult<ReplyEntry> {
        let path = join(&self.path_of(parent)?, name);
        self.entry(&path)
    }

    async fn forget(&self, _req: Request, inode: Inode, nlookup: u64) {
        self.inodes.forget(inode, nlookup);
    }

    async fn batch_forget(&self, _req: Request, inodes: &[(Inode, u64)]) {
        for &(inode, nlookup) in inodes {
            self.inodes.forget(inode, nlookup);
        }
    }

    async fn getattr(
        &self,
        _req: Request,
        inode: Inode,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(inode)?;
        self.attr(inode, &path)
    }

    // chmod, chown, truncate and utimens all arrive here.
    async fn setattr(
        &self,
        _req: Request,
        inode: Inode,
        fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(inode)?;
        if let Some(mode) = set_attr.mode {
            self.fs.chmod(&path, mode & 0o7777)?;
        }
        if set_attr.uid.is_some() || set_attr.gid.is_some() {
            self.fs.chown(&path, set_attr.uid, set_attr.gid)?;
        }
        if let Some(size) = set_attr.size {
            let fh = fh.map(Descriptor::from_fh).transpose()?;
            self.fs.truncate(&path, size, fh)?;
        }
        if set_attr.atime.is_some() || set_attr.mtime.is_some() {
            self.fs.utimens(
                &path,
                set_attr.atime.map(file_time),
                set_attr.mtime.map(file_time),
            )?;
        }
        self.attr(inode, &path)
    }

    async fn readlink(&self, _req: Request, inode: Inode) -> FuseResult<ReplyData> {
        let path = self.path_of(inode)?;
        let target = self.fs.readlink(&path)?;
        Ok(ReplyData {
            data: Bytes::copy_from_slice(target.as_os_str().as_bytes()),
        })
    }

    async fn symlink(
        &self,
        _req: Request,
        parent: Inode,
        name: &OsStr,
        link: &OsStr,
    ) -> FuseResult<ReplyEntry> {
        let path = join(&self.path_of(parent)?, name);
        self.fs.symlink(&path, link)?;
        self.entry(&path)
    }

    async fn mknod(
        &self,
        _req: Request,
        parent: Inode,
        name: &OsStr,
        mode: u32,
        rdev: u32,
    ) -> FuseResult<ReplyEntry> {
        let path = join(&self.path_of(parent)?, name);
        self.fs.mknod(&path, mode, u64::from(rdev))?;
        self.entry(&path)
    }

    async fn mkdir(
        &self,
        _req: Request,
        parent: Inode,
        name: &OsStr,
        mode: u32,
        umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let path = join(&self.path_of(parent)?, name);
        self.fs.mkdir(&path, mode & !umask)?;
        self.entry(&path)
    }

    async fn unlink(&self, _req: Request, parent: Inode, name: &OsStr) -> FuseResult<()> {
        let path = join(&self.path_of(parent)?, name);
        self.fs.unlink(&path)?;
        self.inodes.remove(&path);
        Ok(())
    }

    async fn rmdir(&self, _req: Request, parent: Inode, name: &OsStr) -> FuseResult<()> {
        let path = join(&self.path_of(parent)?, name);
        self.fs.rmdir(&path)?;
        self.inodes.remove(&path);
        Ok(())
    }

    async fn rename(
        &self,
        _req: Request,
        parent: Inode,
        name: &OsStr,
        new_parent: Inode,
        new_name: &OsStr,
    ) -> FuseResult<()> {
        let from = join(&self.path_of(parent)?, name);
        let to = join(&self.path_of(new_parent)?, new_name);
        self.fs.rename(&from, &to)?;
        self.inodes.rename(&from, &to);
        Ok(())
    }

    async fn link(
        &self,
        _req: Request,
        inode: Inode,
        new_parent: Inode,
        new_name: &OsStr,
    ) -> FuseResult<ReplyEntry> {
        let existing = self.path_of(inode)?;
        let path = join(&self.path_of(new_parent)?, new_name);
        self.fs.link(&existing, &path)?;
        self.entry(&path)
    }

    async fn open(&self, _req: Request, inode: Inode, flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(inode)?;
        let fh = self.fs.open(&path, flags as i32)?;
        Ok(ReplyOpen {
            fh: fh.as_fh(),
            flags: OpenReplyFlags::for_descriptor(fh).bits(),
        })
    }

    async fn read(
        &self,
        _req: Request,
        inode: Inode,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let path = self.handle_path(inode);
        let data = self.fs.read(&path, size, offset, Descriptor::from_fh(fh)?)?;
        Ok(ReplyData { data })
    }

    async fn write(
        &self,
        _req: Request,
        inode: Inode,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let path = self.handle_path(inode);
        let written = self.fs.write(&path, data, offset, Descriptor::from_fh(fh)?)?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn statfs(&self, _req: Request, inode: Inode) -> FuseResult<ReplyStatFs> {
        let path = self.path_of(inode)?;
        let st = self.fs.statfs(&path)?;
        Ok(ReplyStatFs {
            blocks: st.blocks,
            bfree: st.bfree,
            bavail: st.bavail,
            files: st.files,
            ffree: st.ffree,
            bsize: st.bsize as u32,
            namelen: st.namelen as u32,
            frsize: st.frsize as u32,
        })
    }

    async fn release(
        &self,
        _req: Request,
        inode: Inode,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        let path = self.handle_path(inode);
        self.fs.release(&path, Descriptor::from_fh(fh)?)?;
        Ok(())
    }

    async fn fsync(&self, _req: Request, inode: Inode, fh: u64, datasync: bool) -> FuseResult<()> {
        let path = self.handle_path(inode);
        self.fs.fsync(&path, datasync, Descriptor::from_fh(fh)?)?;
        Ok(())
    }

    async fn flush(
        &self,
        _req: Request,
        inode: Inode,
        fh: u64,
        _lock_owner: u64,
    ) -> FuseResult<()> {
        let path = self.handle_path(inode);
        self.fs.flush(&path, Descriptor::from_fh(fh)?)?;
        Ok(())
    }

    async fn access(&self, _req: Request, inode: Inode, mask: u32) -> FuseResult<()> {
        let path = self.path_of(inode)?;
        self.fs.access(&path, mask as i32)?;
        Ok(())
    }

    async fn create(
        &self,
        _req: Request,
        parent: Inode,
        name: &OsStr,
        mode: u32,
        _flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let path = join(&self.path_of(parent)?, name);
        let fh = self.fs.create(&path, mode)?;
        let attr = match self.fs.getattr(&path) {
            Ok(attr) => attr,
            Err(e) => {
                if let Err(close_err) = self.fs.release(&path, fh) {
                    warn!("create: closing {path:?} after failed stat: {close_err}");
                }
                return Err(e.into());
            }
        };
        let ino = self.inodes.lookup(&path);
        Ok(ReplyCreated {
            ttl: TTL,
            attr: to_fuse_attr(ino, &attr),
            generation: 0,
            fh: fh.as_fh(),
            flags: OpenReplyFlags::for_descriptor(fh).bits(),
        })
    }

    // Directories need no handle: each readdir lists the path afresh.
    async fn opendir(&self, _req: Request, inode: Inode, _flags: u32) -> FuseResult<ReplyOpen> {
        self.path_of(inode)?;
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: Inode,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    // Offsets are 1-based positions in the merged listing; `offset` is the position of
    // the last entry the kernel already has. Plain listings never allocate inodes.
    async fn readdir<'a>(
        &'a self,
        _req: Request,
        parent: Inode,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let dir = self.path_of(parent)?;
        let listing = self.fs.readdir(&dir)?;
        let skip = usize::try_from(offset).unwrap_or(0);
        let entries = listing
            .enumerate()
            .skip(skip)
            .map(move |(i, entry)| -> FuseResult<DirectoryEntry> {
                let entry = entry?;
                let path = child_path(&dir, &entry.name);
                Ok(DirectoryEntry {
                    inode: self.listed_inode(&path),
                    kind: fuse_kind(entry.kind),
                    name: entry.name,
                    offset: i as i64 + 1,
                })
            });
        Ok(ReplyDirectory {
            entries: Box::pin(stream::iter(entries)),
        })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        parent: Inode,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let dir = self.path_of(parent)?;
        let listing = self.fs.readdir(&dir)?;
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let entries = listing
            .enumerate()
            .skip(skip)
            .map(move |(i, entry)| -> FuseResult<DirectoryEntryPlus> {
                let entry = entry?;
                let offset = i as i64 + 1;
                let path = child_path(&dir, &entry.name);
                let attr = match self.fs.getattr(&path) {
                    Ok(attr) => attr,
                    // Listed but not resolvable (the virtual name outside the root, or
                    // an entry removed since the listing): no inode, as in readdir.
                    Err(FsError::NotFound(_)) => {
                        return Ok(DirectoryEntryPlus {
                            inode: 0,
                            generation: 0,
                            kind: fuse_kind(entry.kind),
                            attr: unresolved_attr(entry.kind),
                            name: entry.name,
                            offset,
                            entry_ttl: Duration::ZERO,
                            attr_ttl: Duration::ZERO,
                        });
                    }
                    Err(e) => return Err(e.into()),
                };
                // The kernel takes a reference on every entry except `.` and `..`.
                let inode = if is_dot(&entry.name) {
                    self.listed_inode(&path)
                } else {
                    self.inodes.lookup(&path)
                };
                Ok(DirectoryEntryPlus {
                    inode,
                    generation: 0,
                    kind: fuse_kind(entry.kind),
                    name: entry.name,
                    offset,
                    attr: to_fuse_attr(inode, &attr),
                    entry_ttl: TTL,
                    attr_ttl: TTL,
                })
            });
        Ok(ReplyDirectoryPlus {
            entries: Box::pin(stream::iter(entries)),
        })
    }
}

// =============== helpers ===============
fn is_dot(name: &OsStr) -> bool {
    matches!(name.as_bytes(), b"." | b"..")
}

/// Exposed path of the listing entry `name` of directory `dir`.
fn child_path(dir: &OsStr, name: &OsStr) -> OsString {
    match name.as_bytes() {
        b"." => dir.to_owned(),
        b".." => parent(dir),
        _ => join(dir, name),
    }
}

/// Kernel `dev_t` encoding: 12-bit major, 20-bit minor. Host numbers are split the
/// way glibc's `makedev` packs them.
fn encode_rdev(dev: u64) -> u32 {
    let major = ((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff);
    let minor = (dev & 0xff) | ((dev >> 12) & !0xff);
    if major > 0xfff || minor > 0xf_ffff {
        warn!("device {major}:{minor} does not fit the kernel encoding");
    }
    ((minor & 0xff) | ((major & 0xfff) << 8) | ((minor & 0xfff00) << 12)) as u32
}
fn fuse_kind(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::RegularFile => FileType::RegularFile,
        EntryKind::Symlink => FileType::Symlink,
        EntryKind::NamedPipe => FileType::NamedPipe,
        EntryKind::CharDevice => FileType::CharDevice,
        EntryKind::BlockDevice => FileType::BlockDevice,
        EntryKind::Socket => FileType::Socket,
    }
}

fn timestamp(t: FileTime) -> Timestamp {
    Timestamp::new(t.sec, t.nsec)
}

fn file_time(t: Timestamp) -> FileTime {
    FileTime::new(t.sec, t.nsec)
}

fn to_fuse_attr(ino: Inode, a: &Attributes) -> FileAttr {
    FileAttr {
        ino,
        size: a.size,
        blocks: a.blocks,
        atime: timestamp(a.atime),
        mtime: timestamp(a.mtime),
        ctime: timestamp(a.ctime),
        #[cfg(target_os = "macos")]
        crtime: timestamp(a.ctime),
        kind: fuse_kind(EntryKind::from_mode(a.mode)),
        perm: a.permissions(),
        nlink: a.nlink as u32,
        uid: a.uid,
        gid: a.gid,
        rdev: encode_rdev(a.rdev),
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: a.blksize as u32,
    }
}

fn unresolved_attr(kind: EntryKind) -> FileAttr {
    FileAttr {
        ino: 0,
        size: 0,
        blocks: 0,
        atime: timestamp(FileTime::EPOCH),
        mtime: timestamp(FileTime::EPOCH),
        ctime: timestamp(FileTime::EPOCH),
        #[cfg(target_os = "macos")]
        crtime: timestamp(FileTime::EPOCH),
        kind: fuse_kind(kind),
        perm: 0,
        nlink: 0,
        uid: 0,
        gid: 0,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 0,
    }
}
