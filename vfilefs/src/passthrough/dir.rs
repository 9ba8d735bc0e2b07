use std::array;
use std::ffi::OsString;
use std::fs;
use std::path::Path;

use super::virtual_file::VirtualFile;
use crate::error::{FsError, FsResult};

/// Type of a directory entry, as reported by `d_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    RegularFile,
    Symlink,
    NamedPipe,
    CharDevice,
    BlockDevice,
    Socket,
}

impl From<fs::FileType> for EntryKind {
    fn from(ft: fs::FileType) -> Self {
        use std::os::unix::fs::FileTypeExt;

        if ft.is_dir() {
            EntryKind::Directory
        } else if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_fifo() {
            EntryKind::NamedPipe
        } else if ft.is_char_device() {
            EntryKind::CharDevice
        } else if ft.is_block_device() {
            EntryKind::BlockDevice
        } else if ft.is_socket() {
            EntryKind::Socket
        } else {
            EntryKind::RegularFile
        }
    }
}

impl EntryKind {
    /// Maps the `S_IFMT` bits of a mode.
    pub fn from_mode(mode: u32) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFDIR => EntryKind::Directory,
            libc::S_IFLNK => EntryKind::Symlink,
            libc::S_IFIFO => EntryKind::NamedPipe,
            libc::S_IFCHR => EntryKind::CharDevice,
            libc::S_IFBLK => EntryKind::BlockDevice,
            libc::S_IFSOCK => EntryKind::Socket,
            _ => EntryKind::RegularFile,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: EntryKind,
}

impl DirEntry {
    fn new(name: impl Into<OsString>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Merged, single-pass listing of a directory: `.`, `..`, the virtual file, then the
/// real children in whatever order the host returns them.
///
/// A real entry that shares the virtual file's name is yielded a second time; names
/// are not deduplicated.
#[derive(Debug)]
pub struct Listing {
    synthetic: array::IntoIter<DirEntry, 3>,
    real: Option<fs::ReadDir>,
}

impl Iterator for Listing {
    type Item = FsResult<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.synthetic.next() {
            return Some(Ok(entry));
        }
        let entry = self.real.as_mut()?.next()?;
        Some(
            entry
                .and_then(|e| Ok(DirEntry::new(e.file_name(), e.file_type()?.into())))
                .map_err(FsError::from),
        )
    }
}

/// Lists the directory resolved to `dir`. The real directory is only opened when it
/// exists; otherwise the listing holds just the three synthetic entries.
pub fn list(dir: &Path, vfile: &VirtualFile) -> FsResult<Listing> {
    let synthetic = [
        DirEntry::new(".", EntryKind::Directory),
        DirEntry::new("..", EntryKind::Directory),
        DirEntry::new(vfile.name(), EntryKind::RegularFile),
    ]
    .into_iter();
    let real = if dir.is_dir() {
        Some(fs::read_dir(dir)?)
    } else {
        None
    };
    Ok(Listing { synthetic, real })
}
