use std::fs;
use std::os::unix::fs::MetadataExt;

use super::resolver::Target;
use super::virtual_file::VirtualFile;
use crate::error::FsResult;

/// Seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileTime {
    pub sec: i64,
    pub nsec: u32,
}

impl FileTime {
    pub const EPOCH: FileTime = FileTime { sec: 0, nsec: 0 };

    pub fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }
}

/// Metadata of an entry in the exposed namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    /// Inode number on the backing filesystem, 0 for the virtual file.
    pub ino: u64,
    /// File type and permission bits, as in `st_mode`.
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: FileTime,
    pub mtime: FileTime,
    pub ctime: FileTime,
}

impl Attributes {
    pub fn from_metadata(md: &fs::Metadata) -> Self {
        Self {
            ino: md.ino(),
            mode: md.mode(),
            nlink: md.nlink(),
            uid: md.uid(),
            gid: md.gid(),
            rdev: md.rdev(),
            size: md.size(),
            blksize: md.blksize(),
            blocks: md.blocks(),
            atime: timestamp(md.atime(), md.atime_nsec()),
            mtime: timestamp(md.mtime(), md.mtime_nsec()),
            ctime: timestamp(md.ctime(), md.ctime_nsec()),
        }
    }

    pub fn file_type(&self) -> u32 {
        self.mode & libc::S_IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR
    }

    pub fn permissions(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }
}

fn timestamp(sec: i64, nsec: i64) -> FileTime {
    FileTime::new(sec, nsec.clamp(0, 999_999_999) as u32)
}

/// Metadata for `target`: synthetic for the virtual file, `lstat` for real paths.
pub fn attributes(target: &Target, vfile: &VirtualFile) -> FsResult<Attributes> {
    match target {
        Target::Virtual => Ok(vfile.attributes()),
        Target::Real(path) => {
            let md = fs::symlink_metadata(path)?;
            Ok(Attributes::from_metadata(&md))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn real_attributes_match_lstat() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"hi").unwrap();

        let attr = attributes(&Target::Real(file.clone()), &VirtualFile::default()).unwrap();
        let md = fs::symlink_metadata(&file).unwrap();
        assert_eq!(attr.size, 2);
        assert_eq!(attr.ino, md.ino());
        assert_eq!(attr.mode, md.mode());
        assert_eq!(attr.nlink, md.nlink());
        assert_eq!(attr.uid, md.uid());
        assert_eq!(attr.gid, md.gid());
        assert_eq!(attr.mtime, FileTime::new(md.mtime(), md.mtime_nsec() as u32));
        assert_eq!(attr.atime.sec, md.atime());
        assert_eq!(attr.ctime.sec, md.ctime());
        assert!(!attr.is_dir());
    }

    #[test]
    fn symlinks_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("l");
        std::os::unix::fs::symlink("missing", &link).unwrap();

        let attr = attributes(&Target::Real(link), &VirtualFile::default()).unwrap();
        assert_eq!(attr.file_type(), libc::S_IFLNK);
        assert_eq!(attr.size, "missing".len() as u64);
    }

    #[test]
    fn missing_real_path_is_enoent() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::Real(dir.path().join("nope"));
        let err = attributes(&target, &VirtualFile::default()).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn virtual_target_never_touches_disk() {
        let vf = VirtualFile::default();
        let attr = attributes(&Target::Virtual, &vf).unwrap();
        assert_eq!(attr, vf.attributes());
        assert_eq!(attr.size, vf.len());

        let root = Target::Real(PathBuf::from("/"));
        assert!(attributes(&root, &vf).unwrap().is_dir());
    }
}
