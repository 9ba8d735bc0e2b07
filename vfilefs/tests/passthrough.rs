//! End-to-end behaviour of the passthrough core against a scratch backing tree.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::unix::fs::MetadataExt;

use vfilefs::passthrough::virtual_file::DEFAULT_CONTENT;
use vfilefs::passthrough::{Descriptor, EntryKind};
use vfilefs::{FsError, PassthroughFs, VirtualFile};

fn p(s: &str) -> &OsStr {
    OsStr::new(s)
}

fn names(fs: &PassthroughFs, dir: &str) -> Vec<OsString> {
    fs.readdir(p(dir))
        .expect("readdir")
        .map(|e| e.expect("entry").name)
        .collect()
}

#[test]
fn root_with_one_file() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("a.txt"), b"hi").unwrap();
    let fs = PassthroughFs::new(root.path());

    assert_eq!(names(&fs, "/"), [".", "..", "nothing.txt", "a.txt"]);

    let fh = fs.open(p("/nothing.txt"), libc::O_RDONLY).unwrap();
    assert_eq!(fh, Descriptor::Virtual);
    let data = fs.read(p("/nothing.txt"), 100, 0, fh).unwrap();
    assert_eq!(&data[..], DEFAULT_CONTENT.as_bytes());
    fs.release(p("/nothing.txt"), fh).unwrap();

    assert_eq!(fs.getattr(p("/a.txt")).unwrap().size, 2);
}

#[test]
fn empty_root_still_lists_virtual_file() {
    let root = tempfile::tempdir().unwrap();
    let fs = PassthroughFs::new(root.path());
    assert_eq!(names(&fs, "/"), [".", "..", "nothing.txt"]);

    let kinds: Vec<EntryKind> = fs.readdir(p("/")).unwrap().map(|e| e.unwrap().kind).collect();
    assert_eq!(
        kinds,
        [EntryKind::Directory, EntryKind::Directory, EntryKind::RegularFile]
    );
}

#[test]
fn virtual_reads_are_clamped() {
    let root = tempfile::tempdir().unwrap();
    let fs = PassthroughFs::new(root.path());
    let len = fs.virtual_file().len();
    let content = DEFAULT_CONTENT.as_bytes();

    let fh = fs.open(p("/nothing.txt"), libc::O_RDONLY).unwrap();
    assert_eq!(&fs.read(p("/nothing.txt"), 3, 3, fh).unwrap()[..], &content[3..6]);
    assert_eq!(
        &fs.read(p("/nothing.txt"), 100, len - 1, fh).unwrap()[..],
        &content[content.len() - 1..]
    );
    assert!(fs.read(p("/nothing.txt"), 100, len, fh).unwrap().is_empty());
    assert!(fs.read(p("/nothing.txt"), 10, len + 10, fh).unwrap().is_empty());

    let attr = fs.getattr(p("/nothing.txt")).unwrap();
    assert_eq!(attr.size, len);
    assert_eq!(attr.permissions(), 0o444);
}

#[test]
fn open_virtual_ignores_flags_and_backing_tree() {
    let root = tempfile::tempdir().unwrap();
    let fs = PassthroughFs::new(root.path());

    for flags in [libc::O_RDONLY, libc::O_WRONLY, libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC] {
        assert_eq!(fs.open(p("/nothing.txt"), flags).unwrap(), Descriptor::Virtual);
    }
    assert!(!root.path().join("nothing.txt").exists());
}

#[test]
fn real_attributes_match_lstat() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("f"), b"12345").unwrap();
    std::os::unix::fs::symlink("f", root.path().join("l")).unwrap();
    let fs = PassthroughFs::new(root.path());

    for name in ["f", "l"] {
        let md = fs::symlink_metadata(root.path().join(name)).unwrap();
        let attr = fs.getattr(OsStr::new(&format!("/{name}"))).unwrap();
        assert_eq!(attr.ino, md.ino());
        assert_eq!(attr.mode, md.mode());
        assert_eq!(attr.nlink, md.nlink());
        assert_eq!(attr.uid, md.uid());
        assert_eq!(attr.gid, md.gid());
        assert_eq!(attr.size, md.size());
        assert_eq!(attr.blocks, md.blocks());
        assert_eq!(attr.mtime.sec, md.mtime());
        assert_eq!(i64::from(attr.mtime.nsec), md.mtime_nsec());
    }
}

#[test]
fn unlink_virtual_without_real_file_is_not_found() {
    let root = tempfile::tempdir().unwrap();
    let fs = PassthroughFs::new(root.path());
    let err = fs.unlink(p("/nothing.txt")).unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
    assert_eq!(err.errno(), libc::ENOENT);
}

#[test]
fn shadowed_real_file_is_written_but_not_read() {
    let root = tempfile::tempdir().unwrap();
    let fs = PassthroughFs::new(root.path());

    let fh = fs.create(p("/nothing.txt"), 0o644).unwrap();
    assert!(!fh.is_virtual());
    assert_eq!(fs.write(p("/nothing.txt"), b"real", 0, fh).unwrap(), 4);
    fs.flush(p("/nothing.txt"), fh).unwrap();
    fs.release(p("/nothing.txt"), fh).unwrap();
    assert_eq!(fs::read(root.path().join("nothing.txt")).unwrap(), b"real");

    // The virtual entry wins for lookups; the listing carries both.
    assert_eq!(fs.getattr(p("/nothing.txt")).unwrap().permissions(), 0o444);
    let listed = names(&fs, "/");
    assert_eq!(listed.iter().filter(|n| *n == "nothing.txt").count(), 2);

    fs.unlink(p("/nothing.txt")).unwrap();
    assert!(!root.path().join("nothing.txt").exists());
}

#[test]
fn custom_virtual_file() {
    let root = tempfile::tempdir().unwrap();
    let vfile = VirtualFile::new("hello", "world\n").unwrap().with_owner(0, 0);
    let fs = PassthroughFs::with_virtual_file(root.path(), vfile);

    assert_eq!(names(&fs, "/"), [".", "..", "hello"]);
    let attr = fs.getattr(p("/hello")).unwrap();
    assert_eq!((attr.uid, attr.gid, attr.size), (0, 0, 6));
    assert!(matches!(fs.getattr(p("/nothing.txt")), Err(FsError::NotFound(_))));
    assert!(VirtualFile::new("a/b", "").is_err());
}

#[test]
fn namespace_operations_pass_through() {
    let root = tempfile::tempdir().unwrap();
    let fs = PassthroughFs::new(root.path());

    fs.mkdir(p("/d"), 0o755).unwrap();
    let fh = fs.create(p("/d/x"), 0o600).unwrap();
    fs.release(p("/d/x"), fh).unwrap();
    fs.rename(p("/d/x"), p("/d/y")).unwrap();
    fs.link(p("/d/y"), p("/d/z")).unwrap();
    assert_eq!(fs.getattr(p("/d/y")).unwrap().nlink, 2);
    fs.symlink(p("/d/s"), p("y")).unwrap();
    assert_eq!(fs.readlink(p("/d/s")).unwrap(), std::path::Path::new("y"));

    // Subdirectory listings carry the synthetic entries too.
    let listed = names(&fs, "/d");
    assert_eq!(listed[..3], [".", "..", "nothing.txt"]);
    assert_eq!(listed.len(), 6);

    for f in ["/d/y", "/d/z", "/d/s"] {
        fs.unlink(p(f)).unwrap();
    }
    fs.rmdir(p("/d")).unwrap();
    assert!(fs::read_dir(root.path()).unwrap().next().is_none());
}
