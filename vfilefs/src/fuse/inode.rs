//! Inode numbers for the raw FUSE protocol.
//!
//! The filesystem itself is path based; the kernel speaks inodes. This table hands out
//! a stable number per exposed path and translates back.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rfuse3::Inode;

pub const ROOT_INODE: Inode = 1;

#[derive(Debug)]
struct Node {
    path: OsString,
    /// Outstanding kernel references, released by FORGET.
    lookups: u64,
}

#[derive(Debug)]
struct Inner {
    nodes: HashMap<Inode, Node>,
    inodes: HashMap<OsString, Inode>,
    next: Inode,
}

impl Inner {
    fn drop_inode(&mut self, ino: Inode) {
        if let Some(node) = self.nodes.remove(&ino) {
            self.inodes.remove(&node.path);
        }
    }
}

#[derive(Debug)]
pub struct InodeTable {
    inner: Mutex<Inner>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let root = OsString::from("/");
        let node = Node {
            path: root.clone(),
            lookups: 1,
        };
        let inner = Inner {
            nodes: HashMap::from([(ROOT_INODE, node)]),
            inodes: HashMap::from([(root, ROOT_INODE)]),
            next: ROOT_INODE + 1,
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path_of(&self, ino: Inode) -> Option<OsString> {
        self.lock().nodes.get(&ino).map(|n| n.path.clone())
    }

    /// Inode of `path` if the kernel currently holds one; never allocates.
    pub fn peek(&self, path: &OsStr) -> Option<Inode> {
        self.lock().inodes.get(path).copied()
    }

    /// Hands the inode of `path` to the kernel, allocating one on first sight. Every
    /// call must be balanced by a later [`InodeTable::forget`].
    pub fn lookup(&self, path: &OsStr) -> Inode {
        let mut inner = self.lock();
        if let Some(&ino) = inner.inodes.get(path) {
            if let Some(node) = inner.nodes.get_mut(&ino) {
                node.lookups += 1;
            }
            return ino;
        }
        let ino = inner.next;
        inner.next += 1;
        inner.nodes.insert(
            ino,
            Node {
                path: path.to_owned(),
                lookups: 1,
            },
        );
        inner.inodes.insert(path.to_owned(), ino);
        ino
    }

    /// Drops `nlookup` kernel references to `ino`; the inode is released at zero.
    /// The root is never released.
    pub fn forget(&self, ino: Inode, nlookup: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let mut inner = self.lock();
        let released = match inner.nodes.get_mut(&ino) {
            Some(node) => {
                node.lookups = node.lookups.saturating_sub(nlookup);
                node.lookups == 0
            }
            None => false,
        };
        if released {
            inner.drop_inode(ino);
        }
    }

    /// Forgets `path` and everything below it.
    pub fn remove(&self, path: &OsStr) {
        let mut inner = self.lock();
        let gone: Vec<Inode> = inner
            .inodes
            .iter()
            .filter(|(p, ino)| is_within(p, path) && **ino != ROOT_INODE)
            .map(|(_, &ino)| ino)
            .collect();
        for ino in gone {
            inner.drop_inode(ino);
        }
    }

    /// Moves `from` and its subtree to `to`, keeping inode numbers. Whatever was known
    /// at `to` is forgotten, as rename replaces it.
    pub fn rename(&self, from: &OsStr, to: &OsStr) {
        self.remove(to);
        let mut inner = self.lock();
        let moved: Vec<(OsString, Inode)> = inner
            .inodes
            .iter()
            .filter(|(p, _)| is_within(p, from))
            .map(|(p, &ino)| (p.clone(), ino))
            .collect();
        for (old, ino) in moved {
            let mut new = to.as_bytes().to_vec();
            new.extend_from_slice(&old.as_bytes()[from.len()..]);
            let new = OsString::from_vec(new);
            inner.inodes.remove(&old);
            inner.inodes.insert(new.clone(), ino);
            if let Some(node) = inner.nodes.get_mut(&ino) {
                node.path = new;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `path` equals `base` or lies below it.
fn is_within(path: &OsStr, base: &OsStr) -> bool {
    let (path, base) = (path.as_bytes(), base.as_bytes());
    match path.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest[0] == b'/' || base == b"/",
        None => false,
    }
}

/// Exposed path of `name` inside the directory `parent`.
pub fn join(parent: &OsStr, name: &OsStr) -> OsString {
    let mut out = parent.to_owned();
    if !parent.as_bytes().ends_with(b"/") {
        out.push("/");
    }
    out.push(name);
    out
}

/// Exposed path of the directory containing `path`; the root is its own parent.
pub fn parent(path: &OsStr) -> OsString {
    let bytes = path.as_bytes();
    match bytes.iter().rposition(|&b| b == b'/') {
        Some(0) | None => OsString::from("/"),
        Some(i) => OsString::from_vec(bytes[..i].to_vec()),
    }
}
