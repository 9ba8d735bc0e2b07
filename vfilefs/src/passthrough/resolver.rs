use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use super::virtual_file::VirtualFile;

/// What an exposed path refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The injected virtual file.
    Virtual,
    /// An object of the backing tree, at the resolved path. It may not exist.
    Real(PathBuf),
}

/// Maps paths of the exposed namespace onto the backing directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Backing root plus `path` with one leading separator removed.
    ///
    /// Pure byte composition: nothing is checked on disk, and a path such as `//etc`
    /// stays below the root instead of replacing it.
    pub fn resolve(&self, path: &OsStr) -> PathBuf {
        let rel = path.as_bytes();
        let rel = rel.strip_prefix(b"/").unwrap_or(rel);
        if rel.is_empty() {
            return self.root.clone();
        }
        let mut out = self.root.as_os_str().as_bytes().to_vec();
        if !out.ends_with(b"/") {
            out.push(b'/');
        }
        out.extend_from_slice(rel);
        PathBuf::from(OsString::from_vec(out))
    }

    /// Classifies `path` once: the virtual file, or a real backing path.
    pub fn target(&self, path: &OsStr, vfile: &VirtualFile) -> Target {
        if vfile.is_virtual_path(path) {
            Target::Virtual
        } else {
            Target::Real(self.resolve(path))
        }
    }

    /// Rewrites an absolute symlink target that points inside the backing root as a
    /// path relative to the root. Other targets are returned untouched.
    pub fn sanitize_link(&self, target: PathBuf) -> PathBuf {
        if !target.is_absolute() {
            return target;
        }
        match target.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
            Ok(rel) => rel.to_path_buf(),
            Err(_) => relative_to(&target, &self.root),
        }
    }
}

/// Lexical relative path from `base` to `target`, both absolute.
fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<_> = target.components().collect();
    let base: Vec<_> = base.components().collect();
    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for c in &target[common..] {
        out.push(c.as_os_str());
    }
    out
}
