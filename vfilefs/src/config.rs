use std::fs;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Mount-time configuration: which directory to mirror, where to mount it and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Backing directory mirrored by the filesystem.
    pub source: PathBuf,
    /// Empty directory the filesystem is mounted on.
    pub mountpoint: PathBuf,
    /// Mount through the kernel directly instead of `fusermount3`.
    pub privileged: bool,
    pub allow_other: bool,
    pub read_only: bool,
}

impl MountConfig {
    pub fn new(source: impl Into<PathBuf>, mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            mountpoint: mountpoint.into(),
            privileged: false,
            allow_other: false,
            read_only: false,
        }
    }

    /// Checks that both directories exist and makes the backing root absolute.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let source = fs::canonicalize(&self.source).map_err(|source| ConfigError::Source {
            path: self.source.clone(),
            source,
        })?;
        if !source.is_dir() {
            return Err(ConfigError::SourceNotDir(source));
        }
        let md = fs::metadata(&self.mountpoint).map_err(|source| ConfigError::MountPoint {
            path: self.mountpoint.clone(),
            source,
        })?;
        if !md.is_dir() {
            return Err(ConfigError::MountPointNotDir(self.mountpoint));
        }
        self.source = source;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_canonicalizes_source() {
        let src = tempfile::tempdir().unwrap();
        let mnt = tempfile::tempdir().unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();

        let cfg = MountConfig::new(src.path().join("sub/../sub"), mnt.path())
            .validate()
            .unwrap();
        assert_eq!(cfg.source, fs::canonicalize(src.path().join("sub")).unwrap());
        assert!(cfg.source.is_absolute());
        assert!(!cfg.privileged);
    }

    #[test]
    fn validate_rejects_bad_directories() {
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("file");
        fs::write(&file, b"").unwrap();

        let err = MountConfig::new(src.path().join("missing"), src.path())
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Source { .. }));

        let err = MountConfig::new(&file, src.path()).validate().unwrap_err();
        assert!(matches!(err, ConfigError::SourceNotDir(_)));

        let err = MountConfig::new(src.path(), &file).validate().unwrap_err();
        assert!(matches!(err, ConfigError::MountPointNotDir(_)));
    }
}
