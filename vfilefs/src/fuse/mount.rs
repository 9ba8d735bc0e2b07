//! Mount helpers for starting the FUSE session.
//!
//! Only supported on Linux. Unprivileged mounts go through fusermount3, which must be
//! in PATH.

use rfuse3::MountOptions;
use rfuse3::raw::MountHandle;

use super::FuseAdapter;
use crate::config::MountConfig;

pub const FS_NAME: &str = "vfilefs";

/// Mount options for `config`, owned by the mounting user.
pub fn mount_options(config: &MountConfig) -> MountOptions {
    let uid = nix::unistd::getuid().as_raw();
    let gid = nix::unistd::getgid().as_raw();

    let mut mo = MountOptions::default();
    mo.fs_name(FS_NAME)
        .force_readdir_plus(true)
        .uid(uid)
        .gid(gid)
        .allow_other(config.allow_other)
        .read_only(config.read_only);
    mo
}

/// Mounts `fs` on `config.mountpoint` and returns once the session is running.
#[cfg(target_os = "linux")]
pub async fn mount_filesystem(
    fs: FuseAdapter,
    config: &MountConfig,
) -> std::io::Result<MountHandle> {
    let session = rfuse3::raw::Session::new(mount_options(config));
    info!(
        "mounting {:?} on {:?} ({})",
        config.source,
        config.mountpoint,
        if config.privileged { "privileged" } else { "unprivileged" }
    );
    if config.privileged {
        session.mount(fs, &config.mountpoint).await
    } else {
        session.mount_with_unprivileged(fs, &config.mountpoint).await
    }
}

/// Fallback stub for non-Linux targets.
#[cfg(not(target_os = "linux"))]
pub async fn mount_filesystem(
    _fs: FuseAdapter,
    _config: &MountConfig,
) -> std::io::Result<MountHandle> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
