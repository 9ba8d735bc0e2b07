//! A passthrough FUSE filesystem that mirrors a backing directory and adds one
//! read-only virtual file to its root.

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod fuse;
pub mod passthrough;
pub mod util;

pub use config::MountConfig;
pub use error::{ConfigError, FsError, FsResult};
pub use fuse::FuseAdapter;
pub use fuse::mount::mount_filesystem;
pub use passthrough::{PassthroughFs, VirtualFile};
