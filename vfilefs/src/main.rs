// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Mounts a passthrough view of SOURCE on MOUNTPOINT with the virtual file added to
// its root. Runs until the filesystem is unmounted or Ctrl-C is pressed.

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use vfilefs::{FuseAdapter, MountConfig, PassthroughFs, mount_filesystem};

#[derive(Parser, Debug)]
#[command(author, version, about = "Passthrough FUSE filesystem with one virtual file")]
struct Args {
    /// Source directory to expose
    source: String,
    /// Path to mount point
    mountpoint: String,
    /// Mount through the kernel directly instead of fusermount3
    #[arg(long)]
    privileged: bool,
    /// Let other users access the mount
    #[arg(long)]
    allow_other: bool,
    /// Mount read-only
    #[arg(long)]
    read_only: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = MountConfig::new(&args.source, &args.mountpoint);
    config.privileged = args.privileged;
    config.allow_other = args.allow_other;
    config.read_only = args.read_only;
    let config = config.validate().context("invalid mount configuration")?;

    let fs = FuseAdapter::new(PassthroughFs::new(&config.source));
    let mut mount_handle = mount_filesystem(fs, &config)
        .await
        .with_context(|| format!("mounting on {}", config.mountpoint.display()))?;

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => res.context("fuse session")?,
        _ = signal::ctrl_c() => {
            log::info!("interrupted, unmounting {}", config.mountpoint.display());
            mount_handle.unmount().await.context("unmount")?;
        }
    }
    Ok(())
}
