use bitflags::bitflags;

use crate::passthrough::Descriptor;

// FOPEN_* flags of the OPEN/CREATE reply.
/// Bypass page cache for this open file.
const FOPEN_DIRECT_IO: u32 = 1;

/// Don't invalidate the data cache on open.
const FOPEN_KEEP_CACHE: u32 = 2;

/// The file is not seekable.
const FOPEN_NONSEEKABLE: u32 = 4;

bitflags! {
    /// Options returned to the kernel in response to an open or create request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenReplyFlags: u32 {
        /// Bypass page cache for this open file.
        const DIRECT_IO = FOPEN_DIRECT_IO;
        /// Don't invalidate the data cache on open.
        const KEEP_CACHE = FOPEN_KEEP_CACHE;
        /// The file is not seekable.
        const NONSEEKABLE = FOPEN_NONSEEKABLE;
    }
}

impl OpenReplyFlags {
    /// The virtual file never changes, so its pages may stay cached across opens.
    /// Real files get the kernel defaults.
    pub fn for_descriptor(fh: Descriptor) -> Self {
        match fh {
            Descriptor::Virtual => OpenReplyFlags::KEEP_CACHE,
            Descriptor::Real(_) => OpenReplyFlags::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_file_keeps_cache() {
        assert_eq!(
            OpenReplyFlags::for_descriptor(Descriptor::Virtual).bits(),
            FOPEN_KEEP_CACHE
        );
        assert!(OpenReplyFlags::for_descriptor(Descriptor::Real(3)).is_empty());
    }
}
