mod path;

pub mod vfs;

/// The FUSE adapter. Only Linux is supported.
#[cfg(all(feature = "fuse", target_os = "linux"))]
pub mod fs;

pub use path::{InvalidComponent, VfsPath};
pub use vfs::Vfs;
