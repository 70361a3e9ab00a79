use std::time::UNIX_EPOCH;

use fuse_backend_rs::abi::fuse_abi::Attr;

use crate::vfs::{Attributes, NodeKind};

/// Turns the attributes of a node into an [Attr] for the kernel.
pub fn gen_file_attr(attributes: &Attributes, ino: u64) -> Attr {
    let (secs, nsecs) = attributes
        .mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_secs(), d.subsec_nanos()))
        .unwrap_or_default();

    let file_type = match attributes.kind {
        NodeKind::File => libc::S_IFREG,
        NodeKind::Directory => libc::S_IFDIR,
    };

    Attr {
        ino,
        size: attributes.size,
        blksize: 1024,
        blocks: attributes.size.div_ceil(512),
        mode: file_type | attributes.mode,
        atime: secs,
        mtime: secs,
        ctime: secs,
        atimensec: nsecs,
        mtimensec: nsecs,
        ctimensec: nsecs,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        flags: 0,
    }
}
