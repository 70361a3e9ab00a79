use std::collections::HashMap;

use fuse_backend_rs::api::filesystem::ROOT_ID;

use crate::VfsPath;

/// InodeTracker hands out inodes for paths, and keeps track of which path
/// each inode refers to. The root always is [ROOT_ID].
pub struct InodeTracker {
    paths: HashMap<u64, VfsPath>,

    // reverse lookup table
    inodes: HashMap<VfsPath, u64>,

    // the next inode to allocate
    next_inode: u64,
}

impl Default for InodeTracker {
    fn default() -> Self {
        Self {
            paths: HashMap::from([(ROOT_ID, VfsPath::root())]),
            inodes: HashMap::from([(VfsPath::root(), ROOT_ID)]),
            next_inode: ROOT_ID + 1,
        }
    }
}

impl InodeTracker {
    // Retrieves the path for a given inode, if it exists.
    pub fn get(&self, ino: u64) -> Option<VfsPath> {
        self.paths.get(&ino).cloned()
    }

    // Returns the inode for a path, allocating a new one if the path wasn't
    // seen before.
    pub fn put(&mut self, path: VfsPath) -> u64 {
        if let Some(ino) = self.inodes.get(&path) {
            return *ino;
        }

        let ino = self.next_inode;
        self.next_inode += 1;

        self.paths.insert(ino, path.clone());
        self.inodes.insert(path, ino);

        ino
    }
}
