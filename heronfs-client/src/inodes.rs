use dashmap::DashMap;
use fuser::FUSE_ROOT_ID;
use std::sync::atomic::{AtomicU64, Ordering};

use heronfs_common::types::DFS_ROOT_PATH;

/// Bidirectional inode-number <-> remote-path table.
///
/// The kernel speaks inode numbers; the nameserver speaks absolute
/// paths. Numbers are allocated on first sight of a path and stay
/// stable until the path is forgotten or renamed away.
pub struct InodeTable {
    by_ino: DashMap<u64, String>,
    by_path: DashMap<String, u64>,
    next: AtomicU64,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            by_ino: DashMap::new(),
            by_path: DashMap::new(),
            next: AtomicU64::new(FUSE_ROOT_ID + 1),
        };
        table.by_ino.insert(FUSE_ROOT_ID, DFS_ROOT_PATH.to_string());
        table.by_path.insert(DFS_ROOT_PATH.to_string(), FUSE_ROOT_ID);
        table
    }

    /// Inode number for a path, allocating one on first sight
    pub fn ino_for(&self, path: &str) -> u64 {
        // entry() keeps allocation atomic when two callers race on the
        // same new path
        let ino = *self
            .by_path
            .entry(path.to_string())
            .or_insert_with(|| self.next.fetch_add(1, Ordering::SeqCst));
        self.by_ino.insert(ino, path.to_string());
        ino
    }

    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.by_ino.get(&ino).map(|entry| entry.clone())
    }

    /// Absolute remote path of `name` inside the directory `parent`
    pub fn child_path(parent: &str, name: &str) -> String {
        if parent == DFS_ROOT_PATH {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }

    /// Re-point a path (and everything under it) after a rename,
    /// preserving inode numbers
    pub fn rename(&self, old: &str, new: &str) {
        let prefix = format!("{old}/");
        let moved: Vec<(String, u64)> = self
            .by_path
            .iter()
            .filter(|entry| entry.key() == old || entry.key().starts_with(&prefix))
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        for (path, ino) in moved {
            let renamed = if path == old {
                new.to_string()
            } else {
                format!("{new}{}", &path[old.len()..])
            };
            self.by_path.remove(&path);
            self.by_path.insert(renamed.clone(), ino);
            self.by_ino.insert(ino, renamed);
        }
    }

    /// Drop a path mapping after unlink/rmdir
    pub fn forget_path(&self, path: &str) {
        if let Some((_, ino)) = self.by_path.remove(path) {
            self.by_ino.remove(&ino);
        }
    }

    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_preassigned() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(FUSE_ROOT_ID).as_deref(), Some(DFS_ROOT_PATH));
        assert_eq!(table.ino_for(DFS_ROOT_PATH), FUSE_ROOT_ID);
    }

    #[test]
    fn test_stable_ino_per_path() {
        let table = InodeTable::new();
        let a = table.ino_for("/user/alice/data.txt");
        let b = table.ino_for("/user/alice/data.txt");
        let c = table.ino_for("/user/alice/other.txt");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.path_of(a).as_deref(), Some("/user/alice/data.txt"));
    }

    #[test]
    fn test_child_path_join() {
        assert_eq!(InodeTable::child_path("/", "etc"), "/etc");
        assert_eq!(InodeTable::child_path("/user/alice", "x"), "/user/alice/x");
    }

    #[test]
    fn test_rename_repoints_subtree() {
        let table = InodeTable::new();
        let dir = table.ino_for("/user/alice");
        let file = table.ino_for("/user/alice/notes.txt");
        let other = table.ino_for("/user/alicelike");

        table.rename("/user/alice", "/user/bob");

        assert_eq!(table.path_of(dir).as_deref(), Some("/user/bob"));
        assert_eq!(table.path_of(file).as_deref(), Some("/user/bob/notes.txt"));
        assert_eq!(table.ino_for("/user/bob/notes.txt"), file);
        // A sibling sharing the name as a prefix is untouched
        assert_eq!(table.path_of(other).as_deref(), Some("/user/alicelike"));
    }

    #[test]
    fn test_forget_removes_both_directions() {
        let table = InodeTable::new();
        let ino = table.ino_for("/tmp/x");
        table.forget_path("/tmp/x");
        assert_eq!(table.path_of(ino), None);
        // Reallocating the same path hands out a fresh number
        assert_ne!(table.ino_for("/tmp/x"), ino);
    }
}
