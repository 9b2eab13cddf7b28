//! Ordered in-memory containers for a partition's inodes and dentries.
//!
//! Both trees support point lookups and ordered iteration; the dentry
//! tree's `(parent, name)` key order makes `read_dir` a contiguous
//! range scan.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::dentry::Dentry;
use crate::inode::Inode;

/// Inodes keyed by ID.
#[derive(Debug, Default)]
pub struct InodeTree {
    inner: RwLock<BTreeMap<u64, Inode>>,
}

impl InodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new inode; fails when the ID already exists.
    pub fn create(&self, ino: Inode) -> Result<(), Inode> {
        let mut tree = self.inner.write().unwrap();
        if let Some(existing) = tree.get(&ino.inode) {
            return Err(existing.clone());
        }
        tree.insert(ino.inode, ino);
        Ok(())
    }

    pub fn get(&self, inode: u64) -> Option<Inode> {
        self.inner.read().unwrap().get(&inode).cloned()
    }

    pub fn remove(&self, inode: u64) -> Option<Inode> {
        self.inner.write().unwrap().remove(&inode)
    }

    /// Runs `f` on the inode in place; `None` when it does not exist.
    pub fn with_mut<T>(&self, inode: u64, f: impl FnOnce(&mut Inode) -> T) -> Option<T> {
        self.inner.write().unwrap().get_mut(&inode).map(f)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest inode ID present, for cursor recovery on reload.
    pub fn max_inode_id(&self) -> Option<u64> {
        self.inner.read().unwrap().keys().next_back().copied()
    }

    /// Snapshot of every inode in ID order.
    pub fn snapshot(&self) -> Vec<Inode> {
        self.inner.read().unwrap().values().cloned().collect()
    }
}

/// Dentries keyed by `(parent, name)`.
#[derive(Debug, Default)]
pub struct DentryTree {
    inner: RwLock<BTreeMap<(u64, String), Dentry>>,
}

impl DentryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new dentry; fails when `(parent, name)` already exists.
    pub fn create(&self, d: Dentry) -> Result<(), Dentry> {
        let mut tree = self.inner.write().unwrap();
        let key = (d.parent_id, d.name.clone());
        if let Some(existing) = tree.get(&key) {
            return Err(existing.clone());
        }
        tree.insert(key, d);
        Ok(())
    }

    pub fn get(&self, parent_id: u64, name: &str) -> Option<Dentry> {
        self.inner
            .read()
            .unwrap()
            .get(&(parent_id, name.to_string()))
            .cloned()
    }

    pub fn remove(&self, parent_id: u64, name: &str) -> Option<Dentry> {
        self.inner
            .write()
            .unwrap()
            .remove(&(parent_id, name.to_string()))
    }

    /// All dentries of one parent, name-ordered.
    pub fn read_dir(&self, parent_id: u64) -> Vec<Dentry> {
        self.inner
            .read()
            .unwrap()
            .range((parent_id, String::new())..)
            .take_while(|((p, _), _)| *p == parent_id)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every dentry in key order.
    pub fn snapshot(&self) -> Vec<Dentry> {
        self.inner.read().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inode_create_and_get() {
        let tree = InodeTree::new();
        tree.create(Inode::new(5, 0o644)).unwrap();
        assert_eq!(tree.get(5).unwrap().inode, 5);
        assert!(tree.get(6).is_none());
    }

    #[test]
    fn test_inode_create_duplicate_fails() {
        let tree = InodeTree::new();
        tree.create(Inode::new(5, 0o644)).unwrap();
        assert!(tree.create(Inode::new(5, 0o755)).is_err());
        assert_eq!(tree.get(5).unwrap().mode, 0o644);
    }

    #[test]
    fn test_inode_remove_returns_entity() {
        let tree = InodeTree::new();
        tree.create(Inode::new(5, 0o644)).unwrap();
        let removed = tree.remove(5).unwrap();
        assert_eq!(removed.inode, 5);
        assert!(tree.remove(5).is_none());
    }

    #[test]
    fn test_inode_max_id() {
        let tree = InodeTree::new();
        assert!(tree.max_inode_id().is_none());
        tree.create(Inode::new(3, 0)).unwrap();
        tree.create(Inode::new(9, 0)).unwrap();
        tree.create(Inode::new(7, 0)).unwrap();
        assert_eq!(tree.max_inode_id(), Some(9));
    }

    #[test]
    fn test_dentry_read_dir_is_prefix_scan() {
        let tree = DentryTree::new();
        tree.create(Dentry::new(1, "b", 10, 0)).unwrap();
        tree.create(Dentry::new(1, "a", 11, 0)).unwrap();
        tree.create(Dentry::new(2, "a", 12, 0)).unwrap();
        tree.create(Dentry::new(1, "c", 13, 0)).unwrap();

        let names: Vec<String> = tree.read_dir(1).into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(tree.read_dir(2).len(), 1);
        assert!(tree.read_dir(3).is_empty());
    }

    #[test]
    fn test_dentry_duplicate_fails() {
        let tree = DentryTree::new();
        tree.create(Dentry::new(1, "x", 10, 0)).unwrap();
        assert!(tree.create(Dentry::new(1, "x", 11, 0)).is_err());
        // Same name under another parent is a different entry.
        tree.create(Dentry::new(2, "x", 11, 0)).unwrap();
    }

    #[test]
    fn test_dentry_read_dir_max_parent() {
        let tree = DentryTree::new();
        tree.create(Dentry::new(u64::MAX, "x", 1, 0)).unwrap();
        assert_eq!(tree.read_dir(u64::MAX).len(), 1);
    }
}
