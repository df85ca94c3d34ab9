//! Integration tests for the index layer

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use crate::file::{BufferManager, PAGE_SIZE, PagedFileManager};
    use crate::index::{FileIndex, INDEX_SUFFIX, IndexError, IndexManager, Key, TreeNode};
    use crate::record::RecordId;
    use tempfile::TempDir;

    // Entries per leaf before it overflows a page
    const LEAF_FANOUT: usize = 339;

    fn rid(key: Key) -> RecordId {
        RecordId::new(key as usize / 100 + 1, key as usize % 100)
    }

    fn setup() -> (TempDir, PathBuf, BufferManager) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(format!("students_id{}", INDEX_SUFFIX));
        (temp_dir, path, BufferManager::new(PagedFileManager::new()))
    }

    fn create_open(buffer_mgr: &mut BufferManager, path: &Path) -> FileIndex {
        let root = FileIndex::create(buffer_mgr, path).unwrap();
        assert_eq!(root, 0);
        FileIndex::open(buffer_mgr, path, root).unwrap()
    }

    fn keys(entries: &[(Key, RecordId)]) -> Vec<Key> {
        entries.iter().map(|e| e.0).collect()
    }

    #[test]
    fn test_empty_index() {
        let (_dir, path, mut buffer_mgr) = setup();
        let index = create_open(&mut buffer_mgr, &path);

        assert!(index.is_empty());
        assert_eq!(index.height().unwrap(), 1);
        assert_eq!(index.search(1).unwrap(), None);
        assert!(index.range_search(None, None).unwrap().is_empty());
        assert!(index.leaf_pages().unwrap().is_empty());
    }

    #[test]
    fn test_point_and_range() {
        let (_dir, path, mut buffer_mgr) = setup();
        let mut index = create_open(&mut buffer_mgr, &path);

        for key in [5, 1, 3, 9, 7] {
            index.insert(&mut buffer_mgr, key, rid(key)).unwrap();
        }

        assert_eq!(index.len(), 5);
        assert_eq!(index.height().unwrap(), 2);
        assert_eq!(index.search(3).unwrap(), Some(rid(3)));
        assert_eq!(index.search(4).unwrap(), None);
        assert_eq!(index.search(10).unwrap(), None);

        let found = index.range_search(Some(1), Some(5)).unwrap();
        assert_eq!(found, vec![(1, rid(1)), (3, rid(3)), (5, rid(5))]);
    }

    #[test]
    fn test_unbounded_ranges() {
        let (_dir, path, mut buffer_mgr) = setup();
        let mut index = create_open(&mut buffer_mgr, &path);

        for key in [5, 1, 3, 9, 7] {
            index.insert(&mut buffer_mgr, key, rid(key)).unwrap();
        }

        assert_eq!(keys(&index.range_search(None, None).unwrap()), vec![1, 3, 5, 7, 9]);
        assert_eq!(keys(&index.range_search(Some(6), None).unwrap()), vec![7, 9]);
        assert_eq!(keys(&index.range_search(None, Some(2)).unwrap()), vec![1]);
        assert!(index.range_search(Some(5), Some(4)).unwrap().is_empty());
        assert!(index.range_search(Some(10), None).unwrap().is_empty());
    }

    #[test]
    fn test_extreme_keys() {
        let (_dir, path, mut buffer_mgr) = setup();
        let mut index = create_open(&mut buffer_mgr, &path);

        let rid_min = RecordId::new(1, 0);
        let rid_max = RecordId::new(1, 1);
        index.insert(&mut buffer_mgr, i64::MAX, rid_max).unwrap();
        index.insert(&mut buffer_mgr, i64::MIN, rid_min).unwrap();
        index.insert(&mut buffer_mgr, 10_000_000_000, rid(0)).unwrap();

        assert_eq!(index.search(i64::MIN).unwrap(), Some(rid_min));
        assert_eq!(index.search(i64::MAX).unwrap(), Some(rid_max));
        assert_eq!(
            keys(&index.range_search(None, None).unwrap()),
            vec![i64::MIN, 10_000_000_000, i64::MAX]
        );
    }

    #[test]
    fn test_remove() {
        let (_dir, path, mut buffer_mgr) = setup();
        let mut index = create_open(&mut buffer_mgr, &path);

        for key in [5, 1, 3, 9, 7] {
            index.insert(&mut buffer_mgr, key, rid(key)).unwrap();
        }

        assert!(index.remove(3, rid(3)).unwrap());
        assert_eq!(index.search(3).unwrap(), None);
        assert_eq!(keys(&index.range_search(Some(1), Some(5)).unwrap()), vec![1, 5]);

        // Key and record id must both match
        assert!(!index.remove(3, rid(3)).unwrap());
        assert!(!index.remove(5, rid(9)).unwrap());
        assert!(!index.remove(4, rid(4)).unwrap());
        assert_eq!(index.len(), 4);

        // Removing the maximum lowers the parent's key
        assert!(index.remove(9, rid(9)).unwrap());
        index.insert(&mut buffer_mgr, 8, rid(8)).unwrap();
        assert_eq!(keys(&index.range_search(None, None).unwrap()), vec![1, 5, 7, 8]);
    }

    #[test]
    fn test_remove_all_then_reinsert() {
        let (_dir, path, mut buffer_mgr) = setup();
        let mut index = create_open(&mut buffer_mgr, &path);

        for key in 0..10 {
            index.insert(&mut buffer_mgr, key, rid(key)).unwrap();
        }
        for key in 0..10 {
            assert!(index.remove(key, rid(key)).unwrap());
        }
        assert!(index.is_empty());
        assert_eq!(index.height().unwrap(), 1);

        index.insert(&mut buffer_mgr, 42, rid(42)).unwrap();
        assert_eq!(index.search(42).unwrap(), Some(rid(42)));
        assert_eq!(index.leaf_pages().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_keys() {
        let (_dir, path, mut buffer_mgr) = setup();
        let mut index = create_open(&mut buffer_mgr, &path);

        let rids: Vec<RecordId> = (0..3).map(|slot| RecordId::new(1, slot)).collect();
        for &r in &rids {
            index.insert(&mut buffer_mgr, 10, r).unwrap();
        }
        index.insert(&mut buffer_mgr, 5, rid(5)).unwrap();
        index.insert(&mut buffer_mgr, 15, rid(15)).unwrap();

        assert_eq!(index.search(10).unwrap(), Some(rids[0]));
        let found: Vec<RecordId> = index
            .range_search(Some(10), Some(10))
            .unwrap()
            .into_iter()
            .map(|e| e.1)
            .collect();
        assert_eq!(found, rids);

        assert!(index.remove(10, rids[1]).unwrap());
        let found: Vec<RecordId> = index
            .range_search(Some(10), Some(10))
            .unwrap()
            .into_iter()
            .map(|e| e.1)
            .collect();
        assert_eq!(found, vec![rids[0], rids[2]]);
    }

    #[test]
    fn test_duplicate_run_across_leaves() {
        let (_dir, path, mut buffer_mgr) = setup();
        let mut index = create_open(&mut buffer_mgr, &path);

        for slot in 0..400 {
            index.insert(&mut buffer_mgr, 1, RecordId::new(1, slot)).unwrap();
        }
        assert!(index.leaf_pages().unwrap().len() >= 2);
        assert_eq!(index.range_search(Some(1), Some(1)).unwrap().len(), 400);
        assert_eq!(index.search(1).unwrap(), Some(RecordId::new(1, 0)));

        // Stored in the second leaf after the first split
        assert!(index.remove(1, RecordId::new(1, 200)).unwrap());
        assert!(!index.remove(1, RecordId::new(1, 200)).unwrap());
        assert_eq!(index.len(), 399);
    }

    #[test]
    fn test_leaf_split_keeps_height() {
        let (_dir, path, mut buffer_mgr) = setup();
        let mut index = create_open(&mut buffer_mgr, &path);

        for key in 0..LEAF_FANOUT as Key {
            index.insert(&mut buffer_mgr, key, rid(key)).unwrap();
        }
        assert_eq!(index.leaf_pages().unwrap().len(), 1);
        assert_eq!(index.height().unwrap(), 2);

        let key = LEAF_FANOUT as Key;
        index.insert(&mut buffer_mgr, key, rid(key)).unwrap();

        let leaves = index.leaf_pages().unwrap();
        assert_eq!(leaves.len(), 2);
        assert_eq!(index.height().unwrap(), 2);
        assert_eq!(index.root_page(), 0);

        let all = index.range_search(None, None).unwrap();
        assert_eq!(keys(&all), (0..=key).collect::<Vec<_>>());
        for key in [0, 169, 170, 339] {
            assert_eq!(index.search(key).unwrap(), Some(rid(key)));
        }
    }

    #[test]
    fn test_empty_leaf_is_unlinked() {
        let (_dir, path, mut buffer_mgr) = setup();
        let mut index = create_open(&mut buffer_mgr, &path);

        for key in 0..=LEAF_FANOUT as Key {
            index.insert(&mut buffer_mgr, key, rid(key)).unwrap();
        }
        let leaves = index.leaf_pages().unwrap();
        assert_eq!(leaves.len(), 2);

        for key in 0..170 {
            assert!(index.remove(key, rid(key)).unwrap());
        }

        assert_eq!(index.leaf_pages().unwrap(), vec![leaves[1]]);
        assert_eq!(index.search(5).unwrap(), None);
        assert_eq!(
            keys(&index.range_search(None, None).unwrap()),
            (170..=LEAF_FANOUT as Key).collect::<Vec<_>>()
        );

        // The surviving leaf still reopens cleanly with no prev link
        let root = index.close(&mut buffer_mgr).unwrap();
        let index = FileIndex::open(&mut buffer_mgr, &path, root).unwrap();
        assert_eq!(index.leaf_pages().unwrap(), vec![leaves[1]]);
        assert_eq!(index.len(), 170);
    }

    #[test]
    fn test_root_split_grows_height_once() {
        let (_dir, path, mut buffer_mgr) = setup();
        let mut index = create_open(&mut buffer_mgr, &path);

        let total: Key = 100_000;
        let mut height = 1;
        let mut growths = Vec::new();
        for key in 0..total {
            index.insert(&mut buffer_mgr, key, rid(key)).unwrap();
            let now = index.height().unwrap();
            if now != height {
                assert_eq!(now, height + 1);
                growths.push(key);
                height = now;
            }
        }

        // First insert adds the leaf level, the root split adds one more
        assert_eq!(growths.len(), 2);
        assert_eq!(growths[0], 0);
        assert_eq!(height, 3);
        assert_ne!(index.root_page(), 0);
        assert_eq!(index.len(), total as usize);

        let found = index.range_search(Some(50_000), Some(50_009)).unwrap();
        assert_eq!(keys(&found), (50_000..50_010).collect::<Vec<_>>());

        // Reopen from disk with a cold pool; parent links are checked on load
        let root = index.close(&mut buffer_mgr).unwrap();
        let mut cold = BufferManager::with_capacity(PagedFileManager::new(), 64);
        let index = FileIndex::open(&mut cold, &path, root).unwrap();
        assert_eq!(index.height().unwrap(), 3);
        for key in (0..total).step_by(997) {
            assert_eq!(index.search(key).unwrap(), Some(rid(key)));
        }
        let leaves = index.leaf_pages().unwrap();
        let leaf_total: usize = index.range_search(None, None).unwrap().len();
        assert_eq!(leaf_total, total as usize);
        assert!(leaves.len() > 500);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let (_dir, path, mut buffer_mgr) = setup();
        let mut index = create_open(&mut buffer_mgr, &path);

        // Scrambled insertion order
        let inserted: Vec<Key> = (0..2_000).map(|i| (i * 7_919) % 2_000).collect();
        for &key in &inserted {
            index.insert(&mut buffer_mgr, key, rid(key)).unwrap();
        }
        assert!(index.remove(1_000, rid(1_000)).unwrap());
        let root = index.close(&mut buffer_mgr).unwrap();

        let mut buffer_mgr = BufferManager::new(PagedFileManager::new());
        let index = FileIndex::open(&mut buffer_mgr, &path, root).unwrap();
        assert_eq!(index.len(), 1_999);
        assert_eq!(index.search(1_000).unwrap(), None);
        assert_eq!(index.search(1_999).unwrap(), Some(rid(1_999)));

        let all = keys(&index.range_search(None, None).unwrap());
        let expected: Vec<Key> = (0..2_000).filter(|&k| k != 1_000).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_open_errors() {
        let (dir, path, mut buffer_mgr) = setup();

        assert!(matches!(
            FileIndex::open(&mut buffer_mgr, &path, 0),
            Err(IndexError::IndexNotFound(_))
        ));

        let mut index = create_open(&mut buffer_mgr, &path);
        assert!(matches!(
            FileIndex::create(&mut buffer_mgr, &path),
            Err(IndexError::IndexAlreadyExists(_))
        ));

        index.insert(&mut buffer_mgr, 1, rid(1)).unwrap();
        index.close(&mut buffer_mgr).unwrap();

        // Page 1 holds a leaf
        assert!(matches!(
            FileIndex::open(&mut buffer_mgr, &path, 1),
            Err(IndexError::CorruptedNode { page: 1, .. })
        ));
        assert!(matches!(
            FileIndex::open(&mut buffer_mgr, &path, 9),
            Err(IndexError::CorruptedNode { page: 9, .. })
        ));
        assert_eq!(buffer_mgr.file_manager().open_file_count(), 0);

        let bad_root = dir.path().join("bad_root.index");
        let node = TreeNode::Internal {
            parent: 5,
            entries: Vec::new(),
        };
        std::fs::write(&bad_root, node.to_page()).unwrap();
        assert!(matches!(
            FileIndex::open(&mut buffer_mgr, &bad_root, 0),
            Err(IndexError::RootParentMismatch { root: 0, parent: 5 })
        ));

        let bad_tag = dir.path().join("bad_tag.index");
        let mut page = vec![0u8; PAGE_SIZE];
        page[..8].copy_from_slice(&9i64.to_le_bytes());
        std::fs::write(&bad_tag, page).unwrap();
        assert!(matches!(
            FileIndex::open(&mut buffer_mgr, &bad_tag, 0),
            Err(IndexError::InvalidNodeType { page: 0, tag: 9 })
        ));
    }

    #[test]
    fn test_child_parent_mismatch() {
        let (dir, _path, mut buffer_mgr) = setup();
        let path = dir.path().join("orphan.index");

        let root = TreeNode::Internal {
            parent: 0,
            entries: vec![(3, 1)],
        };
        let mut leaf = TreeNode::new_leaf(7);
        if let TreeNode::Leaf { entries, .. } = &mut leaf {
            entries.push((3, rid(3)));
        }
        let mut bytes = root.to_page();
        bytes.extend(leaf.to_page());
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            FileIndex::open(&mut buffer_mgr, &path, 0),
            Err(IndexError::CorruptedNode { page: 1, .. })
        ));
    }

    #[test]
    fn test_index_manager() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(format!("students_id{}", INDEX_SUFFIX));
        let shared = BufferManager::new(PagedFileManager::new()).into_shared();
        let mut manager = IndexManager::new(shared.clone());

        let root = manager.create_index(&path).unwrap();
        assert!(matches!(
            manager.insert(&path, 1, rid(1)),
            Err(IndexError::IndexNotOpen(_))
        ));

        manager.open_index(&path, root).unwrap();
        manager.open_index(&path, root).unwrap();
        for key in [5, 1, 3, 9, 7] {
            manager.insert(&path, key, rid(key)).unwrap();
        }
        assert_eq!(manager.search(&path, 9).unwrap(), Some(rid(9)));
        assert!(manager.remove(&path, 9, rid(9)).unwrap());
        assert_eq!(
            keys(&manager.range_search(&path, Some(2), None).unwrap()),
            vec![3, 5, 7]
        );
        assert_eq!(manager.get_index(&path).unwrap().len(), 4);

        let root = manager.close_index(&path).unwrap();
        assert!(!manager.is_open(&path));

        let mut reopened = IndexManager::new(BufferManager::new(PagedFileManager::new()).into_shared());
        reopened.open_index(&path, root).unwrap();
        assert_eq!(reopened.search(&path, 3).unwrap(), Some(rid(3)));
        let roots = reopened.shutdown().unwrap();
        assert_eq!(roots, vec![(path.clone(), root)]);

        manager.remove_index(&path).unwrap();
        assert!(!path.exists());
        assert!(matches!(
            manager.remove_index(&path),
            Err(IndexError::IndexNotFound(_))
        ));
    }

    #[test]
    fn test_index_manager_flush_and_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scores.index");
        let root;
        {
            let shared = BufferManager::new(PagedFileManager::new()).into_shared();
            let mut manager = IndexManager::new(shared);
            root = manager.create_index(&path).unwrap();
            manager.open_index(&path, root).unwrap();
            for key in 0..50 {
                manager.insert(&path, key, rid(key)).unwrap();
            }
            manager.flush_all().unwrap();
            manager.insert(&path, 50, rid(50)).unwrap();
        }

        // Dropping the manager wrote back the last insert too
        let mut manager = IndexManager::new(BufferManager::new(PagedFileManager::new()).into_shared());
        manager.open_index(&path, root).unwrap();
        assert_eq!(manager.get_index(&path).unwrap().len(), 51);
    }
}
