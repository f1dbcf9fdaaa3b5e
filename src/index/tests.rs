//! End-to-end scenarios for the index layer

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use tempfile::TempDir;

    use crate::file::{BufferPool, DiskManager};
    use crate::index::{BPlusTree, IndexKey};
    use crate::record::RecordId;

    fn rid(n: u32) -> RecordId {
        RecordId::new(n, (n % 16) as u16)
    }

    fn setup_pool(dir: &TempDir) -> Arc<BufferPool> {
        let disk = DiskManager::open(dir.path().join("index.db")).unwrap();
        Arc::new(BufferPool::new(disk))
    }

    #[test]
    fn test_range_scan_across_splits() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pool = setup_pool(&temp_dir);
        let mut tree = BPlusTree::with_capacities(pool, 10, 10).unwrap();

        let mut keys: Vec<IndexKey> = (1..=50).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
        keys.shuffle(&mut rng);

        for &key in &keys {
            assert!(tree.insert(key, rid(key as u32)).unwrap());
        }

        // Fifty keys at ten per leaf span at least five leaves, so the walk
        // from the leaf containing 1 must cross leaf boundaries
        assert!(tree.height().unwrap() >= 2);

        let hits = tree.range(1, 50).unwrap();
        assert_eq!(hits.len(), 50);
        let walked: Vec<IndexKey> = hits.iter().map(|&(k, _)| k).collect();
        assert_eq!(walked, (1..=50).collect::<Vec<_>>());
    }

    #[test]
    fn test_reattach_tree_after_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root;
        {
            let pool = setup_pool(&temp_dir);
            let mut tree = BPlusTree::with_capacities(Arc::clone(&pool), 8, 8).unwrap();

            for key in 1..=100 {
                tree.insert(key, rid(key as u32)).unwrap();
            }
            root = tree.root_page_id();
            pool.flush_all().unwrap();
            // Pool drop flushes again; disk drop rewrites the header
        }

        let pool = setup_pool(&temp_dir);
        let mut tree = BPlusTree::with_capacities(pool, 8, 8).unwrap();
        tree.set_root(root);

        for key in (1..=100).step_by(7) {
            assert_eq!(tree.search(key).unwrap(), Some(rid(key as u32)));
        }
        let scanned: Vec<IndexKey> = tree.scan().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(scanned, (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn test_interleaved_insert_remove() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pool = setup_pool(&temp_dir);
        let mut tree = BPlusTree::with_capacities(pool, 6, 6).unwrap();

        for key in 1..=60 {
            tree.insert(key, rid(key as u32)).unwrap();
        }

        // Drop the odd keys, then bring a few back
        for key in (1..=60).filter(|k| k % 2 == 1) {
            assert!(tree.remove(key).unwrap());
        }
        for key in [1, 31, 59] {
            assert!(tree.insert(key, rid(key as u32)).unwrap());
        }

        let mut expected: Vec<IndexKey> = (1..=60).filter(|k| k % 2 == 0).collect();
        expected.extend([1, 31, 59]);
        expected.sort_unstable();

        let scanned: Vec<IndexKey> = tree.scan().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn test_large_random_workload() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pool = setup_pool(&temp_dir);
        let mut tree = BPlusTree::new(pool);

        let mut keys: Vec<IndexKey> = (0..500).map(|i| i * 3).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        keys.shuffle(&mut rng);

        for &key in &keys {
            assert!(tree.insert(key, rid(key as u32)).unwrap());
        }

        // Point lookups hit, near misses stay misses
        assert_eq!(tree.search(300).unwrap(), Some(rid(300)));
        assert_eq!(tree.search(301).unwrap(), None);

        let hits = tree.range(150, 300).unwrap();
        let walked: Vec<IndexKey> = hits.iter().map(|&(k, _)| k).collect();
        assert_eq!(walked, (150..=300).filter(|k| k % 3 == 0).collect::<Vec<_>>());

        keys.sort_unstable();
        let scanned: Vec<IndexKey> = tree.scan().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(scanned, keys);
    }
}
