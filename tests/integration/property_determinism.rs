//! Property-based tests for hash determinism

use lode::store::ObjectStore;
use lode::tree::hasher;
use lode::tree::TreeBuilder;
use lode::types::HashAlgorithm;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn materialize(dir: &Path, files: &[(String, Vec<u8>)]) {
    fs::create_dir_all(dir).unwrap();
    for (rel, content) in files {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

/// Relative paths up to two levels deep; names never clash with directories
fn file_set() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    let path = prop_oneof![
        "f[a-e]",
        ("d[a-c]", "f[a-e]").prop_map(|(d, n)| format!("{}/{}", d, n)),
        ("d[a-c]", "d[a-c]", "f[a-e]").prop_map(|(d, e, n)| format!("{}/{}/{}", d, e, n)),
    ];
    prop::collection::btree_map(path, prop::collection::vec(any::<u8>(), 0..64), 1..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_content_hash_is_deterministic(content in prop::collection::vec(any::<u8>(), 0..512)) {
        let first = hasher::compute_content_hash(HashAlgorithm::Blake3, &content);
        let second = hasher::compute_content_hash(HashAlgorithm::Blake3, &content);
        prop_assert_eq!(&first, &second);
        prop_assert!(!first.is_dir());
        prop_assert!(first.is_well_formed());
    }

    #[test]
    fn test_tree_hash_ignores_creation_order(files in file_set()) {
        let temp_dir = TempDir::new().unwrap();
        let store = ObjectStore::new(temp_dir.path().join("cache")).unwrap();

        let forward: Vec<_> = files.clone().into_iter().collect();
        let mut backward = forward.clone();
        backward.reverse();
        materialize(&temp_dir.path().join("one"), &forward);
        materialize(&temp_dir.path().join("two"), &backward);

        let builder = TreeBuilder::new(&store, HashAlgorithm::Blake3);
        let (hash_one, meta_one) = builder.build(&temp_dir.path().join("one")).unwrap();
        let (hash_two, meta_two) = builder.build(&temp_dir.path().join("two")).unwrap();
        prop_assert_eq!(hash_one, hash_two);
        prop_assert_eq!(meta_one, meta_two);

        let total: u64 = files.values().map(|c| c.len() as u64).sum();
        prop_assert_eq!(meta_one.size, Some(total));
        prop_assert_eq!(meta_one.file_count, Some(files.len() as u32));
    }
}
