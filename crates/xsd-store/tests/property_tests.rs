//! Property-based tests for path construction and write/read round trips:
//! after `write(p, v); read(p) -> v'`, `v' == v`, and the `ABS_PATH_MAX`
//! boundary is exact.

use proptest::prelude::*;
use xsd_store::{Tree, ABS_PATH_MAX};

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,12}"
}

fn abs_path() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 1..6).prop_map(|segs| format!("/{}", segs.join("/")))
}

proptest! {
    /// `write(p, v); read(p) -> v'` always yields `v' == v` for nonempty `v`,
    /// regardless of how deep or how many segments `p` has.
    #[test]
    fn prop_write_then_read_round_trips(path in abs_path(), value in prop::collection::vec(any::<u8>(), 1..64)) {
        let tree = Tree::new();
        tree.write(&path, &value).unwrap();
        prop_assert_eq!(tree.lookup(&path).unwrap().value, Some(value));
    }

    /// `write("/a/.../z", v)` always autocreates every intermediate
    /// segment with no value, however many segments deep.
    #[test]
    fn prop_write_autocreates_every_intermediate(segs in prop::collection::vec(segment(), 2..6)) {
        let tree = Tree::new();
        let full = format!("/{}", segs.join("/"));
        tree.write(&full, b"leaf").unwrap();

        let mut prefix = String::new();
        for seg in &segs[..segs.len() - 1] {
            prefix.push('/');
            prefix.push_str(seg);
            prop_assert!(tree.exists(&prefix), "intermediate {} should exist", prefix);
        }
    }

    /// `remove` always drops every path under it: after removing a prefix,
    /// no path that had it as a byte-prefix still resolves.
    #[test]
    fn prop_remove_drops_the_whole_subtree(segs in prop::collection::vec(segment(), 1..4), tail in segment()) {
        let tree = Tree::new();
        let prefix = format!("/{}", segs.join("/"));
        let deep = format!("{prefix}/{tail}");
        tree.write(&deep, b"v").unwrap();

        prop_assert!(tree.remove(&prefix));
        prop_assert!(!tree.exists(&prefix));
        prop_assert!(!tree.exists(&deep));
    }

    /// A path exactly `ABS_PATH_MAX` bytes long (including the trailing
    /// null the wire protocol appends) is accepted; one byte longer is
    /// rejected.
    #[test]
    fn prop_construct_path_boundary_is_exact(extra in 0usize..20) {
        let base_len = ABS_PATH_MAX - 2 - extra;
        let payload = format!("/{}", "a".repeat(base_len));
        prop_assert!(Tree::construct_path(&payload, 0).is_ok());

        let too_long = format!("/{}", "a".repeat(ABS_PATH_MAX));
        prop_assert!(Tree::construct_path(&too_long, 0).is_err());
    }
}
