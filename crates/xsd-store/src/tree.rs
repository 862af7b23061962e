use crate::config::{domain_prefix, ABS_PATH_MAX};
use crate::error::StoreError;
use std::sync::Mutex;

/// One node of the hierarchical store.
///
/// The root node has an empty `name` and is never removable. Every other
/// node is reachable from root by exactly one path, and its name is unique
/// among its siblings.
#[derive(Debug, Clone)]
struct Node {
    name: String,
    value: Option<Vec<u8>>,
    children: Vec<Node>,
}

impl Node {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            children: Vec::new(),
        }
    }

    fn root() -> Self {
        Self {
            name: String::new(),
            value: None,
            children: Vec::new(),
        }
    }

    fn child_index(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.name == name)
    }

    fn find<'a>(&'a self, segments: &[&str]) -> Option<&'a Node> {
        let mut cur = self;
        for seg in segments {
            cur = cur.children.iter().find(|c| c.name == *seg)?;
        }
        Some(cur)
    }
}

/// A read-only view of a node returned by [`Tree::lookup`].
///
/// Snapshotting (rather than returning a reference tied to the tree's
/// mutex guard) keeps callers from holding the tree lock across their own
/// logic — references into the store are looked up on use, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub value: Option<Vec<u8>>,
    pub children: Vec<String>,
}

/// The process-wide hierarchical store.
///
/// All three public operations hold the internal mutex in exclusive mode
/// for their full duration — no partial-walk visibility is ever exposed.
pub struct Tree {
    root: Mutex<Node>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Node::root()),
        }
    }

    /// Normalizes `payload` into an absolute path, rewriting a relative
    /// payload under the domain's local prefix.
    ///
    /// Enforces `path.len() + 1 <= ABS_PATH_MAX` (the `+1` accounts for the
    /// wire protocol's trailing null, which is not part of `path` itself).
    pub fn construct_path(payload: &str, domid: u16) -> Result<String, StoreError> {
        let path = if payload.starts_with('/') {
            payload.to_string()
        } else {
            format!("{}{payload}", domain_prefix(domid))
        };
        if path.len() + 1 > ABS_PATH_MAX {
            return Err(StoreError::PathTooLong);
        }
        Ok(path)
    }

    /// Looks up `path`, returning a snapshot of its value and child names,
    /// or `None` if no such node exists. The root path (`"/"` or `""`)
    /// always resolves.
    pub fn lookup(&self, path: &str) -> Option<NodeSnapshot> {
        let segments = segments(path);
        let root = self.root.lock().unwrap();
        let node = root.find(&segments)?;
        Some(NodeSnapshot {
            value: node.value.clone(),
            children: node.children.iter().map(|c| c.name.clone()).collect(),
        })
    }

    pub fn exists(&self, path: &str) -> bool {
        let segments = segments(path);
        let root = self.root.lock().unwrap();
        root.find(&segments).is_some()
    }

    /// Walks `path`, creating missing intermediate nodes with no value, and
    /// sets the terminal node's value to a copy of `value` — unless `value`
    /// is empty, in which case the terminal's existing value (`None` for a
    /// freshly created node) is left untouched.
    ///
    /// On simulated allocation failure (see [`fail_next_alloc`]) the walk
    /// unwinds by detaching only the first intermediate node this call
    /// created, leaving no partial subtree behind.
    pub fn write(&self, path: &str, value: &[u8]) -> Result<(), StoreError> {
        let segments = segments(path);
        let mut root = self.root.lock().unwrap();

        // Index path to the first node we create, so a later allocation
        // failure can unwind by detaching just that one subtree. Each
        // lookup re-walks from root by index rather than holding a
        // persistent sub-borrow, so the unwind call below never conflicts
        // with a borrow still in scope.
        let mut first_created: Option<Vec<usize>> = None;
        let mut indices: Vec<usize> = Vec::new();

        for seg in &segments {
            let existing = child_at_mut(&mut root, &indices).child_index(seg);
            match existing {
                Some(idx) => indices.push(idx),
                None => {
                    if alloc_would_fail() {
                        unwind_created(&mut root, &first_created);
                        return Err(StoreError::AllocFailed);
                    }
                    let cur = child_at_mut(&mut root, &indices);
                    cur.children.push(Node::new(seg));
                    let idx = cur.children.len() - 1;
                    indices.push(idx);
                    if first_created.is_none() {
                        first_created = Some(indices.clone());
                    }
                }
            }
        }

        if !value.is_empty() {
            child_at_mut(&mut root, &indices).value = Some(value.to_vec());
        }
        Ok(())
    }

    /// Removes the node at `path` and its entire subtree. Returns `false`
    /// (without effect) if the path names the root or does not exist.
    pub fn remove(&self, path: &str) -> bool {
        let segments = segments(path);
        if segments.is_empty() {
            return false;
        }

        let mut root = self.root.lock().unwrap();
        let mut cur = &mut *root;
        for seg in &segments[..segments.len() - 1] {
            match cur.child_index(seg) {
                Some(idx) => cur = &mut cur.children[idx],
                None => return false,
            }
        }

        match cur.child_index(segments[segments.len() - 1]) {
            Some(idx) => {
                cur.children.remove(idx);
                true
            }
            None => false,
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn child_at_mut<'a>(node: &'a mut Node, indices: &[usize]) -> &'a mut Node {
    indices.iter().fold(node, |n, &idx| &mut n.children[idx])
}

fn unwind_created(root: &mut Node, first_created: &Option<Vec<usize>>) {
    let Some(path) = first_created else { return };
    let Some((&last, parents)) = path.split_last() else {
        return;
    };
    let mut cur = root;
    for &idx in parents {
        cur = &mut cur.children[idx];
    }
    if last < cur.children.len() {
        cur.children.remove(last);
    }
}

#[cfg(test)]
thread_local! {
    static FORCE_ALLOC_FAILURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Test-only hook: forces the next intermediate-node creation in [`Tree::write`]
/// to behave as an allocation failure, exercising the unwind path that a real
/// allocator failure would otherwise take (unreachable under the default
/// global allocator, which aborts rather than returning an error).
#[cfg(test)]
pub fn fail_next_alloc() {
    FORCE_ALLOC_FAILURE.with(|f| f.set(true));
}

#[cfg(test)]
fn alloc_would_fail() -> bool {
    FORCE_ALLOC_FAILURE.with(|f| f.replace(false))
}

#[cfg(not(test))]
fn alloc_would_fail() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let tree = Tree::new();
        tree.write("/foo", b"bar").unwrap();
        assert_eq!(tree.lookup("/foo").unwrap().value, Some(b"bar".to_vec()));
    }

    #[test]
    fn write_autocreates_intermediate_with_empty_value() {
        let tree = Tree::new();
        tree.write("/a/b/c", b"v").unwrap();
        let a = tree.lookup("/a").unwrap();
        assert_eq!(a.value, None);
        assert_eq!(a.children, vec!["b".to_string()]);
    }

    #[test]
    fn zero_length_write_does_not_clobber_existing_value() {
        let tree = Tree::new();
        tree.write("/a", b"v1").unwrap();
        tree.write("/a", b"").unwrap();
        assert_eq!(tree.lookup("/a").unwrap().value, Some(b"v1".to_vec()));
    }

    #[test]
    fn mkdir_is_idempotent_and_never_overwrites() {
        let tree = Tree::new();
        tree.write("/a", b"v1").unwrap();
        tree.write("/a", b"").unwrap();
        tree.write("/a", b"").unwrap();
        assert_eq!(tree.lookup("/a").unwrap().value, Some(b"v1".to_vec()));
    }

    #[test]
    fn remove_drops_entire_subtree() {
        let tree = Tree::new();
        tree.write("/r/a", b"1").unwrap();
        tree.write("/r/b/c", b"2").unwrap();
        tree.write("/r/b/d", b"3").unwrap();
        assert!(tree.remove("/r"));
        assert!(tree.lookup("/r/a").is_none());
        assert!(tree.lookup("/r").is_none());
    }

    #[test]
    fn remove_root_is_rejected() {
        let tree = Tree::new();
        assert!(!tree.remove("/"));
        assert!(!tree.remove(""));
    }

    #[test]
    fn remove_absent_path_returns_false() {
        let tree = Tree::new();
        assert!(!tree.remove("/nope"));
    }

    #[test]
    fn directory_listing_preserves_insertion_order() {
        let tree = Tree::new();
        tree.write("/a/x", b"v1").unwrap();
        tree.write("/a/y", b"v2").unwrap();
        assert_eq!(tree.lookup("/a").unwrap().children, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn construct_path_rewrites_relative_under_domain_prefix() {
        let path = Tree::construct_path("sub", 7).unwrap();
        assert_eq!(path, "/local/domain/7/sub");
    }

    #[test]
    fn construct_path_leaves_absolute_untouched() {
        let path = Tree::construct_path("/already/absolute", 7).unwrap();
        assert_eq!(path, "/already/absolute");
    }

    #[test]
    fn construct_path_rejects_oversized_path() {
        let payload = "a".repeat(ABS_PATH_MAX);
        assert_eq!(Tree::construct_path(&payload, 0), Err(StoreError::PathTooLong));
    }

    #[test]
    fn construct_path_accepts_exact_budget() {
        // total length including the trailing null must be <= ABS_PATH_MAX
        let payload = "/".to_string() + &"a".repeat(ABS_PATH_MAX - 2);
        assert!(Tree::construct_path(&payload, 0).is_ok());
    }

    #[test]
    fn write_unwinds_first_created_intermediate_on_simulated_alloc_failure() {
        let tree = Tree::new();
        fail_next_alloc();
        let err = tree.write("/fresh/deep/path", b"v").unwrap_err();
        assert_eq!(err, StoreError::AllocFailed);
        assert!(!tree.exists("/fresh"));
    }

    #[test]
    fn write_unwind_does_not_disturb_preexisting_siblings() {
        let tree = Tree::new();
        tree.write("/existing", b"keep").unwrap();
        fail_next_alloc();
        let err = tree.write("/fresh/deep", b"v").unwrap_err();
        assert_eq!(err, StoreError::AllocFailed);
        assert_eq!(tree.lookup("/existing").unwrap().value, Some(b"keep".to_vec()));
    }
}
