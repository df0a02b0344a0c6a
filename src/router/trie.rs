//! Compressed prefix (radix) trie keyed by strings.
//!
//! Edges hold byte segments rather than `str` slices: two keys may share a
//! prefix that ends inside a multi-byte character, and splitting there must
//! not panic. Full keys are always reassembled from whole inserted strings.
//!
//! Structural invariants, restored after every `insert` and `remove`:
//! - a node has at most one child per leading byte;
//! - apart from the root, a node without a value has at least two children.

use std::collections::BTreeMap;
use std::mem;
use std::ops::ControlFlow;

#[derive(Debug)]
struct Node<V> {
    segment: Vec<u8>,
    value: Option<V>,
    children: BTreeMap<u8, Node<V>>,
}

impl<V> Node<V> {
    fn root() -> Self {
        Self {
            segment: Vec::new(),
            value: None,
            children: BTreeMap::new(),
        }
    }

    fn leaf(segment: &[u8], value: V) -> Self {
        Self {
            segment: segment.to_vec(),
            value: Some(value),
            children: BTreeMap::new(),
        }
    }
}

/// A radix trie mapping string keys to values.
///
/// The empty string is never stored: `insert`, `get`, and `remove` treat it
/// as absent.
#[derive(Debug)]
pub struct PrefixTrie<V> {
    root: Node<V>,
    len: usize,
}

impl<V> Default for PrefixTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> PrefixTrie<V> {
    pub fn new() -> Self {
        Self {
            root: Node::root(),
            len: 0,
        }
    }

    /// Number of keys currently holding a value.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `value` under `key`, returning the value it replaced.
    pub fn insert(&mut self, key: &str, value: V) -> Option<V> {
        if key.is_empty() {
            return None;
        }

        let previous = insert_at(&mut self.root, key.as_bytes(), value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Exact-match lookup.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.find(key.as_bytes())?.value.as_ref()
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.find_mut(key.as_bytes())?.value.as_mut()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`, collapsing any node the removal left redundant.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        if key.is_empty() {
            return None;
        }

        let removed = remove_at(&mut self.root, key.as_bytes());
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Pre-order traversal in ascending byte order of each node's first edge.
    ///
    /// The visitor returns `ControlFlow::Break(())` to stop early.
    pub fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &V) -> ControlFlow<()>,
    {
        let mut path = Vec::new();
        let _ = walk_from(&self.root, &mut path, &mut visit);
    }

    /// All keys in traversal order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len);
        self.walk(|key, _| {
            keys.push(key.to_string());
            ControlFlow::Continue(())
        });
        keys
    }

    /// The longest stored key that is a prefix of `key`, with its value.
    pub fn longest_prefix<'k>(&self, key: &'k str) -> Option<(&'k str, &V)> {
        let bytes = key.as_bytes();
        let mut best = None;
        let mut node = &self.root;
        let mut consumed = 0;

        loop {
            if let Some(value) = node.value.as_ref() {
                best = Some((consumed, value));
            }

            let rest = &bytes[consumed..];
            let Some(child) = rest.first().and_then(|b| node.children.get(b)) else {
                break;
            };
            if !rest.starts_with(&child.segment) {
                break;
            }

            consumed += child.segment.len();
            node = child;
        }

        let (end, value) = best?;
        Some((key.get(..end)?, value))
    }

    fn find(&self, mut key: &[u8]) -> Option<&Node<V>> {
        if key.is_empty() {
            return None;
        }

        let mut node = &self.root;
        while let Some(first) = key.first() {
            let child = node.children.get(first)?;
            key = key.strip_prefix(child.segment.as_slice())?;
            node = child;
        }
        Some(node)
    }

    fn find_mut(&mut self, mut key: &[u8]) -> Option<&mut Node<V>> {
        if key.is_empty() {
            return None;
        }

        let mut node = &mut self.root;
        while let Some(first) = key.first() {
            let child = node.children.get_mut(first)?;
            key = key.strip_prefix(child.segment.as_slice())?;
            node = child;
        }
        Some(node)
    }

    #[cfg(test)]
    fn node_count(&self) -> usize {
        fn count<V>(node: &Node<V>) -> usize {
            1 + node.children.values().map(count).sum::<usize>()
        }
        count(&self.root) - 1
    }

    #[cfg(test)]
    fn is_compressed(&self) -> bool {
        fn check<V>(node: &Node<V>) -> bool {
            node.children.iter().all(|(first, child)| {
                child.segment.first() == Some(first)
                    && (child.value.is_some() || child.children.len() >= 2)
                    && check(child)
            })
        }
        check(&self.root)
    }
}

fn insert_at<V>(node: &mut Node<V>, key: &[u8], value: V) -> Option<V> {
    let first = key[0];
    let Some(child) = node.children.get_mut(&first) else {
        node.children.insert(first, Node::leaf(key, value));
        return None;
    };

    let common = common_prefix_len(key, &child.segment);

    if common == child.segment.len() {
        if common == key.len() {
            return child.value.replace(value);
        }
        return insert_at(child, &key[common..], value);
    }

    // The child's segment diverges from the key (or extends past it): split it
    // so the child keeps only the shared prefix.
    let suffix = child.segment.split_off(common);
    let moved = Node {
        value: child.value.take(),
        children: mem::take(&mut child.children),
        segment: suffix,
    };
    child.children.insert(moved.segment[0], moved);

    if common == key.len() {
        child.value = Some(value);
    } else {
        let rest = &key[common..];
        child.children.insert(rest[0], Node::leaf(rest, value));
    }
    None
}

fn remove_at<V>(node: &mut Node<V>, key: &[u8]) -> Option<V> {
    let first = key[0];
    let child = node.children.get_mut(&first)?;
    let rest = key.strip_prefix(child.segment.as_slice())?;

    let removed = if rest.is_empty() {
        child.value.take()?
    } else {
        remove_at(child, rest)?
    };

    if child.value.is_none() && child.children.len() < 2 {
        if let Some((_, grandchild)) = child.children.pop_first() {
            let mut segment = mem::take(&mut child.segment);
            segment.extend_from_slice(&grandchild.segment);
            *child = Node { segment, ..grandchild };
        } else {
            node.children.remove(&first);
        }
    }

    Some(removed)
}

fn walk_from<V, F>(node: &Node<V>, path: &mut Vec<u8>, visit: &mut F) -> ControlFlow<()>
where
    F: FnMut(&str, &V) -> ControlFlow<()>,
{
    let mark = path.len();
    path.extend_from_slice(&node.segment);

    if let Some(value) = node.value.as_ref() {
        // Valued nodes end exactly where an inserted `&str` ended.
        if let Ok(key) = std::str::from_utf8(path) {
            visit(key, value)?;
        }
    }

    for child in node.children.values() {
        walk_from(child, path, visit)?;
    }

    path.truncate(mark);
    ControlFlow::Continue(())
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
