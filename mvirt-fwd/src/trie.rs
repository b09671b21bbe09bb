//! Binary prefix trie with longest-prefix-match lookup.
//!
//! The trie has one writer and any number of lock-free readers:
//! - `Trie` is the writer handle. It is not `Clone` and every mutation takes `&mut self`.
//! - `TrieReader` is a cheap, clonable handle for packet workers. Lookups never lock.
//!
//! Child slots are `ArcSwapOption`s. A missing branch is built completely off-tree
//! and then published with a single store into its attachment slot, so a reader
//! sees either no child or a fully initialized subtree. Entry lists are replaced
//! as a whole, never edited in place. An unlinked node stays alive until the last
//! reader that loaded it drops its reference, which is the reclamation grace period.

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption, Guard};

use crate::error::{FwdError, Result};

/// Default node pool capacity of a trie (root included).
pub const DEFAULT_MAX_NODES: usize = 1 << 20;

/// An entry terminating at a trie node, tagged with its route ID.
#[derive(Debug)]
pub struct TrieEntry<E> {
    pub id: u32,
    pub value: Arc<E>,
}

impl<E> Clone for TrieEntry<E> {
    fn clone(&self) -> Self {
        TrieEntry {
            id: self.id,
            value: Arc::clone(&self.value),
        }
    }
}

/// Snapshot of the entries terminating at one node, most recently inserted first.
pub type EntryList<E> = Arc<Vec<TrieEntry<E>>>;

struct TrieNode<E> {
    children: [ArcSwapOption<TrieNode<E>>; 2],
    entries: ArcSwap<Vec<TrieEntry<E>>>,
}

impl<E> TrieNode<E> {
    fn new() -> Self {
        TrieNode {
            children: [ArcSwapOption::empty(), ArcSwapOption::empty()],
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Entries of this node if it terminates at least one prefix.
    fn matched(&self) -> Option<Guard<EntryList<E>>> {
        let entries = self.entries.load();
        if entries.is_empty() {
            None
        } else {
            Some(entries)
        }
    }

    /// A node with neither children nor entries.
    fn is_stub(&self) -> bool {
        self.children.iter().all(|slot| slot.load().is_none()) && self.entries.load().is_empty()
    }

    fn push_entry(&self, id: u32, value: E) -> Result<()> {
        let current = self.entries.load();
        if current.iter().any(|entry| entry.id == id) {
            return Err(FwdError::DuplicateRouteId(id));
        }

        let mut next = Vec::with_capacity(current.len() + 1);
        next.push(TrieEntry {
            id,
            value: Arc::new(value),
        });
        next.extend(current.iter().cloned());
        self.entries.store(Arc::new(next));
        Ok(())
    }

    fn remove_entry(&self, id: u32) -> Result<Arc<E>> {
        let current = self.entries.load();
        let Some(pos) = current.iter().position(|entry| entry.id == id) else {
            return Err(FwdError::RouteNotFound);
        };

        let removed = Arc::clone(&current[pos].value);
        let next: Vec<_> = current
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != pos)
            .map(|(_, entry)| entry.clone())
            .collect();
        self.entries.store(Arc::new(next));
        Ok(removed)
    }
}

/// Node statistics gathered by a full walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrieStats {
    /// Reachable nodes, root included.
    pub nodes: usize,
    /// Reachable non-root nodes without children and entries. Always zero.
    pub stubs: usize,
    /// Entries across all nodes.
    pub entries: usize,
}

/// Writer handle of a prefix trie.
pub struct Trie<E> {
    root: Arc<TrieNode<E>>,
    bit_width: u8,
    node_count: usize,
    max_nodes: usize,
}

impl<E> Trie<E> {
    /// Create an empty trie for keys of `bit_width` bits.
    pub fn new(bit_width: u8) -> Self {
        Self::with_capacity(bit_width, DEFAULT_MAX_NODES)
    }

    /// Create an empty trie whose node pool holds at most `max_nodes` nodes.
    pub fn with_capacity(bit_width: u8, max_nodes: usize) -> Self {
        Trie {
            root: Arc::new(TrieNode::new()),
            bit_width,
            node_count: 1,
            max_nodes: max_nodes.max(1),
        }
    }

    /// Create a lock-free read handle.
    pub fn reader(&self) -> TrieReader<E> {
        TrieReader {
            root: Arc::clone(&self.root),
            bit_width: self.bit_width,
        }
    }

    pub fn bit_width(&self) -> u8 {
        self.bit_width
    }

    /// Allocated nodes, root included.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn capacity(&self) -> usize {
        self.max_nodes
    }

    /// Insert `value` under the first `key_len` bits of `key`.
    ///
    /// Fails with `DuplicateRouteId` if `id` already terminates at that node and
    /// with `AllocationFailure` if the node pool runs dry. A failed insert leaves
    /// the published trie untouched.
    pub fn insert(&mut self, key: &[u8], key_len: u8, id: u32, value: E) -> Result<()> {
        check_key(self.bit_width, key, key_len)?;
        let key_len = key_len as usize;

        let (attach, depth) = self.descend(key, key_len);
        if depth == key_len {
            return attach.push_entry(id, value);
        }

        let branch = self.build_branch(key, depth, key_len, id, value)?;
        attach.children[key_bit(key, depth)].store(Some(branch));
        Ok(())
    }

    /// Remove the entry `id` terminating at the first `key_len` bits of `key`.
    ///
    /// Nodes left without children and entries are unlinked on the way back
    /// towards the root.
    pub fn delete(&mut self, key: &[u8], key_len: u8, id: u32) -> Result<Arc<E>> {
        check_key(self.bit_width, key, key_len)?;

        let mut path = Vec::with_capacity(key_len as usize);
        let mut node = Arc::clone(&self.root);
        for depth in 0..key_len as usize {
            let bit = key_bit(key, depth);
            let Some(child) = node.children[bit].load_full() else {
                return Err(FwdError::RouteNotFound);
            };
            path.push((node, bit));
            node = child;
        }

        let removed = node.remove_entry(id)?;
        self.prune(path, node);
        Ok(removed)
    }

    /// Longest-prefix match of the first `key_len` bits of `key`.
    pub fn lookup(&self, key: &[u8], key_len: u8) -> Option<EntryList<E>> {
        lookup_from(&self.root, self.bit_width, key, key_len)
    }

    /// Visit, pre-order, every node below the first `key_len` bits of `key` that
    /// carries entries. The visitor receives the reconstructed prefix and its length.
    pub fn traverse<F>(&self, key: &[u8], key_len: u8, visit: F) -> Result<()>
    where
        F: FnMut(&[u8], u8, &[TrieEntry<E>]),
    {
        traverse_from(&self.root, self.bit_width, key, key_len, visit)
    }

    /// Detach every node and entry. Readers still walking the old nodes finish undisturbed.
    pub fn clear(&mut self) {
        for slot in &self.root.children {
            slot.store(None);
        }
        self.root.entries.store(Arc::new(Vec::new()));
        self.node_count = 1;
    }

    /// Walk the whole trie and count nodes, stubs and entries.
    pub fn stats(&self) -> TrieStats {
        let mut stats = TrieStats::default();
        let mut stack = vec![(Arc::clone(&self.root), true)];

        while let Some((node, is_root)) = stack.pop() {
            stats.nodes += 1;
            stats.entries += node.entries.load().len();
            if !is_root && node.is_stub() {
                stats.stubs += 1;
            }
            for slot in &node.children {
                if let Some(child) = slot.load_full() {
                    stack.push((child, false));
                }
            }
        }

        stats
    }

    /// Deepest existing node along the key path and its depth.
    fn descend(&self, key: &[u8], key_len: usize) -> (Arc<TrieNode<E>>, usize) {
        let mut node = Arc::clone(&self.root);
        let mut depth = 0;

        while depth < key_len {
            let Some(child) = node.children[key_bit(key, depth)].load_full() else {
                break;
            };
            node = child;
            depth += 1;
        }

        (node, depth)
    }

    /// Build the unpublished branch for depths `from + 1 ..= to`, leaf first.
    fn build_branch(
        &mut self,
        key: &[u8],
        from: usize,
        to: usize,
        id: u32,
        value: E,
    ) -> Result<Arc<TrieNode<E>>> {
        let leaf = self.alloc_node()?;
        leaf.entries.store(Arc::new(vec![TrieEntry {
            id,
            value: Arc::new(value),
        }]));

        let mut allocated = 1;
        let mut branch = Arc::new(leaf);
        for depth in (from + 1..to).rev() {
            let parent = match self.alloc_node() {
                Ok(node) => node,
                Err(e) => {
                    // Never published; dropping `branch` frees it.
                    self.node_count -= allocated;
                    return Err(e);
                }
            };
            parent.children[key_bit(key, depth)].store(Some(branch));
            branch = Arc::new(parent);
            allocated += 1;
        }

        Ok(branch)
    }

    fn alloc_node(&mut self) -> Result<TrieNode<E>> {
        if self.node_count >= self.max_nodes {
            return Err(FwdError::AllocationFailure {
                capacity: self.max_nodes,
            });
        }
        self.node_count += 1;
        Ok(TrieNode::new())
    }

    /// Unlink empty nodes from `node` upwards, stopping at the first ancestor in use.
    fn prune(&mut self, mut path: Vec<(Arc<TrieNode<E>>, usize)>, mut node: Arc<TrieNode<E>>) {
        while let Some((parent, bit)) = path.pop() {
            if !node.is_stub() {
                break;
            }
            parent.children[bit].store(None);
            self.node_count -= 1;
            node = parent;
        }
    }
}

/// Lock-free read handle of a prefix trie.
pub struct TrieReader<E> {
    root: Arc<TrieNode<E>>,
    bit_width: u8,
}

impl<E> Clone for TrieReader<E> {
    fn clone(&self) -> Self {
        TrieReader {
            root: Arc::clone(&self.root),
            bit_width: self.bit_width,
        }
    }
}

impl<E> TrieReader<E> {
    pub fn bit_width(&self) -> u8 {
        self.bit_width
    }

    /// Longest-prefix match of the first `key_len` bits of `key`.
    pub fn lookup(&self, key: &[u8], key_len: u8) -> Option<EntryList<E>> {
        lookup_from(&self.root, self.bit_width, key, key_len)
    }

    /// See [`Trie::traverse`].
    pub fn traverse<F>(&self, key: &[u8], key_len: u8, visit: F) -> Result<()>
    where
        F: FnMut(&[u8], u8, &[TrieEntry<E>]),
    {
        traverse_from(&self.root, self.bit_width, key, key_len, visit)
    }
}

/// Bit `index` of `key`, most significant bit first.
#[inline]
fn key_bit(key: &[u8], index: usize) -> usize {
    ((key[index / 8] >> (7 - index % 8)) & 1) as usize
}

#[inline]
fn set_bit(key: &mut [u8], index: usize, bit: usize) {
    let mask = 0x80u8 >> (index % 8);
    if bit == 1 {
        key[index / 8] |= mask;
    } else {
        key[index / 8] &= !mask;
    }
}

fn check_key(bit_width: u8, key: &[u8], key_len: u8) -> Result<()> {
    if key_len > bit_width {
        return Err(FwdError::InvalidPrefixLength {
            prefix_len: key_len,
            max: bit_width,
        });
    }
    if key.len() * 8 < key_len as usize {
        return Err(FwdError::InvalidFamily);
    }
    Ok(())
}

fn lookup_from<E>(
    root: &TrieNode<E>,
    bit_width: u8,
    key: &[u8],
    key_len: u8,
) -> Option<EntryList<E>> {
    let key_len = (key_len.min(bit_width) as usize).min(key.len() * 8);

    // Entries at the root terminate the zero-length (default) prefix.
    let mut best = root.matched();
    if key_len == 0 {
        return best.map(Guard::into_inner);
    }

    let mut slot = root.children[key_bit(key, 0)].load();
    let mut depth = 1;
    loop {
        let next = match slot.as_ref() {
            Some(node) => {
                if let Some(entries) = node.matched() {
                    best = Some(entries);
                }
                if depth == key_len {
                    break;
                }
                node.children[key_bit(key, depth)].load()
            }
            None => break,
        };
        depth += 1;
        slot = next;
    }

    best.map(Guard::into_inner)
}

fn traverse_from<E, F>(
    root: &Arc<TrieNode<E>>,
    bit_width: u8,
    key: &[u8],
    key_len: u8,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(&[u8], u8, &[TrieEntry<E>]),
{
    check_key(bit_width, key, key_len)?;

    let mut prefix = vec![0u8; bit_width as usize / 8];
    let mut node = Arc::clone(root);
    for depth in 0..key_len as usize {
        let bit = key_bit(key, depth);
        set_bit(&mut prefix, depth, bit);
        let Some(child) = node.children[bit].load_full() else {
            return Err(FwdError::RouteNotFound);
        };
        node = child;
    }

    walk(&node, &mut prefix, key_len as usize, &mut visit);
    Ok(())
}

fn walk<E, F>(node: &TrieNode<E>, prefix: &mut [u8], depth: usize, visit: &mut F)
where
    F: FnMut(&[u8], u8, &[TrieEntry<E>]),
{
    {
        let entries = node.entries.load();
        if !entries.is_empty() {
            visit(prefix, depth as u8, &entries);
        }
    }

    for (bit, slot) in node.children.iter().enumerate() {
        if let Some(child) = slot.load_full() {
            set_bit(prefix, depth, bit);
            walk(&child, prefix, depth + 1, visit);
            set_bit(prefix, depth, 0);
        }
    }
}
