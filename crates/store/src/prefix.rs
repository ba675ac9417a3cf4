//! A compressed binary trie (PATRICIA-style) mapping byte-string keys to
//! interned record indices, used to intern job names, node names and
//! dependency-origin keys without storing the string more than once.
//!
//! Every node carries a chunk of the key it consumes and is one of three
//! kinds:
//!
//! - a **leaf**, which consumes the remainder of some inserted key and
//!   holds its value;
//! - a **branch**, which consumes a shared chunk and then tests a single
//!   bit of the next byte to choose between two children. A branch may
//!   also carry a value of its own, for the case where one inserted key is
//!   a strict prefix of another;
//! - a **link**, which just consumes a chunk and descends unconditionally
//!   into a single child. A node's inline chunk is capped at `CHUNK_CAP`
//!   bytes, so any edge longer than that — the unshared tail of an
//!   inserted key, most commonly — is represented as a chain of links
//!   topped by the leaf or branch that actually terminates it.
//!
//! Mutation is a direct rewrite of a node's record in place (reusing the
//! same index) plus, at most, one fresh allocation for the sibling created
//! by a split — there's no separate undo log here because a single
//! `FreeListAllocator::set` is already atomic from any other reader's point
//! of view once the mmap write lands.

use crate::alloc::FreeListAllocator;
use crate::arena::{Idx, Record};
use crate::error::StoreResult;
use std::path::Path;

const CHUNK_CAP: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Kind {
    Leaf,
    Branch,
    Link,
}

#[derive(Clone, Copy)]
struct Node {
    kind: Kind,
    chunk_len: u8,
    split_bit: u8,
    chunk: [u8; CHUNK_CAP],
    child_a: Idx,
    child_b: Idx,
    value: u32,
}

impl Node {
    fn chunk(&self) -> &[u8] {
        &self.chunk[..self.chunk_len as usize]
    }

    fn leaf(chunk: &[u8], value: u32) -> Self {
        assert!(chunk.len() <= CHUNK_CAP, "key chunk exceeds inline capacity");
        let mut buf = [0u8; CHUNK_CAP];
        buf[..chunk.len()].copy_from_slice(chunk);
        Node {
            kind: Kind::Leaf,
            chunk_len: chunk.len() as u8,
            split_bit: 0,
            chunk: buf,
            child_a: Idx::NULL,
            child_b: Idx::NULL,
            value,
        }
    }

    fn branch(chunk: &[u8], split_bit: u8, child_a: Idx, child_b: Idx, value: u32) -> Self {
        assert!(chunk.len() <= CHUNK_CAP, "key chunk exceeds inline capacity");
        let mut buf = [0u8; CHUNK_CAP];
        buf[..chunk.len()].copy_from_slice(chunk);
        Node {
            kind: Kind::Branch,
            chunk_len: chunk.len() as u8,
            split_bit,
            chunk: buf,
            child_a,
            child_b,
            value,
        }
    }

    fn link(chunk: &[u8], child: Idx) -> Self {
        assert!(chunk.len() <= CHUNK_CAP, "key chunk exceeds inline capacity");
        let mut buf = [0u8; CHUNK_CAP];
        buf[..chunk.len()].copy_from_slice(chunk);
        Node {
            kind: Kind::Link,
            chunk_len: chunk.len() as u8,
            split_bit: 0,
            chunk: buf,
            child_a: child,
            child_b: Idx::NULL,
            value: 0,
        }
    }
}

impl Record for Node {
    const SIZE: usize = 1 + 1 + 1 + 1 + CHUNK_CAP + 4 + 4 + 4;

    fn to_bytes(&self, out: &mut [u8]) {
        out[0] = match self.kind {
            Kind::Leaf => 0,
            Kind::Branch => 1,
            Kind::Link => 2,
        };
        out[1] = self.chunk_len;
        out[2] = self.split_bit;
        out[3] = 0;
        out[4..4 + CHUNK_CAP].copy_from_slice(&self.chunk);
        let mut off = 4 + CHUNK_CAP;
        out[off..off + 4].copy_from_slice(&self.child_a.0.to_le_bytes());
        off += 4;
        out[off..off + 4].copy_from_slice(&self.child_b.0.to_le_bytes());
        off += 4;
        out[off..off + 4].copy_from_slice(&self.value.to_le_bytes());
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let kind = match buf[0] {
            0 => Kind::Leaf,
            1 => Kind::Branch,
            _ => Kind::Link,
        };
        let chunk_len = buf[1];
        let split_bit = buf[2];
        let mut chunk = [0u8; CHUNK_CAP];
        chunk.copy_from_slice(&buf[4..4 + CHUNK_CAP]);
        let mut off = 4 + CHUNK_CAP;
        let child_a = Idx(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()));
        off += 4;
        let child_b = Idx(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()));
        off += 4;
        let value = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        Node {
            kind,
            chunk_len,
            split_bit,
            chunk,
            child_a,
            child_b,
            value,
        }
    }
}

/// Index of the highest bit at which `a` and `b` differ, numbered `0` (MSB)
/// through `7` (LSB). Callers only invoke this once they know `a != b`.
fn differing_bit(a: u8, b: u8) -> u8 {
    (a ^ b).leading_zeros() as u8
}

fn test_bit(byte: u8, bit: u8) -> bool {
    (byte >> (7 - bit)) & 1 == 1
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

pub struct PrefixTree {
    nodes: FreeListAllocator<Node>,
}

impl PrefixTree {
    pub fn open(path: impl AsRef<Path>, capacity: u64, writable: bool) -> StoreResult<Self> {
        let nodes = FreeListAllocator::open(path, capacity, writable, 0, 4)?;
        Ok(Self { nodes })
    }

    fn root(&self) -> StoreResult<Idx> {
        let header = self.nodes.read_custom_header()?;
        Ok(Idx(u32::from_le_bytes(header[..4].try_into().unwrap())))
    }

    fn set_root(&mut self, idx: Idx) -> StoreResult<()> {
        self.nodes.write_custom_header(&idx.0.to_le_bytes())
    }

    pub fn search(&self, key: &[u8]) -> Option<u32> {
        let root = self.root().ok()?;
        self.search_at(root, key)
    }

    fn search_at(&self, node: Idx, key: &[u8]) -> Option<u32> {
        if node.is_null() {
            return None;
        }
        let n = self.nodes.get(node);
        let chunk = n.chunk();
        if key.len() < chunk.len() || &key[..chunk.len()] != chunk {
            return None;
        }
        let rest = &key[chunk.len()..];
        match n.kind {
            Kind::Leaf => {
                if rest.is_empty() {
                    Some(n.value)
                } else {
                    None
                }
            }
            Kind::Branch => {
                if rest.is_empty() {
                    if n.value != 0 {
                        Some(n.value)
                    } else {
                        None
                    }
                } else {
                    let child = if test_bit(rest[0], n.split_bit) {
                        n.child_b
                    } else {
                        n.child_a
                    };
                    self.search_at(child, rest)
                }
            }
            Kind::Link => {
                if rest.is_empty() {
                    None
                } else {
                    self.search_at(n.child_a, rest)
                }
            }
        }
    }

    /// Returns the value stored for the longest prefix of `key` that was
    /// inserted as a key in its own right, along with how much of `key` it
    /// consumes. Used by the repair tool to recognize a run directory name
    /// as `<job-name>-first`/`-last` once the job name itself is known.
    pub fn longest_prefix(&self, key: &[u8]) -> Option<(usize, u32)> {
        let root = self.root().ok()?;
        let mut best = None;
        self.longest_prefix_at(root, key, 0, &mut best);
        best
    }

    fn longest_prefix_at(&self, node: Idx, key: &[u8], consumed: usize, best: &mut Option<(usize, u32)>) {
        if node.is_null() {
            return;
        }
        let n = self.nodes.get(node);
        let chunk = n.chunk();
        let common = common_prefix_len(chunk, key);
        if common < chunk.len() {
            return;
        }
        let new_consumed = consumed + chunk.len();
        let rest = &key[chunk.len()..];
        match n.kind {
            Kind::Leaf => {
                if rest.is_empty() {
                    *best = Some((new_consumed, n.value));
                }
            }
            Kind::Branch => {
                if n.value != 0 {
                    *best = Some((new_consumed, n.value));
                }
                if !rest.is_empty() {
                    let child = if test_bit(rest[0], n.split_bit) {
                        n.child_b
                    } else {
                        n.child_a
                    };
                    self.longest_prefix_at(child, rest, new_consumed, best);
                }
            }
            Kind::Link => {
                if !rest.is_empty() {
                    self.longest_prefix_at(n.child_a, rest, new_consumed, best);
                }
            }
        }
    }

    /// Finds `key`, or inserts it with a freshly minted value from
    /// `make_value` (called at most once, only when the key is absent).
    /// Returns `(value, true)` when a new entry was created.
    pub fn find_or_insert(
        &mut self,
        key: &[u8],
        make_value: impl FnOnce() -> StoreResult<u32>,
    ) -> StoreResult<(u32, bool)> {
        let root = self.root()?;
        let (new_root, value, created) = self.insert_at(root, key, make_value)?;
        if new_root != root {
            self.set_root(new_root)?;
        }
        Ok((value, created))
    }

    fn alloc_node(&mut self, node: Node) -> StoreResult<Idx> {
        let idx = self.nodes.alloc(1)?;
        self.nodes.set(idx, &node)?;
        Ok(idx)
    }

    /// Allocates `key`'s trailing bytes as a terminal node built by
    /// `terminal`, wrapped in however many [`Kind::Link`] nodes are needed
    /// so no single node's chunk exceeds `CHUNK_CAP`. A `key` that already
    /// fits in one node's chunk just gets the terminal directly.
    fn alloc_chain(
        &mut self,
        key: &[u8],
        terminal: impl FnOnce(&mut Self, &[u8]) -> StoreResult<Idx>,
    ) -> StoreResult<Idx> {
        if key.len() <= CHUNK_CAP {
            return terminal(self, key);
        }
        let tail_len = key.len() % CHUNK_CAP;
        let tail_len = if tail_len == 0 { CHUNK_CAP } else { tail_len };
        let head_len = key.len() - tail_len;
        let mut idx = terminal(self, &key[head_len..])?;
        let mut pos = head_len;
        while pos > 0 {
            pos -= CHUNK_CAP;
            idx = self.alloc_node(Node::link(&key[pos..pos + CHUNK_CAP], idx))?;
        }
        Ok(idx)
    }

    fn insert_at(
        &mut self,
        node: Idx,
        key: &[u8],
        make_value: impl FnOnce() -> StoreResult<u32>,
    ) -> StoreResult<(Idx, u32, bool)> {
        if node.is_null() {
            let value = make_value()?;
            let idx = self.alloc_chain(key, |me, chunk| me.alloc_node(Node::leaf(chunk, value)))?;
            return Ok((idx, value, true));
        }

        let n = self.nodes.get(node);
        let chunk_len = n.chunk_len as usize;
        let chunk: Vec<u8> = n.chunk().to_vec();
        let common = common_prefix_len(&chunk, key);

        if common == chunk_len {
            let rest = &key[common..];
            if rest.is_empty() {
                return match n.kind {
                    Kind::Leaf => Ok((node, n.value, false)),
                    Kind::Branch => {
                        if n.value != 0 {
                            Ok((node, n.value, false))
                        } else {
                            let value = make_value()?;
                            let updated = Node::branch(&chunk, n.split_bit, n.child_a, n.child_b, value);
                            self.nodes.set(node, &updated)?;
                            Ok((node, value, true))
                        }
                    }
                    Kind::Link => {
                        // The new key ends exactly at a chain boundary that
                        // so far has never needed a value. Turn this link
                        // into a branch that carries the new value directly
                        // and keeps routing any longer key through the same
                        // single child it already had.
                        let value = make_value()?;
                        let next = self.nodes.get(n.child_a);
                        let next_chunk = next.chunk();
                        let bit = !next_chunk.is_empty() && test_bit(next_chunk[0], 0);
                        let (child_a, child_b) = if bit { (Idx::NULL, n.child_a) } else { (n.child_a, Idx::NULL) };
                        let updated = Node::branch(&chunk, 0, child_a, child_b, value);
                        self.nodes.set(node, &updated)?;
                        Ok((node, value, true))
                    }
                };
            }
            match n.kind {
                Kind::Leaf => {
                    // This key is a strict extension of an already-stored
                    // key; turn the leaf into a branch carrying the old
                    // value and attach the new suffix as a child.
                    let new_value = make_value()?;
                    let new_leaf = self.alloc_chain(rest, |me, chunk| me.alloc_node(Node::leaf(chunk, new_value)))?;
                    let split_bit = 0;
                    let (child_a, child_b) = if test_bit(rest[0], split_bit) {
                        (Idx::NULL, new_leaf)
                    } else {
                        (new_leaf, Idx::NULL)
                    };
                    let updated = Node::branch(&chunk, split_bit, child_a, child_b, n.value);
                    self.nodes.set(node, &updated)?;
                    Ok((node, new_value, true))
                }
                Kind::Branch => {
                    let go_right = test_bit(rest[0], n.split_bit);
                    let child = if go_right { n.child_b } else { n.child_a };
                    let (new_child, value, created) = self.insert_at(child, rest, make_value)?;
                    let updated = if go_right {
                        Node::branch(&chunk, n.split_bit, n.child_a, new_child, n.value)
                    } else {
                        Node::branch(&chunk, n.split_bit, new_child, n.child_b, n.value)
                    };
                    self.nodes.set(node, &updated)?;
                    Ok((node, value, created))
                }
                Kind::Link => {
                    let (new_child, value, created) = self.insert_at(n.child_a, rest, make_value)?;
                    let updated = Node::link(&chunk, new_child);
                    self.nodes.set(node, &updated)?;
                    Ok((node, value, created))
                }
            }
        } else {
            // The new key diverges partway through this node's chunk:
            // split the edge into a branch over the first differing bit.
            let old_rest = &chunk[common..];
            let key_rest = &key[common..];
            let shared = &chunk[..common];

            if key_rest.is_empty() {
                // The new key ends exactly at the split point; the old
                // subtree hangs off whichever bit its own remainder starts
                // with.
                let value = make_value()?;
                let old_idx = self.relocate(node, old_rest)?;
                let bit = test_bit(old_rest[0], 0);
                let (child_a, child_b) = if bit {
                    (Idx::NULL, old_idx)
                } else {
                    (old_idx, Idx::NULL)
                };
                let branch = Node::branch(shared, 0, child_a, child_b, value);
                self.nodes.set(node, &branch)?;
                Ok((node, value, true))
            } else {
                let split_bit = differing_bit(old_rest[0], key_rest[0]);
                let value = make_value()?;
                let old_idx = self.relocate(node, old_rest)?;
                let new_idx = self.alloc_chain(key_rest, |me, chunk| me.alloc_node(Node::leaf(chunk, value)))?;
                let old_bit = test_bit(old_rest[0], split_bit);
                let (child_a, child_b) = if old_bit {
                    (new_idx, old_idx)
                } else {
                    (old_idx, new_idx)
                };
                let branch = Node::branch(shared, split_bit, child_a, child_b, 0);
                self.nodes.set(node, &branch)?;
                Ok((node, value, true))
            }
        }
    }

    /// Copies a node's contents (with a shortened chunk) into a fresh
    /// record, used when splitting an edge moves the original node one
    /// level deeper in the tree.
    fn relocate(&mut self, node: Idx, new_chunk: &[u8]) -> StoreResult<Idx> {
        let n = self.nodes.get(node);
        let relocated = match n.kind {
            Kind::Leaf => Node::leaf(new_chunk, n.value),
            Kind::Branch => Node::branch(new_chunk, n.split_bit, n.child_a, n.child_b, n.value),
            Kind::Link => Node::link(new_chunk, n.child_a),
        };
        self.alloc_node(relocated)
    }

    pub fn erase(&mut self, key: &[u8]) -> StoreResult<bool> {
        let root = self.root()?;
        let (new_root, removed) = self.erase_at(root, key)?;
        if new_root != root {
            self.set_root(new_root)?;
        }
        Ok(removed)
    }

    fn erase_at(&mut self, node: Idx, key: &[u8]) -> StoreResult<(Idx, bool)> {
        if node.is_null() {
            return Ok((Idx::NULL, false));
        }
        let n = self.nodes.get(node);
        let chunk = n.chunk().to_vec();
        if key.len() < chunk.len() || key[..chunk.len()] != chunk[..] {
            return Ok((node, false));
        }
        let rest = &key[chunk.len()..];
        if rest.is_empty() {
            return match n.kind {
                Kind::Leaf => {
                    self.nodes.dealloc(node, 1)?;
                    Ok((Idx::NULL, true))
                }
                Kind::Branch => {
                    if n.value == 0 {
                        return Ok((node, false));
                    }
                    let updated = Node::branch(&chunk, n.split_bit, n.child_a, n.child_b, 0);
                    self.finish_branch_update(node, updated)
                }
                Kind::Link => Ok((node, false)),
            };
        }
        match n.kind {
            Kind::Leaf => Ok((node, false)),
            Kind::Link => {
                let (new_child, removed) = self.erase_at(n.child_a, rest)?;
                if !removed {
                    return Ok((node, false));
                }
                self.finish_link_update(node, &chunk, new_child)
            }
            Kind::Branch => {
                let go_right = test_bit(rest[0], n.split_bit);
                let child = if go_right { n.child_b } else { n.child_a };
                let (new_child, removed) = self.erase_at(child, rest)?;
                if !removed {
                    return Ok((node, false));
                }
                let updated = if go_right {
                    Node::branch(&chunk, n.split_bit, n.child_a, new_child, n.value)
                } else {
                    Node::branch(&chunk, n.split_bit, new_child, n.child_b, n.value)
                };
                self.finish_branch_update(node, updated)
            }
        }
    }

    /// After its sole child is removed, a link has nothing left to do and is
    /// deallocated too, bubbling the collapse up through the rest of the
    /// chain exactly like an emptied branch.
    fn finish_link_update(&mut self, node: Idx, chunk: &[u8], new_child: Idx) -> StoreResult<(Idx, bool)> {
        if new_child.is_null() {
            self.nodes.dealloc(node, 1)?;
            return Ok((Idx::NULL, true));
        }
        let updated = Node::link(chunk, new_child);
        self.nodes.set(node, &updated)?;
        Ok((node, true))
    }

    /// After a child or value is removed, collapses a now-empty branch
    /// (no value, no children) rather than leaving a dead node behind.
    /// A branch with exactly one remaining child is left in place; it
    /// costs one extra hop on lookup but stays correct.
    fn finish_branch_update(&mut self, node: Idx, updated: Node) -> StoreResult<(Idx, bool)> {
        if updated.value == 0 && updated.child_a.is_null() && updated.child_b.is_null() {
            self.nodes.dealloc(node, 1)?;
            return Ok((Idx::NULL, true));
        }
        self.nodes.set(node, &updated)?;
        Ok((node, true))
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.nodes.flush()
    }

    pub fn clear(&mut self) -> StoreResult<()> {
        self.nodes.clear()?;
        self.set_root(Idx::NULL)
    }

    pub fn check_consistency(&self) -> StoreResult<()> {
        self.nodes.check_consistency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn next_value(counter: &Cell<u32>) -> impl Fn() -> StoreResult<u32> + '_ {
        move || {
            let v = counter.get() + 1;
            counter.set(v);
            Ok(v)
        }
    }

    #[test]
    fn inserts_and_finds_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = PrefixTree::open(dir.path().join("p"), 1 << 20, true).unwrap();
        let counter = Cell::new(0);
        let (a, created_a) = t.find_or_insert(b"alpha", next_value(&counter)).unwrap();
        let (b, created_b) = t.find_or_insert(b"beta", next_value(&counter)).unwrap();
        assert!(created_a && created_b);
        assert_ne!(a, b);
        assert_eq!(t.search(b"alpha"), Some(a));
        assert_eq!(t.search(b"beta"), Some(b));
        assert_eq!(t.search(b"gamma"), None);
    }

    #[test]
    fn reinserting_the_same_key_returns_the_existing_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = PrefixTree::open(dir.path().join("p"), 1 << 20, true).unwrap();
        let counter = Cell::new(0);
        let (a, _) = t.find_or_insert(b"job/name", next_value(&counter)).unwrap();
        let (a2, created) = t.find_or_insert(b"job/name", next_value(&counter)).unwrap();
        assert_eq!(a, a2);
        assert!(!created);
    }

    #[test]
    fn handles_one_key_being_a_prefix_of_another() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = PrefixTree::open(dir.path().join("p"), 1 << 20, true).unwrap();
        let counter = Cell::new(0);
        let (short, _) = t.find_or_insert(b"job", next_value(&counter)).unwrap();
        let (long, _) = t.find_or_insert(b"job/sub", next_value(&counter)).unwrap();
        assert_ne!(short, long);
        assert_eq!(t.search(b"job"), Some(short));
        assert_eq!(t.search(b"job/sub"), Some(long));
        assert_eq!(t.search(b"job/su"), None);
    }

    #[test]
    fn erase_removes_a_key_without_disturbing_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = PrefixTree::open(dir.path().join("p"), 1 << 20, true).unwrap();
        let counter = Cell::new(0);
        let (_, _) = t.find_or_insert(b"alpha", next_value(&counter)).unwrap();
        let (beta, _) = t.find_or_insert(b"beta", next_value(&counter)).unwrap();
        assert!(t.erase(b"alpha").unwrap());
        assert_eq!(t.search(b"alpha"), None);
        assert_eq!(t.search(b"beta"), Some(beta));
        assert!(!t.erase(b"alpha").unwrap());
    }

    #[test]
    fn inserts_and_finds_keys_longer_than_one_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = PrefixTree::open(dir.path().join("p"), 1 << 20, true).unwrap();
        let counter = Cell::new(0);
        let long_a = b"src/very/deeply/nested/module/a-much-longer-name.rs";
        let long_b = b"src/very/deeply/nested/module/another-long-file-name.rs";
        let (a, created_a) = t.find_or_insert(long_a, next_value(&counter)).unwrap();
        let (b, created_b) = t.find_or_insert(long_b, next_value(&counter)).unwrap();
        assert!(created_a && created_b);
        assert_ne!(a, b);
        assert_eq!(t.search(long_a), Some(a));
        assert_eq!(t.search(long_b), Some(b));

        let (a2, created_a2) = t.find_or_insert(long_a, next_value(&counter)).unwrap();
        assert_eq!(a, a2);
        assert!(!created_a2);

        assert!(t.erase(long_a).unwrap());
        assert_eq!(t.search(long_a), None);
        assert_eq!(t.search(long_b), Some(b));
    }

    #[test]
    fn key_exactly_at_a_chain_boundary_gets_its_own_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = PrefixTree::open(dir.path().join("p"), 1 << 20, true).unwrap();
        let counter = Cell::new(0);
        let long_key = b"01234567890123456789-rest-of-a-much-longer-key-than-one-chunk";
        let prefix = &long_key[..CHUNK_CAP];
        let (long, _) = t.find_or_insert(long_key, next_value(&counter)).unwrap();
        let (short, created_short) = t.find_or_insert(prefix, next_value(&counter)).unwrap();
        assert!(created_short);
        assert_ne!(long, short);
        assert_eq!(t.search(long_key), Some(long));
        assert_eq!(t.search(prefix), Some(short));
    }

    #[test]
    fn longest_prefix_matches_the_deepest_stored_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = PrefixTree::open(dir.path().join("p"), 1 << 20, true).unwrap();
        let counter = Cell::new(0);
        let (job, _) = t.find_or_insert(b"job", next_value(&counter)).unwrap();
        let (job_sub, _) = t.find_or_insert(b"job/sub", next_value(&counter)).unwrap();
        assert_eq!(t.longest_prefix(b"job/sub/extra"), Some((7, job_sub)));
        assert_eq!(t.longest_prefix(b"job/other"), Some((3, job)));
        assert_eq!(t.longest_prefix(b"nope"), None);
    }
}
