use super::nibbles::{bytes_to_nibbles, common_prefix_len};
use super::node::Node;
use ethers::types::H256;
use ethers::utils::rlp;
use std::collections::BTreeMap;

/// Immutable Merkle-Patricia trie built in one pass from a complete key set,
/// as done for a block's receipts.
#[derive(Clone, Debug)]
pub struct PatriciaTrie {
    root: Node,
    root_hash: H256,
    len: usize,
}

/// Receipts are keyed by the RLP encoding of their index in the block.
pub fn receipt_key(transaction_index: u64) -> Vec<u8> {
    rlp::encode(&transaction_index).to_vec()
}

impl PatriciaTrie {
    /// Builds a trie over arbitrary keys. A repeated key keeps its last value.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let sorted: BTreeMap<Vec<u8>, Vec<u8>> = entries
            .into_iter()
            .map(|(key, value)| (bytes_to_nibbles(&key), value))
            .collect();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = sorted.into_iter().collect();
        let root = build_node(&entries, 0);
        let root_hash = root.hash();
        PatriciaTrie { root, root_hash, len: entries.len() }
    }

    /// Builds the receipts trie of a block from `(transaction_index, receipt_rlp)` pairs.
    pub fn build(receipts: &[(u64, Vec<u8>)]) -> Self {
        Self::from_entries(
            receipts
                .iter()
                .map(|(index, receipt)| (receipt_key(*index), receipt.clone())),
        )
    }

    pub fn root_hash(&self) -> H256 {
        self.root_hash
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let nibbles = bytes_to_nibbles(key);
        let mut node = &self.root;
        let mut depth = 0;
        loop {
            match node {
                Node::Empty => return None,
                Node::Leaf { path, value } => {
                    return (nibbles[depth..] == path[..]).then_some(value.as_slice());
                }
                Node::Extension { path, child } => {
                    if !nibbles[depth..].starts_with(path) {
                        return None;
                    }
                    depth += path.len();
                    node = child;
                }
                Node::Branch { children, value } => {
                    if depth == nibbles.len() {
                        return value.as_deref();
                    }
                    node = &children[nibbles[depth] as usize];
                    depth += 1;
                }
            }
        }
    }

    /// Encoded nodes from the root down to where `key` resolves. Only nodes
    /// referenced by hash are listed; embedded ones travel inside their parent.
    /// The root is always first. Valid for absent keys too (exclusion proof).
    pub fn prove(&self, key: &[u8]) -> Vec<Vec<u8>> {
        let nibbles = bytes_to_nibbles(key);
        let mut proof = vec![self.root.encode()];
        let mut node = &self.root;
        let mut depth = 0;
        loop {
            let next = match node {
                Node::Empty | Node::Leaf { .. } => break,
                Node::Extension { path, child } => {
                    if !nibbles[depth..].starts_with(path) {
                        break;
                    }
                    depth += path.len();
                    child.as_ref()
                }
                Node::Branch { children, .. } => {
                    if depth == nibbles.len() {
                        break;
                    }
                    let child = &children[nibbles[depth] as usize];
                    depth += 1;
                    child
                }
            };
            if let Node::Empty = next {
                break;
            }
            if next.is_hash_referenced() {
                proof.push(next.encode());
            }
            node = next;
        }
        proof
    }
}

// `entries` are sorted, unique nibble paths that agree on the first `depth` nibbles
fn build_node(entries: &[(Vec<u8>, Vec<u8>)], depth: usize) -> Node {
    match entries {
        [] => Node::Empty,
        [(path, value)] => Node::Leaf { path: path[depth..].to_vec(), value: value.clone() },
        _ => {
            let shared = shared_prefix_len(entries, depth);
            if shared > 0 {
                Node::Extension {
                    path: entries[0].0[depth..depth + shared].to_vec(),
                    child: Box::new(build_branch(entries, depth + shared)),
                }
            } else {
                build_branch(entries, depth)
            }
        }
    }
}

fn build_branch(entries: &[(Vec<u8>, Vec<u8>)], depth: usize) -> Node {
    let mut children = Node::empty_branch();
    let mut value = None;
    let mut start = 0;
    // Sorted input: a key ending at `depth` comes first, then one run per nibble
    if let Some((path, v)) = entries.first() {
        if path.len() == depth {
            value = Some(v.clone());
            start = 1;
        }
    }
    while start < entries.len() {
        let nibble = entries[start].0[depth];
        let end = entries[start..]
            .iter()
            .position(|(path, _)| path[depth] != nibble)
            .map_or(entries.len(), |offset| start + offset);
        children[nibble as usize] = build_node(&entries[start..end], depth + 1);
        start = end;
    }
    Node::Branch { children: Box::new(children), value }
}

fn shared_prefix_len(entries: &[(Vec<u8>, Vec<u8>)], depth: usize) -> usize {
    let first = &entries[0].0[depth..];
    entries[1..]
        .iter()
        .map(|(path, _)| common_prefix_len(first, &path[depth..]))
        .min()
        .unwrap_or(0)
}
