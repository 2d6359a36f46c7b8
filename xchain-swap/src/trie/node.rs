use super::nibbles::compact_encode;
use ethers::types::H256;
use ethers::utils::keccak256;
use ethers::utils::rlp::RlpStream;

/// In-memory Merkle-Patricia node. Paths are nibble sequences.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Empty,
    Leaf { path: Vec<u8>, value: Vec<u8> },
    Extension { path: Vec<u8>, child: Box<Node> },
    Branch { children: Box<[Node; 16]>, value: Option<Vec<u8>> },
}

impl Node {
    pub fn empty_branch() -> [Node; 16] {
        std::array::from_fn(|_| Node::Empty)
    }

    /// Canonical RLP encoding of the node.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Node::Empty => vec![0x80],
            Node::Leaf { path, value } => {
                let mut stream = RlpStream::new_list(2);
                stream.append(&compact_encode(path, true));
                stream.append(value);
                stream.out().to_vec()
            }
            Node::Extension { path, child } => {
                let mut stream = RlpStream::new_list(2);
                stream.append(&compact_encode(path, false));
                append_child(&mut stream, child);
                stream.out().to_vec()
            }
            Node::Branch { children, value } => {
                let mut stream = RlpStream::new_list(17);
                for child in children.iter() {
                    append_child(&mut stream, child);
                }
                match value {
                    Some(value) => stream.append(value),
                    None => stream.append_empty_data(),
                };
                stream.out().to_vec()
            }
        }
    }

    pub fn hash(&self) -> H256 {
        H256::from(keccak256(self.encode()))
    }

    /// Nodes under 32 bytes are embedded in their parent; larger ones are
    /// referenced by hash and must appear in a proof.
    pub fn is_hash_referenced(&self) -> bool {
        self.encode().len() >= 32
    }
}

fn append_child(stream: &mut RlpStream, child: &Node) {
    if let Node::Empty = child {
        stream.append_empty_data();
        return;
    }
    let encoded = child.encode();
    if encoded.len() < 32 {
        stream.append_raw(&encoded, 1);
    } else {
        stream.append(&keccak256(&encoded).to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_node_hash_is_empty_trie_root() {
        let expected: H256 = "0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
            .parse()
            .unwrap();
        assert_eq!(Node::Empty.hash(), expected);
    }

    #[test]
    fn small_children_are_embedded() {
        let leaf = Node::Leaf { path: vec![1], value: vec![0x01] };
        assert!(!leaf.is_hash_referenced());

        let mut children = Node::empty_branch();
        children[3] = leaf.clone();
        let branch = Node::Branch { children: Box::new(children), value: None };
        let encoded = branch.encode();
        // The embedded leaf's RLP appears verbatim in the parent
        let leaf_rlp = leaf.encode();
        assert!(encoded.windows(leaf_rlp.len()).any(|w| w == leaf_rlp.as_slice()));
    }

    #[test]
    fn large_children_are_hashed() {
        let leaf = Node::Leaf { path: vec![1, 2], value: vec![0xaa; 40] };
        assert!(leaf.is_hash_referenced());
        let ext = Node::Extension { path: vec![0], child: Box::new(leaf.clone()) };
        let encoded = ext.encode();
        let hash = leaf.hash();
        assert!(encoded.windows(32).any(|w| w == hash.as_bytes()));
    }
}
