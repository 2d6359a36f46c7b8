use super::nibbles::{bytes_to_nibbles, compact_decode};
use super::patricia::receipt_key;
use ethers::types::H256;
use ethers::utils::keccak256;
use ethers::utils::rlp::{DecoderError, Rlp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("proof ends before reaching node {0:?}")]
    MissingNode(H256),
    #[error("proof node hash mismatch: expected {expected:?}, got {actual:?}")]
    HashMismatch { expected: H256, actual: H256 },
    #[error("malformed trie node: {0}")]
    MalformedNode(String),
    #[error("rlp decoding failed: {0}")]
    Rlp(#[from] DecoderError),
}

// How a parent refers to the next node on the path
enum NodeRef {
    Hash(H256),
    Inline(Vec<u8>),
}

/// Walks `proof` from `root` along `key`.
///
/// Each hash-referenced node must be the next proof element and hash to its
/// reference; embedded nodes are read from their parent. Returns the stored
/// value, `None` for a proven absence, or an error when the proof does not
/// chain to `root`.
pub fn read_proof(root: H256, key: &[u8], proof: &[Vec<u8>]) -> Result<Option<Vec<u8>>, ProofError> {
    let nibbles = bytes_to_nibbles(key);
    let mut elements = proof.iter();
    let mut next = NodeRef::Hash(root);
    let mut depth = 0;

    loop {
        let encoded = match next {
            NodeRef::Hash(expected) => {
                let element = elements.next().ok_or(ProofError::MissingNode(expected))?;
                let actual = H256::from(keccak256(element));
                if actual != expected {
                    return Err(ProofError::HashMismatch { expected, actual });
                }
                element.clone()
            }
            NodeRef::Inline(bytes) => bytes,
        };

        let node = Rlp::new(&encoded);
        if !node.is_list() {
            // Only the empty node may be a string; it proves absence
            return if node.is_empty() {
                Ok(None)
            } else {
                Err(ProofError::MalformedNode("unexpected string node".to_string()))
            };
        }

        match node.item_count()? {
            2 => {
                let (path, is_leaf) = compact_decode(node.at(0)?.data()?)?;
                let remaining = &nibbles[depth..];
                if is_leaf {
                    if remaining != path.as_slice() {
                        return Ok(None);
                    }
                    return Ok(Some(node.at(1)?.data()?.to_vec()));
                }
                if !remaining.starts_with(&path) {
                    return Ok(None);
                }
                depth += path.len();
                next = child_ref(&node.at(1)?)?;
            }
            17 => {
                if depth == nibbles.len() {
                    let value = node.at(16)?.data()?;
                    return Ok((!value.is_empty()).then(|| value.to_vec()));
                }
                let child = node.at(nibbles[depth] as usize)?;
                depth += 1;
                if child.is_empty() {
                    return Ok(None);
                }
                next = child_ref(&child)?;
            }
            count => {
                return Err(ProofError::MalformedNode(format!("node with {} items", count)));
            }
        }
    }
}

fn child_ref(item: &Rlp<'_>) -> Result<NodeRef, ProofError> {
    if item.is_list() {
        return Ok(NodeRef::Inline(item.as_raw().to_vec()));
    }
    let data = item.data()?;
    if data.len() == 32 {
        Ok(NodeRef::Hash(H256::from_slice(data)))
    } else {
        Err(ProofError::MalformedNode(format!("child reference of {} bytes", data.len())))
    }
}

/// True iff `proof` chains to `root` and resolves `key` to exactly `expected`.
pub fn verify_proof(root: H256, key: &[u8], proof: &[Vec<u8>], expected: &[u8]) -> bool {
    matches!(read_proof(root, key, proof), Ok(Some(value)) if value == expected)
}

/// True iff `proof` chains to `root` and shows `key` is absent.
pub fn verify_exclusion(root: H256, key: &[u8], proof: &[Vec<u8>]) -> bool {
    matches!(read_proof(root, key, proof), Ok(None))
}

/// Inclusion proof for one receipt in a block's receipts trie.
/// `merkle_path` lists hash-referenced nodes from the root to the leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptProof {
    pub block_number: u64,
    pub transaction_index: u64,
    pub receipt_bytes: Vec<u8>,
    pub merkle_path: Vec<Vec<u8>>,
}

impl ReceiptProof {
    pub fn key(&self) -> Vec<u8> {
        receipt_key(self.transaction_index)
    }

    pub fn verify(&self, receipts_root: H256) -> bool {
        verify_proof(receipts_root, &self.key(), &self.merkle_path, &self.receipt_bytes)
    }
}
