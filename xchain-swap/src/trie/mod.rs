//! Merkle-Patricia trie engine for Chain-B receipts.
//!
//! Builds the receipts trie of a block, produces inclusion proofs and
//! verifies them against a receipts root. Follows the Ethereum encoding:
//! hex-prefix paths, RLP nodes, 32-byte keccak references and embedding
//! of nodes shorter than 32 bytes.

pub mod nibbles;
pub mod node;
pub mod patricia;
pub mod proof;

pub use patricia::{receipt_key, PatriciaTrie};
pub use proof::{read_proof, verify_exclusion, verify_proof, ProofError, ReceiptProof};
