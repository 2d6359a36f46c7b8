//! Deterministic digest of the Chain-B commitment terms.
//!
//! Every party recomputes this digest independently. The vault emits it with
//! each Commit, Claim and Revert event, and the Ledger-A lock state records it,
//! so a receipt can be matched to the lock it releases.

use ethers::abi::{self, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

pub type CommitmentHash = H256;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentTerms {
    pub chain_id: u64,
    pub owner: Address,
    pub recipient: Address,
    pub amount: U256,
    pub token_id: U256,
    pub token_address: Address,
    pub signature_threshold: u64,
    pub signers: Vec<Address>,
}

impl CommitmentTerms {
    /// Standard ABI encoding of the terms in field order. The signer list
    /// is a dynamic `address[]` tail.
    pub fn abi_encode(&self) -> Vec<u8> {
        abi::encode(&[
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.owner),
            Token::Address(self.recipient),
            Token::Uint(self.amount),
            Token::Uint(self.token_id),
            Token::Address(self.token_address),
            Token::Uint(U256::from(self.signature_threshold)),
            Token::Array(self.signers.iter().copied().map(Token::Address).collect()),
        ])
    }

    pub fn hash(&self) -> CommitmentHash {
        hash(self)
    }
}

/// keccak256 of the ABI encoding. Pure: equal terms always give equal digests.
pub fn hash(terms: &CommitmentTerms) -> CommitmentHash {
    H256::from(keccak256(terms.abi_encode()))
}
