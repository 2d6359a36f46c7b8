use crate::attestation::crypto::PublicKey;
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifies one swap instance. Equal to the Ledger-A id of the draft (lock) transaction.
pub type SwapId = H256;

/// Ledger-A transaction identifier.
pub type TxId = H256;

// A party on Ledger A: a well-known name bound to an ed25519 key
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerIdentity {
    pub name: String,
    pub public_key: PublicKey,
}

impl LedgerIdentity {
    pub fn new(name: impl Into<String>, public_key: PublicKey) -> Self {
        LedgerIdentity { name: name.into(), public_key }
    }

    pub fn key_bytes(&self) -> [u8; 32] {
        self.public_key.to_bytes()
    }
}

// Implement PartialEq manually so equality is defined over the raw key bytes
impl PartialEq for LedgerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.public_key.as_bytes() == other.public_key.as_bytes()
    }
}

impl Eq for LedgerIdentity {}

impl Hash for LedgerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.public_key.as_bytes().hash(state);
    }
}

impl fmt::Display for LedgerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A validator known to both ledgers: it signs block attestations with its
/// Ledger-A key and notarization attestations with its Chain-B key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatorIdentity {
    pub party: LedgerIdentity,
    pub evm_address: Address,
}

impl ValidatorIdentity {
    pub fn name(&self) -> &str {
        &self.party.name
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.party.public_key
    }
}

impl fmt::Display for ValidatorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.party.name, self.evm_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::crypto::generate_keypair;
    use std::collections::HashSet;

    #[test]
    fn ledger_identity_equality_and_hash() {
        let key1 = generate_keypair();
        let key2 = generate_keypair();
        let a = LedgerIdentity::new("PartyA", key1.verifying_key());
        let a_again = LedgerIdentity::new("PartyA", key1.verifying_key());
        let a_other_key = LedgerIdentity::new("PartyA", key2.verifying_key());
        let b = LedgerIdentity::new("PartyB", key1.verifying_key());

        assert_eq!(a, a_again);
        assert_ne!(a, a_other_key);
        assert_ne!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        set.insert(a_again); // Dupe
        set.insert(a_other_key);
        set.insert(b);
        assert_eq!(set.len(), 3);
        assert!(set.contains(&a));
    }

    #[test]
    fn validator_identity_display() {
        let key = generate_keypair();
        let validator = ValidatorIdentity {
            party: LedgerIdentity::new("Validator1", key.verifying_key()),
            evm_address: Address::from_low_u64_be(1),
        };
        assert_eq!(validator.name(), "Validator1");
        assert!(validator.to_string().starts_with("Validator1 ("));
        assert_eq!(validator.public_key(), &key.verifying_key());
    }
}
