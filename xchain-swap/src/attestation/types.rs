// Signed statements validators return to the coordinator.

use crate::attestation::crypto::{self, recover_evm_signer, PartySignature};
use crate::data_structures::{TxId, ValidatorIdentity};
use crate::onchain::EvmSignature;
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const BLOCK_ATTESTATION_DOMAIN: &[u8] = b"xchain-swap/block-attestation/v1";

/// A validator's signed claim that Chain-B block `block_number` has
/// receipts root `receipts_root`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAttestation {
    pub validator: ValidatorIdentity,
    pub block_number: u64,
    pub receipts_root: H256,
    pub signature: PartySignature, // ed25519, by validator.party
    pub attested_at_ms: i64,
}

impl BlockAttestation {
    /// Bytes signed for a block attestation.
    pub fn message(block_number: u64, receipts_root: &H256) -> Vec<u8> {
        let mut message = Vec::with_capacity(BLOCK_ATTESTATION_DOMAIN.len() + 8 + 32);
        message.extend_from_slice(BLOCK_ATTESTATION_DOMAIN);
        message.extend_from_slice(&block_number.to_be_bytes());
        message.extend_from_slice(receipts_root.as_bytes());
        message
    }

    pub fn sign(
        validator: ValidatorIdentity,
        signing_key: &crypto::SecretKey,
        block_number: u64,
        receipts_root: H256,
    ) -> Self {
        let signature = crypto::sign(&Self::message(block_number, &receipts_root), signing_key);
        BlockAttestation {
            validator,
            block_number,
            receipts_root,
            signature,
            attested_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn verify(&self) -> bool {
        crypto::verify(
            &Self::message(self.block_number, &self.receipts_root),
            &self.signature,
            self.validator.public_key(),
        )
    }
}

/// A validator's Chain-B signature over a notarized Ledger-A transaction id.
/// The vault accepts these as claim approvals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarizationAttestation {
    pub validator: ValidatorIdentity,
    pub tx_id: TxId,
    pub signature: EvmSignature,
    pub attested_at_ms: i64,
}

impl NotarizationAttestation {
    pub fn message(tx_id: &TxId) -> Vec<u8> {
        tx_id.as_bytes().to_vec()
    }

    pub fn recovered_signer(&self) -> Option<Address> {
        recover_evm_signer(&Self::message(&self.tx_id), &self.signature)
    }

    pub fn verify(&self) -> bool {
        self.recovered_signer() == Some(self.validator.evm_address)
    }

    pub fn signature_bytes(&self) -> Vec<u8> {
        self.signature.to_vec()
    }
}

/// Approved validators with a valid attestation of `receipts_root` for
/// `block_number`, counted once per signing key.
pub fn count_block_attesters(
    attestations: &[BlockAttestation],
    approved: &[ValidatorIdentity],
    block_number: u64,
    receipts_root: &H256,
) -> usize {
    attestations
        .iter()
        .filter(|a| a.block_number == block_number && &a.receipts_root == receipts_root)
        .filter(|a| approved.contains(&a.validator))
        .filter(|a| a.verify())
        .map(|a| a.validator.party.key_bytes())
        .collect::<HashSet<_>>()
        .len()
}

/// First validator in `validators` that reuses an earlier entry's signing
/// key or Chain-B address.
pub fn find_repeated_validator(validators: &[ValidatorIdentity]) -> Option<&ValidatorIdentity> {
    let mut keys = HashSet::new();
    let mut addresses = HashSet::new();
    validators.iter().find(|v| {
        let new_key = keys.insert(v.party.key_bytes());
        let new_address = addresses.insert(v.evm_address);
        !(new_key && new_address)
    })
}

/// Valid notarization attestations for `tx_id` from distinct listed signers,
/// at most one per signer.
pub fn select_notarizations<'a>(
    attestations: &'a [NotarizationAttestation],
    signers: &[Address],
    tx_id: &TxId,
) -> Vec<&'a NotarizationAttestation> {
    let mut seen = HashSet::new();
    attestations
        .iter()
        .filter(|a| &a.tx_id == tx_id && signers.contains(&a.validator.evm_address))
        .filter(|a| a.verify())
        .filter(|a| seen.insert(a.validator.evm_address))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_validator;
    use ethers::signers::Signer;

    #[test]
    fn block_attestation_signs_block_and_root() {
        let v = create_test_validator(1);
        let root = H256::repeat_byte(0xaa);
        let attestation = BlockAttestation::sign(v.identity.clone(), &v.signing_key, 10, root);
        assert!(attestation.verify());

        let mut wrong_root = attestation.clone();
        wrong_root.receipts_root = H256::repeat_byte(0xab);
        assert!(!wrong_root.verify());

        let mut wrong_block = attestation.clone();
        wrong_block.block_number = 11;
        assert!(!wrong_block.verify());

        // Claimed by someone else
        let mut impostor = attestation;
        impostor.validator = create_test_validator(2).identity;
        assert!(!impostor.verify());
    }

    #[test]
    fn block_attesters_are_counted_once() {
        let v1 = create_test_validator(1);
        let v2 = create_test_validator(2);
        let v3 = create_test_validator(3);
        let root = H256::repeat_byte(1);
        let attestations = vec![
            BlockAttestation::sign(v1.identity.clone(), &v1.signing_key, 5, root),
            BlockAttestation::sign(v1.identity.clone(), &v1.signing_key, 5, root),
            BlockAttestation::sign(v2.identity.clone(), &v2.signing_key, 5, H256::repeat_byte(2)),
            BlockAttestation::sign(v3.identity.clone(), &v3.signing_key, 5, root),
        ];
        let approved = vec![v1.identity.clone(), v2.identity.clone()];
        // v1 twice counts once, v2 attests another root, v3 is not approved
        assert_eq!(count_block_attesters(&attestations, &approved, 5, &root), 1);
        assert_eq!(count_block_attesters(&attestations, &approved, 6, &root), 0);
    }

    #[test]
    fn renamed_key_counts_once() {
        let v1 = create_test_validator(1);
        let mut alias = v1.identity.clone();
        alias.party.name = "Validator-1-alias".to_string();
        let root = H256::repeat_byte(1);
        let attestations = vec![
            BlockAttestation::sign(v1.identity.clone(), &v1.signing_key, 5, root),
            BlockAttestation::sign(alias.clone(), &v1.signing_key, 5, root),
        ];
        let approved = vec![v1.identity.clone(), alias];
        assert_eq!(count_block_attesters(&attestations, &approved, 5, &root), 1);
    }

    #[test]
    fn repeated_keys_and_addresses_are_found() {
        let v1 = create_test_validator(1).identity;
        let v2 = create_test_validator(2).identity;
        assert!(find_repeated_validator(&[v1.clone(), v2.clone()]).is_none());
        assert!(find_repeated_validator(&[]).is_none());

        let mut same_key = v1.clone();
        same_key.party.name = "Other".to_string();
        same_key.evm_address = v2.evm_address;
        assert_eq!(find_repeated_validator(&[v1.clone(), v2.clone(), same_key.clone()]), Some(&same_key));

        let mut same_address = v2.clone();
        same_address.party = create_test_validator(3).identity.party;
        same_address.evm_address = v1.evm_address;
        assert_eq!(find_repeated_validator(&[v1.clone(), same_address.clone()]), Some(&same_address));

        assert_eq!(find_repeated_validator(&[v1.clone(), v1.clone()]), Some(&v1));
    }

    #[tokio::test]
    async fn notarization_recovers_evm_signer() {
        let v = create_test_validator(4);
        let tx_id = H256::repeat_byte(0x42);
        let signature = v.wallet.sign_message(tx_id.as_bytes()).await.unwrap();
        let attestation = NotarizationAttestation {
            validator: v.identity.clone(),
            tx_id,
            signature,
            attested_at_ms: 0,
        };
        assert!(attestation.verify());
        assert_eq!(attestation.signature_bytes().len(), 65);

        let other = NotarizationAttestation { tx_id: H256::repeat_byte(0x43), ..attestation.clone() };
        assert!(!other.verify());

        let candidates = [attestation.clone(), attestation.clone(), other];
        let selected = select_notarizations(
            &candidates,
            &[v.identity.evm_address],
            &tx_id,
        );
        assert_eq!(selected.len(), 1);
        assert!(select_notarizations(&[attestation], &[Address::zero()], &tx_id).is_empty());
    }
}
