use crate::attestation::crypto::{self, PartySignature, PublicKey, SecretKey};
use crate::attestation::types::BlockAttestation;
use crate::commitment::{CommitmentHash, CommitmentTerms};
use crate::data_structures::{LedgerIdentity, TxId, ValidatorIdentity};
use crate::ledger::LedgerError;
use crate::onchain::EvmReceipt;
use crate::trie::ReceiptProof;
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Points at one output of a Ledger-A transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateRef {
    pub tx_id: TxId,
    pub index: usize,
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.tx_id, self.index)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetState {
    pub issuer: LedgerIdentity,
    pub owner: LedgerIdentity,
    pub description: String,
    pub quantity: u64,
}

/// Lock conditions attached to an asset while a swap is pending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub sender: LedgerIdentity,
    pub recipient: LedgerIdentity,
    pub approved_validators: Vec<ValidatorIdentity>,
    pub minimum_validations: usize,
    pub notary: LedgerIdentity,
    pub terms: CommitmentTerms,
    pub commitment_hash: CommitmentHash,
    pub swap_vault: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerState {
    Asset(AssetState),
    Locked { asset: AssetState, lock: LockState },
}

impl LedgerState {
    pub fn asset(&self) -> &AssetState {
        match self {
            LedgerState::Asset(asset) | LedgerState::Locked { asset, .. } => asset,
        }
    }

    pub fn owner(&self) -> &LedgerIdentity {
        &self.asset().owner
    }
}

/// Proof that the Chain-B commitment was claimed or reverted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockEvidence {
    pub receipt: EvmReceipt,
    pub proof: ReceiptProof,
    pub receipts_root: H256,
    pub attestations: Vec<BlockAttestation>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    Issue,
    Lock,
    /// Hands the asset to the lock recipient after a Chain-B claim.
    Unlock(UnlockEvidence),
    /// Returns the asset to the lock sender after a Chain-B revert.
    Revert(UnlockEvidence),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub signer: PublicKey,
    pub signature: PartySignature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TxId,
    pub inputs: Vec<StateRef>,
    pub outputs: Vec<LedgerState>,
    pub command: LedgerCommand,
    pub notary: LedgerIdentity,
    pub signatures: Vec<TransactionSignature>,
}

#[derive(Serialize)]
struct TransactionContent<'a> {
    inputs: &'a [StateRef],
    outputs: &'a [LedgerState],
    command: &'a LedgerCommand,
    notary: &'a LedgerIdentity,
}

impl LedgerTransaction {
    pub fn new(
        inputs: Vec<StateRef>,
        outputs: Vec<LedgerState>,
        command: LedgerCommand,
        notary: LedgerIdentity,
    ) -> Result<Self, LedgerError> {
        let id = Self::compute_id(&inputs, &outputs, &command, &notary)?;
        Ok(LedgerTransaction { id, inputs, outputs, command, notary, signatures: Vec::new() })
    }

    /// SHA-256 over the JSON encoding of everything except signatures.
    pub fn compute_id(
        inputs: &[StateRef],
        outputs: &[LedgerState],
        command: &LedgerCommand,
        notary: &LedgerIdentity,
    ) -> Result<TxId, LedgerError> {
        let content = TransactionContent { inputs, outputs, command, notary };
        let bytes = serde_json::to_vec(&content).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Ok(H256::from_slice(&Sha256::digest(&bytes)))
    }

    pub fn id_is_consistent(&self) -> bool {
        matches!(
            Self::compute_id(&self.inputs, &self.outputs, &self.command, &self.notary),
            Ok(id) if id == self.id
        )
    }

    pub fn sign(&mut self, key: &SecretKey) {
        let signer = key.verifying_key();
        self.signatures.retain(|s| s.signer != signer);
        self.signatures.push(TransactionSignature { signer, signature: crypto::sign(self.id.as_bytes(), key) });
    }

    pub fn signature_of(&self, key: &PublicKey) -> Option<PartySignature> {
        self.signatures
            .iter()
            .find(|s| &s.signer == key && crypto::verify(self.id.as_bytes(), &s.signature, key))
            .map(|s| s.signature)
    }

    pub fn is_signed_by(&self, key: &PublicKey) -> bool {
        self.signature_of(key).is_some()
    }

    pub fn out_ref(&self, index: usize) -> StateRef {
        StateRef { tx_id: self.id, index }
    }

    /// The first locked output, if any.
    pub fn lock_output(&self) -> Option<(StateRef, &AssetState, &LockState)> {
        self.outputs.iter().enumerate().find_map(|(index, state)| match state {
            LedgerState::Locked { asset, lock } => Some((self.out_ref(index), asset, lock)),
            LedgerState::Asset(_) => None,
        })
    }
}
