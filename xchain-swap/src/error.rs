// Error taxonomy surfaced by the swap coordinator and its building blocks.

use crate::cross_chain::types::SwapState;
use crate::data_structures::{SwapId, TxId};
use crate::ledger::LedgerError;
use crate::onchain::ChainError;
use crate::trie::ProofError;
use ethers::types::H256;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwapError {
    /// A draft is already stored for this id. The caller must pick new terms.
    #[error("a draft already exists for swap {0:?}")]
    DuplicateSwap(SwapId),

    #[error("unknown ledger transaction {0:?}")]
    UnknownTransaction(TxId),

    #[error("lock state missing or malformed in transaction {tx_id:?}: {reason}")]
    UnknownLockState { tx_id: TxId, reason: String },

    #[error("swap proposal rejected: {0}")]
    InvalidProposal(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("draft {0:?} has no notary signature yet")]
    NotNotarized(SwapId),

    // Per-validator failures. The collector logs and absorbs these.
    #[error("failed to send attestation request to {validator}: {reason}")]
    AttestationSendFailure { validator: String, reason: String },

    #[error("failed to receive attestation from {validator}: {reason}")]
    AttestationReceiveFailure { validator: String, reason: String },

    #[error("attestation from {validator} rejected: {reason}")]
    InvalidAttestation { validator: String, reason: String },

    #[error("insufficient attestations: have {found}, need {required}")]
    InsufficientAttestations { required: usize, found: usize },

    #[error("receipt proof mismatch: {0}")]
    ProofMismatch(String),

    #[error("receipts root mismatch in block {block_number}: block reports {expected:?}, receipts hash to {computed:?}")]
    RootMismatch {
        block_number: u64,
        expected: H256,
        computed: H256,
    },

    #[error("commitment mismatch: expected {expected:?}, observed {observed:?}")]
    CommitmentMismatch { expected: H256, observed: H256 },

    /// Inconclusive. Attestations stored before the deadline are kept.
    #[error("attestation collection timed out after {0:?}")]
    Timeout(Duration),

    #[error("illegal swap transition from {from:?} to {to:?}")]
    IllegalTransition { from: SwapState, to: SwapState },

    #[error("another transition of swap {0:?} is underway")]
    TransitionInProgress(SwapId),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Proof(#[from] ProofError),
}

impl SwapError {
    /// Errors that may succeed on a later attempt without new inputs.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SwapError::InsufficientAttestations { .. }
                | SwapError::Timeout(_)
                | SwapError::NotNotarized(_)
                | SwapError::TransitionInProgress(_)
                | SwapError::AttestationSendFailure { .. }
                | SwapError::AttestationReceiveFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(SwapError::InsufficientAttestations { required: 2, found: 1 }.is_recoverable());
        assert!(SwapError::Timeout(Duration::from_secs(1)).is_recoverable());
        assert!(!SwapError::ProofMismatch("bad path".to_string()).is_recoverable());
        assert!(!SwapError::DuplicateSwap(H256::zero()).is_recoverable());
        assert!(SwapError::TransitionInProgress(H256::zero()).is_recoverable());
        let root = SwapError::RootMismatch {
            block_number: 7,
            expected: H256::zero(),
            computed: H256::repeat_byte(1),
        };
        assert!(!root.is_recoverable());
        assert!(root.to_string().contains("block 7"));
    }
}
