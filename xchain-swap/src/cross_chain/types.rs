// Swap lifecycle types.

use crate::commitment::{CommitmentHash, CommitmentTerms};
use crate::data_structures::{LedgerIdentity, SwapId, ValidatorIdentity};
use crate::ledger::{AssetState, LedgerState, LedgerTransaction, StateRef};
use serde::{Deserialize, Serialize};

/// Lifecycle of one swap as seen by a coordinator.
///
/// Two paths leave `Draft`:
/// `Draft -> Committed -> Claimed -> Unlocked` and
/// `Draft -> Committed -> Reverted -> AssetReverted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapState {
    Draft,
    Committed,
    Claimed,
    Reverted,
    Unlocked,
    AssetReverted,
}

impl SwapState {
    const CLAIM_PATH: [SwapState; 4] = [SwapState::Draft, SwapState::Committed, SwapState::Claimed, SwapState::Unlocked];
    const REVERT_PATH: [SwapState; 4] =
        [SwapState::Draft, SwapState::Committed, SwapState::Reverted, SwapState::AssetReverted];

    fn position(path: &[SwapState], state: SwapState) -> Option<usize> {
        path.iter().position(|s| *s == state)
    }

    /// True when `next` lies strictly later than `self` on a path through
    /// both. Skipped steps were performed by a counterparty and are
    /// evidenced on Chain B.
    pub fn can_advance_to(self, next: SwapState) -> bool {
        [Self::CLAIM_PATH, Self::REVERT_PATH].iter().any(|path| {
            matches!(
                (Self::position(path, self), Self::position(path, next)),
                (Some(from), Some(to)) if from < to
            )
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SwapState::Unlocked | SwapState::AssetReverted)
    }
}

/// What a party proposes when it locks an asset for a swap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapProposal {
    /// Ledger-A party that receives the asset once Chain B is claimed.
    pub recipient: LedgerIdentity,
    pub validators: Vec<ValidatorIdentity>,
    pub minimum_validations: usize,
    pub notary: LedgerIdentity,
    pub terms: CommitmentTerms,
}

/// A lock transaction built for a swap, kept until the swap settles.
/// Its id is the swap id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DraftTransaction {
    pub swap_id: SwapId,
    pub asset_ref: StateRef,
    pub sender: LedgerIdentity,
    pub recipient: LedgerIdentity,
    pub approved_validators: Vec<ValidatorIdentity>,
    pub minimum_validations: usize,
    pub notary: LedgerIdentity,
    pub terms: CommitmentTerms,
    pub commitment_hash: CommitmentHash,
    pub wire: LedgerTransaction,
}

impl DraftTransaction {
    /// The locked output the swap settles.
    pub fn lock_ref(&self) -> StateRef {
        StateRef { tx_id: self.swap_id, index: 0 }
    }

    pub fn locked_asset(&self) -> Option<&AssetState> {
        match self.wire.outputs.first() {
            Some(LedgerState::Locked { asset, .. }) => Some(asset),
            _ => None,
        }
    }
}
