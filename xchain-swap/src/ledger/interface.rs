use crate::attestation::crypto::{PartySignature, PublicKey};
use crate::data_structures::{LedgerIdentity, TxId};
use crate::ledger::types::{LedgerTransaction, StateRef};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown state {0}")]
    UnknownState(StateRef),
    #[error("state {0} is already consumed")]
    StateConsumed(StateRef),
    #[error("missing signature from {0}")]
    MissingSignature(String),
    #[error("contract rejected transaction: {0}")]
    ContractViolation(String),
    #[error("transaction {0:?} already recorded")]
    DuplicateTransaction(TxId),
    #[error("transaction id does not match its content")]
    IdMismatch,
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Ledger-A node operations the coordinator depends on.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Verifies, notarizes and records a transaction, consuming its inputs.
    async fn submit_transaction(&self, tx: LedgerTransaction) -> Result<TxId, LedgerError>;

    async fn get_transaction_by_id(&self, tx_id: TxId) -> Result<Option<LedgerTransaction>, LedgerError>;

    /// Signature by `key` over a recorded transaction. Covers both party
    /// signatures and the notary's.
    async fn signatures_of(&self, tx_id: TxId, key: &PublicKey) -> Result<Option<PartySignature>, LedgerError>;
}

pub trait IdentityService: Send + Sync {
    fn party_for_key(&self, key: &PublicKey) -> Option<LedgerIdentity>;
}
