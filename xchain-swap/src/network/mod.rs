// Request/response messages between the coordinator and validators, and
// the transport seam they travel over.

pub mod in_process;

pub use in_process::InProcessNetwork;

use crate::attestation::crypto::PartySignature;
use crate::attestation::types::{BlockAttestation, NotarizationAttestation};
use crate::data_structures::{LedgerIdentity, TxId, ValidatorIdentity};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttestationRequest {
    /// Attest the receipts root of a Chain-B block.
    Block { block_number: u64 },
    /// Sign a notarized Ledger-A transaction id with the Chain-B key.
    Notarization {
        tx_id: TxId,
        notary: LedgerIdentity,
        notary_signature: PartySignature,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttestationResponse {
    Block(BlockAttestation),
    Notarization(NotarizationAttestation),
}

// Envelope delivered to a validator inbox
#[derive(Debug)]
pub struct NetworkMessage {
    pub sender: LedgerIdentity,
    pub request: AttestationRequest,
    pub reply_to: oneshot::Sender<Result<AttestationResponse, String>>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("validator {0} is unreachable")]
    Unreachable(String),
    #[error("no reply from validator {0}")]
    NoReply(String),
    #[error("validator {validator} refused: {reason}")]
    Rejected { validator: String, reason: String },
}

/// Sends one attestation request to one validator and waits for its answer.
#[async_trait]
pub trait ValidatorTransport: Send + Sync {
    async fn request(
        &self,
        sender: &LedgerIdentity,
        validator: &ValidatorIdentity,
        request: AttestationRequest,
    ) -> Result<AttestationResponse, TransportError>;
}

/// Validator side of the transport.
#[async_trait]
pub trait AttestationHandler: Send + Sync {
    fn identity(&self) -> &ValidatorIdentity;

    /// Produces a signed response, or a refusal reason.
    async fn handle(&self, sender: &LedgerIdentity, request: AttestationRequest) -> Result<AttestationResponse, String>;
}
