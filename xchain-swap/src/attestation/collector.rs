//! Fan-out collection of validator attestations.
//!
//! One collector serves both attestation kinds. A [`Fact`] says what to ask
//! and how to check an answer; an [`AttestationSink`] stores accepted
//! answers. Each validator is queried on its own task, and a failing
//! validator is logged and skipped so it never blocks the others.

use crate::attestation::crypto::PartySignature;
use crate::attestation::types::{BlockAttestation, NotarizationAttestation};
use crate::data_structures::{LedgerIdentity, SwapId, TxId, ValidatorIdentity};
use crate::error::SwapError;
use crate::network::{AttestationRequest, AttestationResponse, TransportError, ValidatorTransport};
use futures::future::join_all;
use log::{debug, info, warn};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// A statement validators are asked to sign.
pub trait Fact: Send + Sync + 'static {
    /// Key the accepted attestations are stored under.
    type Key: Clone + Debug + Send + Sync + 'static;
    type Attestation: Send + 'static;

    fn key(&self) -> Self::Key;

    fn request(&self) -> AttestationRequest;

    /// Checks a response from `validator` and extracts the attestation.
    /// Signatures are verified here, before anything is stored.
    fn accept(&self, validator: &ValidatorIdentity, response: AttestationResponse) -> Result<Self::Attestation, SwapError>;
}

pub trait AttestationSink<F: Fact>: Send + Sync + 'static {
    /// Stores an attestation. Returns false if this validator already has
    /// one under `key`; the first one stored is kept.
    fn store(&self, key: &F::Key, attestation: F::Attestation) -> bool;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub requested: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub failed: usize,
}

enum Outcome {
    Stored,
    Duplicate,
    Failed,
}

pub struct AttestationCollector {
    requester: LedgerIdentity,
    transport: Arc<dyn ValidatorTransport>,
    timeout: Duration,
}

impl AttestationCollector {
    pub fn new(requester: LedgerIdentity, transport: Arc<dyn ValidatorTransport>, timeout: Duration) -> Self {
        AttestationCollector { requester, transport, timeout }
    }

    /// Queries every validator in `validators` about `fact`.
    ///
    /// Non-blocking mode returns once the requests are dispatched; results
    /// land in `sink` as they arrive. Blocking mode waits for every task or
    /// the timeout. A timeout returns [`SwapError::Timeout`] but does not
    /// cancel outstanding requests or discard what was stored.
    pub async fn collect<F, S>(
        &self,
        fact: Arc<F>,
        validators: &[ValidatorIdentity],
        sink: Arc<S>,
        blocking: bool,
    ) -> Result<CollectionReport, SwapError>
    where
        F: Fact,
        S: AttestationSink<F>,
    {
        let key = fact.key();
        let handles: Vec<_> = validators
            .iter()
            .cloned()
            .map(|validator| {
                let fact = Arc::clone(&fact);
                let sink = Arc::clone(&sink);
                let transport = Arc::clone(&self.transport);
                let requester = self.requester.clone();
                tokio::spawn(attest_one(fact, sink, transport, requester, validator))
            })
            .collect();

        let mut report = CollectionReport { requested: handles.len(), ..CollectionReport::default() };
        info!("[Collector] Requested attestations for {:?} from {} validators", key, report.requested);
        if !blocking {
            return Ok(report);
        }

        let outcomes = match tokio::time::timeout(self.timeout, join_all(handles)).await {
            Ok(outcomes) => outcomes,
            Err(_) => {
                warn!("[Collector] Collection for {:?} timed out after {:?}", key, self.timeout);
                return Err(SwapError::Timeout(self.timeout));
            }
        };
        for outcome in outcomes {
            match outcome {
                Ok(Outcome::Stored) => report.stored += 1,
                Ok(Outcome::Duplicate) => report.duplicates += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Err(e) => {
                    warn!("[Collector] Attestation task failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        info!(
            "[Collector] {:?}: stored {}, duplicate {}, failed {}",
            key, report.stored, report.duplicates, report.failed
        );
        Ok(report)
    }
}

async fn attest_one<F, S>(
    fact: Arc<F>,
    sink: Arc<S>,
    transport: Arc<dyn ValidatorTransport>,
    requester: LedgerIdentity,
    validator: ValidatorIdentity,
) -> Outcome
where
    F: Fact,
    S: AttestationSink<F>,
{
    let response = match transport.request(&requester, &validator, fact.request()).await {
        Ok(response) => response,
        Err(e) => {
            let error = match e {
                TransportError::Unreachable(reason) => {
                    SwapError::AttestationSendFailure { validator: validator.to_string(), reason }
                }
                other => SwapError::AttestationReceiveFailure { validator: validator.to_string(), reason: other.to_string() },
            };
            warn!("[Collector] {}", error);
            return Outcome::Failed;
        }
    };

    let attestation = match fact.accept(&validator, response) {
        Ok(attestation) => attestation,
        Err(e) => {
            warn!("[Collector] {}", e);
            return Outcome::Failed;
        }
    };

    if sink.store(&fact.key(), attestation) {
        debug!("[Collector] Stored attestation from {}", validator);
        Outcome::Stored
    } else {
        debug!("[Collector] Ignored repeat attestation from {}", validator);
        Outcome::Duplicate
    }
}

fn invalid(validator: &ValidatorIdentity, reason: impl Into<String>) -> SwapError {
    SwapError::InvalidAttestation { validator: validator.to_string(), reason: reason.into() }
}

/// Receipts root of one Chain-B block.
#[derive(Clone, Debug)]
pub struct BlockFact {
    pub block_number: u64,
}

impl Fact for BlockFact {
    type Key = u64;
    type Attestation = BlockAttestation;

    fn key(&self) -> u64 {
        self.block_number
    }

    fn request(&self) -> AttestationRequest {
        AttestationRequest::Block { block_number: self.block_number }
    }

    fn accept(&self, validator: &ValidatorIdentity, response: AttestationResponse) -> Result<BlockAttestation, SwapError> {
        let attestation = match response {
            AttestationResponse::Block(attestation) => attestation,
            AttestationResponse::Notarization(_) => return Err(invalid(validator, "expected a block attestation")),
        };
        if &attestation.validator != validator {
            return Err(invalid(validator, format!("signed as {}", attestation.validator)));
        }
        if attestation.block_number != self.block_number {
            return Err(invalid(validator, format!("attests block {}", attestation.block_number)));
        }
        if !attestation.verify() {
            return Err(invalid(validator, "bad block attestation signature"));
        }
        Ok(attestation)
    }
}

/// Chain-B approval of a notarized draft transaction.
#[derive(Clone, Debug)]
pub struct NotarizationFact {
    pub tx_id: TxId,
    pub notary: LedgerIdentity,
    pub notary_signature: PartySignature,
}

impl Fact for NotarizationFact {
    type Key = SwapId;
    type Attestation = NotarizationAttestation;

    fn key(&self) -> SwapId {
        self.tx_id
    }

    fn request(&self) -> AttestationRequest {
        AttestationRequest::Notarization {
            tx_id: self.tx_id,
            notary: self.notary.clone(),
            notary_signature: self.notary_signature,
        }
    }

    fn accept(&self, validator: &ValidatorIdentity, response: AttestationResponse) -> Result<NotarizationAttestation, SwapError> {
        let attestation = match response {
            AttestationResponse::Notarization(attestation) => attestation,
            AttestationResponse::Block(_) => return Err(invalid(validator, "expected a notarization attestation")),
        };
        if &attestation.validator != validator {
            return Err(invalid(validator, format!("signed as {}", attestation.validator)));
        }
        if attestation.tx_id != self.tx_id {
            return Err(invalid(validator, format!("signed transaction {:?}", attestation.tx_id)));
        }
        if !attestation.verify() {
            return Err(invalid(validator, "signature does not recover to the validator address"));
        }
        Ok(attestation)
    }
}
