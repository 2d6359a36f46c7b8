use crate::attestation::crypto::{self, SecretKey};
use crate::attestation::types::{BlockAttestation, NotarizationAttestation};
use crate::data_structures::{LedgerIdentity, ValidatorIdentity};
use crate::network::{AttestationHandler, AttestationRequest, AttestationResponse};
use crate::onchain::EvmClient;
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;

/// A validator process. It reads Chain B through its own client, signs
/// block attestations with its Ledger-A key and notarization approvals
/// with its Chain-B account.
pub struct ValidatorNode {
    identity: ValidatorIdentity,
    signing_key: SecretKey,
    evm: Arc<dyn EvmClient>,
    trusted_notaries: Vec<LedgerIdentity>,
}

impl ValidatorNode {
    pub fn new(
        identity: ValidatorIdentity,
        signing_key: SecretKey,
        evm: Arc<dyn EvmClient>,
        trusted_notaries: Vec<LedgerIdentity>,
    ) -> Self {
        ValidatorNode { identity, signing_key, evm, trusted_notaries }
    }

    async fn attest_block(&self, block_number: u64) -> Result<BlockAttestation, String> {
        let block = self
            .evm
            .get_block(block_number, false)
            .await
            .map_err(|e| format!("cannot read block {}: {}", block_number, e))?;
        info!("[Validator {}] Attesting block {} root {:?}", self.identity.name(), block_number, block.receipts_root);
        Ok(BlockAttestation::sign(self.identity.clone(), &self.signing_key, block_number, block.receipts_root))
    }

    async fn attest_notarization(
        &self,
        tx_id: crate::data_structures::TxId,
        notary: &LedgerIdentity,
        notary_signature: &crypto::PartySignature,
    ) -> Result<NotarizationAttestation, String> {
        if !self.trusted_notaries.contains(notary) {
            return Err(format!("notary {} is not trusted", notary));
        }
        if !crypto::verify(tx_id.as_bytes(), notary_signature, &notary.public_key) {
            return Err(format!("notary signature over {:?} does not verify", tx_id));
        }
        let signature = self
            .evm
            .sign_raw_bytes(&NotarizationAttestation::message(&tx_id))
            .await
            .map_err(|e| e.to_string())?;
        info!("[Validator {}] Approved notarized transaction {:?}", self.identity.name(), tx_id);
        Ok(NotarizationAttestation {
            validator: self.identity.clone(),
            tx_id,
            signature,
            attested_at_ms: chrono::Utc::now().timestamp_millis(),
        })
    }
}

#[async_trait]
impl AttestationHandler for ValidatorNode {
    fn identity(&self) -> &ValidatorIdentity {
        &self.identity
    }

    async fn handle(&self, sender: &LedgerIdentity, request: AttestationRequest) -> Result<AttestationResponse, String> {
        let result = match request {
            AttestationRequest::Block { block_number } => self.attest_block(block_number).await.map(AttestationResponse::Block),
            AttestationRequest::Notarization { tx_id, notary, notary_signature } => self
                .attest_notarization(tx_id, &notary, &notary_signature)
                .await
                .map(AttestationResponse::Notarization),
        };
        if let Err(reason) = &result {
            warn!("[Validator {}] Refused request from {}: {}", self.identity.name(), sender, reason);
        }
        result
    }
}
