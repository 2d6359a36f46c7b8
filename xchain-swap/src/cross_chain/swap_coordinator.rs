// Drives one party's side of a Ledger A <-> Chain B swap.
//
// Ledger A: draft and submit the lock, later release it with a proven
// Chain-B receipt. Chain B: commit, claim or revert through the vault.
// Validator attestations are gathered through the shared collector and kept
// in the proof store.

use crate::attestation::collector::{AttestationCollector, BlockFact, CollectionReport, NotarizationFact};
use crate::attestation::crypto::SecretKey;
use crate::attestation::types::{count_block_attesters, find_repeated_validator, select_notarizations, BlockAttestation};
use crate::commitment;
use crate::config::SwapConfig;
use crate::cross_chain::types::{DraftTransaction, SwapProposal, SwapState};
use crate::data_structures::{LedgerIdentity, SwapId, TxId, ValidatorIdentity};
use crate::error::SwapError;
use crate::ledger::{
    AssetState, LedgerCommand, LedgerError, LedgerService, LedgerState, LedgerTransaction, LockState, StateRef,
    UnlockEvidence,
};
use crate::network::ValidatorTransport;
use crate::onchain::swap_vault::{find_event, VaultCall, VaultEvent};
use crate::onchain::{EvmClient, EvmReceipt};
use crate::storage::ProofStore;
use crate::trie::{receipt_key, PatriciaTrie, ReceiptProof};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct SwapCoordinator {
    identity: LedgerIdentity,
    signing_key: SecretKey,
    config: SwapConfig,
    store: Arc<ProofStore>,
    ledger: Arc<dyn LedgerService>,
    evm: Arc<dyn EvmClient>,
    collector: AttestationCollector,
    book: Mutex<SwapBook>,
}

#[derive(Default)]
struct SwapBook {
    // Last state this coordinator observed per swap
    states: HashMap<SwapId, SwapState>,
    // Swaps with a transition underway
    in_flight: HashSet<SwapId>,
}

/// A reserved move of one swap to `next`. Only one transition per swap is
/// underway at a time; dropping it without `complete` leaves the state as
/// it was.
struct Transition<'a> {
    coordinator: &'a SwapCoordinator,
    swap_id: SwapId,
    next: SwapState,
}

impl Transition<'_> {
    fn complete(self) {
        self.coordinator.book().states.insert(self.swap_id, self.next);
        debug!("[Coordinator {}] Swap {:?} is now {:?}", self.coordinator.identity.name, self.swap_id, self.next);
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        self.coordinator.book().in_flight.remove(&self.swap_id);
    }
}

impl SwapCoordinator {
    pub fn new(
        identity: LedgerIdentity,
        signing_key: SecretKey,
        config: SwapConfig,
        store: Arc<ProofStore>,
        ledger: Arc<dyn LedgerService>,
        evm: Arc<dyn EvmClient>,
        transport: Arc<dyn ValidatorTransport>,
    ) -> Self {
        let collector = AttestationCollector::new(identity.clone(), transport, config.collection_timeout);
        SwapCoordinator {
            identity,
            signing_key,
            config,
            store,
            ledger,
            evm,
            collector,
            book: Mutex::new(SwapBook::default()),
        }
    }

    pub fn identity(&self) -> &LedgerIdentity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<ProofStore> {
        &self.store
    }

    fn book(&self) -> MutexGuard<'_, SwapBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// State this coordinator last recorded for the swap. `None` means the
    /// swap is unknown here, not that it does not exist elsewhere.
    pub fn swap_state(&self, swap_id: &SwapId) -> Option<SwapState> {
        self.book().states.get(swap_id).copied()
    }

    fn begin_transition(&self, swap_id: SwapId, next: SwapState) -> Result<Transition<'_>, SwapError> {
        let mut book = self.book();
        if let Some(&current) = book.states.get(&swap_id) {
            if !current.can_advance_to(next) {
                return Err(SwapError::IllegalTransition { from: current, to: next });
            }
        }
        if !book.in_flight.insert(swap_id) {
            return Err(SwapError::TransitionInProgress(swap_id));
        }
        Ok(Transition { coordinator: self, swap_id, next })
    }

    // Newly stored drafts start out as Draft
    fn record_draft(&self, swap_id: SwapId) {
        self.book().states.entry(swap_id).or_insert(SwapState::Draft);
        debug!("[Coordinator {}] Swap {:?} is now {:?}", self.identity.name, swap_id, SwapState::Draft);
    }

    fn draft_for(&self, swap_id: &SwapId) -> Result<Arc<DraftTransaction>, SwapError> {
        self.store.get_draft(swap_id).ok_or(SwapError::UnknownTransaction(*swap_id))
    }

    fn validate_proposal(&self, proposal: &SwapProposal) -> Result<(), SwapError> {
        let invalid = |reason: String| -> Result<(), SwapError> { Err(SwapError::InvalidProposal(reason)) };
        let validators = proposal.validators.len();
        if let Some(repeated) = find_repeated_validator(&proposal.validators) {
            return invalid(format!("validator {} reuses another validator's key or address", repeated));
        }
        if proposal.minimum_validations == 0 || proposal.minimum_validations > validators {
            return invalid(format!("minimum validations {} invalid for {} validators", proposal.minimum_validations, validators));
        }
        let terms = &proposal.terms;
        if terms.chain_id != self.config.chain_id {
            return invalid(format!("terms name chain {}, expected {}", terms.chain_id, self.config.chain_id));
        }
        if terms.signature_threshold == 0 || terms.signature_threshold as usize > terms.signers.len() {
            return invalid(format!("signature threshold {} invalid for {} signers", terms.signature_threshold, terms.signers.len()));
        }
        if terms.amount.is_zero() {
            return invalid("commitment amount is zero".to_string());
        }
        Ok(())
    }

    /// Builds and signs a Ledger-A lock of `asset_ref` under `proposal` and
    /// stores it as a draft. The lock transaction id becomes the swap id.
    /// The same asset and proposal always yield the same id, so a repeat
    /// call fails with `DuplicateSwap`.
    pub async fn draft(&self, asset_ref: StateRef, proposal: SwapProposal) -> Result<DraftTransaction, SwapError> {
        self.validate_proposal(&proposal)?;
        let source = self
            .ledger
            .get_transaction_by_id(asset_ref.tx_id)
            .await?
            .ok_or(SwapError::UnknownTransaction(asset_ref.tx_id))?;
        let asset = match source.outputs.get(asset_ref.index) {
            Some(LedgerState::Asset(asset)) => asset.clone(),
            Some(LedgerState::Locked { .. }) => {
                return Err(SwapError::InvalidProposal(format!("{} is already locked", asset_ref)))
            }
            None => return Err(LedgerError::UnknownState(asset_ref).into()),
        };
        if asset.owner != self.identity {
            return Err(SwapError::Unauthorized(format!("{} does not own {}", self.identity, asset_ref)));
        }

        let commitment_hash = commitment::hash(&proposal.terms);
        let lock = LockState {
            sender: self.identity.clone(),
            recipient: proposal.recipient.clone(),
            approved_validators: proposal.validators.clone(),
            minimum_validations: proposal.minimum_validations,
            notary: proposal.notary.clone(),
            terms: proposal.terms.clone(),
            commitment_hash,
            swap_vault: self.config.swap_vault,
        };
        let mut wire = LedgerTransaction::new(
            vec![asset_ref],
            vec![LedgerState::Locked { asset, lock }],
            LedgerCommand::Lock,
            proposal.notary.clone(),
        )?;
        wire.sign(&self.signing_key);

        let swap_id = wire.id;
        if self.swap_state(&swap_id).is_some() {
            return Err(SwapError::DuplicateSwap(swap_id));
        }
        let draft = DraftTransaction {
            swap_id,
            asset_ref,
            sender: self.identity.clone(),
            recipient: proposal.recipient,
            approved_validators: proposal.validators,
            minimum_validations: proposal.minimum_validations,
            notary: proposal.notary,
            terms: proposal.terms,
            commitment_hash,
            wire,
        };
        self.store.save_draft(draft.clone())?;
        self.record_draft(swap_id);
        info!(
            "[Coordinator {}] Drafted swap {:?} locking {} for {} (commitment {:?})",
            self.identity.name, swap_id, asset_ref, draft.recipient, commitment_hash
        );
        Ok(draft)
    }

    /// Accepts a draft received from the counterparty, after checking that
    /// it is internally consistent, signed by its sender and passes the same
    /// proposal checks as `draft`.
    pub fn import_draft(&self, draft: DraftTransaction) -> Result<Arc<DraftTransaction>, SwapError> {
        let swap_id = draft.swap_id;
        if draft.wire.id != swap_id || !draft.wire.id_is_consistent() {
            return Err(SwapError::InvalidProposal(format!("draft {:?} does not match its transaction", swap_id)));
        }
        let (_, asset, lock) = draft.wire.lock_output().ok_or_else(|| SwapError::UnknownLockState {
            tx_id: swap_id,
            reason: "draft has no locked output".to_string(),
        })?;
        if lock.terms != draft.terms
            || lock.recipient != draft.recipient
            || lock.sender != draft.sender
            || asset.owner != draft.sender
            || lock.approved_validators != draft.approved_validators
            || lock.minimum_validations != draft.minimum_validations
            || lock.notary != draft.notary
            || lock.swap_vault != self.config.swap_vault
        {
            return Err(SwapError::UnknownLockState {
                tx_id: swap_id,
                reason: "lock state disagrees with the draft".to_string(),
            });
        }
        let expected = commitment::hash(&draft.terms);
        if lock.commitment_hash != expected || draft.commitment_hash != expected {
            return Err(SwapError::CommitmentMismatch { expected, observed: draft.commitment_hash });
        }
        if !draft.wire.is_signed_by(&draft.sender.public_key) {
            return Err(SwapError::Unauthorized(format!("draft {:?} is not signed by {}", swap_id, draft.sender)));
        }
        self.validate_proposal(&SwapProposal {
            recipient: draft.recipient.clone(),
            validators: draft.approved_validators.clone(),
            minimum_validations: draft.minimum_validations,
            notary: draft.notary.clone(),
            terms: draft.terms.clone(),
        })?;
        if self.swap_state(&swap_id).is_some() {
            return Err(SwapError::DuplicateSwap(swap_id));
        }
        let draft = self.store.save_draft(draft)?;
        self.record_draft(swap_id);
        info!("[Coordinator {}] Imported draft {:?} from {}", self.identity.name, swap_id, draft.sender);
        Ok(draft)
    }

    /// Records the draft's lock on Ledger A, where the notary signs it.
    pub async fn submit_draft(&self, draft_id: SwapId) -> Result<TxId, SwapError> {
        let draft = self.draft_for(&draft_id)?;
        let tx_id = self.ledger.submit_transaction(draft.wire.clone()).await?;
        info!("[Coordinator {}] Lock {:?} notarized on Ledger A", self.identity.name, tx_id);
        Ok(tx_id)
    }

    /// Locks the Chain-B side of the swap in the vault. Only the commitment
    /// owner may do this.
    pub async fn commit(&self, draft_id: SwapId) -> Result<EvmReceipt, SwapError> {
        let draft = self.draft_for(&draft_id)?;
        let transition = self.begin_transition(draft_id, SwapState::Committed)?;
        let terms = &draft.terms;
        if terms.owner != self.evm.address() {
            return Err(SwapError::Unauthorized(format!(
                "commitment owner {:?} is not this account {:?}",
                terms.owner,
                self.evm.address()
            )));
        }
        if terms.chain_id != self.evm.chain_id() {
            return Err(SwapError::InvalidProposal(format!(
                "terms name chain {}, client is on chain {}",
                terms.chain_id,
                self.evm.chain_id()
            )));
        }

        let call = VaultCall::Commit {
            swap_id: draft_id,
            token_address: terms.token_address,
            token_id: terms.token_id,
            amount: terms.amount,
            recipient: terms.recipient,
            signature_threshold: terms.signature_threshold,
            signers: terms.signers.clone(),
        };
        let receipt = self.send_vault_call(call).await?;
        self.expect_vault_event(&receipt, &draft, VaultEvent::Commit)?;
        transition.complete();
        info!("[Coordinator {}] Committed swap {:?} in block {}", self.identity.name, draft_id, receipt.block_number);
        Ok(receipt)
    }

    /// Claims the Chain-B commitment with the stored notarization signatures.
    /// Nothing is sent while fewer than the threshold are available.
    pub async fn claim(&self, draft_id: SwapId) -> Result<EvmReceipt, SwapError> {
        let draft = self.draft_for(&draft_id)?;
        let transition = self.begin_transition(draft_id, SwapState::Claimed)?;
        let stored = self.store.notarization_attestations(&draft_id);
        let selected = select_notarizations(&stored, &draft.terms.signers, &draft_id);
        let required = draft.terms.signature_threshold as usize;
        if selected.len() < required {
            warn!(
                "[Coordinator {}] Cannot claim {:?}: {} of {} signatures",
                self.identity.name,
                draft_id,
                selected.len(),
                required
            );
            return Err(SwapError::InsufficientAttestations { required, found: selected.len() });
        }

        let signatures = selected.iter().map(|a| a.signature_bytes()).collect();
        let receipt = self.send_vault_call(VaultCall::Claim { swap_id: draft_id, signatures }).await?;
        self.expect_vault_event(&receipt, &draft, VaultEvent::Claim)?;
        transition.complete();
        info!("[Coordinator {}] Claimed swap {:?} in block {}", self.identity.name, draft_id, receipt.block_number);
        Ok(receipt)
    }

    /// Returns the committed tokens to their owner.
    pub async fn revert(&self, draft_id: SwapId) -> Result<EvmReceipt, SwapError> {
        let draft = self.draft_for(&draft_id)?;
        let transition = self.begin_transition(draft_id, SwapState::Reverted)?;
        if draft.terms.owner != self.evm.address() {
            return Err(SwapError::Unauthorized("only the commitment owner may revert".to_string()));
        }
        let receipt = self.send_vault_call(VaultCall::Revert { swap_id: draft_id }).await?;
        self.expect_vault_event(&receipt, &draft, VaultEvent::Revert)?;
        transition.complete();
        info!("[Coordinator {}] Reverted swap {:?} in block {}", self.identity.name, draft_id, receipt.block_number);
        Ok(receipt)
    }

    async fn send_vault_call(&self, call: VaultCall) -> Result<EvmReceipt, SwapError> {
        let data = call.encode()?;
        Ok(self.evm.send_signed_call(self.config.swap_vault, data).await?)
    }

    fn expect_vault_event(&self, receipt: &EvmReceipt, draft: &DraftTransaction, expected: VaultEvent) -> Result<(), SwapError> {
        let event = find_event(&receipt.logs, self.config.swap_vault, draft.swap_id)
            .ok_or_else(|| SwapError::ProofMismatch(format!("receipt {:?} has no vault event", receipt.transaction_hash)))?;
        if event.event != expected {
            return Err(SwapError::ProofMismatch(format!("receipt carries {:?}, expected {:?}", event.event, expected)));
        }
        if event.commitment_hash != draft.commitment_hash {
            return Err(SwapError::CommitmentMismatch { expected: draft.commitment_hash, observed: event.commitment_hash });
        }
        Ok(())
    }

    /// Asks the draft's approved validators to sign its notarized id with
    /// their Chain-B keys. Fails with `NotNotarized` before the lock is
    /// recorded on Ledger A.
    pub async fn collect_notarization_attestations(
        &self,
        draft_id: SwapId,
        blocking: bool,
    ) -> Result<CollectionReport, SwapError> {
        let draft = self.draft_for(&draft_id)?;
        let notary_signature = self
            .ledger
            .signatures_of(draft_id, &draft.notary.public_key)
            .await?
            .ok_or(SwapError::NotNotarized(draft_id))?;
        let fact = Arc::new(NotarizationFact { tx_id: draft_id, notary: draft.notary.clone(), notary_signature });
        self.collector.collect(fact, &draft.approved_validators, Arc::clone(&self.store), blocking).await
    }

    /// Asks the swap's approved validators to attest the receipts root of
    /// `block_number`.
    pub async fn collect_block_attestations(
        &self,
        draft_id: SwapId,
        block_number: u64,
        blocking: bool,
    ) -> Result<CollectionReport, SwapError> {
        let validators = self.approved_validators(draft_id).await?;
        self.store.track_block(draft_id, block_number);
        let fact = Arc::new(BlockFact { block_number });
        self.collector.collect(fact, &validators, Arc::clone(&self.store), blocking).await
    }

    async fn approved_validators(&self, swap_id: SwapId) -> Result<Vec<ValidatorIdentity>, SwapError> {
        if let Some(draft) = self.store.get_draft(&swap_id) {
            return Ok(draft.approved_validators.clone());
        }
        let (_, _, lock) = self.recorded_lock(swap_id).await?;
        Ok(lock.approved_validators)
    }

    // The lock as recorded on Ledger A
    async fn recorded_lock(&self, swap_id: SwapId) -> Result<(StateRef, AssetState, LockState), SwapError> {
        let tx = self
            .ledger
            .get_transaction_by_id(swap_id)
            .await?
            .ok_or(SwapError::UnknownTransaction(swap_id))?;
        let (lock_ref, asset, lock) = tx.lock_output().ok_or_else(|| SwapError::UnknownLockState {
            tx_id: swap_id,
            reason: "transaction has no locked output".to_string(),
        })?;
        Ok((lock_ref, asset.clone(), lock.clone()))
    }

    /// Approved validators with a stored attestation matching the block's
    /// reported receipts root.
    pub async fn block_attestation_count(&self, draft_id: SwapId, block_number: u64) -> Result<usize, SwapError> {
        let validators = self.approved_validators(draft_id).await?;
        let block = self.evm.get_block(block_number, false).await?;
        let stored = self.store.block_attestations(block_number);
        Ok(count_block_attesters(&stored, &validators, block_number, &block.receipts_root))
    }

    /// Valid notarization signatures from the commitment's signers.
    pub fn notarization_count(&self, draft_id: SwapId) -> Result<usize, SwapError> {
        let draft = self.draft_for(&draft_id)?;
        let stored = self.store.notarization_attestations(&draft_id);
        Ok(select_notarizations(&stored, &draft.terms.signers, &draft_id).len())
    }

    /// Releases the Ledger-A lock with a Chain-B receipt.
    ///
    /// The receipts of `block_number` are rebuilt into a trie whose root must
    /// equal the block's and be attested by enough approved validators. The
    /// receipt at `tx_index` must carry a successful Claim (asset goes to the
    /// recipient) or Revert (asset returns to the sender) for this swap with
    /// the locked commitment hash. The release is submitted to Ledger A and
    /// returned; the draft is deleted only once the ledger accepts it.
    pub async fn finalize(&self, draft_id: SwapId, block_number: u64, tx_index: u64) -> Result<LedgerTransaction, SwapError> {
        let (release, target) = self.prepare_release(draft_id, block_number, tx_index).await?;
        let transition = self.begin_transition(draft_id, target)?;
        self.ledger.submit_transaction(release.clone()).await?;
        transition.complete();

        self.store.delete_draft(&draft_id);
        info!(
            "[Coordinator {}] Finalized swap {:?} as {:?} in release {:?}",
            self.identity.name, draft_id, target, release.id
        );
        Ok(release)
    }

    /// Runs every `finalize` check and returns the signed release with the
    /// state it leads to, without submitting it.
    pub async fn prepare_release(
        &self,
        draft_id: SwapId,
        block_number: u64,
        tx_index: u64,
    ) -> Result<(LedgerTransaction, SwapState), SwapError> {
        let (lock_ref, asset, lock) = self.recorded_lock(draft_id).await?;
        let block = self.evm.get_block(block_number, false).await?;
        let receipts = self.evm.get_receipts_for_block(block_number).await?;

        let entries: Vec<(u64, Vec<u8>)> = receipts.iter().map(|r| (r.transaction_index, r.rlp_bytes())).collect();
        let trie = PatriciaTrie::build(&entries);
        let computed = trie.root_hash();
        if computed != block.receipts_root {
            warn!(
                "[Coordinator {}] Receipts of block {} hash to {:?}, header says {:?}",
                self.identity.name, block_number, computed, block.receipts_root
            );
            return Err(SwapError::RootMismatch { block_number, expected: block.receipts_root, computed });
        }

        let attestations: Vec<BlockAttestation> = self
            .store
            .block_attestations(block_number)
            .into_iter()
            .filter(|a| a.receipts_root == computed)
            .collect();
        let found = count_block_attesters(&attestations, &lock.approved_validators, block_number, &computed);
        if found < lock.minimum_validations {
            return Err(SwapError::InsufficientAttestations { required: lock.minimum_validations, found });
        }

        let receipt = receipts
            .iter()
            .find(|r| r.transaction_index == tx_index)
            .cloned()
            .ok_or_else(|| SwapError::ProofMismatch(format!("block {} has no transaction {}", block_number, tx_index)))?;
        let proof = ReceiptProof {
            block_number,
            transaction_index: tx_index,
            receipt_bytes: receipt.rlp_bytes(),
            merkle_path: trie.prove(&receipt_key(tx_index)),
        };
        if !proof.verify(computed) {
            return Err(SwapError::ProofMismatch(format!("receipt {} does not prove against {:?}", tx_index, computed)));
        }
        if !receipt.status {
            return Err(SwapError::ProofMismatch(format!("transaction {} in block {} failed", tx_index, block_number)));
        }

        let event = find_event(&receipt.logs, lock.swap_vault, draft_id)
            .ok_or_else(|| SwapError::ProofMismatch(format!("receipt has no vault event for swap {:?}", draft_id)))?;
        if event.commitment_hash != lock.commitment_hash {
            return Err(SwapError::CommitmentMismatch { expected: lock.commitment_hash, observed: event.commitment_hash });
        }
        let (target, new_owner) = match event.event {
            VaultEvent::Claim => (SwapState::Unlocked, lock.recipient.clone()),
            VaultEvent::Revert => (SwapState::AssetReverted, lock.sender.clone()),
            VaultEvent::Commit => {
                return Err(SwapError::ProofMismatch("receipt commits the swap but does not settle it".to_string()))
            }
        };
        if let Some(current) = self.swap_state(&draft_id) {
            if !current.can_advance_to(target) {
                return Err(SwapError::IllegalTransition { from: current, to: target });
            }
        }

        let evidence = UnlockEvidence { receipt, proof, receipts_root: computed, attestations };
        let command = match target {
            SwapState::Unlocked => LedgerCommand::Unlock(evidence),
            _ => LedgerCommand::Revert(evidence),
        };
        let output = AssetState { owner: new_owner, ..asset };
        let mut release = LedgerTransaction::new(vec![lock_ref], vec![LedgerState::Asset(output)], command, lock.notary.clone())?;
        release.sign(&self.signing_key);
        Ok((release, target))
    }
}
