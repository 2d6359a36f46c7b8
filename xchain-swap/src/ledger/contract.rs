//! Validity rules for Ledger-A transactions.
//!
//! Issue creates assets, Lock wraps one asset in swap conditions, and
//! Unlock/Revert release a locked asset only when given a Chain-B receipt
//! proven against a receipts root that enough approved validators attested.

use crate::attestation::types::{count_block_attesters, find_repeated_validator};
use crate::data_structures::SwapId;
use crate::ledger::interface::{IdentityService, LedgerError};
use crate::ledger::types::{AssetState, LedgerCommand, LedgerState, LedgerTransaction, LockState, UnlockEvidence};
use crate::onchain::swap_vault::{find_event, VaultEvent};

fn violation(reason: impl Into<String>) -> LedgerError {
    LedgerError::ContractViolation(reason.into())
}

fn require_signature(tx: &LedgerTransaction, party: &crate::data_structures::LedgerIdentity) -> Result<(), LedgerError> {
    if tx.is_signed_by(&party.public_key) {
        Ok(())
    } else {
        Err(LedgerError::MissingSignature(party.name.clone()))
    }
}

/// Checks `tx` against its resolved `inputs` (same order as `tx.inputs`).
pub fn verify_transaction(
    tx: &LedgerTransaction,
    inputs: &[LedgerState],
    identities: &dyn IdentityService,
) -> Result<(), LedgerError> {
    if !tx.id_is_consistent() {
        return Err(LedgerError::IdMismatch);
    }
    match &tx.command {
        LedgerCommand::Issue => verify_issue(tx, inputs),
        LedgerCommand::Lock => verify_lock(tx, inputs),
        LedgerCommand::Unlock(evidence) => verify_release(tx, inputs, evidence, VaultEvent::Claim, identities),
        LedgerCommand::Revert(evidence) => verify_release(tx, inputs, evidence, VaultEvent::Revert, identities),
    }
}

fn verify_issue(tx: &LedgerTransaction, inputs: &[LedgerState]) -> Result<(), LedgerError> {
    if !inputs.is_empty() {
        return Err(violation("issuance consumes no inputs"));
    }
    if tx.outputs.is_empty() {
        return Err(violation("issuance needs at least one output"));
    }
    for output in &tx.outputs {
        match output {
            LedgerState::Asset(asset) => require_signature(tx, &asset.issuer)?,
            LedgerState::Locked { .. } => return Err(violation("cannot issue a locked asset")),
        }
    }
    Ok(())
}

fn verify_lock(tx: &LedgerTransaction, inputs: &[LedgerState]) -> Result<(), LedgerError> {
    let input = match inputs {
        [LedgerState::Asset(asset)] => asset,
        _ => return Err(violation("lock consumes exactly one unlocked asset")),
    };
    let (asset, lock) = match tx.outputs.as_slice() {
        [LedgerState::Locked { asset, lock }] => (asset, lock),
        _ => return Err(violation("lock produces exactly one locked asset")),
    };
    if asset != input {
        return Err(violation("locked asset differs from its input"));
    }
    if lock.sender != input.owner {
        return Err(violation("only the owner can lock an asset"));
    }
    if let Some(repeated) = find_repeated_validator(&lock.approved_validators) {
        return Err(violation(format!("validator {} reuses another validator's key or address", repeated)));
    }
    if lock.minimum_validations == 0 || lock.minimum_validations > lock.approved_validators.len() {
        return Err(violation(format!(
            "minimum validations {} invalid for {} validators",
            lock.minimum_validations,
            lock.approved_validators.len()
        )));
    }
    if lock.notary != tx.notary {
        return Err(violation("lock names a different notary"));
    }
    if lock.commitment_hash != lock.terms.hash() {
        return Err(violation("commitment hash does not match its terms"));
    }
    require_signature(tx, &lock.sender)
}

fn verify_release(
    tx: &LedgerTransaction,
    inputs: &[LedgerState],
    evidence: &UnlockEvidence,
    expected: VaultEvent,
    identities: &dyn IdentityService,
) -> Result<(), LedgerError> {
    let (asset, lock) = match inputs {
        [LedgerState::Locked { asset, lock }] => (asset, lock),
        _ => return Err(violation("release consumes exactly one locked asset")),
    };
    let new_owner = match expected {
        VaultEvent::Claim => &lock.recipient,
        _ => &lock.sender,
    };
    let expected_output = AssetState { owner: new_owner.clone(), ..asset.clone() };
    match tx.outputs.as_slice() {
        [LedgerState::Asset(output)] if output == &expected_output => {}
        _ => return Err(violation(format!("release must hand the asset to {}", new_owner))),
    }
    let swap_id = tx.inputs.first().map(|r| r.tx_id).ok_or_else(|| violation("release names no input"))?;
    verify_unlock_evidence(lock, swap_id, evidence, expected, identities)
}

/// Checks that `evidence` proves a successful `expected` vault event for
/// `swap_id` with the lock's commitment hash, included in a block whose
/// receipts root at least `minimum_validations` approved validators attested.
pub fn verify_unlock_evidence(
    lock: &LockState,
    swap_id: SwapId,
    evidence: &UnlockEvidence,
    expected: VaultEvent,
    identities: &dyn IdentityService,
) -> Result<(), LedgerError> {
    let receipt = &evidence.receipt;
    let proof = &evidence.proof;
    if proof.receipt_bytes != receipt.rlp_bytes() || proof.transaction_index != receipt.transaction_index {
        return Err(violation("proof does not carry the presented receipt"));
    }
    if !proof.verify(evidence.receipts_root) {
        return Err(violation("receipt proof does not verify against the receipts root"));
    }

    // Attesters must be approved for this lock and known to the ledger
    let known: Vec<_> = evidence
        .attestations
        .iter()
        .filter(|a| identities.party_for_key(a.validator.public_key()).as_ref() == Some(&a.validator.party))
        .cloned()
        .collect();
    let attesters = count_block_attesters(&known, &lock.approved_validators, proof.block_number, &evidence.receipts_root);
    if attesters < lock.minimum_validations {
        return Err(violation(format!(
            "{} validators attested the receipts root, {} required",
            attesters, lock.minimum_validations
        )));
    }

    if !receipt.status {
        return Err(violation("receipt reports a failed transaction"));
    }
    let event = find_event(&receipt.logs, lock.swap_vault, swap_id)
        .ok_or_else(|| violation("receipt has no vault event for this swap"))?;
    if event.event != expected {
        return Err(violation(format!("receipt carries {:?}, expected {:?}", event.event, expected)));
    }
    if event.commitment_hash != lock.commitment_hash {
        return Err(violation("vault event commits to different terms"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::crypto::PublicKey;
    use crate::attestation::types::BlockAttestation;
    use crate::data_structures::LedgerIdentity;
    use crate::ledger::interface::LedgerService;
    use crate::test_utils::{create_test_party, SwapHarness};
    use crate::trie::{receipt_key, PatriciaTrie, ReceiptProof};
    use ethers::types::H256;

    struct NoIdentities;

    impl IdentityService for NoIdentities {
        fn party_for_key(&self, _key: &PublicKey) -> Option<LedgerIdentity> {
            None
        }
    }

    // A claimed swap needing both of two validators, and the release Bob
    // would submit for it
    async fn claimed_release(h: &SwapHarness) -> LedgerTransaction {
        let asset_ref = h.issue_asset("bond", 10);
        let draft = h.alice.draft(asset_ref, h.proposal(2, 1, 2)).await.unwrap();
        h.alice.submit_draft(draft.swap_id).await.unwrap();
        h.bob.import_draft(draft.clone()).unwrap();
        h.bob.commit(draft.swap_id).await.unwrap();
        h.alice.collect_notarization_attestations(draft.swap_id, true).await.unwrap();
        let claim = h.alice.claim(draft.swap_id).await.unwrap();
        h.bob.collect_block_attestations(draft.swap_id, claim.block_number, true).await.unwrap();
        let (release, _) = h.bob.prepare_release(draft.swap_id, claim.block_number, claim.transaction_index).await.unwrap();
        release
    }

    fn evidence_of(release: &LedgerTransaction) -> UnlockEvidence {
        match &release.command {
            LedgerCommand::Unlock(evidence) | LedgerCommand::Revert(evidence) => evidence.clone(),
            other => panic!("{:?} is not a release", other),
        }
    }

    // The release with another command and owner, under its new id
    fn rebuild(release: &LedgerTransaction, command: LedgerCommand, owner: &LedgerIdentity) -> LedgerTransaction {
        let asset = AssetState { owner: owner.clone(), ..release.outputs[0].asset().clone() };
        LedgerTransaction::new(release.inputs.clone(), vec![LedgerState::Asset(asset)], command, release.notary.clone()).unwrap()
    }

    async fn rejection(h: &SwapHarness, tx: LedgerTransaction) -> String {
        let lock_ref = tx.inputs[0];
        let result = h.ledger.submit_transaction(tx).await;
        assert!(!h.ledger.is_consumed(&lock_ref));
        match result {
            Err(LedgerError::ContractViolation(reason)) => reason,
            other => panic!("expected a contract violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn proof_must_match_the_attested_root() {
        let h = SwapHarness::new(2).await;
        let release = claimed_release(&h).await;
        let mut evidence = evidence_of(&release);
        evidence.receipts_root = H256::repeat_byte(0xee);
        let reason = rejection(&h, rebuild(&release, LedgerCommand::Unlock(evidence), &h.bob_party)).await;
        assert!(reason.contains("receipts root"), "{}", reason);

        h.ledger.submit_transaction(release).await.unwrap();
    }

    #[tokio::test]
    async fn attestations_must_reach_minimum() {
        let h = SwapHarness::new(2).await;
        let release = claimed_release(&h).await;
        let mut evidence = evidence_of(&release);
        evidence.attestations.truncate(1);
        let reason = rejection(&h, rebuild(&release, LedgerCommand::Unlock(evidence.clone()), &h.bob_party)).await;
        assert!(reason.contains("1 validators attested"), "{}", reason);

        // A second copy of the same attestation under another name adds nothing
        let mut alias = evidence.attestations[0].clone();
        alias.validator.party.name = "Validator-1-alias".to_string();
        evidence.attestations.push(alias);
        rejection(&h, rebuild(&release, LedgerCommand::Unlock(evidence), &h.bob_party)).await;

        h.ledger.submit_transaction(release).await.unwrap();
    }

    #[tokio::test]
    async fn attesters_must_be_known_parties() {
        let h = SwapHarness::new(2).await;
        let release = claimed_release(&h).await;
        let lock_tx = h.ledger.get_transaction_by_id(release.inputs[0].tx_id).await.unwrap().unwrap();
        let inputs = vec![lock_tx.outputs[0].clone()];

        assert!(verify_transaction(&release, &inputs, h.ledger.as_ref()).is_ok());
        let result = verify_transaction(&release, &inputs, &NoIdentities);
        assert!(matches!(result, Err(LedgerError::ContractViolation(reason)) if reason.contains("0 validators attested")));
    }

    #[tokio::test]
    async fn failed_receipt_releases_nothing() {
        let h = SwapHarness::new(2).await;
        let release = claimed_release(&h).await;
        let mut evidence = evidence_of(&release);

        // Rebuild the block around a failed copy of the claim, attested by
        // every validator, so only the status is wrong
        let block_number = evidence.proof.block_number;
        let index = evidence.receipt.transaction_index;
        let mut receipts = h.chain.receipts(block_number).unwrap();
        let failed = receipts.iter_mut().find(|r| r.transaction_index == index).unwrap();
        failed.status = false;
        evidence.receipt = failed.clone();
        let entries: Vec<_> = receipts.iter().map(|r| (r.transaction_index, r.rlp_bytes())).collect();
        let trie = PatriciaTrie::build(&entries);
        evidence.receipts_root = trie.root_hash();
        evidence.proof = ReceiptProof {
            block_number,
            transaction_index: index,
            receipt_bytes: evidence.receipt.rlp_bytes(),
            merkle_path: trie.prove(&receipt_key(index)),
        };
        evidence.attestations = h
            .validators
            .iter()
            .map(|v| BlockAttestation::sign(v.keys.identity.clone(), &v.keys.signing_key, block_number, evidence.receipts_root))
            .collect();

        let reason = rejection(&h, rebuild(&release, LedgerCommand::Unlock(evidence), &h.bob_party)).await;
        assert!(reason.contains("failed transaction"), "{}", reason);

        h.ledger.submit_transaction(release).await.unwrap();
    }

    #[tokio::test]
    async fn claim_cannot_be_presented_as_revert() {
        let h = SwapHarness::new(2).await;
        let release = claimed_release(&h).await;
        let evidence = evidence_of(&release);
        let reason = rejection(&h, rebuild(&release, LedgerCommand::Revert(evidence), &h.alice_party)).await;
        assert!(reason.contains("expected Revert"), "{}", reason);

        h.ledger.submit_transaction(release).await.unwrap();
    }

    #[tokio::test]
    async fn asset_goes_only_to_the_lock_recipient() {
        let h = SwapHarness::new(2).await;
        let release = claimed_release(&h).await;
        let (mallory, _) = create_test_party("Mallory", 66);
        for owner in [&h.alice_party, &mallory] {
            let reason = rejection(&h, rebuild(&release, LedgerCommand::Unlock(evidence_of(&release)), owner)).await;
            assert!(reason.contains("release must hand the asset"), "{}", reason);
        }

        h.ledger.submit_transaction(release).await.unwrap();
    }
}
