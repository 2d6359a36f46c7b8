// End-to-end swaps between the in-memory Ledger A and the simulated Chain B,
// with validators reached over the in-process network.

use ethers::signers::Signer;
use ethers::types::U256;
use xchain_swap::cross_chain::SwapState;
use xchain_swap::data_structures::SwapId;
use xchain_swap::ledger::{LedgerCommand, StateRef};
use xchain_swap::network::AttestationHandler;
use xchain_swap::test_utils::{SwapHarness, TEST_AMOUNT};
use xchain_swap::SwapError;
use std::sync::Arc;

// Drafts, notarizes and commits a swap; returns its id.
async fn committed_swap(h: &SwapHarness, minimum_validations: usize, signature_threshold: u64, validators: usize) -> SwapId {
    let asset_ref = h.issue_asset("bond", 10);
    let draft = h
        .alice
        .draft(asset_ref, h.proposal(minimum_validations, signature_threshold, validators))
        .await
        .unwrap();
    let swap_id = draft.swap_id;
    assert_eq!(h.alice.submit_draft(swap_id).await.unwrap(), swap_id);
    h.bob.import_draft(draft).unwrap();
    h.bob.commit(swap_id).await.unwrap();
    swap_id
}

fn lock_ref(swap_id: SwapId) -> StateRef {
    StateRef { tx_id: swap_id, index: 0 }
}

#[tokio::test]
async fn claim_unlocks_asset_to_recipient() {
    let h = SwapHarness::new(3).await;
    h.chain.set_filler_transactions(3);
    let swap_id = committed_swap(&h, 2, 2, 3).await;
    assert_eq!(h.bob.swap_state(&swap_id), Some(SwapState::Committed));
    assert_eq!(h.token_balance(h.config.swap_vault), U256::from(TEST_AMOUNT));

    let report = h.alice.collect_notarization_attestations(swap_id, true).await.unwrap();
    assert_eq!(report.stored, 3);
    let claim = h.alice.claim(swap_id).await.unwrap();
    assert_eq!(claim.transaction_index, 3); // After the filler transfers
    assert_eq!(h.token_balance(h.alice_wallet.address()), U256::from(TEST_AMOUNT));
    assert_eq!(h.alice.swap_state(&swap_id), Some(SwapState::Claimed));

    h.bob.collect_block_attestations(swap_id, claim.block_number, true).await.unwrap();
    assert_eq!(h.bob.block_attestation_count(swap_id, claim.block_number).await.unwrap(), 3);
    let release = h.bob.finalize(swap_id, claim.block_number, claim.transaction_index).await.unwrap();

    assert!(matches!(release.command, LedgerCommand::Unlock(_)));
    assert!(h.ledger.is_consumed(&lock_ref(swap_id)));
    let unlocked = h.ledger.unconsumed(&release.out_ref(0)).unwrap();
    assert_eq!(unlocked.owner(), &h.bob_party);
    assert_eq!(unlocked.asset().quantity, 10);
    assert_eq!(h.bob.swap_state(&swap_id), Some(SwapState::Unlocked));
    assert!(h.bob.store().get_draft(&swap_id).is_none());
    assert!(h.bob.store().block_attestations(claim.block_number).is_empty());
}

#[tokio::test]
async fn single_validator_settles_a_claim() {
    let h = SwapHarness::new(1).await;
    let swap_id = committed_swap(&h, 1, 1, 1).await;

    let report = h.alice.collect_notarization_attestations(swap_id, true).await.unwrap();
    assert_eq!(report.stored, 1);
    let claim = h.alice.claim(swap_id).await.unwrap();
    assert_eq!(h.token_balance(h.alice_wallet.address()), U256::from(TEST_AMOUNT));

    let report = h.bob.collect_block_attestations(swap_id, claim.block_number, true).await.unwrap();
    assert_eq!(report.stored, 1);
    let release = h.bob.finalize(swap_id, claim.block_number, claim.transaction_index).await.unwrap();
    assert!(matches!(release.command, LedgerCommand::Unlock(_)));
    assert_eq!(h.ledger.unconsumed(&release.out_ref(0)).unwrap().owner(), &h.bob_party);
    assert_eq!(h.bob.swap_state(&swap_id), Some(SwapState::Unlocked));
}

#[tokio::test]
async fn revert_returns_asset_to_sender() {
    let h = SwapHarness::new(3).await;
    h.chain.set_filler_transactions(1);
    let swap_id = committed_swap(&h, 2, 2, 3).await;

    let revert = h.bob.revert(swap_id).await.unwrap();
    assert_eq!(h.token_balance(h.bob_wallet.address()), U256::from(TEST_AMOUNT * 10));
    assert_eq!(h.bob.swap_state(&swap_id), Some(SwapState::Reverted));

    h.alice.collect_block_attestations(swap_id, revert.block_number, true).await.unwrap();
    let release = h.alice.finalize(swap_id, revert.block_number, revert.transaction_index).await.unwrap();
    assert!(matches!(release.command, LedgerCommand::Revert(_)));
    assert_eq!(h.ledger.unconsumed(&release.out_ref(0)).unwrap().owner(), &h.alice_party);
    assert_eq!(h.alice.swap_state(&swap_id), Some(SwapState::AssetReverted));

    // The lock is spent; settling it again fails on Ledger A
    let again = h.bob.finalize(swap_id, revert.block_number, revert.transaction_index).await;
    assert!(again.is_err());
    assert!(h.alice.claim(swap_id).await.is_err());
}

#[tokio::test]
async fn finalize_waits_for_second_attestation() {
    let h = SwapHarness::new(2).await;
    let swap_id = committed_swap(&h, 2, 1, 2).await;
    h.alice.collect_notarization_attestations(swap_id, true).await.unwrap();
    let claim = h.alice.claim(swap_id).await.unwrap();

    let offline = h.validators[1].keys.identity.clone();
    assert!(h.network.disconnect(&offline).await);
    let report = h.bob.collect_block_attestations(swap_id, claim.block_number, true).await.unwrap();
    assert_eq!((report.stored, report.failed), (1, 1));

    let result = h.bob.finalize(swap_id, claim.block_number, claim.transaction_index).await;
    assert!(matches!(result, Err(SwapError::InsufficientAttestations { required: 2, found: 1 })));
    assert!(!h.ledger.is_consumed(&lock_ref(swap_id)));
    assert!(h.bob.store().get_draft(&swap_id).is_some());
    assert_eq!(h.bob.swap_state(&swap_id), Some(SwapState::Committed));

    let handler: Arc<dyn AttestationHandler> = h.validators[1].node.clone();
    h.network.register(handler).await;
    let report = h.bob.collect_block_attestations(swap_id, claim.block_number, true).await.unwrap();
    assert_eq!((report.stored, report.duplicates), (1, 1));

    h.bob.finalize(swap_id, claim.block_number, claim.transaction_index).await.unwrap();
    assert_eq!(h.bob.swap_state(&swap_id), Some(SwapState::Unlocked));
}

#[tokio::test]
async fn tampered_receipts_fail_root_check() {
    let h = SwapHarness::new(1).await;
    h.chain.set_filler_transactions(2);
    let swap_id = committed_swap(&h, 1, 1, 1).await;
    h.alice.collect_notarization_attestations(swap_id, true).await.unwrap();
    let claim = h.alice.claim(swap_id).await.unwrap();
    h.bob.collect_block_attestations(swap_id, claim.block_number, true).await.unwrap();

    h.chain.rewrite_receipts(claim.block_number, |receipts| {
        receipts[0].cumulative_gas_used += U256::one();
    });
    let result = h.bob.finalize(swap_id, claim.block_number, claim.transaction_index).await;
    assert!(matches!(result, Err(SwapError::RootMismatch { block_number, .. }) if block_number == claim.block_number));
    assert!(!h.ledger.is_consumed(&lock_ref(swap_id)));
}

#[tokio::test]
async fn receipts_that_do_not_settle_are_rejected() {
    let h = SwapHarness::new(1).await;
    h.chain.set_filler_transactions(2);
    let asset_ref = h.issue_asset("bond", 10);
    let draft = h.alice.draft(asset_ref, h.proposal(1, 1, 1)).await.unwrap();
    let swap_id = draft.swap_id;
    h.alice.submit_draft(swap_id).await.unwrap();
    h.bob.import_draft(draft).unwrap();
    let commit = h.bob.commit(swap_id).await.unwrap();
    h.bob.collect_block_attestations(swap_id, commit.block_number, true).await.unwrap();

    // The commit itself settles nothing
    let result = h.bob.finalize(swap_id, commit.block_number, commit.transaction_index).await;
    assert!(matches!(result, Err(SwapError::ProofMismatch(_))));
    // Neither does an unrelated transfer in the same block
    let result = h.bob.finalize(swap_id, commit.block_number, 0).await;
    assert!(matches!(result, Err(SwapError::ProofMismatch(_))));
    // Nor a transaction that does not exist
    let result = h.bob.finalize(swap_id, commit.block_number, 9).await;
    assert!(matches!(result, Err(SwapError::ProofMismatch(_))));
    assert!(!h.ledger.is_consumed(&lock_ref(swap_id)));
}

#[tokio::test]
async fn duplicate_draft_is_rejected() {
    let h = SwapHarness::new(2).await;
    let asset_ref = h.issue_asset("bond", 10);
    let proposal = h.proposal(1, 1, 2);
    let first = h.alice.draft(asset_ref, proposal.clone()).await.unwrap();
    let second = h.alice.draft(asset_ref, proposal).await;
    assert!(matches!(second, Err(SwapError::DuplicateSwap(id)) if id == first.swap_id));
}
