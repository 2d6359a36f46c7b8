// In-memory store for swap drafts and collected attestations.

use crate::attestation::collector::{AttestationSink, BlockFact, NotarizationFact};
use crate::attestation::types::{BlockAttestation, NotarizationAttestation};
use crate::cross_chain::types::DraftTransaction;
use crate::data_structures::{SwapId, ValidatorIdentity};
use crate::error::SwapError;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

// One validator -> attestation set per key, each behind its own lock so
// writers on different keys never contend.
type AttestationSet<A> = Arc<Mutex<HashMap<ValidatorIdentity, A>>>;

struct AttestationIndex<K, A> {
    sets: RwLock<HashMap<K, AttestationSet<A>>>,
}

impl<K: Eq + Hash + Copy, A: Clone> AttestationIndex<K, A> {
    fn new() -> Self {
        AttestationIndex { sets: RwLock::new(HashMap::new()) }
    }

    fn set_for(&self, key: K) -> AttestationSet<A> {
        if let Some(set) = self.sets.read().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return Arc::clone(set);
        }
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sets.entry(key).or_default())
    }

    // First attestation per validator wins
    fn insert(&self, key: K, validator: &ValidatorIdentity, attestation: A) -> bool {
        let set = self.set_for(key);
        let mut set = set.lock().unwrap_or_else(PoisonError::into_inner);
        if set.contains_key(validator) {
            return false;
        }
        set.insert(validator.clone(), attestation);
        true
    }

    fn get(&self, key: &K) -> Vec<(ValidatorIdentity, A)> {
        let set = match self.sets.read().unwrap_or_else(PoisonError::into_inner).get(key) {
            Some(set) => Arc::clone(set),
            None => return Vec::new(),
        };
        let set = set.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<_> = set.iter().map(|(v, a)| (v.clone(), a.clone())).collect();
        entries.sort_by(|(a, _), (b, _)| a.name().cmp(b.name()));
        entries
    }

    fn remove(&self, key: &K) {
        self.sets.write().unwrap_or_else(PoisonError::into_inner).remove(key);
    }
}

/// Drafts keyed by swap id, block attestations keyed by block number and
/// notarization attestations keyed by swap id. Safe to share across tasks.
///
/// A block's attestations are dropped once every swap tracking that block
/// has been deleted. Blocks no swap ever tracked keep theirs for the life
/// of the store.
pub struct ProofStore {
    drafts: RwLock<HashMap<SwapId, Arc<DraftTransaction>>>,
    block_attestations: AttestationIndex<u64, BlockAttestation>,
    notarizations: AttestationIndex<SwapId, NotarizationAttestation>,
    // Block number -> swaps that still need its attestations
    block_users: Mutex<HashMap<u64, HashSet<SwapId>>>,
}

impl Default for ProofStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProofStore {
    pub fn new() -> Self {
        ProofStore {
            drafts: RwLock::new(HashMap::new()),
            block_attestations: AttestationIndex::new(),
            notarizations: AttestationIndex::new(),
            block_users: Mutex::new(HashMap::new()),
        }
    }

    /// Stores a draft. An existing draft under the same id is never replaced.
    pub fn save_draft(&self, draft: DraftTransaction) -> Result<Arc<DraftTransaction>, SwapError> {
        let mut drafts = self.drafts.write().unwrap_or_else(PoisonError::into_inner);
        if drafts.contains_key(&draft.swap_id) {
            return Err(SwapError::DuplicateSwap(draft.swap_id));
        }
        let draft = Arc::new(draft);
        drafts.insert(draft.swap_id, Arc::clone(&draft));
        debug!("[ProofStore] Saved draft {:?}", draft.swap_id);
        Ok(draft)
    }

    pub fn get_draft(&self, swap_id: &SwapId) -> Option<Arc<DraftTransaction>> {
        self.drafts.read().unwrap_or_else(PoisonError::into_inner).get(swap_id).cloned()
    }

    /// Removes a draft, the notarizations collected for it and the
    /// attestations of blocks that no other swap still tracks.
    pub fn delete_draft(&self, swap_id: &SwapId) -> Option<Arc<DraftTransaction>> {
        let removed = self.drafts.write().unwrap_or_else(PoisonError::into_inner).remove(swap_id);
        self.notarizations.remove(swap_id);
        self.release_blocks(swap_id);
        if removed.is_some() {
            debug!("[ProofStore] Deleted draft {:?}", swap_id);
        }
        removed
    }

    /// Keeps the attestations of `block_number` while `swap_id` is stored.
    pub fn track_block(&self, swap_id: SwapId, block_number: u64) {
        let mut users = self.block_users.lock().unwrap_or_else(PoisonError::into_inner);
        users.entry(block_number).or_default().insert(swap_id);
    }

    fn release_blocks(&self, swap_id: &SwapId) {
        let mut users = self.block_users.lock().unwrap_or_else(PoisonError::into_inner);
        let mut unused = Vec::new();
        users.retain(|block_number, swaps| {
            swaps.remove(swap_id);
            if swaps.is_empty() {
                unused.push(*block_number);
            }
            !swaps.is_empty()
        });
        for block_number in unused {
            self.block_attestations.remove(&block_number);
            debug!("[ProofStore] Dropped attestations of block {}", block_number);
        }
    }

    /// Returns false if the validator already attested this block.
    pub fn add_block_attestation(&self, attestation: BlockAttestation) -> bool {
        let validator = attestation.validator.clone();
        self.block_attestations.insert(attestation.block_number, &validator, attestation)
    }

    /// Attestations for a block, ordered by validator name.
    pub fn block_attestations(&self, block_number: u64) -> Vec<BlockAttestation> {
        self.block_attestations.get(&block_number).into_iter().map(|(_, a)| a).collect()
    }

    pub fn add_notarization_attestation(&self, attestation: NotarizationAttestation) -> bool {
        let validator = attestation.validator.clone();
        self.notarizations.insert(attestation.tx_id, &validator, attestation)
    }

    pub fn notarization_attestations(&self, swap_id: &SwapId) -> Vec<NotarizationAttestation> {
        self.notarizations.get(swap_id).into_iter().map(|(_, a)| a).collect()
    }
}

impl AttestationSink<BlockFact> for ProofStore {
    fn store(&self, _block_number: &u64, attestation: BlockAttestation) -> bool {
        self.add_block_attestation(attestation)
    }
}

impl AttestationSink<NotarizationFact> for ProofStore {
    fn store(&self, _swap_id: &SwapId, attestation: NotarizationAttestation) -> bool {
        self.add_notarization_attestation(attestation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_validator;
    use ethers::types::H256;

    #[test]
    fn first_block_attestation_wins() {
        let store = ProofStore::new();
        let v = create_test_validator(1);
        let first = BlockAttestation::sign(v.identity.clone(), &v.signing_key, 3, H256::repeat_byte(1));
        let second = BlockAttestation::sign(v.identity.clone(), &v.signing_key, 3, H256::repeat_byte(2));
        assert!(store.add_block_attestation(first.clone()));
        assert!(!store.add_block_attestation(second));
        assert_eq!(store.block_attestations(3), vec![first]);
        assert!(store.block_attestations(4).is_empty());
    }

    #[test]
    fn block_attestations_are_sorted_by_validator() {
        let store = ProofStore::new();
        for id in [3u8, 1, 2] {
            let v = create_test_validator(id);
            store.add_block_attestation(BlockAttestation::sign(v.identity, &v.signing_key, 8, H256::zero()));
        }
        let names: Vec<_> = store.block_attestations(8).iter().map(|a| a.validator.name().to_string()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn block_attestations_live_while_a_swap_tracks_them() {
        let store = ProofStore::new();
        let v = create_test_validator(1);
        for block in [7u64, 8] {
            store.add_block_attestation(BlockAttestation::sign(v.identity.clone(), &v.signing_key, block, H256::zero()));
        }
        let (first, second) = (H256::repeat_byte(1), H256::repeat_byte(2));
        store.track_block(first, 7);
        store.track_block(second, 7);

        store.delete_draft(&first);
        assert_eq!(store.block_attestations(7).len(), 1);
        store.delete_draft(&second);
        assert!(store.block_attestations(7).is_empty());
        // Never tracked
        assert_eq!(store.block_attestations(8).len(), 1);
    }

    #[test]
    fn concurrent_inserts_keep_one_per_validator() {
        let store = Arc::new(ProofStore::new());
        let validators: Vec<_> = (1..=8u8).map(create_test_validator).collect();
        let handles: Vec<_> = (0..4)
            .map(|round| {
                let store = Arc::clone(&store);
                let validators = validators.clone();
                std::thread::spawn(move || {
                    validators
                        .iter()
                        .filter(|v| {
                            let root = H256::repeat_byte(round as u8);
                            store.add_block_attestation(BlockAttestation::sign(v.identity.clone(), &v.signing_key, 1, root))
                        })
                        .count()
                })
            })
            .collect();
        let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(inserted, validators.len());
        assert_eq!(store.block_attestations(1).len(), validators.len());
    }
}
