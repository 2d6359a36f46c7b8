// Single-notary Ledger A kept in memory.

use crate::attestation::crypto::{self, PartySignature, PublicKey, SecretKey};
use crate::data_structures::{LedgerIdentity, TxId};
use crate::ledger::contract::verify_transaction;
use crate::ledger::interface::{IdentityService, LedgerError, LedgerService};
use crate::ledger::types::{AssetState, LedgerCommand, LedgerState, LedgerTransaction, StateRef};
use async_trait::async_trait;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct LedgerBook {
    transactions: HashMap<TxId, LedgerTransaction>,
    consumed: HashSet<StateRef>,
    notary_signatures: HashMap<TxId, PartySignature>,
    parties: HashMap<[u8; 32], LedgerIdentity>,
}

/// Notary-backed ledger. Every accepted transaction is contract-checked,
/// consumes its inputs exactly once and gets a notary signature over its id.
pub struct InMemoryLedger {
    notary: LedgerIdentity,
    notary_key: SecretKey,
    book: Mutex<LedgerBook>,
}

impl InMemoryLedger {
    pub fn new(notary: LedgerIdentity, notary_key: SecretKey) -> Self {
        let ledger = InMemoryLedger { notary: notary.clone(), notary_key, book: Mutex::new(LedgerBook::default()) };
        ledger.register_party(notary);
        ledger
    }

    fn book(&self) -> MutexGuard<'_, LedgerBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notary(&self) -> &LedgerIdentity {
        &self.notary
    }

    /// Makes a party resolvable through `IdentityService`.
    pub fn register_party(&self, party: LedgerIdentity) {
        self.book().parties.insert(party.key_bytes(), party);
    }

    /// Issues a new asset owned by `owner` and records it.
    pub fn issue(
        &self,
        issuer: &LedgerIdentity,
        issuer_key: &SecretKey,
        owner: &LedgerIdentity,
        description: &str,
        quantity: u64,
    ) -> Result<StateRef, LedgerError> {
        let asset = AssetState {
            issuer: issuer.clone(),
            owner: owner.clone(),
            description: description.to_string(),
            quantity,
        };
        let mut tx = LedgerTransaction::new(Vec::new(), vec![LedgerState::Asset(asset)], LedgerCommand::Issue, self.notary.clone())?;
        tx.sign(issuer_key);
        let tx_id = self.record(tx)?;
        Ok(StateRef { tx_id, index: 0 })
    }

    /// The state at `state_ref` if it exists and is still unconsumed.
    pub fn unconsumed(&self, state_ref: &StateRef) -> Option<LedgerState> {
        let book = self.book();
        if book.consumed.contains(state_ref) {
            return None;
        }
        book.transactions.get(&state_ref.tx_id)?.outputs.get(state_ref.index).cloned()
    }

    pub fn is_consumed(&self, state_ref: &StateRef) -> bool {
        self.book().consumed.contains(state_ref)
    }

    fn record(&self, tx: LedgerTransaction) -> Result<TxId, LedgerError> {
        let mut book = self.book();
        if book.transactions.contains_key(&tx.id) {
            return Err(LedgerError::DuplicateTransaction(tx.id));
        }

        let mut inputs = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            if book.consumed.contains(input) {
                return Err(LedgerError::StateConsumed(*input));
            }
            let state = book
                .transactions
                .get(&input.tx_id)
                .and_then(|t| t.outputs.get(input.index))
                .cloned()
                .ok_or(LedgerError::UnknownState(*input))?;
            inputs.push(state);
        }

        let resolver = BookIdentities(&book.parties);
        if let Err(e) = verify_transaction(&tx, &inputs, &resolver) {
            warn!("[Ledger] Rejected transaction {:?}: {}", tx.id, e);
            return Err(e);
        }

        let tx_id = tx.id;
        let notary_signature = crypto::sign(tx_id.as_bytes(), &self.notary_key);
        book.consumed.extend(tx.inputs.iter().copied());
        book.notary_signatures.insert(tx_id, notary_signature);
        book.transactions.insert(tx_id, tx);
        info!("[Ledger] Notarized transaction {:?}", tx_id);
        Ok(tx_id)
    }
}

struct BookIdentities<'a>(&'a HashMap<[u8; 32], LedgerIdentity>);

impl IdentityService for BookIdentities<'_> {
    fn party_for_key(&self, key: &PublicKey) -> Option<LedgerIdentity> {
        self.0.get(key.as_bytes()).cloned()
    }
}

#[async_trait]
impl LedgerService for InMemoryLedger {
    async fn submit_transaction(&self, tx: LedgerTransaction) -> Result<TxId, LedgerError> {
        self.record(tx)
    }

    async fn get_transaction_by_id(&self, tx_id: TxId) -> Result<Option<LedgerTransaction>, LedgerError> {
        Ok(self.book().transactions.get(&tx_id).cloned())
    }

    async fn signatures_of(&self, tx_id: TxId, key: &PublicKey) -> Result<Option<PartySignature>, LedgerError> {
        let book = self.book();
        if key == &self.notary.public_key {
            return Ok(book.notary_signatures.get(&tx_id).copied());
        }
        Ok(book.transactions.get(&tx_id).and_then(|tx| tx.signature_of(key)))
    }
}

impl IdentityService for InMemoryLedger {
    fn party_for_key(&self, key: &PublicKey) -> Option<LedgerIdentity> {
        self.book().parties.get(key.as_bytes()).cloned()
    }
}
