// In-process Chain B: mines one block per call, keeps token balances and
// executes the swap vault. Blocks carry genuine receipts-trie roots.

use crate::attestation::crypto::recover_evm_signer;
use crate::commitment::{CommitmentHash, CommitmentTerms};
use crate::onchain::interface::{ChainError, EvmClient};
use crate::onchain::swap_vault::{VaultCall, VaultEvent};
use crate::onchain::types::{logs_bloom, EvmBlock, EvmLog, EvmReceipt, EvmSignature};
use crate::trie::PatriciaTrie;
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const VAULT_CALL_GAS: u64 = 90_000;
const TRANSFER_GAS: u64 = 21_000;
const FILLER_CONTRACT: u64 = 0xfeed;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitmentStatus {
    Open,
    Claimed,
    Reverted,
}

#[derive(Clone, Debug)]
pub struct VaultCommitment {
    pub terms: CommitmentTerms,
    pub hash: CommitmentHash,
    pub status: CommitmentStatus,
}

type BalanceKey = (Address, U256, Address); // (token, token id, holder)

#[derive(Default)]
struct ChainState {
    blocks: Vec<EvmBlock>,
    receipts: HashMap<u64, Vec<EvmReceipt>>,
    balances: HashMap<BalanceKey, U256>,
    commitments: HashMap<H256, VaultCommitment>,
    // Unrelated transfers packed ahead of every vault call
    filler_per_block: usize,
    nonce: u64,
}

#[derive(Debug)]
pub struct ChainSimulator {
    pub chain_id: u64,
    pub vault: Address,
    state: Mutex<ChainState>,
}

impl std::fmt::Debug for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainState")
            .field("height", &self.blocks.len())
            .field("commitments", &self.commitments.len())
            .finish()
    }
}

impl ChainSimulator {
    pub fn new(chain_id: u64, vault: Address) -> Arc<Self> {
        let sim = ChainSimulator { chain_id, vault, state: Mutex::new(ChainState::default()) };
        sim.lock().seal_block(Vec::new()); // Genesis
        Arc::new(sim)
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Client that signs as `wallet`.
    pub fn client(self: &Arc<Self>, wallet: LocalWallet) -> SimulatedEvmClient {
        SimulatedEvmClient { chain: Arc::clone(self), wallet }
    }

    pub fn mint(&self, token: Address, token_id: U256, owner: Address, amount: U256) {
        let mut state = self.lock();
        let balance = state.balances.entry((token, token_id, owner)).or_default();
        *balance += amount;
    }

    pub fn balance_of(&self, token: Address, token_id: U256, owner: Address) -> U256 {
        self.lock().balances.get(&(token, token_id, owner)).copied().unwrap_or_default()
    }

    pub fn commitment(&self, swap_id: H256) -> Option<VaultCommitment> {
        self.lock().commitments.get(&swap_id).cloned()
    }

    pub fn latest_block_number(&self) -> u64 {
        (self.lock().blocks.len() as u64).saturating_sub(1)
    }

    /// Number of unrelated transfers mined ahead of each later call.
    pub fn set_filler_transactions(&self, per_block: usize) {
        self.lock().filler_per_block = per_block;
    }

    /// Mines a block holding only filler transfers.
    pub fn mine_block(&self) -> u64 {
        let mut state = self.lock();
        let receipts = state.filler_receipts();
        state.seal_block(receipts)
    }

    /// Fault injection: rewrites the stored receipts of a block and leaves
    /// its header (and receipts root) untouched.
    pub fn rewrite_receipts<F>(&self, block_number: u64, rewrite: F)
    where
        F: FnOnce(&mut Vec<EvmReceipt>),
    {
        if let Some(receipts) = self.lock().receipts.get_mut(&block_number) {
            rewrite(receipts);
        }
    }

    pub fn block(&self, number: u64) -> Option<EvmBlock> {
        self.lock().blocks.get(number as usize).cloned()
    }

    pub fn receipts(&self, number: u64) -> Option<Vec<EvmReceipt>> {
        self.lock().receipts.get(&number).cloned()
    }

    /// Executes a call from `from` and mines it. A reverting call is
    /// reported as an error and leaves no block behind.
    pub fn execute(&self, from: Address, to: Address, data: &[u8]) -> Result<EvmReceipt, ChainError> {
        let mut state = self.lock();
        if to != self.vault {
            return Err(ChainError::Reverted(format!("no contract deployed at {:?}", to)));
        }
        let logs = self.apply_vault_call(&mut state, from, data)?;

        let mut receipts = state.filler_receipts();
        state.nonce += 1;
        let mut preimage = from.as_bytes().to_vec();
        preimage.extend_from_slice(&state.nonce.to_be_bytes());
        preimage.extend_from_slice(data);
        let gas_before = receipts.last().map(|r: &EvmReceipt| r.cumulative_gas_used).unwrap_or_default();
        let receipt = EvmReceipt {
            transaction_hash: H256::from(keccak256(&preimage)),
            transaction_index: receipts.len() as u64,
            block_number: 0,
            transaction_type: 2,
            status: true,
            cumulative_gas_used: gas_before + U256::from(VAULT_CALL_GAS),
            logs_bloom: logs_bloom(&logs),
            logs,
        };
        receipts.push(receipt);
        let number = state.seal_block(receipts);

        let receipt = state
            .receipts
            .get(&number)
            .and_then(|r| r.last())
            .cloned()
            .ok_or(ChainError::BlockNotFound(number))?;
        debug!("[ChainSim {}] Mined call {:?} in block {}", self.chain_id, receipt.transaction_hash, number);
        Ok(receipt)
    }

    fn apply_vault_call(&self, state: &mut ChainState, from: Address, data: &[u8]) -> Result<Vec<EvmLog>, ChainError> {
        match VaultCall::decode(data)? {
            VaultCall::Commit { swap_id, token_address, token_id, amount, recipient, signature_threshold, signers } => {
                if state.commitments.contains_key(&swap_id) {
                    return Err(ChainError::Reverted(format!("commitment {:?} already exists", swap_id)));
                }
                if signature_threshold == 0 || signature_threshold as usize > signers.len() {
                    return Err(ChainError::Reverted(format!(
                        "threshold {} invalid for {} signers",
                        signature_threshold,
                        signers.len()
                    )));
                }
                state.transfer(token_address, token_id, from, self.vault, amount)?;
                let terms = CommitmentTerms {
                    chain_id: self.chain_id,
                    owner: from,
                    recipient,
                    amount,
                    token_id,
                    token_address,
                    signature_threshold,
                    signers,
                };
                let hash = terms.hash();
                state.commitments.insert(swap_id, VaultCommitment { terms, hash, status: CommitmentStatus::Open });
                info!("[ChainSim {}] Commitment {:?} opened by {:?}", self.chain_id, swap_id, from);
                Ok(vec![VaultEvent::Commit.log(self.vault, swap_id, hash)])
            }
            VaultCall::Claim { swap_id, signatures } => {
                let commitment = open_commitment(state, swap_id)?;
                let approvals: HashSet<Address> = signatures
                    .iter()
                    .filter_map(|bytes| EvmSignature::try_from(bytes.as_slice()).ok())
                    .filter_map(|signature| recover_evm_signer(swap_id.as_bytes(), &signature))
                    .filter(|signer| commitment.terms.signers.contains(signer))
                    .collect();
                if (approvals.len() as u64) < commitment.terms.signature_threshold {
                    warn!(
                        "[ChainSim {}] Claim of {:?} rejected: {} of {} signatures",
                        self.chain_id,
                        swap_id,
                        approvals.len(),
                        commitment.terms.signature_threshold
                    );
                    return Err(ChainError::Reverted(format!(
                        "{} valid signatures, {} required",
                        approvals.len(),
                        commitment.terms.signature_threshold
                    )));
                }
                let terms = &commitment.terms;
                state.transfer(terms.token_address, terms.token_id, self.vault, terms.recipient, terms.amount)?;
                state.set_status(swap_id, CommitmentStatus::Claimed);
                info!("[ChainSim {}] Commitment {:?} claimed by {:?}", self.chain_id, swap_id, terms.recipient);
                Ok(vec![VaultEvent::Claim.log(self.vault, swap_id, commitment.hash)])
            }
            VaultCall::Revert { swap_id } => {
                let commitment = open_commitment(state, swap_id)?;
                let terms = &commitment.terms;
                if from != terms.owner {
                    return Err(ChainError::Reverted("only the owner may revert a commitment".to_string()));
                }
                state.transfer(terms.token_address, terms.token_id, self.vault, terms.owner, terms.amount)?;
                state.set_status(swap_id, CommitmentStatus::Reverted);
                info!("[ChainSim {}] Commitment {:?} reverted to {:?}", self.chain_id, swap_id, terms.owner);
                Ok(vec![VaultEvent::Revert.log(self.vault, swap_id, commitment.hash)])
            }
        }
    }
}

fn open_commitment(state: &ChainState, swap_id: H256) -> Result<VaultCommitment, ChainError> {
    match state.commitments.get(&swap_id) {
        Some(c) if c.status == CommitmentStatus::Open => Ok(c.clone()),
        Some(c) => Err(ChainError::Reverted(format!("commitment {:?} is {:?}", swap_id, c.status))),
        None => Err(ChainError::Reverted(format!("no commitment {:?}", swap_id))),
    }
}

impl ChainState {
    fn transfer(&mut self, token: Address, token_id: U256, from: Address, to: Address, amount: U256) -> Result<(), ChainError> {
        let available = self.balances.get(&(token, token_id, from)).copied().unwrap_or_default();
        if available < amount {
            return Err(ChainError::Reverted(format!("insufficient balance: {} < {}", available, amount)));
        }
        self.balances.insert((token, token_id, from), available - amount);
        *self.balances.entry((token, token_id, to)).or_default() += amount;
        Ok(())
    }

    fn set_status(&mut self, swap_id: H256, status: CommitmentStatus) {
        if let Some(commitment) = self.commitments.get_mut(&swap_id) {
            commitment.status = status;
        }
    }

    fn filler_receipts(&mut self) -> Vec<EvmReceipt> {
        let transfer_topic = H256::from(keccak256(b"Transfer(address,address,uint256)"));
        (0..self.filler_per_block)
            .map(|i| {
                self.nonce += 1;
                let logs = vec![EvmLog {
                    address: Address::from_low_u64_be(FILLER_CONTRACT),
                    topics: vec![transfer_topic, H256::from_low_u64_be(i as u64)],
                    data: self.nonce.to_be_bytes().to_vec(),
                }];
                EvmReceipt {
                    transaction_hash: H256::from(keccak256(self.nonce.to_be_bytes())),
                    transaction_index: i as u64,
                    block_number: 0,
                    transaction_type: if i % 2 == 0 { 0 } else { 2 },
                    status: true,
                    cumulative_gas_used: U256::from(TRANSFER_GAS * (i as u64 + 1)),
                    logs_bloom: logs_bloom(&logs),
                    logs,
                }
            })
            .collect()
    }

    fn seal_block(&mut self, mut receipts: Vec<EvmReceipt>) -> u64 {
        let number = self.blocks.len() as u64;
        for receipt in receipts.iter_mut() {
            receipt.block_number = number;
        }
        let encoded: Vec<(u64, Vec<u8>)> = receipts.iter().map(|r| (r.transaction_index, r.rlp_bytes())).collect();
        let receipts_root = PatriciaTrie::build(&encoded).root_hash();
        let parent_hash = self.blocks.last().map(|b| b.hash).unwrap_or_default();

        let mut header = parent_hash.as_bytes().to_vec();
        header.extend_from_slice(&number.to_be_bytes());
        header.extend_from_slice(receipts_root.as_bytes());
        let block = EvmBlock {
            number,
            hash: H256::from(keccak256(&header)),
            parent_hash,
            receipts_root,
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            transactions: receipts.iter().map(|r| r.transaction_hash).collect(),
        };
        self.blocks.push(block);
        self.receipts.insert(number, receipts);
        number
    }
}

/// `EvmClient` over a shared `ChainSimulator`, signing as one wallet.
#[derive(Clone, Debug)]
pub struct SimulatedEvmClient {
    chain: Arc<ChainSimulator>,
    wallet: LocalWallet,
}

#[async_trait]
impl EvmClient for SimulatedEvmClient {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    fn chain_id(&self) -> u64 {
        self.chain.chain_id
    }

    async fn send_signed_call(&self, contract: Address, call: Vec<u8>) -> Result<EvmReceipt, ChainError> {
        self.chain.execute(self.wallet.address(), contract, &call)
    }

    async fn sign_raw_bytes(&self, bytes: &[u8]) -> Result<EvmSignature, ChainError> {
        self.wallet
            .sign_message(bytes)
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))
    }

    async fn get_block(&self, number: u64, full_transactions: bool) -> Result<EvmBlock, ChainError> {
        let mut block = self.chain.block(number).ok_or(ChainError::BlockNotFound(number))?;
        if !full_transactions {
            block.transactions.clear();
        }
        Ok(block)
    }

    async fn get_receipts_for_block(&self, number: u64) -> Result<Vec<EvmReceipt>, ChainError> {
        self.chain.receipts(number).ok_or(ChainError::BlockNotFound(number))
    }
}
