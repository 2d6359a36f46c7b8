use crate::onchain::types::{EvmBlock, EvmReceipt, EvmSignature};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block {0} not found")]
    BlockNotFound(u64),
    #[error("call reverted: {0}")]
    Reverted(String),
    #[error("abi error: {0}")]
    Abi(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("signing error: {0}")]
    Signing(String),
    #[error("transaction {0:?} dropped without a receipt")]
    NoReceipt(H256),
}

/// Client for Chain B, bound to a single signing account.
/// Implemented against a live node and by the in-process simulator.
#[async_trait]
pub trait EvmClient: Send + Sync {
    /// Address of the signing account.
    fn address(&self) -> Address;

    fn chain_id(&self) -> u64;

    /// Signs and submits a call, then waits for its receipt.
    async fn send_signed_call(&self, contract: Address, call: Vec<u8>) -> Result<EvmReceipt, ChainError>;

    /// EIP-191 personal signature over `bytes`.
    async fn sign_raw_bytes(&self, bytes: &[u8]) -> Result<EvmSignature, ChainError>;

    async fn get_block(&self, number: u64, full_transactions: bool) -> Result<EvmBlock, ChainError>;

    /// Every receipt of the block, ordered by transaction index.
    async fn get_receipts_for_block(&self, number: u64) -> Result<Vec<EvmReceipt>, ChainError>;
}
