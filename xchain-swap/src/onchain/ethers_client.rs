// EvmClient over a JSON-RPC node.

use crate::onchain::interface::{ChainError, EvmClient};
use crate::onchain::types::{EvmBlock, EvmLog, EvmReceipt, EvmSignature};
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Block, BlockId, BlockNumber, TransactionReceipt, TransactionRequest, H256};
use log::{debug, info};

pub struct EthersEvmClient {
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
    chain_id: u64,
}

impl EthersEvmClient {
    /// Connects to `rpc_url` and binds `wallet` to the node's chain id.
    pub async fn connect(rpc_url: &str, wallet: LocalWallet) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(|e| ChainError::Provider(e.to_string()))?;
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))?
            .as_u64();
        let wallet = wallet.with_chain_id(chain_id);
        info!("[EvmClient] Connected to {} (chain {}) as {:?}", rpc_url, chain_id, wallet.address());
        Ok(EthersEvmClient { client: SignerMiddleware::new(provider, wallet), chain_id })
    }

    fn provider(&self) -> &Provider<Http> {
        self.client.inner()
    }
}

fn block_id(number: u64) -> BlockId {
    BlockId::Number(BlockNumber::Number(number.into()))
}

fn to_evm_block<T>(number: u64, block: &Block<T>, transactions: Vec<H256>) -> EvmBlock {
    EvmBlock {
        number,
        hash: block.hash.unwrap_or_default(),
        parent_hash: block.parent_hash,
        receipts_root: block.receipts_root,
        timestamp: block.timestamp.as_u64(),
        transactions,
    }
}

fn convert_receipt(receipt: TransactionReceipt) -> EvmReceipt {
    EvmReceipt {
        transaction_hash: receipt.transaction_hash,
        transaction_index: receipt.transaction_index.as_u64(),
        block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
        transaction_type: receipt.transaction_type.map(|t| t.as_u64() as u8).unwrap_or_default(),
        status: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false),
        cumulative_gas_used: receipt.cumulative_gas_used,
        logs_bloom: receipt.logs_bloom,
        logs: receipt
            .logs
            .into_iter()
            .map(|log| EvmLog { address: log.address, topics: log.topics, data: log.data.to_vec() })
            .collect(),
    }
}

#[async_trait]
impl EvmClient for EthersEvmClient {
    fn address(&self) -> Address {
        self.client.address()
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn send_signed_call(&self, contract: Address, call: Vec<u8>) -> Result<EvmReceipt, ChainError> {
        let tx = TransactionRequest::new().to(contract).data(call);
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| ChainError::Reverted(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        debug!("[EvmClient] Sent {:?}, waiting for receipt", tx_hash);
        let receipt = pending
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))?
            .ok_or(ChainError::NoReceipt(tx_hash))?;
        Ok(convert_receipt(receipt))
    }

    async fn sign_raw_bytes(&self, bytes: &[u8]) -> Result<EvmSignature, ChainError> {
        self.client
            .signer()
            .sign_message(bytes)
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))
    }

    async fn get_block(&self, number: u64, full_transactions: bool) -> Result<EvmBlock, ChainError> {
        if full_transactions {
            let block = self
                .provider()
                .get_block_with_txs(block_id(number))
                .await
                .map_err(|e| ChainError::Provider(e.to_string()))?
                .ok_or(ChainError::BlockNotFound(number))?;
            let hashes = block.transactions.iter().map(|tx| tx.hash).collect();
            return Ok(to_evm_block(number, &block, hashes));
        }
        let block = self
            .provider()
            .get_block(block_id(number))
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))?
            .ok_or(ChainError::BlockNotFound(number))?;
        Ok(to_evm_block(number, &block, Vec::new()))
    }

    async fn get_receipts_for_block(&self, number: u64) -> Result<Vec<EvmReceipt>, ChainError> {
        let mut receipts: Vec<EvmReceipt> = self
            .provider()
            .get_block_receipts(BlockNumber::Number(number.into()))
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))?
            .into_iter()
            .map(convert_receipt)
            .collect();
        receipts.sort_by_key(|r| r.transaction_index);
        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::PatriciaTrie;

    // Needs a local node (e.g. anvil) on port 8545 with at least one mined block.
    #[tokio::test]
    #[ignore]
    async fn receipts_root_matches_live_node() {
        let wallet: LocalWallet = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7341b46290"
            .parse()
            .unwrap();
        let client = EthersEvmClient::connect("http://127.0.0.1:8545", wallet).await.unwrap();
        let block = client.get_block(1, false).await.unwrap();
        let receipts = client.get_receipts_for_block(1).await.unwrap();
        let encoded: Vec<_> = receipts.iter().map(|r| (r.transaction_index, r.rlp_bytes())).collect();
        assert_eq!(PatriciaTrie::build(&encoded).root_hash(), block.receipts_root);
    }
}
