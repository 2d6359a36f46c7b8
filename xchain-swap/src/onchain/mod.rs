// Chain B: the EVM client seam, receipt and block types, the swap vault
// codec and the in-process chain used by tests.

pub mod chain_simulator;
pub mod ethers_client;
pub mod interface;
pub mod swap_vault;
pub mod types;

pub use chain_simulator::{ChainSimulator, SimulatedEvmClient};
pub use ethers_client::EthersEvmClient;
pub use interface::{ChainError, EvmClient};
pub use types::{EvmBlock, EvmLog, EvmReceipt, EvmSignature};
