//! Atomic swaps between a permissioned ledger (Ledger A) and an EVM chain
//! (Chain B), settled with validator-attested receipt proofs.

pub mod attestation;
pub mod commitment;
pub mod config;
pub mod cross_chain;
pub mod data_structures;
pub mod error;
pub mod ledger;
pub mod network;
pub mod onchain;
pub mod storage;
pub mod trie;

pub mod test_utils; // Shared fixtures for unit and integration tests

pub use error::SwapError;
