// Ledger A: the permissioned ledger holding the swapped asset.

pub mod contract;
pub mod interface;
pub mod simulator;
pub mod types;

pub use interface::{IdentityService, LedgerError, LedgerService};
pub use simulator::InMemoryLedger;
pub use types::{
    AssetState, LedgerCommand, LedgerState, LedgerTransaction, LockState, StateRef, TransactionSignature, UnlockEvidence,
};
