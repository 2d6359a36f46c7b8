// Swap lifecycle and the per-party coordinator driving it.

pub mod swap_coordinator;
pub mod types;

pub use swap_coordinator::SwapCoordinator;
pub use types::{DraftTransaction, SwapProposal, SwapState};
