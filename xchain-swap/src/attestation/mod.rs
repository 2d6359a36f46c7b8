// Validator attestations: key handling, attestation types, the validator
// process and the collector that gathers their signatures.

pub mod collector;
pub mod crypto;
pub mod types;
pub mod validator;

pub use collector::{AttestationCollector, AttestationSink, BlockFact, CollectionReport, Fact, NotarizationFact};
pub use types::{BlockAttestation, NotarizationAttestation};
pub use validator::ValidatorNode;
