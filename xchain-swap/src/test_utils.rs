// Shared fixtures for unit and integration tests.

use crate::attestation::crypto::{keypair_from_seed, SecretKey};
use crate::attestation::ValidatorNode;
use crate::commitment::CommitmentTerms;
use crate::config::SwapConfig;
use crate::cross_chain::{SwapCoordinator, SwapProposal};
use crate::data_structures::{LedgerIdentity, ValidatorIdentity};
use crate::ledger::{InMemoryLedger, LedgerService, StateRef};
use crate::network::{AttestationHandler, InProcessNetwork, ValidatorTransport};
use crate::onchain::ChainSimulator;
use crate::storage::ProofStore;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_TOKEN: u64 = 0x70;
pub const TEST_AMOUNT: u64 = 100;

/// Deterministic Ledger-A party. Distinct seeds give distinct keys.
pub fn create_test_party(name: &str, seed: u8) -> (LedgerIdentity, SecretKey) {
    let signing_key = keypair_from_seed([seed; 32]);
    (LedgerIdentity::new(name, signing_key.verifying_key()), signing_key)
}

/// Deterministic Chain-B account. `seed` must be non-zero.
pub fn create_test_wallet(seed: u64) -> LocalWallet {
    format!("{:064x}", seed).parse().expect("non-zero seed is a valid secp256k1 key")
}

#[derive(Clone, Debug)]
pub struct TestValidatorKeys {
    pub identity: ValidatorIdentity,
    pub signing_key: SecretKey,
    pub wallet: LocalWallet,
}

pub fn create_test_validator(id: u8) -> TestValidatorKeys {
    // Never collides with create_test_party seeds
    let mut seed = [0xa5u8; 32];
    seed[0] = id;
    let signing_key = keypair_from_seed(seed);
    let wallet = create_test_wallet(id as u64 + 1000);
    let identity = ValidatorIdentity {
        party: LedgerIdentity::new(format!("Validator-{}", id), signing_key.verifying_key()),
        evm_address: wallet.address(),
    };
    TestValidatorKeys { identity, signing_key, wallet }
}

pub struct TestValidator {
    pub keys: TestValidatorKeys,
    pub node: Arc<ValidatorNode>,
}

/// Two parties, one notary, a set of validators and one simulated chain.
///
/// Alice holds the Ledger-A asset and wants Bob's Chain-B tokens; Bob owns
/// the tokens and receives the asset.
pub struct SwapHarness {
    pub config: SwapConfig,
    pub chain: Arc<ChainSimulator>,
    pub ledger: Arc<InMemoryLedger>,
    pub network: InProcessNetwork,
    pub validators: Vec<TestValidator>,
    pub notary: LedgerIdentity,
    pub alice_party: LedgerIdentity,
    pub alice_key: SecretKey,
    pub alice_wallet: LocalWallet,
    pub bob_party: LedgerIdentity,
    pub bob_wallet: LocalWallet,
    pub alice: SwapCoordinator,
    pub bob: SwapCoordinator,
    pub token: Address,
    pub token_id: U256,
}

impl SwapHarness {
    pub async fn new(validator_count: usize) -> Self {
        let config = SwapConfig { collection_timeout: Duration::from_secs(2), ..SwapConfig::default() };
        let chain = ChainSimulator::new(config.chain_id, config.swap_vault);
        let (notary, notary_key) = create_test_party("Notary", 90);
        let ledger = Arc::new(InMemoryLedger::new(notary.clone(), notary_key));
        let network = InProcessNetwork::new(config.network.clone());

        let mut validators = Vec::with_capacity(validator_count);
        for id in 1..=validator_count {
            let keys = create_test_validator(id as u8);
            ledger.register_party(keys.identity.party.clone());
            let evm = Arc::new(chain.client(keys.wallet.clone()));
            let node = Arc::new(ValidatorNode::new(
                keys.identity.clone(),
                keys.signing_key.clone(),
                evm,
                vec![notary.clone()],
            ));
            let handler: Arc<dyn AttestationHandler> = node.clone();
            network.register(handler).await;
            validators.push(TestValidator { keys, node });
        }

        let (alice_party, alice_key) = create_test_party("Alice", 1);
        let (bob_party, bob_key) = create_test_party("Bob", 2);
        ledger.register_party(alice_party.clone());
        ledger.register_party(bob_party.clone());
        let alice_wallet = create_test_wallet(1);
        let bob_wallet = create_test_wallet(2);

        let token = Address::from_low_u64_be(TEST_TOKEN);
        let token_id = U256::one();
        chain.mint(token, token_id, bob_wallet.address(), U256::from(TEST_AMOUNT * 10));

        let transport: Arc<dyn ValidatorTransport> = Arc::new(network.clone());
        let ledger_service: Arc<dyn LedgerService> = ledger.clone();
        let alice = SwapCoordinator::new(
            alice_party.clone(),
            alice_key.clone(),
            config.clone(),
            Arc::new(ProofStore::new()),
            Arc::clone(&ledger_service),
            Arc::new(chain.client(alice_wallet.clone())),
            Arc::clone(&transport),
        );
        let bob = SwapCoordinator::new(
            bob_party.clone(),
            bob_key,
            config.clone(),
            Arc::new(ProofStore::new()),
            ledger_service,
            Arc::new(chain.client(bob_wallet.clone())),
            transport,
        );

        SwapHarness {
            config,
            chain,
            ledger,
            network,
            validators,
            notary,
            alice_party,
            alice_key,
            alice_wallet,
            bob_party,
            bob_wallet,
            alice,
            bob,
            token,
            token_id,
        }
    }

    /// Issues an asset owned by Alice.
    pub fn issue_asset(&self, description: &str, quantity: u64) -> StateRef {
        self.ledger
            .issue(&self.alice_party, &self.alice_key, &self.alice_party, description, quantity)
            .expect("issuance is valid")
    }

    pub fn validator_identities(&self, count: usize) -> Vec<ValidatorIdentity> {
        self.validators.iter().take(count).map(|v| v.keys.identity.clone()).collect()
    }

    /// Alice's asset for `TEST_AMOUNT` of Bob's tokens, approved by the
    /// first `validator_count` validators.
    pub fn proposal(&self, minimum_validations: usize, signature_threshold: u64, validator_count: usize) -> SwapProposal {
        let validators = self.validator_identities(validator_count);
        let terms = CommitmentTerms {
            chain_id: self.config.chain_id,
            owner: self.bob_wallet.address(),
            recipient: self.alice_wallet.address(),
            amount: U256::from(TEST_AMOUNT),
            token_id: self.token_id,
            token_address: self.token,
            signature_threshold,
            signers: validators.iter().map(|v| v.evm_address).collect(),
        };
        SwapProposal {
            recipient: self.bob_party.clone(),
            validators,
            minimum_validations,
            notary: self.notary.clone(),
            terms,
        }
    }

    pub fn token_balance(&self, holder: Address) -> U256 {
        self.chain.balance_of(self.token, self.token_id, holder)
    }
}
