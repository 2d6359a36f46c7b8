use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use ethers::types::{Address, Signature as EvmSignature};
use rand::rngs::OsRng;

// Re-export key types for convenience
pub use ed25519_dalek::{Signature as PartySignature, SigningKey as SecretKey, VerifyingKey as PublicKey};

/// Generates a new Ed25519 keypair.
pub fn generate_keypair() -> SigningKey {
    let mut csprng = OsRng;
    SigningKey::generate(&mut csprng)
}

/// Derives an Ed25519 keypair from a fixed 32-byte seed. Deterministic.
pub fn keypair_from_seed(seed: [u8; 32]) -> SigningKey {
    SigningKey::from_bytes(&seed)
}

pub fn sign(message: &[u8], secret_key: &SigningKey) -> Signature {
    secret_key.sign(message)
}

pub fn verify(message: &[u8], signature: &Signature, public_key: &VerifyingKey) -> bool {
    public_key.verify(message, signature).is_ok()
}

/// Recovers the Chain-B address behind an EIP-191 signature over `message`.
pub fn recover_evm_signer(message: &[u8], signature: &EvmSignature) -> Option<Address> {
    signature.recover(message.to_vec()).ok()
}
