// Call and event codec for the Chain-B swap vault contract.

use crate::onchain::interface::ChainError;
use crate::onchain::types::EvmLog;
use ethers::abi::{parse_abi, Abi, Function, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

const VAULT_ABI: &[&str] = &[
    "function commitWithToken(bytes32 swapId, address tokenAddress, uint256 tokenId, uint256 amount, address recipient, uint256 signaturesThreshold, address[] signers)",
    "function claimCommitment(bytes32 swapId, bytes[] signatures)",
    "function revertCommitment(bytes32 swapId)",
    "event Commit(bytes32 indexed swapId, bytes32 commitmentHash)",
    "event Claim(bytes32 indexed swapId, bytes32 commitmentHash)",
    "event Revert(bytes32 indexed swapId, bytes32 commitmentHash)",
];

pub fn vault_abi() -> Result<Abi, ChainError> {
    parse_abi(VAULT_ABI).map_err(|e| ChainError::Abi(e.to_string()))
}

fn function(name: &str) -> Result<Function, ChainError> {
    vault_abi()?
        .function(name)
        .cloned()
        .map_err(|e| ChainError::Abi(e.to_string()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VaultCall {
    Commit {
        swap_id: H256,
        token_address: Address,
        token_id: U256,
        amount: U256,
        recipient: Address,
        signature_threshold: u64,
        signers: Vec<Address>,
    },
    Claim {
        swap_id: H256,
        signatures: Vec<Vec<u8>>,
    },
    Revert {
        swap_id: H256,
    },
}

impl VaultCall {
    fn function_name(&self) -> &'static str {
        match self {
            VaultCall::Commit { .. } => "commitWithToken",
            VaultCall::Claim { .. } => "claimCommitment",
            VaultCall::Revert { .. } => "revertCommitment",
        }
    }

    pub fn swap_id(&self) -> H256 {
        match self {
            VaultCall::Commit { swap_id, .. } | VaultCall::Claim { swap_id, .. } | VaultCall::Revert { swap_id } => {
                *swap_id
            }
        }
    }

    /// Selector followed by the ABI-encoded arguments.
    pub fn encode(&self) -> Result<Vec<u8>, ChainError> {
        let tokens = match self {
            VaultCall::Commit {
                swap_id,
                token_address,
                token_id,
                amount,
                recipient,
                signature_threshold,
                signers,
            } => vec![
                Token::FixedBytes(swap_id.as_bytes().to_vec()),
                Token::Address(*token_address),
                Token::Uint(*token_id),
                Token::Uint(*amount),
                Token::Address(*recipient),
                Token::Uint(U256::from(*signature_threshold)),
                Token::Array(signers.iter().copied().map(Token::Address).collect()),
            ],
            VaultCall::Claim { swap_id, signatures } => vec![
                Token::FixedBytes(swap_id.as_bytes().to_vec()),
                Token::Array(signatures.iter().cloned().map(Token::Bytes).collect()),
            ],
            VaultCall::Revert { swap_id } => vec![Token::FixedBytes(swap_id.as_bytes().to_vec())],
        };
        function(self.function_name())?
            .encode_input(&tokens)
            .map_err(|e| ChainError::Abi(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, ChainError> {
        if data.len() < 4 {
            return Err(ChainError::Abi("calldata shorter than a selector".to_string()));
        }
        let abi = vault_abi()?;
        let function = abi
            .functions()
            .find(|f| f.short_signature() == data[..4])
            .ok_or_else(|| ChainError::Abi(format!("unknown selector 0x{}", hex::encode(&data[..4]))))?;
        let tokens = function
            .decode_input(&data[4..])
            .map_err(|e| ChainError::Abi(e.to_string()))?;
        let mut args = tokens.into_iter();

        let swap_id = next_bytes32(&mut args)?;
        match function.name.as_str() {
            "commitWithToken" => Ok(VaultCall::Commit {
                swap_id,
                token_address: next_address(&mut args)?,
                token_id: next_uint(&mut args)?,
                amount: next_uint(&mut args)?,
                recipient: next_address(&mut args)?,
                signature_threshold: u64::try_from(next_uint(&mut args)?)
                    .map_err(|_| ChainError::Abi("signature threshold overflows u64".to_string()))?,
                signers: match args.next() {
                    Some(Token::Array(items)) => items
                        .into_iter()
                        .map(|t| t.into_address().ok_or_else(|| ChainError::Abi("signer is not an address".to_string())))
                        .collect::<Result<_, _>>()?,
                    other => return Err(unexpected("address[]", other)),
                },
            }),
            "claimCommitment" => Ok(VaultCall::Claim {
                swap_id,
                signatures: match args.next() {
                    Some(Token::Array(items)) => items
                        .into_iter()
                        .map(|t| t.into_bytes().ok_or_else(|| ChainError::Abi("signature is not bytes".to_string())))
                        .collect::<Result<_, _>>()?,
                    other => return Err(unexpected("bytes[]", other)),
                },
            }),
            "revertCommitment" => Ok(VaultCall::Revert { swap_id }),
            name => Err(ChainError::Abi(format!("unsupported function {}", name))),
        }
    }
}

fn unexpected(expected: &str, found: Option<Token>) -> ChainError {
    ChainError::Abi(format!("expected {}, found {:?}", expected, found))
}

fn next_bytes32(args: &mut impl Iterator<Item = Token>) -> Result<H256, ChainError> {
    match args.next() {
        Some(Token::FixedBytes(bytes)) if bytes.len() == 32 => Ok(H256::from_slice(&bytes)),
        other => Err(unexpected("bytes32", other)),
    }
}

fn next_address(args: &mut impl Iterator<Item = Token>) -> Result<Address, ChainError> {
    match args.next() {
        Some(Token::Address(address)) => Ok(address),
        other => Err(unexpected("address", other)),
    }
}

fn next_uint(args: &mut impl Iterator<Item = Token>) -> Result<U256, ChainError> {
    match args.next() {
        Some(Token::Uint(value)) => Ok(value),
        other => Err(unexpected("uint256", other)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VaultEvent {
    Commit,
    Claim,
    Revert,
}

impl VaultEvent {
    pub const ALL: [VaultEvent; 3] = [VaultEvent::Commit, VaultEvent::Claim, VaultEvent::Revert];

    pub fn signature(&self) -> &'static str {
        match self {
            VaultEvent::Commit => "Commit(bytes32,bytes32)",
            VaultEvent::Claim => "Claim(bytes32,bytes32)",
            VaultEvent::Revert => "Revert(bytes32,bytes32)",
        }
    }

    pub fn topic(&self) -> H256 {
        H256::from(keccak256(self.signature().as_bytes()))
    }

    /// Log as the vault emits it: topics `[event, swapId]`, data = commitment hash.
    pub fn log(&self, vault: Address, swap_id: H256, commitment_hash: H256) -> EvmLog {
        EvmLog {
            address: vault,
            topics: vec![self.topic(), swap_id],
            data: commitment_hash.as_bytes().to_vec(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedVaultEvent {
    pub event: VaultEvent,
    pub swap_id: H256,
    pub commitment_hash: H256,
}

pub fn parse_log(log: &EvmLog) -> Option<DecodedVaultEvent> {
    let (topic0, swap_id) = match log.topics.as_slice() {
        [topic0, swap_id] => (*topic0, *swap_id),
        _ => return None,
    };
    if log.data.len() != 32 {
        return None;
    }
    let event = VaultEvent::ALL.into_iter().find(|e| e.topic() == topic0)?;
    Some(DecodedVaultEvent { event, swap_id, commitment_hash: H256::from_slice(&log.data) })
}

/// First vault event in `logs` emitted by `vault` for `swap_id`.
pub fn find_event<'a, I>(logs: I, vault: Address, swap_id: H256) -> Option<DecodedVaultEvent>
where
    I: IntoIterator<Item = &'a EvmLog>,
{
    logs.into_iter()
        .filter(|log| log.address == vault)
        .filter_map(parse_log)
        .find(|decoded| decoded.swap_id == swap_id)
}
