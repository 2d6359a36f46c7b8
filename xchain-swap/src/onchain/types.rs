use ethers::types::{Address, Bloom, H256, U256};
use ethers::utils::keccak256;
use ethers::utils::rlp::RlpStream;
use serde::{Deserialize, Serialize};

pub use ethers::types::Signature as EvmSignature;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmReceipt {
    pub transaction_hash: H256,
    pub transaction_index: u64,
    pub block_number: u64,
    /// EIP-2718 envelope type. Zero for legacy receipts.
    pub transaction_type: u8,
    pub status: bool,
    pub cumulative_gas_used: U256,
    pub logs_bloom: Bloom,
    pub logs: Vec<EvmLog>,
}

impl EvmReceipt {
    /// Consensus encoding, i.e. the value stored in the receipts trie:
    /// `rlp([status, cumulativeGasUsed, logsBloom, logs])`, prefixed with the
    /// type byte for typed receipts.
    pub fn rlp_bytes(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(4);
        stream.append(&u64::from(self.status));
        stream.append(&self.cumulative_gas_used);
        stream.append(&self.logs_bloom.as_bytes().to_vec());
        stream.begin_list(self.logs.len());
        for log in &self.logs {
            stream.begin_list(3);
            stream.append(&log.address.as_bytes().to_vec());
            stream.begin_list(log.topics.len());
            for topic in &log.topics {
                stream.append(&topic.as_bytes().to_vec());
            }
            stream.append(&log.data);
        }
        let body = stream.out().to_vec();
        if self.transaction_type == 0 {
            return body;
        }
        let mut typed = Vec::with_capacity(body.len() + 1);
        typed.push(self.transaction_type);
        typed.extend(body);
        typed
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmBlock {
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    pub receipts_root: H256,
    pub timestamp: u64,
    /// Transaction hashes in block order. Left empty unless requested.
    pub transactions: Vec<H256>,
}

/// 2048-bit logs bloom over every log address and topic (three 11-bit
/// indices taken from the keccak of each item).
pub fn logs_bloom(logs: &[EvmLog]) -> Bloom {
    let mut bloom = [0u8; 256];
    for log in logs {
        accrue(&mut bloom, log.address.as_bytes());
        for topic in &log.topics {
            accrue(&mut bloom, topic.as_bytes());
        }
    }
    Bloom::from(bloom)
}

fn accrue(bloom: &mut [u8; 256], input: &[u8]) {
    let hash = keccak256(input);
    for i in [0usize, 2, 4] {
        let bit = ((usize::from(hash[i]) << 8) | usize::from(hash[i + 1])) & 2047;
        bloom[255 - bit / 8] |= 1 << (bit % 8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::utils::rlp::Rlp;

    fn sample_receipt(transaction_type: u8) -> EvmReceipt {
        let logs = vec![EvmLog {
            address: Address::from_low_u64_be(0x5a),
            topics: vec![H256::repeat_byte(1), H256::repeat_byte(2)],
            data: vec![0xde, 0xad],
        }];
        EvmReceipt {
            transaction_hash: H256::repeat_byte(9),
            transaction_index: 3,
            block_number: 12,
            transaction_type,
            status: true,
            cumulative_gas_used: U256::from(90_000u64),
            logs_bloom: logs_bloom(&logs),
            logs,
        }
    }

    #[test]
    fn legacy_receipt_encoding_shape() {
        let receipt = sample_receipt(0);
        let encoded = receipt.rlp_bytes();
        let rlp = Rlp::new(&encoded);
        assert!(rlp.is_list());
        assert_eq!(rlp.item_count().unwrap(), 4);
        assert_eq!(rlp.val_at::<u64>(0).unwrap(), 1);
        assert_eq!(rlp.val_at::<U256>(1).unwrap(), U256::from(90_000u64));
        assert_eq!(rlp.at(2).unwrap().data().unwrap(), receipt.logs_bloom.as_bytes());
        let log = rlp.at(3).unwrap().at(0).unwrap();
        assert_eq!(log.at(0).unwrap().data().unwrap(), receipt.logs[0].address.as_bytes());
        assert_eq!(log.at(1).unwrap().item_count().unwrap(), 2);
        assert_eq!(log.at(2).unwrap().data().unwrap(), &[0xde, 0xad]);
    }

    #[test]
    fn typed_receipt_is_prefixed() {
        let legacy = sample_receipt(0).rlp_bytes();
        let typed = sample_receipt(2).rlp_bytes();
        assert_eq!(typed[0], 2);
        assert_eq!(&typed[1..], legacy.as_slice());
    }

    #[test]
    fn failed_status_encodes_as_empty() {
        let mut receipt = sample_receipt(0);
        receipt.status = false;
        let encoded = receipt.rlp_bytes();
        let rlp = Rlp::new(&encoded);
        assert!(rlp.at(0).unwrap().is_empty());
    }

    #[test]
    fn bloom_contains_log_members() {
        let receipt = sample_receipt(0);
        let bloom = receipt.logs_bloom;
        assert!(!bloom.is_zero());
        // Three bits per member, at most
        let set_bits: u32 = bloom.as_bytes().iter().map(|b| b.count_ones()).sum();
        assert!(set_bits <= 9 && set_bits >= 3);
        assert!(logs_bloom(&[]).is_zero());
    }
}
