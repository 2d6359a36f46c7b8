use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    // Chain B
    pub chain_id: u64,          // EVM chain id bound into every commitment
    pub swap_vault: Address,    // Address of the swap vault contract

    // Attestation collection
    #[serde(with = "humantime_serde")]
    pub collection_timeout: Duration, // Deadline for blocking collection

    // Validator transport emulation
    pub network: NetworkConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub drop_rate: f64, // Probability that a request never reaches the validator
    pub inbox_capacity: usize,
}

impl Default for SwapConfig {
    fn default() -> Self {
        SwapConfig {
            chain_id: 1337,
            swap_vault: Address::repeat_byte(0x5a),
            collection_timeout: Duration::from_secs(5),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
            drop_rate: 0.0,
            inbox_capacity: 64,
        }
    }
}

impl SwapConfig {
    /// Parses a JSON document. Missing fields fall back to defaults and
    /// durations use humantime notation ("5s", "250ms").
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: SwapConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection_timeout.is_zero() {
            return Err(ConfigError::Invalid("collection_timeout must be non-zero".to_string()));
        }
        if self.network.min_delay_ms > self.network.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "network delay range is inverted ({} > {})",
                self.network.min_delay_ms, self.network.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.network.drop_rate) {
            return Err(ConfigError::Invalid(format!(
                "network drop_rate {} outside [0, 1]",
                self.network.drop_rate
            )));
        }
        if self.network.inbox_capacity == 0 {
            return Err(ConfigError::Invalid("network inbox_capacity must be positive".to_string()));
        }
        Ok(())
    }
}
