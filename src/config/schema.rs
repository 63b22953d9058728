//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.
//! Secrets (signing key, attestation secret) are never part of the file; they
//! are read from the environment at startup.

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, request limits).
    pub listener: ListenerConfig,

    /// Blockchain node settings.
    pub blockchain: BlockchainConfig,

    /// Relayer identity checks.
    pub relayer: RelayerConfig,

    /// Attestation token settings.
    pub attestation: AttestationConfig,

    /// Platform fee settings.
    pub fees: FeeConfig,

    /// Merchant forwarding settings.
    pub forwarding: ForwardingConfig,

    /// Block-scanning ingestion path.
    pub watcher: WatcherConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Content entries served by the in-memory catalog.
    pub catalog: Vec<ContentEntry>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Total time allowed for one request, including receipt waits.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 90,
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Blockchain integration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockchainConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// Chain ID (56 for BNB Smart Chain, 31337 for local Anvil).
    pub chain_id: u64,

    /// Network identifier advertised in challenges and claims.
    pub network: String,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Number of block confirmations required before a payment is usable.
    pub confirmation_blocks: u32,

    /// Upper bound on a receipt wait during verification.
    pub receipt_timeout_secs: u64,

    /// Interval between receipt polls.
    pub receipt_poll_ms: u64,

    /// Gas price multiplier (1.0 = estimated, 1.2 = 20% buffer).
    pub gas_price_multiplier: f64,

    /// Maximum gas price in gwei (protection against spikes).
    pub max_gas_price_gwei: u64,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://bsc-dataseed.binance.org".to_string(),
            failover_urls: Vec::new(),
            chain_id: 56,
            network: "bsc".to_string(),
            rpc_timeout_secs: 10,
            confirmation_blocks: 1,
            receipt_timeout_secs: 30,
            receipt_poll_ms: 1000,
            gas_price_multiplier: 1.1,
            max_gas_price_gwei: 50,
        }
    }
}

/// Relayer identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayerConfig {
    /// Expected relayer address. When set, startup fails if the signing key
    /// derives a different address.
    pub address: Option<String>,
}

/// Attestation token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AttestationConfig {
    /// Validity window embedded in every issued token.
    pub expiry_secs: u64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            expiry_secs: 24 * 60 * 60,
        }
    }
}

/// Platform fee configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Fee in basis points of the gross payment (250 = 2.5%).
    pub platform_fee_bps: u32,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: 250,
        }
    }
}

/// Merchant forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Enable merchant forwarding.
    pub enabled: bool,

    /// Pending forward jobs before new ones are parked for reconciliation.
    pub queue_capacity: usize,

    /// Upper bound on waiting for a merchant transfer to confirm.
    pub confirmation_timeout_secs: u64,

    /// Interval between reconciliation passes.
    pub reconcile_interval_secs: u64,

    /// Attempts before a retryable failure is left for an operator.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Optional journal file (JSON lines) the forward ledger is persisted to.
    pub ledger_path: Option<String>,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 256,
            confirmation_timeout_secs: 60,
            reconcile_interval_secs: 30,
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            ledger_path: None,
        }
    }
}

/// Chain watcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Enable the block-scanning ingestion path.
    pub enabled: bool,

    /// Polling interval in milliseconds.
    pub interval_ms: u64,

    /// Blocks behind the head to start scanning from.
    pub lookback_blocks: u64,

    /// Content id observed payments are attributed to.
    pub content_id: String,

    /// Merchant that receives forwarded funds for observed payments.
    pub merchant_address: Option<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 5000,
            lookback_blocks: 10,
            content_id: "direct-payment".to_string(),
            merchant_address: None,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Maximum requests per second per IP.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 20,
            burst_size: 40,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Delivery shape of a content entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
    Video,
    File,
    Api,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
            ContentKind::Video => "video",
            ContentKind::File => "file",
            ContentKind::Api => "api",
        }
    }
}

/// A paywalled content entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Price as a decimal string in native units (e.g. "0.001").
    pub price: String,
    pub merchant_address: String,
    pub content_type: ContentKind,
    /// Inline text, or the endpoint URL for `api` content.
    #[serde(default)]
    pub content_data: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: RelayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.fees.platform_fee_bps, 250);
        assert_eq!(config.attestation.expiry_secs, 86_400);
        assert_eq!(config.watcher.lookback_blocks, 10);
        assert!(config.catalog.is_empty());
    }

    #[test]
    fn test_catalog_entry_parsing() {
        let config: RelayConfig = toml::from_str(
            r#"
            [blockchain]
            chain_id = 97
            network = "bsc-testnet"

            [[catalog]]
            id = "guide"
            title = "Rust guide"
            price = "0.001"
            merchant_address = "0xd24a482e965dd2aec07539f36ac0fc7335f4c78d"
            content_type = "text"
            content_data = "hello"
            "#,
        )
        .unwrap();

        assert_eq!(config.blockchain.chain_id, 97);
        assert_eq!(config.blockchain.rpc_timeout_secs, 10);
        let entry = &config.catalog[0];
        assert_eq!(entry.content_type, ContentKind::Text);
        assert!(entry.is_active);
        assert_eq!(entry.description, None);
    }
}
