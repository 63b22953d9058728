//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, fee within 0..=10000 bps)
//! - Check that every catalog entry can actually be challenged
//! - Keep the watcher and the catalog paywall apart: both claim inbound
//!   transfers to the relayer, so only one ingestion path may run
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use alloy::primitives::Address;
use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::RelayConfig;
use crate::payments::amount::{parse_native_amount, BPS_DENOMINATOR};
use crate::payments::types::is_valid_content_id;

/// A single semantic problem, with the dotted path of the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    let chain = &config.blockchain;
    for (i, url) in std::iter::once(&chain.rpc_url).chain(chain.failover_urls.iter()).enumerate() {
        if url::Url::parse(url).is_err() {
            let field = if i == 0 {
                "blockchain.rpc_url".to_string()
            } else {
                format!("blockchain.failover_urls[{}]", i - 1)
            };
            errors.push(ValidationError::new(field, format!("invalid URL '{}'", url)));
        }
    }
    if chain.network.trim().is_empty() {
        errors.push(ValidationError::new("blockchain.network", "must not be empty"));
    }
    if chain.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("blockchain.rpc_timeout_secs", "must be > 0"));
    }
    if chain.receipt_timeout_secs == 0 {
        errors.push(ValidationError::new("blockchain.receipt_timeout_secs", "must be > 0"));
    }
    if chain.receipt_poll_ms == 0 {
        errors.push(ValidationError::new("blockchain.receipt_poll_ms", "must be > 0"));
    }
    if chain.gas_price_multiplier < 1.0 {
        errors.push(ValidationError::new("blockchain.gas_price_multiplier", "must be >= 1.0"));
    }

    if let Some(addr) = &config.relayer.address {
        if addr.parse::<Address>().is_err() {
            errors.push(ValidationError::new("relayer.address", "not an address"));
        }
    }

    if config.attestation.expiry_secs == 0 {
        errors.push(ValidationError::new("attestation.expiry_secs", "must be > 0"));
    }

    if config.fees.platform_fee_bps > BPS_DENOMINATOR {
        errors.push(ValidationError::new(
            "fees.platform_fee_bps",
            format!("must be <= {}", BPS_DENOMINATOR),
        ));
    }

    let fwd = &config.forwarding;
    if fwd.queue_capacity == 0 {
        errors.push(ValidationError::new("forwarding.queue_capacity", "must be > 0"));
    }
    if fwd.confirmation_timeout_secs == 0 {
        errors.push(ValidationError::new("forwarding.confirmation_timeout_secs", "must be > 0"));
    }
    if fwd.reconcile_interval_secs == 0 {
        errors.push(ValidationError::new("forwarding.reconcile_interval_secs", "must be > 0"));
    }
    if fwd.base_delay_ms > fwd.max_delay_ms {
        errors.push(ValidationError::new("forwarding.base_delay_ms", "must be <= max_delay_ms"));
    }

    let watcher = &config.watcher;
    if watcher.enabled {
        if watcher.interval_ms == 0 {
            errors.push(ValidationError::new("watcher.interval_ms", "must be > 0"));
        }
        if !is_valid_content_id(&watcher.content_id) {
            errors.push(ValidationError::new("watcher.content_id", "malformed content id"));
        }
        match &watcher.merchant_address {
            Some(addr) if addr.parse::<Address>().is_ok() => {}
            Some(_) => errors.push(ValidationError::new("watcher.merchant_address", "not an address")),
            None => errors.push(ValidationError::new(
                "watcher.merchant_address",
                "required when the watcher is enabled",
            )),
        }
        let active = config.catalog.iter().filter(|e| e.is_active).count();
        if active > 0 {
            errors.push(ValidationError::new(
                "watcher.enabled",
                format!(
                    "the watcher attributes every transfer to '{}'; it cannot run with {} active catalog entries",
                    watcher.content_id, active
                ),
            ));
        }
    }

    if config.rate_limit.enabled && config.rate_limit.requests_per_second == 0 {
        errors.push(ValidationError::new("rate_limit.requests_per_second", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    let mut ids = HashSet::new();
    for (i, entry) in config.catalog.iter().enumerate() {
        let field = |name: &str| format!("catalog[{}].{}", i, name);
        if !is_valid_content_id(&entry.id) {
            errors.push(ValidationError::new(field("id"), "malformed content id"));
        } else if !ids.insert(entry.id.as_str()) {
            errors.push(ValidationError::new(field("id"), format!("duplicate id '{}'", entry.id)));
        }
        if let Err(e) = parse_native_amount(&entry.price) {
            errors.push(ValidationError::new(field("price"), e.to_string()));
        }
        if entry.merchant_address.parse::<Address>().is_err() {
            errors.push(ValidationError::new(field("merchant_address"), "not an address"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
