//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve secrets and the relayer identity
//! - Initialize all subsystems in dependency order
//! - Hand back the background tasks for the caller to spawn
//!
//! # Design Decisions
//! - Fail fast: a missing secret or a relayer address mismatch is fatal
//! - Secrets are checked before any network I/O
//! - Listeners start last (traffic only when ready)

use alloy::primitives::Address;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::attestation::codec::SECRET_ENV_VAR;
use crate::attestation::{AttestationCodec, AttestationError};
use crate::blockchain::wallet::PRIVATE_KEY_ENV_VAR;
use crate::blockchain::{BlockchainClient, BlockchainError, ChainReader, OutboundQueue, TransferSubmitter, Wallet};
use crate::catalog::{InMemoryCatalog, InMemoryPaymentLedger};
use crate::config::schema::RelayConfig;
use crate::config::validation::validate_config;
use crate::http::{AppState, HttpServer};
use crate::lifecycle::shutdown::Shutdown;
use crate::payments::challenge::ChallengeIssuer;
use crate::payments::forwarder::{ForwardQueue, ForwarderSettings, FundForwarder};
use crate::payments::ledger::ForwardLedger;
use crate::payments::reconciler::Reconciler;
use crate::payments::verifier::{ConfirmationPolicy, PaymentVerifier};
use crate::payments::watcher::{ChainWatcher, WatcherSettings};
use crate::relay::{RelayDeps, RelayOrchestrator};
use crate::resilience::backoff::RetryPolicy;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("environment variable {0} is required")]
    MissingSecret(&'static str),

    #[error("invalid attestation secret: {0}")]
    Attestation(AttestationError),

    #[error("relayer key error: {0}")]
    Wallet(BlockchainError),

    #[error("relayer address mismatch: configured {configured}, key derives {derived}")]
    RelayerMismatch { configured: Address, derived: Address },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("blockchain client: {0}")]
    Chain(BlockchainError),

    #[error("forward ledger {path}: {source}")]
    Ledger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Secrets read from the environment.
#[derive(Clone, Default)]
pub struct Secrets {
    pub attestation_secret: Option<String>,
    pub private_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            attestation_secret: read(SECRET_ENV_VAR),
            private_key: read(PRIVATE_KEY_ENV_VAR),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("attestation_secret", &self.attestation_secret.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything `main` needs to run the relay.
pub struct RelayRuntime {
    pub server: HttpServer,
    pub orchestrator: Arc<RelayOrchestrator>,
    pub ledger: Arc<ForwardLedger>,
    pub reconciler: Option<Reconciler>,
    pub watcher: Option<ChainWatcher>,
}

/// Signing identity and the relayer address challenges point at.
#[derive(Debug)]
pub struct RelayerIdentity {
    pub address: Address,
    pub wallet: Option<Wallet>,
}

/// Resolve the attestation codec from `secrets`.
pub fn build_codec(config: &RelayConfig, secrets: &Secrets) -> Result<AttestationCodec, StartupError> {
    let secret = secrets
        .attestation_secret
        .as_deref()
        .ok_or(StartupError::MissingSecret(SECRET_ENV_VAR))?;
    AttestationCodec::new(secret.trim(), Duration::from_secs(config.attestation.expiry_secs))
        .map_err(StartupError::Attestation)
}

/// Resolve the relayer identity.
///
/// Forwarding needs the signing key. Without forwarding, a configured
/// address is enough. When both exist they must agree.
pub fn resolve_relayer(config: &RelayConfig, secrets: &Secrets) -> Result<RelayerIdentity, StartupError> {
    let configured = config
        .relayer
        .address
        .as_deref()
        .map(|a| {
            a.trim()
                .parse::<Address>()
                .map_err(|_| StartupError::InvalidConfig(format!("relayer.address '{}'", a)))
        })
        .transpose()?;

    let wallet = match secrets.private_key.as_deref() {
        Some(key) => Some(Wallet::from_private_key(key, config.blockchain.chain_id).map_err(StartupError::Wallet)?),
        None if config.forwarding.enabled => return Err(StartupError::MissingSecret(PRIVATE_KEY_ENV_VAR)),
        None => None,
    };

    let address = match (&wallet, configured) {
        (Some(w), Some(configured)) if w.address() != configured => {
            return Err(StartupError::RelayerMismatch {
                configured,
                derived: w.address(),
            })
        }
        (Some(w), _) => w.address(),
        (None, Some(configured)) => configured,
        (None, None) => return Err(StartupError::MissingSecret(PRIVATE_KEY_ENV_VAR)),
    };

    Ok(RelayerIdentity { address, wallet })
}

/// Initialize every subsystem.
pub async fn build(config: &RelayConfig, secrets: &Secrets, shutdown: &Shutdown) -> Result<RelayRuntime, StartupError> {
    validate_config(config).map_err(|errors| {
        StartupError::InvalidConfig(
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    })?;
    let codec = build_codec(config, secrets)?;
    let identity = resolve_relayer(config, secrets)?;
    tracing::info!(
        relayer = %identity.address,
        signing = identity.wallet.is_some(),
        "Relayer identity resolved"
    );

    let client = BlockchainClient::new(config.blockchain.clone())
        .await
        .map_err(StartupError::Chain)?;
    let reader: Arc<dyn ChainReader> = Arc::new(client.clone());

    let ledger = Arc::new(match &config.forwarding.ledger_path {
        Some(path) => ForwardLedger::load_from_file(path).map_err(|source| StartupError::Ledger {
            path: PathBuf::from(path),
            source,
        })?,
        None => ForwardLedger::new(None),
    });

    let submitter: Option<Arc<dyn TransferSubmitter>> = match (&identity.wallet, config.forwarding.enabled) {
        (Some(wallet), true) => Some(Arc::new(
            OutboundQueue::spawn(client.clone(), wallet.clone(), config.forwarding.queue_capacity)
                .map_err(StartupError::Chain)?,
        )),
        _ => None,
    };

    let chain = &config.blockchain;
    let forwarder = Arc::new(FundForwarder::new(
        submitter,
        reader.clone(),
        ledger.clone(),
        ForwarderSettings {
            fee_bps: config.fees.platform_fee_bps,
            min_confirmations: chain.confirmation_blocks,
            confirmation_timeout: Duration::from_secs(config.forwarding.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(chain.receipt_poll_ms),
        },
    ));
    let queue = config.forwarding.enabled.then(|| {
        ForwardQueue::spawn(
            forwarder.clone(),
            config.forwarding.queue_capacity,
            shutdown.subscribe(),
        )
    });

    let verifier = PaymentVerifier::new(
        reader.clone(),
        codec.clone(),
        ConfirmationPolicy {
            min_confirmations: chain.confirmation_blocks,
            max_wait: Duration::from_secs(chain.receipt_timeout_secs),
            poll_interval: Duration::from_millis(chain.receipt_poll_ms),
        },
    );

    let orchestrator = Arc::new(RelayOrchestrator::new(RelayDeps {
        catalog: Arc::new(InMemoryCatalog::from_entries(config.catalog.clone())),
        payments: Arc::new(InMemoryPaymentLedger::new()),
        issuer: ChallengeIssuer::new(chain.network.clone()),
        verifier,
        codec,
        forwarder: forwarder.clone(),
        queue,
        relayer: identity.address,
        min_confirmations: chain.confirmation_blocks,
    }));

    let reconciler = config.forwarding.enabled.then(|| {
        Reconciler::new(
            forwarder.clone(),
            RetryPolicy::from_config(&config.forwarding),
            Duration::from_secs(config.forwarding.reconcile_interval_secs),
        )
    });

    let watcher = if config.watcher.enabled {
        let merchant = config
            .watcher
            .merchant_address
            .as_deref()
            .and_then(|a| a.trim().parse::<Address>().ok())
            .ok_or_else(|| StartupError::InvalidConfig("watcher.merchant_address".to_string()))?;
        Some(ChainWatcher::new(
            reader.clone(),
            orchestrator.clone(),
            WatcherSettings {
                relayer: identity.address,
                merchant,
                content_id: config.watcher.content_id.clone(),
                interval: Duration::from_millis(config.watcher.interval_ms),
                lookback_blocks: config.watcher.lookback_blocks,
                min_confirmations: chain.confirmation_blocks,
            },
        ))
    } else {
        None
    };

    let server = HttpServer::new(
        &config.listener,
        &config.rate_limit,
        AppState {
            relay: orchestrator.clone(),
            chain: reader,
        },
    );

    tracing::info!(
        catalog_entries = config.catalog.len(),
        forwarding = config.forwarding.enabled,
        watcher = config.watcher.enabled,
        "Relay initialized"
    );

    Ok(RelayRuntime {
        server,
        orchestrator,
        ledger,
        reconciler,
        watcher,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ANVIL_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn secrets(key: Option<&str>) -> Secrets {
        Secrets {
            attestation_secret: Some("s3cret".to_string()),
            private_key: key.map(str::to_string),
        }
    }

    #[test]
    fn test_missing_attestation_secret_is_fatal() {
        let err = build_codec(&RelayConfig::default(), &Secrets::default()).unwrap_err();
        assert!(matches!(err, StartupError::MissingSecret(SECRET_ENV_VAR)));
    }

    #[test]
    fn test_forwarding_requires_key() {
        let err = resolve_relayer(&RelayConfig::default(), &secrets(None)).unwrap_err();
        assert!(matches!(err, StartupError::MissingSecret(PRIVATE_KEY_ENV_VAR)));
    }

    #[test]
    fn test_configured_address_without_forwarding() {
        let mut config = RelayConfig::default();
        config.forwarding.enabled = false;
        config.relayer.address = Some(ANVIL_ADDRESS.to_string());

        let identity = resolve_relayer(&config, &secrets(None)).unwrap();
        assert_eq!(identity.address, ANVIL_ADDRESS.parse::<Address>().unwrap());
        assert!(identity.wallet.is_none());
    }

    #[test]
    fn test_address_mismatch_is_fatal() {
        let mut config = RelayConfig::default();
        config.relayer.address = Some("0x2222222222222222222222222222222222222222".to_string());

        let err = resolve_relayer(&config, &secrets(Some(ANVIL_KEY))).unwrap_err();
        assert!(matches!(err, StartupError::RelayerMismatch { .. }));

        config.relayer.address = Some(ANVIL_ADDRESS.to_lowercase());
        let identity = resolve_relayer(&config, &secrets(Some(ANVIL_KEY))).unwrap();
        assert!(identity.wallet.is_some());
    }

    #[tokio::test]
    async fn test_watcher_with_catalog_refused_before_io() {
        let mut config = RelayConfig::default();
        config.watcher.enabled = true;
        config.watcher.merchant_address = Some("0x7777777777777777777777777777777777777777".to_string());
        config.catalog = vec![crate::config::ContentEntry {
            id: "guide".to_string(),
            title: "Guide".to_string(),
            description: None,
            price: "0.001".to_string(),
            merchant_address: "0x2222222222222222222222222222222222222222".to_string(),
            content_type: crate::config::ContentKind::Text,
            content_data: Some("text".to_string()),
            file_path: None,
            file_name: None,
            file_size: None,
            mime_type: None,
            is_active: true,
        }];

        let err = match build(&config, &secrets(Some(ANVIL_KEY)), &Shutdown::new()).await {
            Err(e) => e,
            Ok(_) => panic!("watcher and catalog accepted together"),
        };
        assert!(matches!(err, StartupError::InvalidConfig(ref msg) if msg.contains("watcher.enabled")));
    }

    #[test]
    fn test_secrets_debug_redacted() {
        let rendered = format!("{:?}", secrets(Some(ANVIL_KEY)));
        assert!(!rendered.contains("ac0974"));
        assert!(!rendered.contains("s3cret"));
    }
}
