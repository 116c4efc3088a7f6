//! On-chain agent registry access.
//!
//! [`RegistryClient`] resolves an agent id to its [`AgentRecord`]. Two
//! contract generations are supported, each bound to one record variant:
//!
//! | Contract       | Record                          | Count           |
//! |----------------|---------------------------------|-----------------|
//! | wallet-anchored| `agents(id)` → 7-tuple          | `nextAgentId()` |
//! | key-anchored   | `agents(id)` → 5-tuple          | `agentCount()`  |
//!
//! Tuple fields are decoded positionally in contract order. Every call goes
//! to the chain; nothing is cached since registrations can be revoked or
//! updated at any time.

use std::time::Duration;

use alloy::primitives::{Address, Bytes, FixedBytes, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use url::Url;

use crate::config::{RegistryKind, VerifierConfig};
use crate::identity::{AgentRecord, KeyAgent, WalletAgent};

// `teeArch` is read as `bytes32`, matching how registries store the short
// architecture tag. A deployment declaring it as dynamic `bytes` would fail
// to decode the whole `agents` tuple and surface as `Unavailable`.
sol! {
    #[sol(rpc)]
    contract TeeAgentRegistry {
        function agents(uint256 agentId) external view returns (
            address owner,
            uint256 id,
            bytes32 teeArch,
            bytes codeMeasurement,
            bytes teePubkey,
            address agentWallet,
            string agentUrl
        );

        function nextAgentId() external view returns (uint256);
    }
}

sol! {
    #[sol(rpc)]
    contract TeeKeyRegistry {
        function agents(uint256 agentId) external view returns (
            uint256 id,
            bytes32 teeArch,
            bytes codeMeasurement,
            bytes publicKey,
            string agentUrl
        );

        function agentCount() external view returns (uint256);

        function zkVerifier() external view returns (address);
    }
}

/// Read-only view of the agent registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Resolve `agent_id` to its current on-chain record.
    async fn resolve(&self, agent_id: u64) -> Result<AgentRecord, RegistryError>;

    /// Total number of registered agents.
    async fn count(&self) -> Result<u64, RegistryError>;
}

/// Build the registry client for the configured contract generation.
pub fn connect(config: &VerifierConfig) -> Result<Box<dyn RegistryClient>, RegistryError> {
    let client: Box<dyn RegistryClient> = match config.registry_kind {
        RegistryKind::Wallet => Box::new(WalletRegistry::new(
            config.registry_address,
            http_provider(config.rpc_url.expose_secret())?,
            config.rpc_timeout,
        )),
        RegistryKind::Key => Box::new(KeyRegistry::connect(config)?),
    };
    Ok(client)
}

fn http_provider(rpc_url: &str) -> Result<DynProvider, RegistryError> {
    let url: Url = rpc_url
        .parse()
        .map_err(|e: url::ParseError| RegistryError::Unavailable(format!("invalid RPC URL: {e}")))?;
    Ok(ProviderBuilder::new().connect_http(url).erased())
}

/// Apply the RPC deadline to a contract call.
async fn with_deadline<T, E, F>(timeout: Duration, what: &str, call: F) -> Result<T, RegistryError>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RegistryError::Unavailable(format!("{what}: {e}"))),
        Err(_) => Err(RegistryError::Unavailable(format!(
            "{what}: timed out after {}s",
            timeout.as_secs_f32()
        ))),
    }
}

/// Registry of wallet-anchored agents.
pub struct WalletRegistry {
    contract: TeeAgentRegistry::TeeAgentRegistryInstance<DynProvider>,
    timeout: Duration,
}

impl WalletRegistry {
    pub fn new(address: Address, provider: DynProvider, timeout: Duration) -> Self {
        Self {
            contract: TeeAgentRegistry::new(address, provider),
            timeout,
        }
    }
}

#[async_trait]
impl RegistryClient for WalletRegistry {
    async fn resolve(&self, agent_id: u64) -> Result<AgentRecord, RegistryError> {
        let call = self.contract.agents(U256::from(agent_id));
        let row = with_deadline(self.timeout, "agents", async { call.call().await }).await?;
        tracing::debug!(agent_id, url = %row.agentUrl, "Fetched wallet registry row");

        wallet_record(
            agent_id,
            WalletRow {
                owner: row.owner,
                id: row.id,
                tee_arch: row.teeArch,
                code_measurement: row.codeMeasurement,
                tee_pubkey: row.teePubkey,
                wallet: row.agentWallet,
                url: row.agentUrl,
            },
        )
    }

    async fn count(&self) -> Result<u64, RegistryError> {
        let call = self.contract.nextAgentId();
        let count = with_deadline(self.timeout, "nextAgentId", async { call.call().await }).await?;
        Ok(count.saturating_to::<u64>())
    }
}

/// Registry of key-anchored agents.
pub struct KeyRegistry {
    contract: TeeKeyRegistry::TeeKeyRegistryInstance<DynProvider>,
    timeout: Duration,
}

impl KeyRegistry {
    pub fn new(address: Address, provider: DynProvider, timeout: Duration) -> Self {
        Self {
            contract: TeeKeyRegistry::new(address, provider),
            timeout,
        }
    }

    /// Connect to the configured key-anchored registry.
    pub fn connect(config: &VerifierConfig) -> Result<Self, RegistryError> {
        if config.registry_kind != RegistryKind::Key {
            return Err(RegistryError::Unavailable(format!(
                "{} registry has no ZK verifier, set REGISTRY_KIND=key",
                config.registry_kind
            )));
        }
        Ok(Self::new(
            config.registry_address,
            http_provider(config.rpc_url.expose_secret())?,
            config.rpc_timeout,
        ))
    }

    /// Address of the ZK verifier used by the registration flow.
    pub async fn zk_verifier_address(&self) -> Result<Address, RegistryError> {
        let call = self.contract.zkVerifier();
        with_deadline(self.timeout, "zkVerifier", async { call.call().await }).await
    }
}

#[async_trait]
impl RegistryClient for KeyRegistry {
    async fn resolve(&self, agent_id: u64) -> Result<AgentRecord, RegistryError> {
        let call = self.contract.agents(U256::from(agent_id));
        let row = with_deadline(self.timeout, "agents", async { call.call().await }).await?;
        tracing::debug!(agent_id, url = %row.agentUrl, "Fetched key registry row");

        key_record(
            agent_id,
            KeyRow {
                id: row.id,
                tee_arch: row.teeArch,
                code_measurement: row.codeMeasurement,
                public_key: row.publicKey,
                url: row.agentUrl,
            },
        )
    }

    async fn count(&self) -> Result<u64, RegistryError> {
        let call = self.contract.agentCount();
        let count = with_deadline(self.timeout, "agentCount", async { call.call().await }).await?;
        Ok(count.saturating_to::<u64>())
    }
}

/// Raw `agents(id)` tuple of the wallet-anchored registry, in contract order.
#[derive(Debug, Clone)]
pub struct WalletRow {
    pub owner: Address,
    pub id: U256,
    pub tee_arch: FixedBytes<32>,
    pub code_measurement: Bytes,
    pub tee_pubkey: Bytes,
    pub wallet: Address,
    pub url: String,
}

/// Raw `agents(id)` tuple of the key-anchored registry, in contract order.
#[derive(Debug, Clone)]
pub struct KeyRow {
    pub id: U256,
    pub tee_arch: FixedBytes<32>,
    pub code_measurement: Bytes,
    pub public_key: Bytes,
    pub url: String,
}

/// Convert a wallet registry row, treating an all-empty row as missing.
pub fn wallet_record(agent_id: u64, row: WalletRow) -> Result<AgentRecord, RegistryError> {
    if row.owner.is_zero() && row.wallet.is_zero() && row.url.is_empty() {
        return Err(RegistryError::NotFound(agent_id));
    }
    if row.wallet.is_zero() {
        return Err(RegistryError::Decode(format!(
            "agent {agent_id} has no wallet address"
        )));
    }

    Ok(AgentRecord::WalletAnchored(WalletAgent {
        agent_id: row.id.saturating_to::<u64>(),
        owner: row.owner,
        tee_arch: Bytes::copy_from_slice(row.tee_arch.as_slice()),
        code_measurement: row.code_measurement,
        tee_pubkey: row.tee_pubkey,
        wallet_address: row.wallet,
        service_url: row.url,
    }))
}

/// Convert a key registry row, treating an all-empty row as missing.
pub fn key_record(agent_id: u64, row: KeyRow) -> Result<AgentRecord, RegistryError> {
    if row.public_key.is_empty() && row.url.is_empty() {
        return Err(RegistryError::NotFound(agent_id));
    }
    if row.public_key.is_empty() {
        return Err(RegistryError::Decode(format!(
            "agent {agent_id} has no public key"
        )));
    }

    Ok(AgentRecord::KeyAnchored(KeyAgent {
        agent_id: row.id.saturating_to::<u64>(),
        tee_arch: Bytes::copy_from_slice(row.tee_arch.as_slice()),
        code_measurement: row.code_measurement,
        public_key: row.public_key,
        service_url: row.url,
    }))
}

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("agent {0} not found in registry")]
    NotFound(u64),

    #[error("registry record could not be decoded: {0}")]
    Decode(String),
}
