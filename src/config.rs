//! Verifier configuration.
//!
//! Read once at startup from the environment (after loading `.env`), then
//! passed explicitly into the registry client and the flow. Missing values
//! are reported before any verification starts.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use secrecy::SecretString;

/// Registry contract address.
pub const ENV_REGISTRY: &str = "REGISTRY";
/// Chain RPC endpoint. May embed a provider API key.
pub const ENV_RPC_URL: &str = "RPC_URL";
/// `wallet` (default) or `key`.
pub const ENV_REGISTRY_KIND: &str = "REGISTRY_KIND";
pub const ENV_RPC_TIMEOUT_SECS: &str = "RPC_TIMEOUT_SECS";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "HTTP_TIMEOUT_SECS";

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 15;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Which registry contract generation the address points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryKind {
    /// Agents sign with an Ethereum wallet.
    #[default]
    Wallet,
    /// Agents sign with a raw registered public key.
    Key,
}

impl FromStr for RegistryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wallet" | "eth" => Ok(Self::Wallet),
            "key" | "pubkey" => Ok(Self::Key),
            _ => Err(format!(
                "invalid registry kind '{}', expected: wallet, key",
                s
            )),
        }
    }
}

impl std::fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryKind::Wallet => write!(f, "wallet"),
            RegistryKind::Key => write!(f, "key"),
        }
    }
}

/// Resolved verifier configuration.
#[derive(Debug)]
pub struct VerifierConfig {
    pub registry_address: Address,
    pub rpc_url: SecretString,
    pub registry_kind: RegistryKind,
    /// Deadline for each registry RPC call.
    pub rpc_timeout: Duration,
    /// Deadline for each agent HTTP request.
    pub http_timeout: Duration,
}

impl VerifierConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Failed to load .env: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to fetch each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let registry = get(ENV_REGISTRY).ok_or(ConfigError::Missing(ENV_REGISTRY))?;
        let registry_address = Address::from_str(&registry).map_err(|e| ConfigError::Invalid {
            key: ENV_REGISTRY,
            reason: e.to_string(),
        })?;

        let rpc_url = get(ENV_RPC_URL).ok_or(ConfigError::Missing(ENV_RPC_URL))?;
        url::Url::parse(&rpc_url).map_err(|e| ConfigError::Invalid {
            key: ENV_RPC_URL,
            reason: e.to_string(),
        })?;

        let registry_kind = match get(ENV_REGISTRY_KIND) {
            Some(kind) => kind.parse().map_err(|reason| ConfigError::Invalid {
                key: ENV_REGISTRY_KIND,
                reason,
            })?,
            None => RegistryKind::default(),
        };

        Ok(Self {
            registry_address,
            rpc_url: SecretString::from(rpc_url),
            registry_kind,
            rpc_timeout: secs(
                get(ENV_RPC_TIMEOUT_SECS),
                ENV_RPC_TIMEOUT_SECS,
                DEFAULT_RPC_TIMEOUT_SECS,
            )?,
            http_timeout: secs(
                get(ENV_HTTP_TIMEOUT_SECS),
                ENV_HTTP_TIMEOUT_SECS,
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?,
        })
    }
}

fn secs(value: Option<String>, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let secs = match value {
        Some(v) => v.parse::<u64>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        })?,
        None => default,
    };
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "timeout must be at least one second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const ADDR: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    #[test]
    fn minimal_config_uses_defaults() {
        let config = VerifierConfig::from_lookup(lookup(&[
            (ENV_REGISTRY, ADDR),
            (ENV_RPC_URL, "https://rpc.example.org/v2/key"),
        ]))
        .unwrap();

        assert_eq!(config.registry_kind, RegistryKind::Wallet);
        assert_eq!(config.rpc_timeout, Duration::from_secs(15));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.rpc_url.expose_secret(), "https://rpc.example.org/v2/key");
        assert_eq!(config.registry_address, Address::from_str(ADDR).unwrap());
    }

    #[test]
    fn missing_values_are_reported() {
        let err = VerifierConfig::from_lookup(lookup(&[(ENV_RPC_URL, "http://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENV_REGISTRY)));

        let err = VerifierConfig::from_lookup(lookup(&[(ENV_REGISTRY, ADDR), (ENV_RPC_URL, "  ")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENV_RPC_URL)));
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = VerifierConfig::from_lookup(lookup(&[
            (ENV_REGISTRY, "0x1234"),
            (ENV_RPC_URL, "http://x"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_REGISTRY, .. }));

        let err = VerifierConfig::from_lookup(lookup(&[
            (ENV_REGISTRY, ADDR),
            (ENV_RPC_URL, "http://x"),
            (ENV_REGISTRY_KIND, "quantum"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_REGISTRY_KIND, .. }));

        let err = VerifierConfig::from_lookup(lookup(&[
            (ENV_REGISTRY, ADDR),
            (ENV_RPC_URL, "http://x"),
            (ENV_HTTP_TIMEOUT_SECS, "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_HTTP_TIMEOUT_SECS, .. }));
    }

    #[test]
    fn registry_kind_parses() {
        assert_eq!("KEY".parse::<RegistryKind>().unwrap(), RegistryKind::Key);
        assert_eq!("wallet".parse::<RegistryKind>().unwrap(), RegistryKind::Wallet);
        assert!("".parse::<RegistryKind>().is_err());
    }
}
