//! On-chain agent identity.
//!
//! An agent registered in a TEE agent registry resolves to an
//! [`AgentRecord`]. Two registry generations exist and each anchors the
//! agent's identity differently:
//!
//! - **Wallet-anchored**: the enclave holds an Ethereum key and signs
//!   responses with EIP-191 recoverable signatures. The registry stores the
//!   wallet address.
//! - **Key-anchored**: the enclave signs with a raw ECDSA key whose public
//!   half is stored in the registry verbatim.
//!
//! The scheme is a property of the record variant. Nothing downstream
//! inspects field contents to decide which scheme applies.

pub mod wallet;

use alloy::primitives::{Address, Bytes};
use serde_json::{Value, json};
use url::Url;

/// Identity scheme bound to a record variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityScheme {
    /// Address recovered from an EIP-191 signature.
    Wallet,
    /// Direct ECDSA verification against a registered public key.
    Key,
}

impl std::fmt::Display for IdentityScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityScheme::Wallet => write!(f, "wallet"),
            IdentityScheme::Key => write!(f, "key"),
        }
    }
}

/// Agent registered with a wallet address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletAgent {
    pub agent_id: u64,
    /// Account that registered the agent.
    pub owner: Address,
    pub tee_arch: Bytes,
    pub code_measurement: Bytes,
    /// Enclave encryption key, used for confidential requests.
    pub tee_pubkey: Bytes,
    /// Address that must recover from every response signature.
    pub wallet_address: Address,
    pub service_url: String,
}

/// Agent registered with a raw public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAgent {
    pub agent_id: u64,
    pub tee_arch: Bytes,
    pub code_measurement: Bytes,
    /// DER (SubjectPublicKeyInfo) or SEC1 encoded P-256 key.
    pub public_key: Bytes,
    pub service_url: String,
}

/// Resolved identity of a registered agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRecord {
    WalletAnchored(WalletAgent),
    KeyAnchored(KeyAgent),
}

impl AgentRecord {
    pub fn agent_id(&self) -> u64 {
        match self {
            AgentRecord::WalletAnchored(a) => a.agent_id,
            AgentRecord::KeyAnchored(a) => a.agent_id,
        }
    }

    pub fn service_url(&self) -> &str {
        match self {
            AgentRecord::WalletAnchored(a) => &a.service_url,
            AgentRecord::KeyAnchored(a) => &a.service_url,
        }
    }

    pub fn scheme(&self) -> IdentityScheme {
        match self {
            AgentRecord::WalletAnchored(_) => IdentityScheme::Wallet,
            AgentRecord::KeyAnchored(_) => IdentityScheme::Key,
        }
    }

    /// Registered key that confidential requests are encrypted to.
    pub fn encryption_key(&self) -> &Bytes {
        match self {
            AgentRecord::WalletAnchored(a) => &a.tee_pubkey,
            AgentRecord::KeyAnchored(a) => &a.public_key,
        }
    }

    /// Build the full URL for `path` on the agent's service.
    ///
    /// Registries commonly store `host:port` without a scheme; those are
    /// reached over plain `http://` since the transport is never trusted.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = self.service_url().trim_end_matches('/');
        let base = if base.contains("://") {
            base.to_string()
        } else {
            format!("http://{base}")
        };
        let path = if path.is_empty() || path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Url::parse(&format!("{base}{path}"))
    }

    /// JSON view of the record for display, byte fields hex-encoded.
    pub fn to_json(&self) -> Value {
        match self {
            AgentRecord::WalletAnchored(a) => json!({
                "scheme": "wallet",
                "agent_id": a.agent_id,
                "owner": a.owner.to_string(),
                "tee_arch": a.tee_arch.to_string(),
                "code_measurement": a.code_measurement.to_string(),
                "tee_pubkey": a.tee_pubkey.to_string(),
                "agent_wallet_address": a.wallet_address.to_string(),
                "agent_url": a.service_url,
            }),
            AgentRecord::KeyAnchored(a) => json!({
                "scheme": "key",
                "agent_id": a.agent_id,
                "tee_arch": a.tee_arch.to_string(),
                "code_measurement": a.code_measurement.to_string(),
                "public_key": a.public_key.to_string(),
                "agent_url": a.service_url,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_agent(url: &str) -> AgentRecord {
        AgentRecord::KeyAnchored(KeyAgent {
            agent_id: 3,
            tee_arch: Bytes::from_static(b"nitro"),
            code_measurement: Bytes::from_static(&[0xab; 4]),
            public_key: Bytes::from_static(&[0x04; 65]),
            service_url: url.to_string(),
        })
    }

    #[test]
    fn endpoint_defaults_to_http_for_bare_host() {
        let record = key_agent("10.0.0.5:8000");
        let url = record.endpoint("/hello_world").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5:8000/hello_world");
    }

    #[test]
    fn endpoint_keeps_explicit_scheme_and_joins_slashes() {
        let record = key_agent("https://agent.example.com/");
        let url = record.endpoint("chat").unwrap();
        assert_eq!(url.as_str(), "https://agent.example.com/chat");
    }

    #[test]
    fn scheme_follows_variant() {
        let record = key_agent("localhost:1");
        assert_eq!(record.scheme(), IdentityScheme::Key);
        assert_eq!(record.encryption_key().len(), 65);

        let wallet = AgentRecord::WalletAnchored(WalletAgent {
            agent_id: 7,
            owner: Address::repeat_byte(0x11),
            tee_arch: Bytes::new(),
            code_measurement: Bytes::new(),
            tee_pubkey: Bytes::from_static(&[1, 2, 3]),
            wallet_address: Address::repeat_byte(0x22),
            service_url: "localhost:2".to_string(),
        });
        assert_eq!(wallet.scheme(), IdentityScheme::Wallet);
        assert_eq!(wallet.encryption_key().to_vec(), vec![1u8, 2, 3]);
        assert_eq!(wallet.to_json()["agent_id"], 7);
    }
}
