//! Verify responses from TEE-hosted agents against their on-chain identity.
//!
//! An agent registers its identity (wallet address or raw public key), its
//! code measurement and its service URL in a registry contract. Callers
//! resolve the agent from the chain, call it over an untrusted network,
//! and accept the response only if its signature matches the registered
//! identity.
//!
//! ```text
//! agent id ─► RegistryClient ─► AgentRecord ─► request envelope ─► agent
//!                                                                   │
//!            verdict ◄─ verifier ◄─ ResponseEnvelope {data, sig} ◄──┘
//! ```

pub mod cli;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod flow;
pub mod identity;
pub mod registry;
pub mod verifier;

pub use config::{RegistryKind, VerifierConfig};
pub use crypto::{CryptoProvider, LocalCrypto};
pub use flow::{FlowReport, FlowRequest, FlowState, Outcome, VerificationFlow};
pub use identity::{AgentRecord, IdentityScheme};
pub use registry::RegistryClient;
