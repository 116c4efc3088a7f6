//! Ethereum wallet helpers for wallet-anchored agents.
//!
//! Uses alloy's local signer. Agents sign response payloads with EIP-191
//! personal_sign; verifiers recover the signer address and compare it to
//! the wallet registered on-chain.

use alloy::primitives::{Address, Signature};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;

/// Length of an `r || s || v` recoverable signature.
pub const RECOVERABLE_SIGNATURE_LEN: usize = 65;

/// Sign an arbitrary message with EIP-191 personal_sign.
///
/// Returns the 65-byte `r || s || v` signature with `v` in `{27, 28}`.
pub fn sign_message(signer: &PrivateKeySigner, message: &[u8]) -> Result<Vec<u8>, WalletError> {
    let signature = signer
        .sign_message_sync(message)
        .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
    Ok(signature.as_bytes().to_vec())
}

/// Recover the address that produced an EIP-191 signature over `message`.
pub fn recover_signer(signature: &[u8], message: &[u8]) -> Result<Address, WalletError> {
    if signature.len() != RECOVERABLE_SIGNATURE_LEN {
        return Err(WalletError::InvalidSignatureLength(signature.len()));
    }
    let signature =
        Signature::from_raw(signature).map_err(|e| WalletError::Recovery(e.to_string()))?;
    signature
        .recover_address_from_msg(message)
        .map_err(|e| WalletError::Recovery(e.to_string()))
}

/// Wallet errors.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("recoverable signature must be 65 bytes, got {0}")]
    InvalidSignatureLength(usize),
    #[error("signer recovery failed: {0}")]
    Recovery(String),
}
