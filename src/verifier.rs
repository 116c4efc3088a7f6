//! Response signature verification.
//!
//! The identity scheme comes from the [`AgentRecord`] variant. A `false`
//! result is a definitive rejection; errors are reserved for inputs that
//! cannot be decoded at all.

use alloy::hex;

use crate::crypto::{CryptoError, CryptoProvider};
use crate::envelope::{EnvelopeError, ResponseEnvelope};
use crate::identity::wallet::{RECOVERABLE_SIGNATURE_LEN, WalletError};
use crate::identity::{AgentRecord, KeyAgent, WalletAgent};

/// Check `envelope`'s signature against the identity in `record`.
pub fn verify(
    crypto: &dyn CryptoProvider,
    record: &AgentRecord,
    envelope: &ResponseEnvelope,
) -> Result<bool, VerifyError> {
    let message = envelope.message_bytes()?;
    let signature = hex::decode(envelope.sig().trim())
        .map_err(|e| VerifyError::InvalidSignatureEncoding(format!("sig is not hex: {e}")))?;

    match record {
        AgentRecord::WalletAnchored(agent) => verify_wallet(crypto, agent, &message, &signature),
        AgentRecord::KeyAnchored(agent) => verify_key(crypto, agent, &message, &signature),
    }
}

fn verify_wallet(
    crypto: &dyn CryptoProvider,
    agent: &WalletAgent,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, VerifyError> {
    if signature.len() != RECOVERABLE_SIGNATURE_LEN {
        return Err(VerifyError::InvalidSignatureEncoding(format!(
            "expected {RECOVERABLE_SIGNATURE_LEN}-byte recoverable signature, got {}",
            signature.len()
        )));
    }

    match crypto.verify_recoverable(signature, message) {
        Ok(recovered) => {
            let matched = recovered == agent.wallet_address;
            tracing::debug!(
                agent_id = agent.agent_id,
                %recovered,
                expected = %agent.wallet_address,
                matched,
                "Recovered response signer"
            );
            Ok(matched)
        }
        Err(CryptoError::Wallet(WalletError::Recovery(reason))) => {
            tracing::debug!(agent_id = agent.agent_id, %reason, "Signer recovery failed");
            Ok(false)
        }
        Err(e) => Err(VerifyError::Crypto(e)),
    }
}

fn verify_key(
    crypto: &dyn CryptoProvider,
    agent: &KeyAgent,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, VerifyError> {
    match crypto.verify_direct(&agent.public_key, message, signature) {
        Ok(valid) => Ok(valid),
        Err(CryptoError::InvalidKey(reason)) => Err(VerifyError::InvalidSignatureEncoding(
            format!("registered public key: {reason}"),
        )),
        Err(e) => Err(VerifyError::Crypto(e)),
    }
}

/// Verification errors. A mismatched signature is not an error.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Crypto(CryptoError),
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, Bytes};

    use super::*;
    use crate::crypto::LocalCrypto;
    use crate::envelope::{decode_response, encode_response};

    fn wallet_record(address: Address) -> AgentRecord {
        AgentRecord::WalletAnchored(WalletAgent {
            agent_id: 7,
            owner: Address::repeat_byte(1),
            tee_arch: Bytes::new(),
            code_measurement: Bytes::new(),
            tee_pubkey: Bytes::new(),
            wallet_address: address,
            service_url: "localhost:8000".into(),
        })
    }

    fn key_record(public_key: Vec<u8>) -> AgentRecord {
        AgentRecord::KeyAnchored(KeyAgent {
            agent_id: 9,
            tee_arch: Bytes::new(),
            code_measurement: Bytes::new(),
            public_key: public_key.into(),
            service_url: "localhost:8000".into(),
        })
    }

    fn signed(payload: &str, sig: &[u8]) -> ResponseEnvelope {
        decode_response(encode_response(payload, sig).unwrap().as_bytes()).unwrap()
    }

    #[test]
    fn wallet_signature_from_registered_key_verifies() {
        let agent = LocalCrypto::generate();
        let sig = agent.sign(b"Hello World").unwrap();
        let env = signed(r#""Hello World""#, &sig);

        let verifier = LocalCrypto::generate();
        assert!(verify(&verifier, &wallet_record(agent.wallet_address()), &env).unwrap());
    }

    #[test]
    fn wallet_signature_from_other_key_is_rejected() {
        let agent = LocalCrypto::generate();
        let impostor = LocalCrypto::generate();
        let sig = impostor.sign(b"Hello World").unwrap();
        let env = signed(r#""Hello World""#, &sig);

        assert!(!verify(&agent, &wallet_record(agent.wallet_address()), &env).unwrap());
    }

    #[test]
    fn wallet_signature_over_object_payload_uses_raw_text() {
        let agent = LocalCrypto::generate();
        let payload = r#"{"b": 2, "a": 1.0}"#;
        let sig = agent.sign(payload.as_bytes()).unwrap();
        let env = signed(payload, &sig);
        assert!(verify(&agent, &wallet_record(agent.wallet_address()), &env).unwrap());

        // Same logical JSON with different layout must not verify.
        let sig = agent.sign(br#"{"a":1.0,"b":2}"#).unwrap();
        let env = signed(payload, &sig);
        assert!(!verify(&agent, &wallet_record(agent.wallet_address()), &env).unwrap());
    }

    #[test]
    fn wallet_signature_with_wrong_length_is_encoding_error() {
        let agent = LocalCrypto::generate();
        let env = signed(r#""x""#, &[0u8; 64]);
        let err = verify(&agent, &wallet_record(agent.wallet_address()), &env).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidSignatureEncoding(_)));
    }

    #[test]
    fn non_hex_sig_is_encoding_error() {
        let agent = LocalCrypto::generate();
        let env = decode_response(br#"{"data":"x","sig":"zz"}"#).unwrap();
        let err = verify(&agent, &wallet_record(agent.wallet_address()), &env).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidSignatureEncoding(_)));
    }

    #[test]
    fn key_signature_verifies_and_bit_flip_rejects() {
        let agent = LocalCrypto::generate();
        let record = key_record(agent.export_public_key().unwrap());

        let sig = agent.sign_direct(b"42");
        assert!(verify(&agent, &record, &signed("42", &sig)).unwrap());

        for byte in [0, 31, 32, 63] {
            let mut flipped = sig.clone();
            flipped[byte] ^= 0x80;
            assert!(!verify(&agent, &record, &signed("42", &flipped)).unwrap());
        }
    }

    #[test]
    fn key_signature_from_other_key_is_rejected() {
        let agent = LocalCrypto::generate();
        let other = LocalCrypto::generate();
        let record = key_record(agent.public_key_sec1());
        let env = signed(r#""hi""#, &other.sign_direct(b"hi"));
        assert!(!verify(&agent, &record, &env).unwrap());
    }

    #[test]
    fn undecodable_registered_key_is_encoding_error() {
        let agent = LocalCrypto::generate();
        let env = signed(r#""hi""#, &agent.sign_direct(b"hi"));
        let err = verify(&agent, &key_record(vec![0xff; 8]), &env).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidSignatureEncoding(_)));
    }
}
