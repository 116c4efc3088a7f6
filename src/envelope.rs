//! Request and response envelopes exchanged with an agent.
//!
//! Outbound bodies are either the caller's JSON as-is or an encrypted
//! envelope. Inbound bodies are always `{"data": ..., "sig": "<hex>"}`.
//!
//! The agent signs `data` in the exact form it transmitted. The decoder
//! therefore keeps `data` as a [`RawValue`] span of the original body and
//! never re-serializes it before verification.

use alloy::hex;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

use crate::crypto::{CryptoError, CryptoProvider, LocalCrypto, NONCE_LEN};

/// Outbound request body.
#[derive(Debug, Clone)]
pub enum RequestEnvelope {
    Plain(Value),
    Encrypted(EncryptedEnvelope),
}

impl RequestEnvelope {
    /// Serialize to the bytes sent on the wire.
    pub fn to_wire(&self) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            RequestEnvelope::Plain(body) => encode_plain(body),
            RequestEnvelope::Encrypted(envelope) => Ok(serde_json::to_vec(envelope)?),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, RequestEnvelope::Encrypted(_))
    }
}

/// Confidential request payload, all fields hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// 32 random bytes, fresh per request.
    pub nonce: String,
    /// Sender's DER-encoded P-256 public key.
    #[serde(rename = "public_key", alias = "sender_public_key")]
    pub sender_public_key: String,
    /// AES-256-GCM ciphertext with tag.
    pub data: String,
}

/// Inbound `{data, sig}` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    data: Box<RawValue>,
    sig: String,
}

impl ResponseEnvelope {
    /// The `data` field exactly as transmitted.
    pub fn raw_data(&self) -> &str {
        self.data.get()
    }

    /// Hex signature as transmitted.
    pub fn sig(&self) -> &str {
        &self.sig
    }

    /// Bytes the agent signed.
    ///
    /// String payloads are signed as their UTF-8 content (`"Hello World"`
    /// signs `Hello World`). Any other payload is signed as its raw JSON
    /// text, byte for byte.
    pub fn message_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        let raw = self.data.get();
        if raw.starts_with('"') {
            let text: String = serde_json::from_str(raw)?;
            Ok(text.into_bytes())
        } else {
            Ok(raw.as_bytes().to_vec())
        }
    }

    /// Parsed payload, for display only.
    pub fn payload(&self) -> Value {
        serde_json::from_str(self.data.get()).unwrap_or(Value::Null)
    }
}

/// Wire form of a plain JSON request.
pub fn encode_plain(body: &Value) -> Result<Vec<u8>, EnvelopeError> {
    Ok(serde_json::to_vec(body)?)
}

/// Encrypt `plaintext` to the agent's registered key.
pub fn encode_encrypted(
    crypto: &dyn CryptoProvider,
    recipient_public_key: &[u8],
    plaintext: &Value,
) -> Result<EncryptedEnvelope, EnvelopeError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let plaintext = serde_json::to_vec(plaintext)?;
    let ciphertext = crypto.hybrid_encrypt(recipient_public_key, &nonce, &plaintext)?;
    let sender_public_key = crypto.export_public_key()?;

    Ok(EncryptedEnvelope {
        nonce: hex::encode(nonce),
        sender_public_key: hex::encode(sender_public_key),
        data: hex::encode(ciphertext),
    })
}

/// Parse an agent response body.
pub fn decode_response(raw_body: &[u8]) -> Result<ResponseEnvelope, EnvelopeError> {
    serde_json::from_slice(raw_body)
        .map_err(|e| EnvelopeError::MalformedResponse(e.to_string()))
}

/// Build a `{data, sig}` response body around an already-serialized payload.
///
/// `payload_json` is embedded verbatim so the signed bytes and the
/// transmitted bytes stay identical.
pub fn encode_response(payload_json: &str, signature: &[u8]) -> Result<String, EnvelopeError> {
    let data = RawValue::from_string(payload_json.to_string())?;
    #[derive(Serialize)]
    struct Body<'a> {
        data: &'a RawValue,
        sig: String,
    }
    Ok(serde_json::to_string(&Body {
        data: &data,
        sig: hex::encode(signature),
    })?)
}

/// Decrypt a confidential request addressed to `crypto`'s key.
pub fn open_encrypted(
    crypto: &LocalCrypto,
    envelope: &EncryptedEnvelope,
) -> Result<Value, EnvelopeError> {
    let nonce: [u8; NONCE_LEN] = decode_hex(&envelope.nonce, "nonce")?
        .try_into()
        .map_err(|_| EnvelopeError::InvalidField("nonce must be 32 bytes".to_string()))?;
    let sender = decode_hex(&envelope.sender_public_key, "public_key")?;
    let ciphertext = decode_hex(&envelope.data, "data")?;

    let plaintext = crypto.hybrid_decrypt(&sender, &nonce, &ciphertext)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

fn decode_hex(value: &str, field: &str) -> Result<Vec<u8>, EnvelopeError> {
    hex::decode(value).map_err(|e| EnvelopeError::InvalidField(format!("{field}: {e}")))
}

/// Envelope encoding and decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("invalid envelope field: {0}")]
    InvalidField(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
