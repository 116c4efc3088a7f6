//! Signing, verification and hybrid encryption primitives.
//!
//! [`CryptoProvider`] is the seam between the protocol code and the key
//! material. [`LocalCrypto`] is the in-process implementation: an Ethereum
//! signer for recoverable signatures plus a P-256 key used both for direct
//! ECDSA signatures and as the ECDH half of the confidential-request
//! channel.
//!
//! # Hybrid scheme
//!
//! ```text
//! shared  = ECDH-P256(local_secret, recipient_public)
//! key     = HKDF-SHA256(salt = nonce[0..32], ikm = shared, info = HYBRID_INFO)
//! ct||tag = AES-256-GCM(key, iv = nonce[0..12], plaintext)
//! ```
//!
//! The recipient derives the same key from its own secret and the sender
//! public key carried in the envelope.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use hkdf::Hkdf;
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::identity::wallet::{self, WalletError};

/// Length of the envelope nonce.
pub const NONCE_LEN: usize = 32;

/// Length of the AES-GCM IV taken from the front of the nonce.
const GCM_IV_LEN: usize = 12;

/// HKDF info string binding derived keys to this envelope format.
pub const HYBRID_INFO: &[u8] = b"tee-agent-envelope/v1";

/// Cryptographic operations the verification protocol depends on.
pub trait CryptoProvider: Send + Sync {
    /// EIP-191 recoverable signature over `message` (65 bytes).
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Recover the address behind an EIP-191 signature over `message`.
    fn verify_recoverable(&self, signature: &[u8], message: &[u8]) -> Result<Address, CryptoError>;

    /// Verify an ECDSA P-256 signature against a raw registered key.
    ///
    /// Undecodable keys are an error. An undecodable or non-matching
    /// signature is `Ok(false)`.
    fn verify_direct(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CryptoError>;

    /// Encrypt `plaintext` to `recipient_public_key` under `nonce`.
    fn hybrid_encrypt(
        &self,
        recipient_public_key: &[u8],
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Local encryption public key, DER SubjectPublicKeyInfo.
    fn export_public_key(&self) -> Result<Vec<u8>, CryptoError>;
}

/// In-process key material.
pub struct LocalCrypto {
    wallet: PrivateKeySigner,
    secret: SecretKey,
}

impl LocalCrypto {
    /// Fresh random keys. Used once per process for outbound requests.
    pub fn generate() -> Self {
        Self {
            wallet: PrivateKeySigner::random(),
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Address of the local Ethereum signer.
    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    /// SEC1 uncompressed encoding of the local P-256 public key.
    pub fn public_key_sec1(&self) -> Vec<u8> {
        self.secret.public_key().to_sec1_bytes().to_vec()
    }

    /// ECDSA P-256 / SHA-256 signature over `message`, 64-byte `r || s`.
    pub fn sign_direct(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::from(&self.secret);
        let signature: EcdsaSignature = signing_key.sign(message);
        signature.to_bytes().to_vec()
    }

    /// Decrypt a payload addressed to this key.
    pub fn hybrid_decrypt(
        &self,
        sender_public_key: &[u8],
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let sender = decode_public_key(sender_public_key)?;
        let cipher = self.envelope_cipher(&sender, nonce)?;
        cipher
            .decrypt(Nonce::from_slice(&nonce[..GCM_IV_LEN]), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }

    fn envelope_cipher(
        &self,
        peer: &PublicKey,
        nonce: &[u8; NONCE_LEN],
    ) -> Result<Aes256Gcm, CryptoError> {
        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        let hk = Hkdf::<Sha256>::new(Some(&nonce[..]), shared.raw_secret_bytes().as_slice());
        let mut key = [0u8; 32];
        hk.expand(HYBRID_INFO, &mut key)
            .map_err(|_| CryptoError::KeyDerivation)?;
        Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::KeyDerivation)
    }
}

impl CryptoProvider for LocalCrypto {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(wallet::sign_message(&self.wallet, message)?)
    }

    fn verify_recoverable(&self, signature: &[u8], message: &[u8]) -> Result<Address, CryptoError> {
        Ok(wallet::recover_signer(signature, message)?)
    }

    fn verify_direct(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CryptoError> {
        let key = VerifyingKey::from(&decode_public_key(public_key)?);
        let signature = match parse_ecdsa_signature(signature) {
            Some(sig) => sig,
            None => {
                tracing::debug!(len = signature.len(), "Signature bytes are not a P-256 signature");
                return Ok(false);
            }
        };
        Ok(key.verify(message, &signature).is_ok())
    }

    fn hybrid_encrypt(
        &self,
        recipient_public_key: &[u8],
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let recipient = decode_public_key(recipient_public_key)?;
        let cipher = self.envelope_cipher(&recipient, nonce)?;
        cipher
            .encrypt(Nonce::from_slice(&nonce[..GCM_IV_LEN]), plaintext)
            .map_err(|_| CryptoError::Encryption)
    }

    fn export_public_key(&self) -> Result<Vec<u8>, CryptoError> {
        let der = self
            .secret
            .public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(der.as_bytes().to_vec())
    }
}

/// Decode a P-256 public key from DER SubjectPublicKeyInfo or SEC1 bytes.
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    if let Ok(key) = PublicKey::from_public_key_der(bytes) {
        return Ok(key);
    }
    PublicKey::from_sec1_bytes(bytes).map_err(|_| {
        CryptoError::InvalidKey(format!("{} bytes, neither DER nor SEC1", bytes.len()))
    })
}

/// Accepts fixed-size `r || s` and ASN.1 DER encodings.
fn parse_ecdsa_signature(bytes: &[u8]) -> Option<EcdsaSignature> {
    if bytes.len() == 64 {
        EcdsaSignature::from_slice(bytes).ok()
    } else {
        EcdsaSignature::from_der(bytes).ok()
    }
}

/// Cryptographic failures.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonce(byte: u8) -> [u8; NONCE_LEN] {
        [byte; NONCE_LEN]
    }

    #[test]
    fn hybrid_roundtrip_recovers_plaintext() {
        let sender = LocalCrypto::generate();
        let recipient = LocalCrypto::generate();
        let recipient_pk = recipient.export_public_key().unwrap();
        let plaintext = br#"{"message":"what is 2+2?"}"#;

        let ct = sender.hybrid_encrypt(&recipient_pk, &nonce(7), plaintext).unwrap();
        assert_ne!(&ct[..plaintext.len()], plaintext);

        let sender_pk = sender.export_public_key().unwrap();
        let pt = recipient.hybrid_decrypt(&sender_pk, &nonce(7), &ct).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn hybrid_accepts_sec1_recipient_key() {
        let sender = LocalCrypto::generate();
        let recipient = LocalCrypto::generate();
        let ct = sender
            .hybrid_encrypt(&recipient.public_key_sec1(), &nonce(1), b"hi")
            .unwrap();
        let pt = recipient
            .hybrid_decrypt(&sender.public_key_sec1(), &nonce(1), &ct)
            .unwrap();
        assert_eq!(pt, b"hi");
    }

    #[test]
    fn hybrid_decrypt_with_wrong_key_or_nonce_fails() {
        let sender = LocalCrypto::generate();
        let recipient = LocalCrypto::generate();
        let stranger = LocalCrypto::generate();
        let sender_pk = sender.export_public_key().unwrap();
        let ct = sender
            .hybrid_encrypt(&recipient.export_public_key().unwrap(), &nonce(2), b"secret")
            .unwrap();

        assert!(matches!(
            stranger.hybrid_decrypt(&sender_pk, &nonce(2), &ct),
            Err(CryptoError::Decryption)
        ));
        assert!(matches!(
            recipient.hybrid_decrypt(&sender_pk, &nonce(3), &ct),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn direct_signature_verifies_against_registered_key() {
        let agent = LocalCrypto::generate();
        let verifier = LocalCrypto::generate();
        let sig = agent.sign_direct(b"Hello World");
        let pk = agent.export_public_key().unwrap();

        assert!(verifier.verify_direct(&pk, b"Hello World", &sig).unwrap());
        assert!(!verifier.verify_direct(&pk, b"Hello World.", &sig).unwrap());
    }

    #[test]
    fn direct_verify_bit_flip_is_false_not_error() {
        let agent = LocalCrypto::generate();
        let pk = agent.export_public_key().unwrap();
        let mut sig = agent.sign_direct(b"payload");
        sig[10] ^= 0x01;
        assert!(!agent.verify_direct(&pk, b"payload", &sig).unwrap());

        assert!(!agent.verify_direct(&pk, b"payload", &[1, 2, 3]).unwrap());
    }

    #[test]
    fn direct_verify_accepts_der_signature() {
        let agent = LocalCrypto::generate();
        let sig = EcdsaSignature::from_slice(&agent.sign_direct(b"m")).unwrap();
        let der = sig.to_der();
        assert!(agent
            .verify_direct(&agent.public_key_sec1(), b"m", der.as_bytes())
            .unwrap());
    }

    #[test]
    fn undecodable_key_is_an_error() {
        let c = LocalCrypto::generate();
        let err = c.verify_direct(&[0u8; 10], b"m", &[0u8; 64]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey(_)));
    }

    #[test]
    fn recoverable_signature_recovers_wallet_address() {
        let c = LocalCrypto::generate();
        let sig = c.sign(b"Hello World").unwrap();
        assert_eq!(c.verify_recoverable(&sig, b"Hello World").unwrap(), c.wallet_address());
    }

    #[test]
    fn exported_key_is_der_spki() {
        let c = LocalCrypto::generate();
        let der = c.export_public_key().unwrap();
        // SEQUENCE tag, then the decoded key matches the SEC1 form.
        assert_eq!(der[0], 0x30);
        let decoded = decode_public_key(&der).unwrap();
        assert_eq!(decoded.to_sec1_bytes().to_vec(), c.public_key_sec1());
    }
}
