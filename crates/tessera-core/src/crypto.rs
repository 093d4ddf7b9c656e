// crates/tessera-core/src/crypto.rs
//
// Signing and hashing helpers. Signatures travel together with the signer's
// public key so a verifier can recover the signer's Address.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TesseraError;
use crate::identity::Address;

/// An ed25519 keypair for signing and verification.
pub struct Keypair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl Keypair {
    /// Generate a new random ed25519 keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Rebuild a keypair from a 32-byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Keypair {
            signing_key,
            verifying_key,
        }
    }

    /// Get the public key bytes (32 bytes).
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// The account address controlled by this keypair.
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key_bytes())
    }

    /// Sign a message and bundle the signature with the public key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signature = self.signing_key.sign(message);
        Signature {
            signer_key: self.public_key_bytes(),
            bytes: signature.to_bytes().to_vec(),
        }
    }
}

/// A detached ed25519 signature plus the public key that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Public key of the signer.
    pub signer_key: [u8; 32],
    /// Raw 64-byte signature.
    pub bytes: Vec<u8>,
}

impl Signature {
    /// Address of the key that claims to have signed.
    pub fn signer(&self) -> Address {
        Address::from_public_key(&self.signer_key)
    }

    /// Check the signature over `message`.
    ///
    /// # Errors
    /// Returns `TesseraError::Crypto` if the key or signature is malformed.
    pub fn verify(&self, message: &[u8]) -> Result<bool, TesseraError> {
        verify_signature(&self.signer_key, message, &self.bytes)
    }
}

/// Sign a message with the given signing key bytes.
///
/// Returns the ed25519 signature as a 64-byte vector.
pub fn sign_message(signing_key_bytes: &[u8; 32], message: &[u8]) -> Result<Vec<u8>, TesseraError> {
    let signing_key = SigningKey::from_bytes(signing_key_bytes);
    let signature = signing_key.sign(message);
    Ok(signature.to_bytes().to_vec())
}

/// Verify an ed25519 signature.
///
/// Returns `true` if the signature is valid for the given message and public key.
pub fn verify_signature(
    public_key_bytes: &[u8; 32],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<bool, TesseraError> {
    let verifying_key = VerifyingKey::from_bytes(public_key_bytes)
        .map_err(|e| TesseraError::Crypto(format!("Invalid public key: {}", e)))?;

    let signature_array: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| TesseraError::Crypto("Signature must be exactly 64 bytes".to_string()))?;

    let signature = ed25519_dalek::Signature::from_bytes(&signature_array);

    match verifying_key.verify(message, &signature) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// Compute SHA-256 hash of the given bytes.
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a sequence of byte strings as one SHA-256 message.
pub fn hash_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_sign_verify() {
        let keypair = Keypair::generate();
        let message = b"hello tessera";

        let signature = keypair.sign(message);
        assert!(signature.verify(message).unwrap());
        assert_eq!(signature.signer(), keypair.address());

        let invalid = signature.verify(b"wrong message").unwrap();
        assert!(!invalid);
    }

    #[test]
    fn test_sign_message_function() {
        let keypair = Keypair::from_seed(&[3u8; 32]);
        let message = b"test message";

        let signing_key_bytes = keypair.signing_key.to_bytes();
        let signature = sign_message(&signing_key_bytes, message).unwrap();
        let pubkey = keypair.public_key_bytes();

        assert!(verify_signature(&pubkey, message, &signature).unwrap());
    }

    #[test]
    fn test_seeded_keypair_is_deterministic() {
        let a = Keypair::from_seed(&[5u8; 32]);
        let b = Keypair::from_seed(&[5u8; 32]);
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_truncated_signature_is_crypto_error() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let mut signature = keypair.sign(b"m");
        signature.bytes.truncate(10);
        assert!(matches!(
            signature.verify(b"m"),
            Err(TesseraError::Crypto(_))
        ));
    }

    #[test]
    fn test_hash_parts_matches_concatenation() {
        let joined = hash_bytes(b"policyid-node");
        let parts = hash_parts(&[b"policyid", b"-node"]);
        assert_eq!(joined, parts);
        assert_ne!(hash_bytes(b"a"), hash_bytes(b"b"));
    }
}
