//! Session payload encryption for WalletLink.
//!
//! This module provides:
//! - HKDF-SHA256 derivation of a per-session key from the shared secret
//! - XChaCha20-Poly1305 encryption with 192-bit nonces
//!
//! # Security Notes
//!
//! - XChaCha20 uses 192-bit nonces (24 bytes), safe for random generation
//! - Ciphertext layout is `nonce(24) || aead_ciphertext`; the relay stores
//!   and forwards it untouched
//! - Keys live only in memory and are zeroized on drop

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use walletlink_core::SessionSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

const KDF_SALT: &[u8] = b"walletlink-session-v1";
const KDF_INFO: &[u8] = b"payload-encryption";

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error or truncated input).
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// The OS random source failed.
    #[error("random source unavailable: {0}")]
    Random(String),
}

/// Symmetric key for one session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionCipher {
    key: [u8; KEY_SIZE],
}

impl SessionCipher {
    /// Derive the session key from its secret.
    ///
    /// Deterministic: the same secret always yields the same key, so both
    /// wallet and host arrive at it independently.
    pub fn derive(secret: &SessionSecret) -> Result<Self, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(KDF_SALT), secret.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hkdf.expand(KDF_INFO, &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self { key })
    }

    /// Encrypt a payload, returning `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes).map_err(|e| CryptoError::Random(e.to_string()))?;
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .aead()
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `nonce || ciphertext`.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);

        self.aead()
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    // The key is always KEY_SIZE bytes, so construction cannot fail.
    fn aead(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

// Don't leak keys in debug output
impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionCipher {{ key: [REDACTED] }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(secret: &str) -> SessionCipher {
        SessionCipher::derive(&SessionSecret::new(secret).unwrap()).unwrap()
    }

    // ===========================================
    // Key Derivation Tests
    // ===========================================

    #[test]
    fn derivation_is_deterministic() {
        let a = cipher("abc123");
        let b = cipher("abc123");
        let ct = a.encrypt(b"hello host").unwrap();
        assert_eq!(b.decrypt(&ct).unwrap(), b"hello host");
    }

    #[test]
    fn cipher_debug_is_redacted() {
        let debug = format!("{:?}", cipher("abc123"));
        assert!(debug.contains("REDACTED"));
    }

    // ===========================================
    // XChaCha20-Poly1305 Tests (192-bit nonces)
    // ===========================================

    #[test]
    fn ciphertext_layout_is_nonce_then_sealed() {
        let plaintext = b"Hello, wallet!";
        let ct = cipher("abc123").encrypt(plaintext).unwrap();
        assert_eq!(ct.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn random_192_bit_nonces_are_safe() {
        let key = cipher("abc123");
        let plaintext = b"Same message";

        let ct1 = key.encrypt(plaintext).unwrap();
        let ct2 = key.encrypt(plaintext).unwrap();

        // Different random nonces
        assert_ne!(ct1[..NONCE_SIZE], ct2[..NONCE_SIZE]);
        assert_ne!(ct1, ct2);

        assert_eq!(key.decrypt(&ct1).unwrap(), plaintext.as_slice());
        assert_eq!(key.decrypt(&ct2).unwrap(), plaintext.as_slice());
    }

    #[test]
    fn wrong_secret_fails_decryption() {
        let ciphertext = cipher("abc123").encrypt(b"Secret message").unwrap();
        let result = cipher("abc124").decrypt(&ciphertext);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn corrupted_ciphertext_fails_decryption() {
        let key = cipher("abc123");
        let mut ciphertext = key.encrypt(b"Secret message").unwrap();

        // Corrupt a byte past the nonce
        ciphertext[NONCE_SIZE] ^= 0xFF;

        assert!(matches!(
            key.decrypt(&ciphertext),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn truncated_input_fails_decryption() {
        let key = cipher("abc123");
        let inputs: [&[u8]; 3] = [
            &[],
            &[0u8; NONCE_SIZE + TAG_SIZE - 1],
            &[0u8; NONCE_SIZE + TAG_SIZE],
        ];
        for input in inputs {
            assert!(matches!(
                key.decrypt(input),
                Err(CryptoError::DecryptionFailed)
            ));
        }
    }

    #[test]
    fn empty_plaintext_encrypts() {
        let key = cipher("abc123");
        let ct = key.encrypt(b"").unwrap();
        assert_eq!(key.decrypt(&ct).unwrap(), b"");
    }

    #[test]
    fn large_plaintext_encrypts() {
        let key = cipher("abc123");
        let plaintext = vec![0x42u8; 1024 * 1024]; // 1 MiB
        let ct = key.encrypt(&plaintext).unwrap();
        assert_eq!(key.decrypt(&ct).unwrap(), plaintext);
    }
}
