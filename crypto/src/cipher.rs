use crate::error::{CryptoError, CryptoResult};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

/// Capability boundary for sealing queue payloads at rest.
///
/// The storage engine never sees key material; it stores whatever `seal`
/// returns and hands it back to `open` unchanged. Swapping the scheme (or
/// using [`NoopCipher`] in tests) requires no storage changes.
pub trait PayloadCipher: Send + Sync {
    /// Encrypt plaintext bytes into a self-describing text envelope.
    fn seal(&self, plaintext: &[u8]) -> CryptoResult<String>;

    /// Decrypt a previously sealed envelope back to plaintext bytes.
    fn open(&self, sealed: &str) -> CryptoResult<Vec<u8>>;

    /// Human-readable scheme name, surfaced in startup logs
    fn algorithm(&self) -> &str;
}

/// AES-256-GCM payload cipher with memory security
///
/// - AES-256 in Galois/Counter Mode (NIST approved)
/// - 96-bit random nonces (recommended for GCM)
/// - Authentication tags for integrity
/// - Key zeroized on drop
#[derive(ZeroizeOnDrop)]
pub struct Aes256GcmCipher {
    #[zeroize(skip)]
    cipher: Aes256Gcm,
    /// Master key - automatically zeroized on drop
    key: [u8; 32],
    /// Key version for rotation support
    key_version: u32,
}

impl Aes256GcmCipher {
    /// Create a new cipher with a 32-byte key
    pub fn new(key: [u8; 32]) -> CryptoResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidKey)?;

        Ok(Self {
            cipher,
            key,
            key_version: 1,
        })
    }

    /// Create from a base64-encoded key
    pub fn from_base64(key_b64: &str) -> CryptoResult<Self> {
        let key_bytes = BASE64.decode(key_b64).map_err(|_| CryptoError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                got: key_bytes.len(),
            });
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);

        Self::new(key)
    }

    /// Create with a specific key version
    pub fn with_version(mut self, version: u32) -> Self {
        self.key_version = version;
        self
    }

    /// Generate a new random key (cryptographically secure)
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Get the current key version
    pub fn version(&self) -> u32 {
        self.key_version
    }
}

impl PayloadCipher for Aes256GcmCipher {
    /// Seal with versioned format: "v{version}:{nonce_b64}:{ciphertext_b64}"
    fn seal(&self, plaintext: &[u8]) -> CryptoResult<String> {
        // 96-bit nonce (12 bytes - optimal for GCM)
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let nonce_b64 = BASE64.encode(nonce_bytes);
        let ciphertext_b64 = BASE64.encode(&ciphertext);

        Ok(format!(
            "v{}:{}:{}",
            self.key_version, nonce_b64, ciphertext_b64
        ))
    }

    fn open(&self, sealed: &str) -> CryptoResult<Vec<u8>> {
        let parts: Vec<&str> = sealed.split(':').collect();
        if parts.len() != 3 {
            return Err(CryptoError::InvalidFormat);
        }

        let version = parts[0]
            .strip_prefix('v')
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or(CryptoError::InvalidFormat)?;

        // With key rotation the version would select the key; for now a
        // single active key version is supported.
        if version != self.key_version {
            return Err(CryptoError::UnsupportedKeyVersion {
                version,
                supported: self.key_version,
            });
        }

        let nonce_bytes = BASE64
            .decode(parts[1])
            .map_err(|_| CryptoError::InvalidFormat)?;

        if nonce_bytes.len() != 12 {
            return Err(CryptoError::InvalidNonce);
        }

        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(parts[2])
            .map_err(|_| CryptoError::InvalidFormat)?;

        self.cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    fn algorithm(&self) -> &str {
        "AES-256-GCM"
    }
}

/// Pass-through cipher for tests and development builds.
///
/// Base64-encodes the payload so the stored column still never contains raw
/// clinical text, but provides no confidentiality.
pub struct NoopCipher;

impl PayloadCipher for NoopCipher {
    fn seal(&self, plaintext: &[u8]) -> CryptoResult<String> {
        Ok(format!("plain:{}", BASE64.encode(plaintext)))
    }

    fn open(&self, sealed: &str) -> CryptoResult<Vec<u8>> {
        let encoded = sealed
            .strip_prefix("plain:")
            .ok_or(CryptoError::InvalidFormat)?;
        BASE64.decode(encoded).map_err(|_| CryptoError::InvalidFormat)
    }

    fn algorithm(&self) -> &str {
        "none"
    }
}
