use crate::error::{CryptoError, CryptoResult};
use hkdf::Hkdf;
use sha2::Sha256;

/// Domain-separation label for storage keys. Changing it invalidates every
/// sealed payload, so it is fixed.
const STORAGE_KEY_INFO: &[u8] = b"wardsync/storage-key/v1";

/// Derive the 32-byte at-rest storage key for one caregiver's queue.
///
/// HKDF-SHA256 over the device/session secret, salted with the owner id so
/// two caregivers on the same device never share a key. The derived key is
/// never persisted; it is rebuilt from the secret on each session.
pub fn derive_storage_key(device_secret: &[u8], owner_id: &str) -> CryptoResult<[u8; 32]> {
    if device_secret.is_empty() {
        return Err(CryptoError::KeyDerivationFailed(
            "empty device secret".to_string(),
        ));
    }

    let hk = Hkdf::<Sha256>::new(Some(owner_id.as_bytes()), device_secret);
    let mut key = [0u8; 32];
    hk.expand(STORAGE_KEY_INFO, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    Ok(key)
}
