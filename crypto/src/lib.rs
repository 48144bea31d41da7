//! Payload-at-rest encryption for WardSync
//!
//! Provides:
//! - [`PayloadCipher`] - the seal/open capability the offline queue injects
//! - [`Aes256GcmCipher`] - AES-256-GCM with versioned envelopes and key zeroization
//! - [`NoopCipher`] - pass-through implementation for tests
//! - [`derive_storage_key`] - HKDF-SHA256 derivation from a device secret

pub mod cipher;
pub mod error;
pub mod kdf;

pub use cipher::{Aes256GcmCipher, NoopCipher, PayloadCipher};
pub use error::{CryptoError, CryptoResult};
pub use kdf::derive_storage_key;
