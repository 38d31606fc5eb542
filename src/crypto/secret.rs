// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Master secret handling and per-envelope key derivation.

use base64ct::{Base64, Encoding};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{CryptoError, CryptoResult, KEY_LEN, MASTER_SECRET_LEN, SALT_LEN};

/// Process-wide master secret. Supplied once at startup and injected into the
/// codec; wiped from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret([u8; MASTER_SECRET_LEN]);

impl MasterSecret {
    pub fn new(bytes: [u8; MASTER_SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from raw bytes, rejecting anything that is not exactly
    /// [`MASTER_SECRET_LEN`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; MASTER_SECRET_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::KeyDerivation(format!(
                "master secret must be {MASTER_SECRET_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Decode a standard (padded) base64 master secret.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let decoded = Zeroizing::new(Base64::decode_vec(encoded.trim()).map_err(|_| {
            CryptoError::KeyDerivation("master secret is not valid base64".to_string())
        })?);
        Self::from_slice(&decoded)
    }

    /// Derive the 256-bit key for one envelope.
    pub(crate) fn derive_key(
        &self,
        salt: &[u8; SALT_LEN],
        iterations: u32,
    ) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(&self.0, salt, iterations, key.as_mut_slice());
        key
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        let err = MasterSecret::from_slice(&[7u8; 16]).unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivation(_)));
    }

    #[test]
    fn decodes_base64() {
        let encoded = Base64::encode_string(&[9u8; 32]);
        let secret = MasterSecret::from_base64(&encoded).unwrap();
        assert_eq!(secret.0, [9u8; 32]);

        assert!(MasterSecret::from_base64("not base64!").is_err());
    }

    #[test]
    fn derivation_depends_on_salt_and_secret() {
        let a = MasterSecret::new([1u8; 32]);
        let b = MasterSecret::new([2u8; 32]);
        let salt_1 = [3u8; SALT_LEN];
        let salt_2 = [4u8; SALT_LEN];

        let k1 = a.derive_key(&salt_1, 1_000);
        assert_eq!(*k1, *a.derive_key(&salt_1, 1_000));
        assert_ne!(*k1, *a.derive_key(&salt_2, 1_000));
        assert_ne!(*k1, *b.derive_key(&salt_1, 1_000));
    }

    #[test]
    fn debug_output_is_redacted() {
        let secret = MasterSecret::new([0xAB; 32]);
        assert_eq!(format!("{secret:?}"), "MasterSecret(<redacted>)");
    }
}
