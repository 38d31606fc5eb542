// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Serialized envelope structure and its two byte layouts.

use super::{CryptoError, CryptoResult, HEADER_LEN, IV_LEN, SALT_LEN, TAG_LEN};

/// One encrypted payload: salt, IV, tag and ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Serialize as `SALT || IV || AUTH_TAG || CIPHERTEXT`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse `SALT || IV || AUTH_TAG || CIPHERTEXT`.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CryptoError::Format(format!(
                "envelope is {} bytes, header alone is {HEADER_LEN}",
                bytes.len()
            )));
        }
        let (salt, rest) = bytes.split_at(SALT_LEN);
        let (iv, rest) = rest.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);
        Ok(Self {
            salt: to_array(salt)?,
            iv: to_array(iv)?,
            tag: to_array(tag)?,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Split into the legacy inline representation: the blob
    /// `SALT || AUTH_TAG || CIPHERTEXT` plus the IV stored beside it.
    pub fn to_inline(&self) -> (Vec<u8>, [u8; IV_LEN]) {
        let mut blob = Vec::with_capacity(SALT_LEN + TAG_LEN + self.ciphertext.len());
        blob.extend_from_slice(&self.salt);
        blob.extend_from_slice(&self.tag);
        blob.extend_from_slice(&self.ciphertext);
        (blob, self.iv)
    }

    /// Reassemble an envelope from an inline blob and its IV column.
    pub fn from_inline(blob: &[u8], iv: &[u8]) -> CryptoResult<Self> {
        if blob.len() < SALT_LEN + TAG_LEN {
            return Err(CryptoError::Format(format!(
                "inline blob is {} bytes, needs at least {}",
                blob.len(),
                SALT_LEN + TAG_LEN
            )));
        }
        let (salt, rest) = blob.split_at(SALT_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);
        Ok(Self {
            salt: to_array(salt)?,
            iv: to_array(iv)?,
            tag: to_array(tag)?,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Total serialized length in the filesystem layout.
    pub fn len(&self) -> usize {
        HEADER_LEN + self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

fn to_array<const N: usize>(bytes: &[u8]) -> CryptoResult<[u8; N]> {
    bytes.try_into().map_err(|_| {
        CryptoError::Format(format!("expected {N} bytes, got {}", bytes.len()))
    })
}
