// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Envelope Encryption
//!
//! Authenticated encryption for recordings and text content at rest.
//!
//! ## Envelope Layout
//!
//! ```text
//! offset  0: SALT      (32 bytes)  PBKDF2 salt, fresh per envelope
//! offset 32: IV        (16 bytes)  AES-GCM IV, fresh per envelope
//! offset 48: AUTH_TAG  (16 bytes)  GCM tag over the ciphertext
//! offset 64: CIPHERTEXT            same length as the plaintext
//! ```
//!
//! The legacy inline mode stores `SALT || AUTH_TAG || CIPHERTEXT` in the
//! metadata record and keeps the IV in its own field.
//!
//! ## Keys
//!
//! Every envelope key is `PBKDF2-HMAC-SHA256(master_secret, salt)` with at
//! least [`MIN_PBKDF2_ITERATIONS`] rounds. Keys are derived per call and
//! zeroized on drop; nothing but the master secret outlives an operation.

mod codec;
mod envelope;
mod gcm;
mod secret;

pub use codec::{DecryptingReader, EnvelopeCodec, StreamSummary};
pub use envelope::Envelope;
pub use secret::MasterSecret;

use std::io;

/// Salt length in bytes.
pub const SALT_LEN: usize = 32;

/// IV length in bytes.
pub const IV_LEN: usize = 16;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Fixed envelope header length (`SALT || IV || AUTH_TAG`).
pub const HEADER_LEN: usize = SALT_LEN + IV_LEN + TAG_LEN;

/// Derived key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Master secret length in bytes.
pub const MASTER_SECRET_LEN: usize = 32;

/// Lower bound (and default) for PBKDF2 rounds.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Plaintext chunk size used by the streaming transforms.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Errors raised by the envelope codec.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Envelope or inline blob is malformed (e.g. shorter than its header).
    #[error("malformed envelope: {0}")]
    Format(String),

    /// Authentication tag mismatch: the ciphertext or tag was altered.
    #[error("envelope failed authentication")]
    Integrity,

    /// Master secret missing or unusable. Only raised while starting up.
    #[error("key derivation unavailable: {0}")]
    KeyDerivation(String),

    /// Underlying reader/writer failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

impl CryptoError {
    /// Recover a codec error that travelled through an `io::Error`.
    ///
    /// [`DecryptingReader`] reports integrity and format failures as
    /// `InvalidData` errors wrapping a `CryptoError`; plain I/O errors pass
    /// through as [`CryptoError::Io`].
    pub fn from_io(err: io::Error) -> Self {
        if err
            .get_ref()
            .is_some_and(|inner| inner.is::<CryptoError>())
        {
            match err.into_inner().map(|inner| inner.downcast::<CryptoError>()) {
                Some(Ok(crypto)) => *crypto,
                _ => CryptoError::Integrity,
            }
        } else {
            CryptoError::Io(err)
        }
    }

    pub(crate) fn into_io(self) -> io::Error {
        match self {
            CryptoError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
