// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Incremental AES-256-GCM with a 16-byte IV.
//!
//! `aes-gcm` only transforms whole buffers. Streaming envelopes drive the same
//! primitives (AES-256 block cipher, 32-bit big-endian counter, GHASH) chunk by
//! chunk, producing output identical to `AesGcm<Aes256, U16>` with empty
//! associated data.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes256;
use ctr::Ctr32BE;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;

use super::{CryptoError, CryptoResult, IV_LEN, KEY_LEN, TAG_LEN};

const BLOCK_LEN: usize = 16;

type Block = GenericArray<u8, aes::cipher::consts::U16>;

pub(crate) struct GcmStream {
    keystream: Ctr32BE<Aes256>,
    ghash: GHash,
    tag_mask: Block,
    partial: [u8; BLOCK_LEN],
    partial_len: usize,
    processed: u64,
}

impl GcmStream {
    pub(crate) fn new(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Self {
        let key = GenericArray::from_slice(key);
        let cipher = Aes256::new(key);

        let mut hash_key = Block::default();
        cipher.encrypt_block(&mut hash_key);
        let ghash = GHash::new(&hash_key);

        // IVs other than 96 bits: J0 = GHASH(IV || 0-pad || 0^64 || [len(IV)]_64)
        let mut j0_hash = ghash.clone();
        j0_hash.update_padded(iv);
        let mut len_block = Block::default();
        len_block[8..].copy_from_slice(&((IV_LEN as u64) * 8).to_be_bytes());
        j0_hash.update(&[len_block]);
        let j0 = j0_hash.finalize();

        let mut tag_mask = j0;
        cipher.encrypt_block(&mut tag_mask);

        // Payload keystream starts at inc32(J0).
        let mut counter = j0;
        let low = u32::from_be_bytes([counter[12], counter[13], counter[14], counter[15]]);
        counter[12..].copy_from_slice(&low.wrapping_add(1).to_be_bytes());

        Self {
            keystream: Ctr32BE::<Aes256>::new(key, &counter),
            ghash,
            tag_mask,
            partial: [0u8; BLOCK_LEN],
            partial_len: 0,
            processed: 0,
        }
    }

    /// Encrypt `buf` in place and feed the ciphertext into the tag.
    pub(crate) fn encrypt(&mut self, buf: &mut [u8]) -> CryptoResult<()> {
        self.apply_keystream(buf)?;
        self.authenticate(buf);
        Ok(())
    }

    /// Feed ciphertext `buf` into the tag and decrypt it in place.
    pub(crate) fn decrypt(&mut self, buf: &mut [u8]) -> CryptoResult<()> {
        self.authenticate(buf);
        self.apply_keystream(buf)
    }

    /// Feed ciphertext into the tag without decrypting it.
    pub(crate) fn authenticate(&mut self, mut data: &[u8]) {
        self.processed += data.len() as u64;

        if self.partial_len > 0 {
            let take = (BLOCK_LEN - self.partial_len).min(data.len());
            self.partial[self.partial_len..self.partial_len + take].copy_from_slice(&data[..take]);
            self.partial_len += take;
            data = &data[take..];
            if self.partial_len < BLOCK_LEN {
                return;
            }
            self.ghash.update(&[Block::clone_from_slice(&self.partial)]);
            self.partial_len = 0;
        }

        let mut blocks = data.chunks_exact(BLOCK_LEN);
        for block in &mut blocks {
            self.ghash.update(&[Block::clone_from_slice(block)]);
        }
        let rest = blocks.remainder();
        self.partial[..rest.len()].copy_from_slice(rest);
        self.partial_len = rest.len();
    }

    /// Number of ciphertext bytes authenticated so far.
    pub(crate) fn processed(&self) -> u64 {
        self.processed
    }

    /// Close the GHASH input and produce the authentication tag.
    pub(crate) fn finalize_tag(self) -> [u8; TAG_LEN] {
        let Self {
            mut ghash,
            tag_mask,
            partial,
            partial_len,
            processed,
            ..
        } = self;

        if partial_len > 0 {
            ghash.update_padded(&partial[..partial_len]);
        }
        // No associated data: the AAD length half of the block stays zero.
        let mut len_block = Block::default();
        len_block[8..].copy_from_slice(&(processed * 8).to_be_bytes());
        ghash.update(&[len_block]);

        let digest = ghash.finalize();
        let mut tag = [0u8; TAG_LEN];
        for (out, (d, m)) in tag.iter_mut().zip(digest.iter().zip(tag_mask.iter())) {
            *out = d ^ m;
        }
        tag
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) -> CryptoResult<()> {
        self.keystream
            .try_apply_keystream(buf)
            .map_err(|_| CryptoError::Format("payload exceeds the AES-GCM length limit".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes_gcm::aead::consts::U16;
    use aes_gcm::{AeadInPlace, AesGcm, Key, Nonce};

    type Reference = AesGcm<Aes256, U16>;

    fn reference_encrypt(key: &[u8; 32], iv: &[u8; 16], data: &[u8]) -> (Vec<u8>, [u8; 16]) {
        let cipher = Reference::new(Key::<Reference>::from_slice(key));
        let mut buf = data.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(iv), b"", &mut buf)
            .unwrap();
        let mut tag_bytes = [0u8; 16];
        tag_bytes.copy_from_slice(&tag);
        (buf, tag_bytes)
    }

    fn stream_encrypt(key: &[u8; 32], iv: &[u8; 16], data: &[u8], chunk: usize) -> (Vec<u8>, [u8; 16]) {
        let mut gcm = GcmStream::new(key, iv);
        let mut out = data.to_vec();
        for piece in out.chunks_mut(chunk) {
            gcm.encrypt(piece).unwrap();
        }
        (out, gcm.finalize_tag())
    }

    #[test]
    fn matches_aes_gcm_for_odd_chunkings() {
        let key = [0x42u8; 32];
        let iv = [0x17u8; 16];
        let data: Vec<u8> = (0..5_000u32).map(|i| (i * 31 % 251) as u8).collect();

        let expected = reference_encrypt(&key, &iv, &data);
        for chunk in [1, 7, 16, 17, 1000, 4096, 5_000] {
            assert_eq!(stream_encrypt(&key, &iv, &data, chunk), expected, "chunk {chunk}");
        }
    }

    #[test]
    fn matches_aes_gcm_for_empty_payload() {
        let key = [1u8; 32];
        let iv = [2u8; 16];
        let expected = reference_encrypt(&key, &iv, &[]);
        let gcm = GcmStream::new(&key, &iv);
        assert_eq!(gcm.finalize_tag(), expected.1);
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let key = [9u8; 32];
        let iv = [8u8; 16];
        let data = b"sixteen byte blk and then some tail".to_vec();
        let (ciphertext, tag) = stream_encrypt(&key, &iv, &data, 5);

        let mut gcm = GcmStream::new(&key, &iv);
        let mut plain = ciphertext.clone();
        for piece in plain.chunks_mut(3) {
            gcm.decrypt(piece).unwrap();
        }
        assert_eq!(gcm.processed(), data.len() as u64);
        assert_eq!(plain, data);
        assert_eq!(gcm.finalize_tag(), tag);
    }
}
