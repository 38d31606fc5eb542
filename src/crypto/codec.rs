// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope codec: whole-buffer and streaming transforms.

use std::io::{self, Read, Seek, SeekFrom, Write};

use aes_gcm::aead::consts::U16;
use aes_gcm::aes::Aes256;
use aes_gcm::{AeadInPlace, AesGcm, Key, KeyInit, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use super::gcm::GcmStream;
use super::{
    CryptoError, CryptoResult, Envelope, MasterSecret, HEADER_LEN, IV_LEN, MIN_PBKDF2_ITERATIONS,
    SALT_LEN, STREAM_CHUNK_SIZE, TAG_LEN,
};

/// AES-256-GCM with the envelope's 16-byte IV.
type EnvelopeCipher = AesGcm<Aes256, U16>;

/// Byte counts reported by [`EnvelopeCodec::encrypt_stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Plaintext bytes consumed from the source.
    pub plaintext_len: u64,
    /// Envelope bytes written to the sink (header + ciphertext).
    pub envelope_len: u64,
    /// IV used for this envelope, also recorded in its header.
    pub iv: [u8; IV_LEN],
}

/// Turns plaintext into authenticated envelopes and back.
///
/// Holds the injected master secret; every call derives its own key from a
/// fresh salt.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    secret: MasterSecret,
    iterations: u32,
}

impl EnvelopeCodec {
    /// Create a codec using the default PBKDF2 round count.
    pub fn new(secret: MasterSecret) -> Self {
        Self {
            secret,
            iterations: MIN_PBKDF2_ITERATIONS,
        }
    }

    /// Create a codec with a custom round count (never below the minimum).
    pub fn with_iterations(secret: MasterSecret, iterations: u32) -> CryptoResult<Self> {
        if iterations < MIN_PBKDF2_ITERATIONS {
            return Err(CryptoError::KeyDerivation(format!(
                "PBKDF2 iterations must be at least {MIN_PBKDF2_ITERATIONS}, got {iterations}"
            )));
        }
        Ok(Self { secret, iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    // ========== Whole-buffer envelopes ==========

    /// Encrypt a small in-memory payload.
    pub fn encrypt_buffer(&self, plaintext: &[u8]) -> CryptoResult<Envelope> {
        let (salt, iv) = fresh_salt_and_iv();
        let cipher = self.buffer_cipher(&salt);

        let mut ciphertext = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut ciphertext)
            .map_err(|_| {
                CryptoError::Format("payload exceeds the AES-GCM length limit".to_string())
            })?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(&tag);
        Ok(Envelope {
            salt,
            iv,
            tag: tag_bytes,
            ciphertext,
        })
    }

    /// Decrypt and authenticate a whole envelope.
    pub fn decrypt_buffer(&self, envelope: &Envelope) -> CryptoResult<Vec<u8>> {
        let cipher = self.buffer_cipher(&envelope.salt);

        let mut plaintext = envelope.ciphertext.clone();
        cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(&envelope.iv),
                b"",
                &mut plaintext,
                Tag::<U16>::from_slice(&envelope.tag),
            )
            .map_err(|_| CryptoError::Integrity)?;
        Ok(plaintext)
    }

    /// Parse `SALT || IV || AUTH_TAG || CIPHERTEXT` and decrypt it.
    pub fn decrypt_bytes(&self, bytes: &[u8]) -> CryptoResult<Vec<u8>> {
        self.decrypt_buffer(&Envelope::from_bytes(bytes)?)
    }

    fn buffer_cipher(&self, salt: &[u8; SALT_LEN]) -> EnvelopeCipher {
        let key = self.secret.derive_key(salt, self.iterations);
        EnvelopeCipher::new(Key::<EnvelopeCipher>::from_slice(key.as_slice()))
    }

    // ========== Streaming envelopes ==========

    /// Stream-encrypt `source` into `sink` using O(chunk) memory.
    ///
    /// The header is written first with a zeroed tag slot; once the source is
    /// exhausted the tag is written into that slot and the sink is left
    /// positioned at the end of the envelope.
    pub fn encrypt_stream<R, W>(&self, mut source: R, sink: &mut W) -> CryptoResult<StreamSummary>
    where
        R: Read,
        W: Write + Seek,
    {
        let start = sink.stream_position()?;
        let (salt, iv) = fresh_salt_and_iv();
        let key = self.secret.derive_key(&salt, self.iterations);
        let mut gcm = GcmStream::new(&key, &iv);

        sink.write_all(&salt)?;
        sink.write_all(&iv)?;
        sink.write_all(&[0u8; TAG_LEN])?;

        let mut chunk = vec![0u8; STREAM_CHUNK_SIZE];
        let mut plaintext_len = 0u64;
        loop {
            let n = match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            gcm.encrypt(&mut chunk[..n])?;
            sink.write_all(&chunk[..n])?;
            plaintext_len += n as u64;
        }

        let tag = gcm.finalize_tag();
        sink.seek(SeekFrom::Start(start + (SALT_LEN + IV_LEN) as u64))?;
        sink.write_all(&tag)?;
        sink.seek(SeekFrom::End(0))?;
        sink.flush()?;

        Ok(StreamSummary {
            plaintext_len,
            envelope_len: HEADER_LEN as u64 + plaintext_len,
            iv,
        })
    }

    /// Open a decrypting reader over an envelope stream.
    ///
    /// The returned reader yields plaintext as it goes and reports
    /// end-of-stream only once the tag has verified. Bytes handed out before
    /// that point are not yet authenticated; treat the content as trustworthy
    /// only after `read` returned `Ok(0)`.
    pub fn decrypt_stream<R: Read>(&self, mut source: R) -> CryptoResult<DecryptingReader<R>> {
        let (salt, iv, tag) = read_header(&mut source)?;
        let key = self.secret.derive_key(&salt, self.iterations);
        Ok(DecryptingReader {
            source,
            gcm: Some(GcmStream::new(&key, &iv)),
            expected_tag: tag,
            chunk: vec![0u8; STREAM_CHUNK_SIZE].into_boxed_slice(),
            start: 0,
            end: 0,
            verified: false,
        })
    }

    /// Authenticate a whole envelope stream without producing plaintext.
    ///
    /// Returns the ciphertext (= plaintext) length on success.
    pub fn verify_stream<R: Read>(&self, mut source: R) -> CryptoResult<u64> {
        let (salt, iv, expected) = read_header(&mut source)?;
        let key = self.secret.derive_key(&salt, self.iterations);
        let mut gcm = GcmStream::new(&key, &iv);

        let mut chunk = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            gcm.authenticate(&chunk[..n]);
        }

        let len = gcm.processed();
        if bool::from(gcm.finalize_tag()[..].ct_eq(&expected[..])) {
            Ok(len)
        } else {
            Err(CryptoError::Integrity)
        }
    }
}

/// Plaintext reader over an envelope stream.
///
/// Owns its source and all cipher state: dropping it mid-stream releases the
/// source (e.g. closes the file) and nothing carries over to other readers.
pub struct DecryptingReader<R> {
    source: R,
    gcm: Option<GcmStream>,
    expected_tag: [u8; TAG_LEN],
    chunk: Box<[u8]>,
    start: usize,
    end: usize,
    verified: bool,
}

impl<R> DecryptingReader<R> {
    /// Whether the tag has been checked and matched.
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    fn finish(&mut self) -> io::Result<usize> {
        match self.gcm.take().map(GcmStream::finalize_tag) {
            Some(tag) if bool::from(tag[..].ct_eq(&self.expected_tag[..])) => {
                self.verified = true;
                Ok(0)
            }
            _ => Err(CryptoError::Integrity.into_io()),
        }
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        loop {
            if self.start < self.end {
                let n = (self.end - self.start).min(out.len());
                out[..n].copy_from_slice(&self.chunk[self.start..self.start + n]);
                self.start += n;
                return Ok(n);
            }
            if self.verified {
                return Ok(0);
            }
            if self.gcm.is_none() {
                // A previous read already failed authentication.
                return Err(CryptoError::Integrity.into_io());
            }

            let n = self.source.read(&mut self.chunk)?;
            if n == 0 {
                return self.finish();
            }
            if let Some(gcm) = self.gcm.as_mut() {
                gcm.decrypt(&mut self.chunk[..n])
                    .map_err(CryptoError::into_io)?;
            }
            self.start = 0;
            self.end = n;
        }
    }
}

impl<R> std::fmt::Debug for DecryptingReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptingReader")
            .field("buffered", &(self.end - self.start))
            .field("verified", &self.verified)
            .finish_non_exhaustive()
    }
}

fn fresh_salt_and_iv() -> ([u8; SALT_LEN], [u8; IV_LEN]) {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);
    (salt, iv)
}

fn read_header<R: Read>(
    source: &mut R,
) -> CryptoResult<([u8; SALT_LEN], [u8; IV_LEN], [u8; TAG_LEN])> {
    let mut header = [0u8; HEADER_LEN];
    source.read_exact(&mut header).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CryptoError::Format(format!("envelope shorter than its {HEADER_LEN}-byte header"))
        } else {
            CryptoError::Io(e)
        }
    })?;

    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    let mut tag = [0u8; TAG_LEN];
    salt.copy_from_slice(&header[..SALT_LEN]);
    iv.copy_from_slice(&header[SALT_LEN..SALT_LEN + IV_LEN]);
    tag.copy_from_slice(&header[SALT_LEN + IV_LEN..]);
    Ok((salt, iv, tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn codec() -> EnvelopeCodec {
        EnvelopeCodec::new(MasterSecret::new([0x5Au8; 32]))
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 ^ (i >> 8) as u8).collect()
    }

    fn stream_encrypt(codec: &EnvelopeCodec, plaintext: &[u8]) -> Vec<u8> {
        let mut sink = Cursor::new(Vec::new());
        let summary = codec.encrypt_stream(plaintext, &mut sink).unwrap();
        assert_eq!(summary.plaintext_len, plaintext.len() as u64);
        assert_eq!(summary.envelope_len, (HEADER_LEN + plaintext.len()) as u64);
        let envelope = sink.into_inner();
        assert_eq!(&envelope[SALT_LEN..SALT_LEN + IV_LEN], &summary.iv);
        envelope
    }

    fn stream_decrypt(codec: &EnvelopeCodec, envelope: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut reader = codec.decrypt_stream(envelope)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out).map_err(CryptoError::from_io)?;
        assert!(reader.is_verified());
        Ok(out)
    }

    /// Yields the wrapped bytes in caller-chosen read sizes.
    struct ChunkedReader {
        data: Vec<u8>,
        pos: usize,
        sizes: Vec<usize>,
        next: usize,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.data.len() {
                return Ok(0);
            }
            let want = self.sizes[self.next % self.sizes.len()].max(1);
            self.next += 1;
            let n = want.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn buffer_round_trip_across_sizes() {
        let codec = codec();
        for len in [0usize, 1, 15, 16, 17, 4096, 3 * 1024 * 1024 + 5] {
            let plaintext = pattern(len);
            let envelope = codec.encrypt_buffer(&plaintext).unwrap();
            assert_eq!(envelope.ciphertext.len(), len);
            assert_eq!(codec.decrypt_buffer(&envelope).unwrap(), plaintext, "len {len}");
        }
    }

    #[test]
    fn stream_round_trip_multi_megabyte() {
        let codec = codec();
        let plaintext = pattern(5 * 1024 * 1024 + 123);
        let envelope = stream_encrypt(&codec, &plaintext);
        assert_eq!(envelope.len(), HEADER_LEN + plaintext.len());
        assert_eq!(stream_decrypt(&codec, &envelope).unwrap(), plaintext);
    }

    #[test]
    fn stream_round_trip_empty() {
        let codec = codec();
        let envelope = stream_encrypt(&codec, &[]);
        assert_eq!(envelope.len(), HEADER_LEN);
        assert!(stream_decrypt(&codec, &envelope).unwrap().is_empty());
    }

    #[test]
    fn buffer_and_stream_envelopes_are_interchangeable() {
        let codec = codec();
        let plaintext = pattern(200_000);

        let streamed = stream_encrypt(&codec, &plaintext);
        assert_eq!(codec.decrypt_bytes(&streamed).unwrap(), plaintext);

        let buffered = codec.encrypt_buffer(&plaintext).unwrap().to_bytes();
        assert_eq!(stream_decrypt(&codec, &buffered).unwrap(), plaintext);
    }

    #[test]
    fn each_encryption_uses_fresh_salt_and_iv() {
        let codec = codec();
        let a = codec.encrypt_buffer(b"same words").unwrap();
        let b = codec.encrypt_buffer(b"same words").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn each_stream_encryption_uses_fresh_salt_and_iv() {
        let codec = codec();
        let plaintext = pattern(100_000);
        let a = stream_encrypt(&codec, &plaintext);
        let b = stream_encrypt(&codec, &plaintext);

        assert_ne!(&a[..SALT_LEN], &b[..SALT_LEN]);
        assert_ne!(&a[SALT_LEN..SALT_LEN + IV_LEN], &b[SALT_LEN..SALT_LEN + IV_LEN]);
        assert_ne!(&a[HEADER_LEN..], &b[HEADER_LEN..]);
        assert_eq!(stream_decrypt(&codec, &a).unwrap(), plaintext);
        assert_eq!(stream_decrypt(&codec, &b).unwrap(), plaintext);
    }

    #[test]
    fn single_bit_flips_fail_authentication() {
        let codec = codec();
        let plaintext = pattern(2048);
        let envelope = stream_encrypt(&codec, &plaintext);

        let tag_bits = (0..TAG_LEN).map(|byte| (SALT_LEN + IV_LEN + byte, byte % 8));
        let body_bits = [0usize, 1, 777, 2047]
            .into_iter()
            .map(|offset| (HEADER_LEN + offset, offset % 8));

        for (position, bit) in tag_bits.chain(body_bits) {
            let mut tampered = envelope.clone();
            tampered[position] ^= 1 << bit;

            assert!(
                matches!(codec.decrypt_bytes(&tampered), Err(CryptoError::Integrity)),
                "buffer decrypt accepted flip at byte {position}"
            );
            assert!(
                matches!(stream_decrypt(&codec, &tampered), Err(CryptoError::Integrity)),
                "stream decrypt accepted flip at byte {position}"
            );
        }
    }

    #[test]
    fn tampered_salt_or_iv_fails_authentication() {
        let codec = codec();
        let envelope = codec.encrypt_buffer(b"recording").unwrap();

        let mut salt_flip = envelope.clone();
        salt_flip.salt[0] ^= 0x01;
        assert!(matches!(codec.decrypt_buffer(&salt_flip), Err(CryptoError::Integrity)));

        let mut iv_flip = envelope;
        iv_flip.iv[15] ^= 0x80;
        assert!(matches!(codec.decrypt_buffer(&iv_flip), Err(CryptoError::Integrity)));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let codec = codec();
        let envelope = stream_encrypt(&codec, &pattern(1000));
        let truncated = &envelope[..envelope.len() - 1];
        assert!(matches!(stream_decrypt(&codec, truncated), Err(CryptoError::Integrity)));
        assert!(matches!(codec.decrypt_bytes(truncated), Err(CryptoError::Integrity)));
    }

    #[test]
    fn short_header_is_a_format_error() {
        let codec = codec();
        let err = codec.decrypt_stream(&[0u8; 10][..]).unwrap_err();
        assert!(matches!(err, CryptoError::Format(_)));
        assert!(matches!(codec.decrypt_bytes(&[0u8; 63]), Err(CryptoError::Format(_))));
        assert!(matches!(codec.verify_stream(&[0u8; 5][..]), Err(CryptoError::Format(_))));
    }

    #[test]
    fn other_master_secret_cannot_decrypt() {
        let envelope = codec().encrypt_buffer(b"private").unwrap();
        let other = EnvelopeCodec::new(MasterSecret::new([0x11u8; 32]));
        assert!(matches!(other.decrypt_buffer(&envelope), Err(CryptoError::Integrity)));
    }

    #[test]
    fn verify_stream_checks_without_decrypting() {
        let codec = codec();
        let envelope = stream_encrypt(&codec, &pattern(70_000));
        assert_eq!(codec.verify_stream(envelope.as_slice()).unwrap(), 70_000);

        let mut tampered = envelope;
        let last = tampered.len() - 1;
        tampered[last] ^= 0x04;
        assert!(matches!(
            codec.verify_stream(tampered.as_slice()),
            Err(CryptoError::Integrity)
        ));
    }

    #[test]
    fn failed_reader_keeps_failing_and_later_readers_are_unaffected() {
        let codec = codec();
        let plaintext = pattern(100_000);
        let envelope = stream_encrypt(&codec, &plaintext);

        // Abandon one reader mid-stream.
        let mut partial = codec.decrypt_stream(envelope.as_slice()).unwrap();
        let mut buf = [0u8; 1000];
        partial.read_exact(&mut buf).unwrap();
        assert!(!partial.is_verified());
        drop(partial);

        let mut tampered = envelope.clone();
        tampered[HEADER_LEN + 5] ^= 0x01;
        let mut bad = codec.decrypt_stream(tampered.as_slice()).unwrap();
        let mut sink = Vec::new();
        assert!(bad.read_to_end(&mut sink).is_err());
        assert!(bad.read(&mut buf).is_err());

        assert_eq!(stream_decrypt(&codec, &envelope).unwrap(), plaintext);
    }

    #[test]
    fn rejects_too_few_iterations() {
        let err = EnvelopeCodec::with_iterations(MasterSecret::new([0u8; 32]), 10_000).unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivation(_)));
        let codec = EnvelopeCodec::with_iterations(MasterSecret::new([0u8; 32]), 150_000).unwrap();
        assert_eq!(codec.iterations(), 150_000);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn stream_round_trip_for_arbitrary_chunk_boundaries(
            plaintext in proptest::collection::vec(any::<u8>(), 0..300_000),
            source_sizes in proptest::collection::vec(1usize..70_000, 1..8),
            read_sizes in proptest::collection::vec(1usize..70_000, 1..8),
        ) {
            let codec = codec();
            let mut sink = Cursor::new(Vec::new());
            let source = ChunkedReader { data: plaintext.clone(), pos: 0, sizes: source_sizes, next: 0 };
            codec.encrypt_stream(source, &mut sink).unwrap();

            let envelope = ChunkedReader { data: sink.into_inner(), pos: 0, sizes: read_sizes.clone(), next: 0 };
            let mut reader = codec.decrypt_stream(envelope).unwrap();
            let mut out = Vec::new();
            let mut buf = vec![0u8; read_sizes[0]];
            loop {
                let n = reader.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            prop_assert!(reader.is_verified());
            prop_assert_eq!(out, plaintext);
        }
    }
}
