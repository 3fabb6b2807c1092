//! Streaming encryption for large files.
//!
//! This module provides chunk-based encryption to handle files that are too
//! large to fit in memory. Each chunk travels in its own AEAD frame, and the
//! whole stream, header and every frame, is covered by a single trailing
//! keyed MAC. Decryption verifies that MAC over the complete stream before
//! producing a single plaintext byte, so corruption, truncation, or frame
//! reordering anywhere is rejected with no output.
//!
//! # Format (version 1)
//! - Header: version (1 byte) + chunk size (4 bytes LE)
//! - Frames: [ct_len u32 LE][nonce || ciphertext || tag] per chunk
//! - Trailer: 32-byte keyed BLAKE2b-256 MAC over header and frames
//!
//! Frame nonces are generated internally per chunk; the cipher and the MAC
//! run under distinct subkeys derived from the session key.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::Blake2bMac;
use subtle::ConstantTimeEq;

use crate::aead::{decrypt, encrypt, NONCE_SIZE, TAG_SIZE};
use crate::keys::SessionKey;
use drivevault_common::{Error, Result};

/// Default plaintext chunk size for streaming encryption (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Header size: version (1) + chunk size (4).
pub const HEADER_SIZE: usize = 5;

/// Stream encryption version.
pub const STREAM_VERSION: u8 = 1;

/// Whole-stream MAC tag size.
pub const STREAM_TAG_SIZE: usize = 32;

/// Ceiling on the chunk size accepted when decrypting.
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

const CIPHER_CONTEXT: &[u8] = b"stream-cipher";
const MAC_CONTEXT: &[u8] = b"stream-mac";

type StreamMac = Blake2bMac<U32>;

fn new_mac(mac_key: &SessionKey) -> StreamMac {
    <StreamMac as Mac>::new_from_slice(mac_key.as_bytes())
        .expect("32-byte key is a valid BLAKE2b MAC key")
}

/// Fill `buf` as far as the reader allows; short only at end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Encrypting stream that processes data in bounded chunks.
pub struct EncryptingStream {
    cipher_key: SessionKey,
    mac_key: SessionKey,
    chunk_size: usize,
}

impl EncryptingStream {
    /// Create a new encrypting stream for the given session key.
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher_key: key.derive_subkey(CIPHER_CONTEXT),
            mac_key: key.derive_subkey(MAC_CONTEXT),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set custom chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Encrypt data from reader and write to writer.
    ///
    /// # Postconditions
    /// - Every chunk is individually authenticated and the whole stream
    ///   carries a trailing MAC
    /// - Returns the number of plaintext bytes consumed
    ///
    /// # Errors
    /// - I/O errors from reader/writer
    /// - Encryption errors
    pub fn encrypt_stream<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64> {
        let mut mac = new_mac(&self.mac_key);

        let mut header = [0u8; HEADER_SIZE];
        header[0] = STREAM_VERSION;
        header[1..5].copy_from_slice(&(self.chunk_size as u32).to_le_bytes());
        writer.write_all(&header)?;
        mac.update(&header);

        let mut buffer = vec![0u8; self.chunk_size];
        let mut total_bytes = 0u64;

        loop {
            let n = read_full(&mut reader, &mut buffer)?;
            if n == 0 {
                break;
            }
            total_bytes += n as u64;

            let frame = encrypt(&self.cipher_key, &buffer[..n])?;
            let len_bytes = (frame.len() as u32).to_le_bytes();
            writer.write_all(&len_bytes)?;
            writer.write_all(&frame)?;
            mac.update(&len_bytes);
            mac.update(&frame);

            if n < self.chunk_size {
                break;
            }
        }

        let tag = mac.finalize().into_bytes();
        writer.write_all(&tag)?;

        Ok(total_bytes)
    }
}

/// Decrypting stream for data produced by [`EncryptingStream`].
pub struct DecryptingStream {
    cipher_key: SessionKey,
    mac_key: SessionKey,
}

impl DecryptingStream {
    /// Create a new decrypting stream for the given session key.
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher_key: key.derive_subkey(CIPHER_CONTEXT),
            mac_key: key.derive_subkey(MAC_CONTEXT),
        }
    }

    /// Decrypt a complete stream from reader into writer.
    ///
    /// Runs two passes over the source: the first recomputes the trailing
    /// MAC over the header and every frame and compares it in constant time
    /// against the stored tag; only then does the second pass decrypt. No
    /// plaintext is written until the whole stream has authenticated.
    ///
    /// # Errors
    /// - [`Error::Integrity`] on any corruption, truncation, or reordering
    /// - [`Error::UnsupportedFormat`] for an authenticated stream written by
    ///   an unknown future version
    /// - I/O errors from reader/writer
    pub fn decrypt_stream<R: Read + Seek, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
    ) -> Result<u64> {
        let total_len = reader.seek(SeekFrom::End(0))?;
        if total_len < (HEADER_SIZE + STREAM_TAG_SIZE) as u64 {
            return Err(Error::Integrity("stream truncated".to_string()));
        }
        let body_len = total_len - STREAM_TAG_SIZE as u64;

        // Pass 1: authenticate header and frames against the trailer tag.
        reader.seek(SeekFrom::Start(0))?;
        let mut mac = new_mac(&self.mac_key);
        let mut buffer = vec![0u8; DEFAULT_CHUNK_SIZE];
        let mut remaining = body_len;
        while remaining > 0 {
            let want = remaining.min(buffer.len() as u64) as usize;
            reader.read_exact(&mut buffer[..want])?;
            mac.update(&buffer[..want]);
            remaining -= want as u64;
        }

        let mut stored_tag = [0u8; STREAM_TAG_SIZE];
        reader.read_exact(&mut stored_tag)?;
        let computed = mac.finalize().into_bytes();
        if !bool::from(computed.as_slice().ct_eq(&stored_tag)) {
            return Err(Error::Integrity(
                "stream authentication failed".to_string(),
            ));
        }

        // Pass 2: decrypt the authenticated frames.
        reader.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;
        if header[0] != STREAM_VERSION {
            return Err(Error::UnsupportedFormat(header[0] as u32));
        }
        let chunk_size =
            u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Integrity(format!(
                "implausible chunk size {}",
                chunk_size
            )));
        }

        let max_frame = chunk_size + NONCE_SIZE + TAG_SIZE;
        let mut frame = vec![0u8; max_frame];
        let mut pos = HEADER_SIZE as u64;
        let mut total_bytes = 0u64;

        while pos < body_len {
            let mut len_bytes = [0u8; 4];
            reader.read_exact(&mut len_bytes)?;
            pos += 4;

            let frame_len = u32::from_le_bytes(len_bytes) as usize;
            if frame_len < NONCE_SIZE + TAG_SIZE
                || frame_len > max_frame
                || pos + frame_len as u64 > body_len
            {
                return Err(Error::Integrity("malformed frame length".to_string()));
            }

            reader.read_exact(&mut frame[..frame_len])?;
            pos += frame_len as u64;

            let plaintext = decrypt(&self.cipher_key, &frame[..frame_len])?;
            writer.write_all(&plaintext)?;
            total_bytes += plaintext.len() as u64;
        }

        Ok(total_bytes)
    }
}

/// Encrypt a complete byte slice using streaming encryption.
///
/// This is a convenience function for when the complete data is available.
pub fn encrypt_bytes(key: &SessionKey, data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    EncryptingStream::new(key).encrypt_stream(data, &mut output)?;
    Ok(output)
}

/// Decrypt a complete byte slice that was encrypted with streaming encryption.
pub fn decrypt_bytes(key: &SessionKey, data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    DecryptingStream::new(key).decrypt_stream(std::io::Cursor::new(data), &mut output)?;
    Ok(output)
}
