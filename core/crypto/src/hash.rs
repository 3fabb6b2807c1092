//! Plaintext content hashing.
//!
//! BLAKE2b-256 digests recorded in the journal at seal time and recomputed
//! at restore time for integrity display. The adapters let the vault hash
//! content while it streams through encryption, without a second read.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::io::{self, Read, Write};

/// Incremental BLAKE2b-256 content hasher.
pub struct ContentHasher {
    inner: Blake2b<U32>,
}

impl ContentHasher {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self {
            inner: Blake2b::<U32>::new(),
        }
    }

    /// Feed data into the hash.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and encode the digest for storage and display.
    pub fn finalize(self) -> String {
        URL_SAFE_NO_PAD.encode(self.inner.finalize())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash a complete byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Reader adapter that hashes everything read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: ContentHasher,
}

impl<R: Read> HashingReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
        }
    }

    /// Finish and return the digest of all bytes read so far.
    pub fn finalize(self) -> String {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Writer adapter that hashes everything written through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: ContentHasher,
}

impl<W: Write> HashingWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
        }
    }

    /// Finish, returning the inner writer and the digest of all bytes written.
    pub fn finalize(self) -> (W, String) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash_bytes(b"hello"), hash_bytes(b"hello"));
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn test_hashing_reader_matches_direct_hash() {
        let data = vec![0xA5u8; 10_000];
        let mut reader = HashingReader::new(&data[..]);
        let mut sink = Vec::new();
        std::io::copy(&mut reader, &mut sink).unwrap();

        assert_eq!(sink, data);
        assert_eq!(reader.finalize(), hash_bytes(&data));
    }

    #[test]
    fn test_hashing_writer_matches_direct_hash() {
        let data = b"streamed through a writer";
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(data).unwrap();

        let (inner, digest) = writer.finalize();
        assert_eq!(inner, data);
        assert_eq!(digest, hash_bytes(data));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(hash_bytes(b""), ContentHasher::new().finalize());
    }
}
