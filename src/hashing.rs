//! Content Fingerprinting
//!
//! Streaming SHA-256 digests over evidence byte streams. The digest is the
//! identity of the content: identical bytes always produce the identical
//! digest regardless of how the stream is chunked, and a stream that errors
//! mid-flight never yields a partial digest.

use crate::error::CustodyError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A completed SHA-256 content digest, rendered as 64 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Parse a digest from its hex form. Accepts upper or lower case,
    /// normalizes to lower.
    pub fn from_hex(hex_str: &str) -> Result<Self, CustodyError> {
        if hex_str.len() != 64 || !hex_str.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CustodyError::InvalidInput(format!(
                "Expected 64 hex chars, got {:?}",
                hex_str
            )));
        }
        Ok(Self(hex_str.to_ascii_lowercase()))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental content hasher.
///
/// Used directly when the caller already has the content in chunks (HTTP body
/// frames); [`hash_reader`] wraps it for `AsyncRead` sources. Dropping the
/// hasher before `finalize` discards all partial state.
pub struct ContentHasher {
    inner: Sha256,
    bytes_hashed: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
            bytes_hashed: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.bytes_hashed += chunk.len() as u64;
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    pub fn finalize(self) -> ContentDigest {
        ContentDigest(hex::encode(self.inner.finalize()))
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash an arbitrary-length byte stream without buffering it whole.
///
/// Fails with `IoFailure` if the stream errors before completion; the partial
/// digest is discarded. Cancellation is by dropping the future.
pub async fn hash_reader<R>(mut reader: R) -> Result<ContentDigest, CustodyError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_digest_is_64_hex_chars() {
        let digest = hash_reader(Cursor::new(b"evidence bytes".to_vec()))
            .await
            .unwrap();
        assert_eq!(digest.as_hex().len(), 64);
        assert!(digest.as_hex().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_determinism_across_chunkings() {
        let content: Vec<u8> = (0..1_000_003u32).map(|i| (i % 251) as u8).collect();

        let whole = hash_reader(Cursor::new(content.clone())).await.unwrap();

        for chunk_size in [1usize, 7, 512, 64 * 1024, 1_000_003] {
            let mut hasher = ContentHasher::new();
            for chunk in content.chunks(chunk_size) {
                hasher.update(chunk);
            }
            assert_eq!(hasher.finalize(), whole, "chunk_size={}", chunk_size);
        }
    }

    #[test]
    fn test_known_vector() {
        // SHA-256 of the empty stream.
        let digest = tokio_test::block_on(hash_reader(Cursor::new(Vec::new()))).unwrap();
        assert_eq!(
            digest.as_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_stream_error_discards_digest() {
        struct FailingReader;
        impl AsyncRead for FailingReader {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Err(std::io::Error::other("disk gone")))
            }
        }

        let result = hash_reader(FailingReader).await;
        assert!(matches!(result, Err(CustodyError::IoFailure(_))));
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(ContentDigest::from_hex("abc").is_err());
        assert!(ContentDigest::from_hex(&"z".repeat(64)).is_err());
        let upper = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855";
        let digest = ContentDigest::from_hex(upper).unwrap();
        assert_eq!(
            digest.as_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
