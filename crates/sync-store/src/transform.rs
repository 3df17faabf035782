//! Payload transforms
//!
//! Compression and encryption of stored version bytes are external concerns:
//! the store applies a [`PayloadTransform`] opaquely between encoding and
//! persistence. Checksums are computed over the *transformed* bytes, so a
//! transform must be deterministic for a given input.

use crate::Result;

/// Opaque byte transform applied to version payloads before storage.
///
/// Implementations must be deterministic: `compress` on equal input must
/// produce equal output, and `decompress(compress(x)) == x`.
pub trait PayloadTransform: Send + Sync {
    /// Transform payload bytes for storage
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>>;

    /// Reverse the storage transform
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through transform used when no compression/encryption is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl PayloadTransform for IdentityTransform {
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}
