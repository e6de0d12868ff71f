//! Fixed-length byte values used as token material.

use crate::error::{AntiForgeryError, Result};
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Bit length of the security token shared by a cookie/form pair.
pub const SECURITY_TOKEN_BITS: usize = 128;

/// Bit length of a claim UID (a SHA-256 digest).
pub const CLAIM_UID_BITS: usize = 256;

/// A fixed-length byte buffer.
///
/// Equality is constant-time over equal-length buffers and never panics on
/// mismatched lengths. `Debug` output is redacted so token material cannot
/// end up in logs.
#[derive(Clone)]
pub struct BinaryBlob {
    bit_length: usize,
    data: Vec<u8>,
}

impl BinaryBlob {
    /// Create a blob filled from a cryptographically secure generator.
    pub fn random(bit_length: usize) -> Result<Self> {
        let byte_length = byte_length(bit_length)?;
        let mut data = vec![0u8; byte_length];
        rand::thread_rng().fill_bytes(&mut data);
        Ok(Self { bit_length, data })
    }

    /// Wrap existing bytes, which must be exactly `bit_length / 8` long.
    pub fn from_bytes(bit_length: usize, bytes: &[u8]) -> Result<Self> {
        let byte_length = byte_length(bit_length)?;
        if bytes.len() != byte_length {
            return Err(AntiForgeryError::InvalidArgument(format!(
                "expected {} bytes for a {}-bit blob, got {}",
                byte_length,
                bit_length,
                bytes.len()
            )));
        }
        Ok(Self {
            bit_length,
            data: bytes.to_vec(),
        })
    }

    /// A fresh random 128-bit security token.
    pub fn new_security_token() -> Self {
        let mut data = vec![0u8; SECURITY_TOKEN_BITS / 8];
        rand::thread_rng().fill_bytes(&mut data);
        Self {
            bit_length: SECURITY_TOKEN_BITS,
            data,
        }
    }

    pub fn bit_length(&self) -> usize {
        self.bit_length
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

fn byte_length(bit_length: usize) -> Result<usize> {
    if bit_length == 0 || bit_length % 8 != 0 {
        return Err(AntiForgeryError::InvalidArgument(format!(
            "bit length must be a positive multiple of 8, got {}",
            bit_length
        )));
    }
    Ok(bit_length / 8)
}

impl PartialEq for BinaryBlob {
    fn eq(&self, other: &Self) -> bool {
        if self.data.len() != other.data.len() {
            return false;
        }
        self.data.ct_eq(&other.data).into()
    }
}

impl Eq for BinaryBlob {}

impl std::fmt::Debug for BinaryBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryBlob")
            .field("bit_length", &self.bit_length)
            .field("data", &"<redacted>")
            .finish()
    }
}
