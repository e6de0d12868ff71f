//! Token wire format.
//!
//! Tokens are written to a compact binary payload, sealed by a
//! [`DataProtector`] and encoded as base64url without padding:
//!
//! ```text
//! u8    version (0x01)
//! [16]  security token
//! u8    is_session_token
//! -- form tokens only --
//! u8    is_claims_based
//! [32]  claim uid            (claims based)
//! str   username             (otherwise)
//! str   additional data
//! ```
//!
//! `str` is a LEB128 byte length followed by UTF-8 bytes.

use crate::binary_blob::{BinaryBlob, CLAIM_UID_BITS, SECURITY_TOKEN_BITS};
use crate::error::{Result, TokenDecodeError};
use crate::protection::DataProtector;
use crate::token::AntiForgeryToken;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use std::sync::Arc;

const TOKEN_VERSION: u8 = 0x01;

/// Converts tokens to and from their opaque string form.
pub trait TokenSerializer: Send + Sync {
    fn serialize(&self, token: &AntiForgeryToken) -> Result<String>;

    fn deserialize(&self, serialized: &str) -> std::result::Result<AntiForgeryToken, TokenDecodeError>;
}

/// Serializer that seals payloads with a [`DataProtector`].
#[derive(Clone)]
pub struct DefaultTokenSerializer {
    protector: Arc<dyn DataProtector>,
}

impl DefaultTokenSerializer {
    pub fn new(protector: Arc<dyn DataProtector>) -> Self {
        Self { protector }
    }
}

impl TokenSerializer for DefaultTokenSerializer {
    fn serialize(&self, token: &AntiForgeryToken) -> Result<String> {
        let payload = encode_payload(token);
        let sealed = self.protector.protect(&payload)?;
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    fn deserialize(&self, serialized: &str) -> std::result::Result<AntiForgeryToken, TokenDecodeError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(serialized)
            .map_err(|_| TokenDecodeError::Base64)?;
        let payload = self
            .protector
            .unprotect(&sealed)
            .map_err(TokenDecodeError::Unprotect)?;
        decode_payload(&payload)
    }
}

impl std::fmt::Debug for DefaultTokenSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultTokenSerializer").finish_non_exhaustive()
    }
}

/// Append `value` as a LEB128 length followed by its UTF-8 bytes.
pub(crate) fn write_string(buf: &mut Vec<u8>, value: &str) {
    let mut len = value.len();
    while len >= 0x80 {
        buf.push((len as u8) | 0x80);
        len >>= 7;
    }
    buf.push(len as u8);
    buf.extend_from_slice(value.as_bytes());
}

fn encode_payload(token: &AntiForgeryToken) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.push(TOKEN_VERSION);
    buf.extend_from_slice(token.security_token().as_bytes());
    buf.push(token.is_session_token() as u8);

    if !token.is_session_token() {
        match token.claim_uid() {
            Some(claim_uid) => {
                buf.push(1);
                buf.extend_from_slice(claim_uid.as_bytes());
            }
            None => {
                buf.push(0);
                write_string(&mut buf, token.username());
            }
        }
        write_string(&mut buf, token.additional_data());
    }

    buf
}

fn decode_payload(payload: &[u8]) -> std::result::Result<AntiForgeryToken, TokenDecodeError> {
    let mut reader = Reader::new(payload);

    let version = reader.byte()?;
    if version != TOKEN_VERSION {
        return Err(TokenDecodeError::UnsupportedVersion(version));
    }

    let security_token = reader.blob(SECURITY_TOKEN_BITS)?;
    let token = if reader.flag()? {
        AntiForgeryToken::cookie_token(security_token)
    } else {
        let token = AntiForgeryToken::form_token(security_token);
        let token = if reader.flag()? {
            token.with_claim_uid(reader.blob(CLAIM_UID_BITS)?)
        } else {
            token.with_username(reader.string()?)
        };
        token.with_additional_data(reader.string()?)
    };

    if !reader.is_empty() {
        return Err(TokenDecodeError::TrailingData);
    }
    Ok(token)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], TokenDecodeError> {
        let end = self.pos.checked_add(n).ok_or(TokenDecodeError::Truncated)?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(TokenDecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> std::result::Result<u8, TokenDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn flag(&mut self) -> std::result::Result<bool, TokenDecodeError> {
        match self.byte()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(TokenDecodeError::InvalidFlag(other)),
        }
    }

    fn blob(&mut self, bit_length: usize) -> std::result::Result<BinaryBlob, TokenDecodeError> {
        let bytes = self.take(bit_length / 8)?;
        BinaryBlob::from_bytes(bit_length, bytes).map_err(|_| TokenDecodeError::Truncated)
    }

    fn length(&mut self) -> std::result::Result<usize, TokenDecodeError> {
        let mut value: usize = 0;
        let mut shift = 0;
        loop {
            let byte = self.byte()?;
            // Longer prefixes cannot describe a string that fits in a token.
            if shift > 28 {
                return Err(TokenDecodeError::Truncated);
            }
            value |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn string(&mut self) -> std::result::Result<String, TokenDecodeError> {
        let len = self.length()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| TokenDecodeError::InvalidUtf8)
    }
}
