//! Data protection providers.
//!
//! The serializer hands the raw token payload to a [`DataProtector`] which
//! seals it against tampering (and, for AES-GCM, disclosure). Two providers
//! ship with the crate:
//!
//! - [`AesGcmDataProtector`] - AES-256-GCM with a rotating key ring (default)
//! - [`HmacDataProtector`] - HMAC-SHA256 signing, deterministic output

use crate::error::ProtectionError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

/// Purpose string mixed into every protected payload.
pub const TOKEN_PURPOSE: &str = "Armature.AntiForgery.Token.v1";

/// Required key length for both providers.
pub const KEY_LEN: usize = 32;

const KEY_ID_LEN: usize = 4;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HMAC_LEN: usize = 32;

/// Seals and unseals token payloads.
pub trait DataProtector: Send + Sync {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError>;

    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>, ProtectionError>;
}

/// Generate a random 32-byte key.
pub fn generate_key() -> Vec<u8> {
    let mut key = vec![0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn check_key_len(key: &[u8]) -> Result<(), ProtectionError> {
    if key.len() != KEY_LEN {
        return Err(ProtectionError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    Ok(())
}

/// AES-256-GCM provider with a key ring.
///
/// Payloads are laid out as `[key id: u32 BE][nonce: 12][ciphertext + tag]`.
/// New payloads always use the active key; retired keys are only used to
/// open payloads issued before a rotation.
pub struct AesGcmDataProtector {
    active_key_id: u32,
    keys: HashMap<u32, Aes256Gcm>,
}

impl AesGcmDataProtector {
    /// Create a provider whose active key has id `key_id`.
    pub fn new(key_id: u32, key: &[u8]) -> Result<Self, ProtectionError> {
        check_key_len(key)?;
        let mut keys = HashMap::new();
        keys.insert(key_id, Self::cipher(key)?);
        Ok(Self {
            active_key_id: key_id,
            keys,
        })
    }

    /// Accept payloads sealed with an older key.
    pub fn with_retired_key(mut self, key_id: u32, key: &[u8]) -> Result<Self, ProtectionError> {
        check_key_len(key)?;
        if key_id != self.active_key_id {
            self.keys.insert(key_id, Self::cipher(key)?);
        }
        Ok(self)
    }

    pub fn active_key_id(&self) -> u32 {
        self.active_key_id
    }

    fn cipher(key: &[u8]) -> Result<Aes256Gcm, ProtectionError> {
        Aes256Gcm::new_from_slice(key).map_err(|_| ProtectionError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        })
    }

    fn aad(key_id: u32) -> Vec<u8> {
        let mut aad = Vec::with_capacity(TOKEN_PURPOSE.len() + KEY_ID_LEN);
        aad.extend_from_slice(TOKEN_PURPOSE.as_bytes());
        aad.extend_from_slice(&key_id.to_be_bytes());
        aad
    }
}

impl DataProtector for AesGcmDataProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        let cipher = self
            .keys
            .get(&self.active_key_id)
            .ok_or(ProtectionError::UnknownKey(self.active_key_id))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let aad = Self::aad(self.active_key_id);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| ProtectionError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(KEY_ID_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&self.active_key_id.to_be_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        if protected.len() < KEY_ID_LEN + NONCE_LEN + TAG_LEN {
            return Err(ProtectionError::Truncated);
        }

        let (key_id, rest) = protected.split_at(KEY_ID_LEN);
        let key_id = u32::from_be_bytes([key_id[0], key_id[1], key_id[2], key_id[3]]);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let cipher = self
            .keys
            .get(&key_id)
            .ok_or(ProtectionError::UnknownKey(key_id))?;

        let aad = Self::aad(key_id);
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| ProtectionError::IntegrityCheckFailed)
    }
}

impl std::fmt::Debug for AesGcmDataProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut key_ids: Vec<_> = self.keys.keys().copied().collect();
        key_ids.sort_unstable();
        f.debug_struct("AesGcmDataProtector")
            .field("active_key_id", &self.active_key_id)
            .field("key_ids", &key_ids)
            .finish()
    }
}

/// HMAC-SHA256 signing provider.
///
/// Payloads are laid out as `[plaintext][tag: 32]`. The plaintext is not
/// hidden, so tokens sealed this way reveal the bound user name.
#[derive(Clone)]
pub struct HmacDataProtector {
    secret: Vec<u8>,
}

impl HmacDataProtector {
    /// Create a provider. The secret must be at least 32 bytes.
    pub fn new(secret: Vec<u8>) -> Result<Self, ProtectionError> {
        if secret.len() < KEY_LEN {
            return Err(ProtectionError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: secret.len(),
            });
        }
        Ok(Self { secret })
    }

    fn mac(&self) -> Result<HmacSha256, ProtectionError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret).map_err(|_| {
            ProtectionError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: self.secret.len(),
            }
        })?;
        mac.update(TOKEN_PURPOSE.as_bytes());
        Ok(mac)
    }
}

impl DataProtector for HmacDataProtector {
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        let mut mac = self.mac()?;
        mac.update(plaintext);
        let tag = mac.finalize().into_bytes();

        let mut out = Vec::with_capacity(plaintext.len() + HMAC_LEN);
        out.extend_from_slice(plaintext);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        if protected.len() < HMAC_LEN {
            return Err(ProtectionError::Truncated);
        }

        let (plaintext, tag) = protected.split_at(protected.len() - HMAC_LEN);
        let mut mac = self.mac()?;
        mac.update(plaintext);
        mac.verify_slice(tag)
            .map_err(|_| ProtectionError::IntegrityCheckFailed)?;

        Ok(plaintext.to_vec())
    }
}

impl std::fmt::Debug for HmacDataProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacDataProtector").finish_non_exhaustive()
    }
}
