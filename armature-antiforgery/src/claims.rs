//! Claim UID derivation.
//!
//! A claim UID is a SHA-256 fingerprint of the claims that identify a user.
//! It lets a form token be bound to a claims identity without carrying the
//! claims themselves. The fingerprint is not secret; it only has to be sealed
//! into the token along with everything else.

use crate::binary_blob::{BinaryBlob, CLAIM_UID_BITS};
use crate::identity::{claim_types, Claim, ClaimsIdentity};
use crate::serializer::write_string;
use sha2::{Digest, Sha256};

/// Derives a stable identifier from an identity's claims.
pub trait ClaimUidExtractor: Send + Sync {
    /// Returns `None` for missing or unauthenticated identities.
    fn extract_claim_uid(&self, identity: Option<&ClaimsIdentity>) -> Option<BinaryBlob>;
}

/// Default extractor.
///
/// Uses the name identifier claim when the identity has a non-empty one.
/// Otherwise every claim is used, ordered by type and then value using
/// ordinal comparison so enumeration order never changes the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClaimUidExtractor;

impl DefaultClaimUidExtractor {
    pub fn new() -> Self {
        Self
    }

    fn unique_identifier_parameters(identity: &ClaimsIdentity) -> Vec<&str> {
        if let Some(claim) = identity
            .find_first(claim_types::NAME_IDENTIFIER)
            .filter(|c| !c.value.is_empty())
        {
            return vec![claim.claim_type.as_str(), claim.value.as_str()];
        }

        let mut claims: Vec<&Claim> = identity.claims().iter().collect();
        claims.sort_by(|a, b| {
            a.claim_type
                .as_bytes()
                .cmp(b.claim_type.as_bytes())
                .then_with(|| a.value.as_bytes().cmp(b.value.as_bytes()))
        });

        claims
            .into_iter()
            .flat_map(|c| [c.claim_type.as_str(), c.value.as_str()])
            .collect()
    }
}

impl ClaimUidExtractor for DefaultClaimUidExtractor {
    fn extract_claim_uid(&self, identity: Option<&ClaimsIdentity>) -> Option<BinaryBlob> {
        let identity = identity.filter(|i| i.is_authenticated())?;

        // Nothing to fingerprint; the caller falls back to the user name.
        if identity.claims().is_empty() {
            return None;
        }

        let parameters = Self::unique_identifier_parameters(identity);
        let digest = compute_sha256(&parameters);
        BinaryBlob::from_bytes(CLAIM_UID_BITS, &digest).ok()
    }
}

/// SHA-256 over length-prefixed strings, so no two different splits of the
/// same characters hash alike.
fn compute_sha256(parameters: &[&str]) -> [u8; 32] {
    let mut buffer = Vec::new();
    for parameter in parameters {
        write_string(&mut buffer, parameter);
    }
    Sha256::digest(&buffer).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn extract(identity: &ClaimsIdentity) -> Option<BinaryBlob> {
        DefaultClaimUidExtractor::new().extract_claim_uid(Some(identity))
    }

    #[test]
    fn test_anonymous_has_no_claim_uid() {
        let extractor = DefaultClaimUidExtractor::new();
        assert!(extractor.extract_claim_uid(None).is_none());

        let anonymous = ClaimsIdentity::anonymous().with_claim(claim_types::NAME, "alice");
        assert!(extractor.extract_claim_uid(Some(&anonymous)).is_none());
    }

    #[test]
    fn test_authenticated_without_claims_has_no_claim_uid() {
        let identity = ClaimsIdentity::authenticated("Cookies").with_name("alice");
        assert!(extract(&identity).is_none());
    }

    #[test]
    fn test_name_identifier_takes_precedence() {
        let a = ClaimsIdentity::authenticated("Cookies")
            .with_claim(claim_types::NAME_IDENTIFIER, "42")
            .with_claim(claim_types::EMAIL, "a@example.com");
        let b = ClaimsIdentity::authenticated("Bearer")
            .with_claim(claim_types::ROLE, "admin")
            .with_claim(claim_types::NAME_IDENTIFIER, "42");
        assert_eq!(extract(&a), extract(&b));
    }

    #[test]
    fn test_empty_name_identifier_falls_back_to_all_claims() {
        let a = ClaimsIdentity::authenticated("Cookies")
            .with_claim(claim_types::NAME_IDENTIFIER, "")
            .with_claim(claim_types::EMAIL, "a@example.com");
        let b = ClaimsIdentity::authenticated("Cookies")
            .with_claim(claim_types::NAME_IDENTIFIER, "")
            .with_claim(claim_types::EMAIL, "b@example.com");
        assert_ne!(extract(&a), extract(&b));
    }

    #[test]
    fn test_claim_order_does_not_matter() {
        let a = ClaimsIdentity::authenticated("Cookies")
            .with_claim(claim_types::EMAIL, "a@example.com")
            .with_claim(claim_types::ROLE, "admin")
            .with_claim(claim_types::ROLE, "user");
        let b = ClaimsIdentity::authenticated("Cookies")
            .with_claim(claim_types::ROLE, "user")
            .with_claim(claim_types::EMAIL, "a@example.com")
            .with_claim(claim_types::ROLE, "admin");
        assert_eq!(extract(&a), extract(&b));
    }

    #[test]
    fn test_length_prefix_prevents_split_collisions() {
        let a = ClaimsIdentity::authenticated("Cookies").with_claim("ab", "c");
        let b = ClaimsIdentity::authenticated("Cookies").with_claim("a", "bc");
        assert_ne!(extract(&a), extract(&b));
    }

    #[test]
    fn test_claim_uid_is_256_bits() {
        let identity =
            ClaimsIdentity::authenticated("Cookies").with_claim(claim_types::NAME_IDENTIFIER, "7");
        assert_eq!(extract(&identity).unwrap().bit_length(), CLAIM_UID_BITS);
    }

    proptest! {
        #[test]
        fn prop_claim_uid_ignores_enumeration_order(
            claims in proptest::collection::vec(("[a-z]{1,8}", "[a-z0-9]{0,8}"), 1..8),
            seed in any::<u64>(),
        ) {
            let mut shuffled = claims.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let build = |claims: &[(String, String)]| {
                claims.iter().fold(ClaimsIdentity::authenticated("Cookies"), |id, (t, v)| {
                    id.with_claim(t.clone(), v.clone())
                })
            };

            prop_assert_eq!(extract(&build(&claims)), extract(&build(&shuffled)));
        }
    }
}
