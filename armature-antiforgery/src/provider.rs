//! Token minting and acceptance policy.

use crate::binary_blob::BinaryBlob;
use crate::claims::ClaimUidExtractor;
use crate::config::AntiForgeryConfig;
use crate::context::HttpContext;
use crate::error::{AntiForgeryError, Result, ValidationFailure};
use crate::identity::ClaimsIdentity;
use crate::token::AntiForgeryToken;
use std::sync::Arc;
use tracing::{error, trace, warn};

/// Mints cookie and form tokens.
pub trait TokenGenerator: Send + Sync {
    fn generate_cookie_token(&self) -> AntiForgeryToken;

    /// Mint a form token paired with `cookie_token` and bound to `identity`.
    ///
    /// `cookie_token` must be a valid cookie token.
    fn generate_form_token(
        &self,
        ctx: &dyn HttpContext,
        identity: Option<&ClaimsIdentity>,
        cookie_token: &AntiForgeryToken,
    ) -> Result<AntiForgeryToken>;
}

/// Decides whether a token pair is acceptable for the current request.
pub trait TokenValidator: Send + Sync {
    fn is_cookie_token_valid(&self, cookie_token: Option<&AntiForgeryToken>) -> bool;

    /// Run every check in order and return the first failure.
    fn validate_tokens(
        &self,
        ctx: &dyn HttpContext,
        identity: Option<&ClaimsIdentity>,
        cookie_token: Option<&AntiForgeryToken>,
        form_token: Option<&AntiForgeryToken>,
    ) -> Result<()>;
}

/// Default generator and validator.
#[derive(Clone)]
pub struct TokenProvider {
    config: Arc<AntiForgeryConfig>,
    claim_uid_extractor: Arc<dyn ClaimUidExtractor>,
}

/// Who a form token is bound to.
struct Binding {
    username: String,
    claim_uid: Option<BinaryBlob>,
}

impl TokenProvider {
    pub fn new(
        config: Arc<AntiForgeryConfig>,
        claim_uid_extractor: Arc<dyn ClaimUidExtractor>,
    ) -> Self {
        Self {
            config,
            claim_uid_extractor,
        }
    }

    /// The binding a form token for `identity` would carry. Claim UIDs win
    /// over names; anonymous users bind to nothing.
    fn binding_for(&self, identity: Option<&ClaimsIdentity>) -> Binding {
        match identity.filter(|i| i.is_authenticated()) {
            Some(identity) => match self.claim_uid_extractor.extract_claim_uid(Some(identity)) {
                Some(claim_uid) => Binding {
                    username: String::new(),
                    claim_uid: Some(claim_uid),
                },
                None => Binding {
                    username: identity.name().to_string(),
                    claim_uid: None,
                },
            },
            None => Binding {
                username: String::new(),
                claim_uid: None,
            },
        }
    }

    fn reject(failure: ValidationFailure) -> Result<()> {
        warn!(reason = failure.code(), "Anti-forgery validation failed");
        Err(AntiForgeryError::Validation(failure))
    }
}

/// URI-shaped names come from federated identity providers and are compared
/// case-sensitively.
fn is_uri_username(username: &str) -> bool {
    let starts_with = |prefix: &str| {
        username
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    };
    starts_with("http://") || starts_with("https://")
}

/// Simple one-to-one case mapping. Characters whose uppercase form expands
/// to several characters map to themselves.
fn fold_case(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

fn usernames_match(token_username: &str, current_username: &str) -> bool {
    if is_uri_username(current_username) {
        token_username == current_username
    } else {
        token_username
            .chars()
            .map(fold_case)
            .eq(current_username.chars().map(fold_case))
    }
}

impl TokenGenerator for TokenProvider {
    fn generate_cookie_token(&self) -> AntiForgeryToken {
        AntiForgeryToken::new_cookie_token()
    }

    fn generate_form_token(
        &self,
        ctx: &dyn HttpContext,
        identity: Option<&ClaimsIdentity>,
        cookie_token: &AntiForgeryToken,
    ) -> Result<AntiForgeryToken> {
        if !self.is_cookie_token_valid(Some(cookie_token)) {
            return Err(AntiForgeryError::InvalidArgument(
                "form tokens can only be generated from a cookie token".to_string(),
            ));
        }

        let mut form_token = AntiForgeryToken::form_token(cookie_token.security_token().clone());

        let binding = self.binding_for(identity);
        form_token = match binding.claim_uid {
            Some(claim_uid) => form_token.with_claim_uid(claim_uid),
            None => form_token.with_username(binding.username),
        };

        if let Some(provider) = &self.config.additional_data_provider {
            form_token = form_token.with_additional_data(provider.get_additional_data(ctx));
        }

        let Some(identity) = identity.filter(|i| i.is_authenticated()) else {
            return Ok(form_token);
        };

        if !self.config.suppress_identity_heuristic_checks
            && form_token.username().is_empty()
            && form_token.claim_uid().is_none()
            && form_token.additional_data().is_empty()
        {
            error!(
                authentication_type = identity.authentication_type(),
                "Authenticated identity cannot be bound to an anti-forgery token"
            );
            return Err(AntiForgeryError::UnbindableIdentity {
                authentication_type: identity.authentication_type().to_string(),
            });
        }

        Ok(form_token)
    }
}

impl TokenValidator for TokenProvider {
    fn is_cookie_token_valid(&self, cookie_token: Option<&AntiForgeryToken>) -> bool {
        cookie_token.is_some_and(|t| t.is_session_token())
    }

    fn validate_tokens(
        &self,
        ctx: &dyn HttpContext,
        identity: Option<&ClaimsIdentity>,
        cookie_token: Option<&AntiForgeryToken>,
        form_token: Option<&AntiForgeryToken>,
    ) -> Result<()> {
        let Some(cookie_token) = cookie_token else {
            return Self::reject(ValidationFailure::CookieMissing);
        };
        let Some(form_token) = form_token else {
            return Self::reject(ValidationFailure::FormFieldMissing);
        };

        if !cookie_token.is_session_token() || form_token.is_session_token() {
            return Self::reject(ValidationFailure::TokensSwapped);
        }

        if cookie_token.security_token() != form_token.security_token() {
            return Self::reject(ValidationFailure::SecurityTokenMismatch);
        }

        let current = self.binding_for(identity);
        if !usernames_match(form_token.username(), &current.username) {
            return Self::reject(ValidationFailure::UsernameMismatch);
        }
        if form_token.claim_uid() != current.claim_uid.as_ref() {
            return Self::reject(ValidationFailure::ClaimUidMismatch);
        }

        if let Some(provider) = &self.config.additional_data_provider {
            if !provider.validate_additional_data(ctx, form_token.additional_data()) {
                return Self::reject(ValidationFailure::AdditionalDataCheckFailed);
            }
        }

        trace!("Anti-forgery tokens validated");
        Ok(())
    }
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
