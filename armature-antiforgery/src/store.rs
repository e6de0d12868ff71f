//! Reading and writing tokens on the request and response.

use crate::config::AntiForgeryConfig;
use crate::context::{HttpContext, ResponseCookie};
use crate::error::{Result, TokenDecodeError};
use crate::serializer::TokenSerializer;
use crate::token::AntiForgeryToken;
use std::sync::Arc;

/// Token persistence against an [`HttpContext`].
///
/// Getters return `Ok(None)` when the token is absent or empty, and the
/// decode error when it is present but unreadable; callers decide whether
/// that counts as absent.
pub trait TokenStore: Send + Sync {
    fn get_cookie_token(
        &self,
        ctx: &dyn HttpContext,
    ) -> std::result::Result<Option<AntiForgeryToken>, TokenDecodeError>;

    fn get_form_token(
        &self,
        ctx: &dyn HttpContext,
    ) -> std::result::Result<Option<AntiForgeryToken>, TokenDecodeError>;

    fn save_cookie_token(&self, ctx: &mut dyn HttpContext, token: &AntiForgeryToken) -> Result<()>;
}

/// Cookie plus form-field store.
///
/// The form token is read from the configured form field, falling back to
/// the configured header when one is set.
#[derive(Clone)]
pub struct DefaultTokenStore {
    config: Arc<AntiForgeryConfig>,
    serializer: Arc<dyn TokenSerializer>,
}

impl DefaultTokenStore {
    pub fn new(config: Arc<AntiForgeryConfig>, serializer: Arc<dyn TokenSerializer>) -> Self {
        Self { config, serializer }
    }

    fn decode(
        &self,
        value: Option<String>,
    ) -> std::result::Result<Option<AntiForgeryToken>, TokenDecodeError> {
        match value.filter(|v| !v.is_empty()) {
            Some(value) => self.serializer.deserialize(&value).map(Some),
            None => Ok(None),
        }
    }
}

impl TokenStore for DefaultTokenStore {
    fn get_cookie_token(
        &self,
        ctx: &dyn HttpContext,
    ) -> std::result::Result<Option<AntiForgeryToken>, TokenDecodeError> {
        self.decode(ctx.request_cookie(&self.config.cookie_name()))
    }

    fn get_form_token(
        &self,
        ctx: &dyn HttpContext,
    ) -> std::result::Result<Option<AntiForgeryToken>, TokenDecodeError> {
        let value = ctx
            .form_field(&self.config.form_field_name)
            .filter(|v| !v.is_empty())
            .or_else(|| {
                self.config
                    .header_name
                    .as_deref()
                    .and_then(|header| ctx.request_header(header))
            });
        self.decode(value)
    }

    fn save_cookie_token(&self, ctx: &mut dyn HttpContext, token: &AntiForgeryToken) -> Result<()> {
        let serialized = self.serializer.serialize(token)?;

        let mut cookie = ResponseCookie::new(self.config.cookie_name(), serialized);
        cookie.http_only = true;
        cookie.path = Some(self.config.cookie_path.clone());
        cookie.domain = self.config.cookie_domain.clone();
        cookie.same_site = self.config.cookie_same_site;
        // Only ever upgrade; the context may already force Secure.
        if self.config.require_ssl {
            cookie.secure = true;
        }

        ctx.append_response_cookie(cookie);
        Ok(())
    }
}

impl std::fmt::Debug for DefaultTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultTokenStore")
            .field("cookie_name", &self.config.cookie_name())
            .field("form_field_name", &self.config.form_field_name)
            .finish_non_exhaustive()
    }
}
