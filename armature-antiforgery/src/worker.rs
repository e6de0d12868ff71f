//! Orchestration of token issuance and validation.
//!
//! Issuance forgives: an unreadable cookie is treated as absent and a new
//! one is minted. Validation does not: an unreadable token is a failure.

use crate::config::AntiForgeryConfig;
use crate::context::HttpContext;
use crate::error::{AntiForgeryError, Result, TokenDecodeError, ValidationFailure};
use crate::provider::{TokenGenerator, TokenValidator};
use crate::serializer::TokenSerializer;
use crate::store::TokenStore;
use crate::token::{AntiForgeryToken, AntiForgeryTokenSet};
use std::sync::Arc;
use tracing::{debug, error, warn};

const X_FRAME_OPTIONS: &str = "X-Frame-Options";

/// Serialized tokens from [`AntiForgeryWorker::issue_token_pair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    /// Set when a new cookie token was minted; the caller must persist it
    pub new_cookie_token: Option<String>,
    pub form_token: String,
}

/// Result of the shared regeneration step.
struct Regenerated {
    cookie_token: AntiForgeryToken,
    is_new: bool,
    form_token: AntiForgeryToken,
}

/// Anti-forgery entry points.
///
/// Every entry point first enforces the SSL policy. The worker holds only
/// shared read-only collaborators and can be used concurrently.
#[derive(Clone)]
pub struct AntiForgeryWorker {
    config: Arc<AntiForgeryConfig>,
    serializer: Arc<dyn TokenSerializer>,
    store: Arc<dyn TokenStore>,
    generator: Arc<dyn TokenGenerator>,
    validator: Arc<dyn TokenValidator>,
}

impl AntiForgeryWorker {
    /// Create a worker. Fails if the configuration is invalid.
    pub fn new(
        config: Arc<AntiForgeryConfig>,
        serializer: Arc<dyn TokenSerializer>,
        store: Arc<dyn TokenStore>,
        generator: Arc<dyn TokenGenerator>,
        validator: Arc<dyn TokenValidator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            serializer,
            store,
            generator,
            validator,
        })
    }

    pub fn config(&self) -> &AntiForgeryConfig {
        &self.config
    }

    /// Issue a form token for a rendered page and return the hidden input
    /// element carrying it.
    ///
    /// Persists a new cookie token when the request has no usable one and
    /// adds `X-Frame-Options: SAMEORIGIN` unless suppressed or already set.
    pub fn issue_for_render(&self, ctx: &mut dyn HttpContext) -> Result<String> {
        self.check_ssl(&*ctx)?;

        let old_cookie_token = match self.store.get_cookie_token(&*ctx) {
            Ok(token) => token,
            Err(e) => {
                debug!(cause = e.code(), "Discarding unreadable anti-forgery cookie");
                None
            }
        };

        let tokens = self.regenerate(&*ctx, old_cookie_token)?;
        let form_token = self.serializer.serialize(&tokens.form_token)?;
        if tokens.is_new {
            self.store.save_cookie_token(ctx, &tokens.cookie_token)?;
        }

        if !self.config.suppress_x_frame_options_header
            && ctx.response_header(X_FRAME_OPTIONS).is_none()
        {
            ctx.set_response_header(X_FRAME_OPTIONS, "SAMEORIGIN");
        }

        Ok(format!(
            r#"<input name="{}" type="hidden" value="{}" />"#,
            html_attribute_encode(&self.config.form_field_name),
            html_attribute_encode(&form_token)
        ))
    }

    /// Issue a form token against an explicitly supplied cookie token.
    ///
    /// Nothing is written to the response; a newly minted cookie token is
    /// returned for the caller to persist.
    pub fn issue_token_pair(
        &self,
        ctx: &dyn HttpContext,
        serialized_old_cookie_token: Option<&str>,
    ) -> Result<IssuedTokens> {
        self.check_ssl(ctx)?;

        let old_cookie_token = self.deserialize_forgiving(serialized_old_cookie_token);
        let tokens = self.regenerate(ctx, old_cookie_token)?;

        let new_cookie_token = if tokens.is_new {
            Some(self.serializer.serialize(&tokens.cookie_token)?)
        } else {
            None
        };

        Ok(IssuedTokens {
            new_cookie_token,
            form_token: self.serializer.serialize(&tokens.form_token)?,
        })
    }

    /// Like [`issue_token_pair`](Self::issue_token_pair) but always returns
    /// both halves, re-serializing the existing cookie token when it is kept.
    pub fn issue_token_set(
        &self,
        ctx: &dyn HttpContext,
        serialized_old_cookie_token: Option<&str>,
    ) -> Result<AntiForgeryTokenSet> {
        self.check_ssl(ctx)?;

        let old_cookie_token = self.deserialize_forgiving(serialized_old_cookie_token);
        let tokens = self.regenerate(ctx, old_cookie_token)?;

        AntiForgeryTokenSet::new(
            self.serializer.serialize(&tokens.form_token)?,
            self.serializer.serialize(&tokens.cookie_token)?,
        )
    }

    /// Validate the cookie and form tokens carried by the request.
    pub fn validate_from_request(&self, ctx: &dyn HttpContext) -> Result<()> {
        self.check_ssl(ctx)?;

        let cookie_token = self
            .store
            .get_cookie_token(ctx)
            .map_err(Self::malformed)?;
        let form_token = self
            .store
            .get_form_token(ctx)
            .map_err(Self::malformed)?;

        self.validator.validate_tokens(
            ctx,
            ctx.identity(),
            cookie_token.as_ref(),
            form_token.as_ref(),
        )
    }

    /// Validate explicitly supplied serialized tokens, e.g. from API headers.
    pub fn validate_explicit(
        &self,
        ctx: &dyn HttpContext,
        cookie_token: Option<&str>,
        form_token: Option<&str>,
    ) -> Result<()> {
        self.check_ssl(ctx)?;

        let cookie_token = self.deserialize_strict(cookie_token)?;
        let form_token = self.deserialize_strict(form_token)?;

        self.validator.validate_tokens(
            ctx,
            ctx.identity(),
            cookie_token.as_ref(),
            form_token.as_ref(),
        )
    }

    fn check_ssl(&self, ctx: &dyn HttpContext) -> Result<()> {
        if self.config.require_ssl && !ctx.is_secure() {
            error!("Anti-forgery token requested over an insecure connection with require_ssl set");
            return Err(AntiForgeryError::SslRequired);
        }
        Ok(())
    }

    /// Keep a valid cookie token or mint a new one, then mint a form token
    /// paired with it.
    fn regenerate(
        &self,
        ctx: &dyn HttpContext,
        old_cookie_token: Option<AntiForgeryToken>,
    ) -> Result<Regenerated> {
        let (cookie_token, is_new) = match old_cookie_token {
            Some(token) if self.validator.is_cookie_token_valid(Some(&token)) => (token, false),
            _ => {
                debug!("Generating new anti-forgery cookie token");
                (self.generator.generate_cookie_token(), true)
            }
        };

        let form_token = self
            .generator
            .generate_form_token(ctx, ctx.identity(), &cookie_token)?;

        Ok(Regenerated {
            cookie_token,
            is_new,
            form_token,
        })
    }

    fn deserialize_forgiving(&self, serialized: Option<&str>) -> Option<AntiForgeryToken> {
        let serialized = serialized.filter(|s| !s.is_empty())?;
        match self.serializer.deserialize(serialized) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(cause = e.code(), "Discarding unreadable anti-forgery cookie");
                None
            }
        }
    }

    fn deserialize_strict(&self, serialized: Option<&str>) -> Result<Option<AntiForgeryToken>> {
        match serialized.filter(|s| !s.is_empty()) {
            Some(serialized) => self
                .serializer
                .deserialize(serialized)
                .map(Some)
                .map_err(Self::malformed),
            None => Ok(None),
        }
    }

    fn malformed(e: TokenDecodeError) -> AntiForgeryError {
        warn!(
            reason = ValidationFailure::MalformedToken.code(),
            cause = e.code(),
            "Anti-forgery validation failed"
        );
        AntiForgeryError::Validation(ValidationFailure::MalformedToken)
    }
}

impl std::fmt::Debug for AntiForgeryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AntiForgeryWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn html_attribute_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::DefaultClaimUidExtractor;
    use crate::context::RequestContext;
    use crate::error::ProtectionError;
    use crate::identity::ClaimsIdentity;
    use crate::protection::{AesGcmDataProtector, DataProtector, HmacDataProtector, generate_key};
    use crate::provider::TokenProvider;
    use crate::serializer::DefaultTokenSerializer;
    use crate::store::DefaultTokenStore;
    use http::Request;
    use http::header::{CONTENT_TYPE, COOKIE};

    fn worker_with(config: AntiForgeryConfig, protector: Arc<dyn DataProtector>) -> AntiForgeryWorker {
        let config = Arc::new(config);
        let serializer: Arc<dyn TokenSerializer> = Arc::new(DefaultTokenSerializer::new(protector));
        let provider = Arc::new(TokenProvider::new(
            config.clone(),
            Arc::new(DefaultClaimUidExtractor::new()),
        ));
        AntiForgeryWorker::new(
            config.clone(),
            serializer.clone(),
            Arc::new(DefaultTokenStore::new(config, serializer)),
            provider.clone(),
            provider,
        )
        .unwrap()
    }

    fn worker(config: AntiForgeryConfig) -> AntiForgeryWorker {
        worker_with(
            config,
            Arc::new(AesGcmDataProtector::new(1, &generate_key()).unwrap()),
        )
    }

    fn get(cookie: Option<&str>) -> RequestContext {
        let mut builder = Request::get("http://localhost/form");
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        RequestContext::new(builder.body(Vec::new()).unwrap())
    }

    fn post(cookie: &str, form_token: &str) -> RequestContext {
        let request = Request::post("http://localhost/form")
            .header(COOKIE, cookie)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(format!("__RequestVerificationToken={}", form_token).into_bytes())
            .unwrap();
        RequestContext::new(request)
    }

    fn hidden_value(markup: &str) -> String {
        let start = markup.find("value=\"").unwrap() + "value=\"".len();
        let end = start + markup[start..].find('"').unwrap();
        markup[start..end].to_string()
    }

    fn cookie_pair(ctx: &RequestContext) -> String {
        ctx.response_cookies()[0].split(';').next().unwrap().to_string()
    }

    #[test]
    fn test_render_without_cookie_sets_one_cookie() {
        let worker = worker(AntiForgeryConfig::new());
        let mut ctx = get(None);
        let markup = worker.issue_for_render(&mut ctx).unwrap();

        assert!(markup.starts_with(r#"<input name="__RequestVerificationToken" type="hidden" value=""#));
        assert!(!hidden_value(&markup).is_empty());
        assert_eq!(ctx.response_cookies().len(), 1);
        assert_eq!(ctx.response_header("X-Frame-Options").as_deref(), Some("SAMEORIGIN"));
    }

    #[test]
    fn test_render_with_valid_cookie_reuses_it() {
        let worker = worker_with(
            AntiForgeryConfig::new(),
            Arc::new(HmacDataProtector::new(generate_key()).unwrap()),
        );
        let mut first = get(None);
        let first_markup = worker.issue_for_render(&mut first).unwrap();
        let cookie = cookie_pair(&first);

        let mut second = get(Some(&cookie));
        let second_markup = worker.issue_for_render(&mut second).unwrap();
        let mut third = get(Some(&cookie));
        let third_markup = worker.issue_for_render(&mut third).unwrap();

        assert!(second.response_cookies().is_empty());
        assert_eq!(second_markup, third_markup);
        assert_eq!(first_markup, second_markup);
    }

    #[test]
    fn test_render_replaces_corrupt_cookie() {
        let worker = worker(AntiForgeryConfig::new());
        let mut ctx = get(Some("__RequestVerificationToken=corrupt"));
        assert!(worker.issue_for_render(&mut ctx).is_ok());
        assert_eq!(ctx.response_cookies().len(), 1);
    }

    #[test]
    fn test_render_replaces_form_token_in_cookie() {
        let worker = worker(AntiForgeryConfig::new());
        let issued = worker.issue_token_pair(&get(None), None).unwrap();

        let cookie = format!("__RequestVerificationToken={}", issued.form_token);
        let mut ctx = get(Some(&cookie));
        worker.issue_for_render(&mut ctx).unwrap();
        assert_eq!(ctx.response_cookies().len(), 1);
    }

    struct FailingFormSerializer(DefaultTokenSerializer);

    impl TokenSerializer for FailingFormSerializer {
        fn serialize(&self, token: &AntiForgeryToken) -> Result<String> {
            if token.is_session_token() {
                self.0.serialize(token)
            } else {
                Err(ProtectionError::EncryptionFailed.into())
            }
        }

        fn deserialize(
            &self,
            serialized: &str,
        ) -> std::result::Result<AntiForgeryToken, TokenDecodeError> {
            self.0.deserialize(serialized)
        }
    }

    #[test]
    fn test_render_failure_leaves_no_cookie() {
        let config = Arc::new(AntiForgeryConfig::default());
        let serializer: Arc<dyn TokenSerializer> = Arc::new(FailingFormSerializer(
            DefaultTokenSerializer::new(Arc::new(HmacDataProtector::new(generate_key()).unwrap())),
        ));
        let provider = Arc::new(TokenProvider::new(
            config.clone(),
            Arc::new(DefaultClaimUidExtractor::new()),
        ));
        let worker = AntiForgeryWorker::new(
            config.clone(),
            serializer.clone(),
            Arc::new(DefaultTokenStore::new(config, serializer)),
            provider.clone(),
            provider,
        )
        .unwrap();

        let mut ctx = get(None);
        assert!(matches!(
            worker.issue_for_render(&mut ctx),
            Err(AntiForgeryError::Protection(ProtectionError::EncryptionFailed))
        ));
        assert!(ctx.response_cookies().is_empty());
    }

    #[test]
    fn test_x_frame_options_handling() {
        let suppressed = worker(AntiForgeryConfig::new().with_suppress_x_frame_options_header(true));
        let mut ctx = get(None);
        suppressed.issue_for_render(&mut ctx).unwrap();
        assert!(ctx.response_header("X-Frame-Options").is_none());

        let default = worker(AntiForgeryConfig::new());
        let mut ctx = get(None);
        ctx.set_response_header("X-Frame-Options", "DENY");
        default.issue_for_render(&mut ctx).unwrap();
        assert_eq!(ctx.response_header("X-Frame-Options").as_deref(), Some("DENY"));
    }

    #[test]
    fn test_rendered_pair_validates() {
        let worker = worker(AntiForgeryConfig::new());
        let mut render = get(None);
        let markup = worker.issue_for_render(&mut render).unwrap();

        let ctx = post(&cookie_pair(&render), &hidden_value(&markup));
        assert!(worker.validate_from_request(&ctx).is_ok());
    }

    #[test]
    fn test_issue_token_pair() {
        let worker = worker(AntiForgeryConfig::new());
        let ctx = get(None);

        let fresh = worker.issue_token_pair(&ctx, None).unwrap();
        let cookie = fresh.new_cookie_token.clone().unwrap();
        assert!(ctx.response_cookies().is_empty());
        assert!(worker.validate_explicit(&ctx, Some(&cookie), Some(&fresh.form_token)).is_ok());

        let again = worker.issue_token_pair(&ctx, Some(&cookie)).unwrap();
        assert!(again.new_cookie_token.is_none());
        assert!(worker.validate_explicit(&ctx, Some(&cookie), Some(&again.form_token)).is_ok());

        let corrupt = worker.issue_token_pair(&ctx, Some("corrupt")).unwrap();
        assert!(corrupt.new_cookie_token.is_some());
    }

    #[test]
    fn test_issue_token_set() {
        let worker = worker(AntiForgeryConfig::new());
        let ctx = get(None);
        let set = worker.issue_token_set(&ctx, None).unwrap();
        assert!(worker
            .validate_explicit(&ctx, Some(set.cookie_token()), Some(set.form_token()))
            .is_ok());

        let kept = worker.issue_token_set(&ctx, Some(set.cookie_token())).unwrap();
        assert!(worker
            .validate_explicit(&ctx, Some(set.cookie_token()), Some(kept.form_token()))
            .is_ok());
    }

    #[test]
    fn test_validate_missing_tokens() {
        let worker = worker(AntiForgeryConfig::new());
        let ctx = get(None);
        assert_eq!(
            worker.validate_from_request(&ctx).unwrap_err().failure(),
            Some(ValidationFailure::CookieMissing)
        );
        assert_eq!(
            worker.validate_explicit(&ctx, None, Some("x")).unwrap_err().failure(),
            Some(ValidationFailure::MalformedToken)
        );
        assert_eq!(
            worker.validate_explicit(&ctx, Some(""), None).unwrap_err().failure(),
            Some(ValidationFailure::CookieMissing)
        );
    }

    #[test]
    fn test_validate_malformed_tokens_fail_hard() {
        let worker = worker(AntiForgeryConfig::new());
        let issued = worker.issue_token_pair(&get(None), None).unwrap();
        let cookie = issued.new_cookie_token.unwrap();

        let ctx = post("__RequestVerificationToken=corrupt", &issued.form_token);
        assert_eq!(
            worker.validate_from_request(&ctx).unwrap_err().failure(),
            Some(ValidationFailure::MalformedToken)
        );

        let ctx = get(None);
        assert_eq!(
            worker
                .validate_explicit(&ctx, Some(&cookie), Some("corrupt"))
                .unwrap_err()
                .failure(),
            Some(ValidationFailure::MalformedToken)
        );
    }

    #[test]
    fn test_validate_swapped_tokens() {
        let worker = worker(AntiForgeryConfig::new());
        let ctx = get(None);
        let issued = worker.issue_token_pair(&ctx, None).unwrap();
        let cookie = issued.new_cookie_token.unwrap();
        assert_eq!(
            worker
                .validate_explicit(&ctx, Some(&issued.form_token), Some(&cookie))
                .unwrap_err()
                .failure(),
            Some(ValidationFailure::TokensSwapped)
        );
    }

    #[test]
    fn test_username_mismatch() {
        let worker = worker(AntiForgeryConfig::new());
        let alice = get(None).with_identity(ClaimsIdentity::authenticated("Forms").with_name("alice"));
        let issued = worker.issue_token_pair(&alice, None).unwrap();
        let cookie = issued.new_cookie_token.unwrap();

        let bob = get(None).with_identity(ClaimsIdentity::authenticated("Forms").with_name("bob"));
        assert_eq!(
            worker
                .validate_explicit(&bob, Some(&cookie), Some(&issued.form_token))
                .unwrap_err()
                .failure(),
            Some(ValidationFailure::UsernameMismatch)
        );
    }

    #[test]
    fn test_require_ssl_gates_every_entry_point() {
        let worker = worker(AntiForgeryConfig::new().with_require_ssl(true));
        let mut ctx = get(Some("__RequestVerificationToken=corrupt"));

        assert!(matches!(worker.issue_for_render(&mut ctx), Err(AntiForgeryError::SslRequired)));
        assert!(matches!(worker.issue_token_pair(&ctx, None), Err(AntiForgeryError::SslRequired)));
        assert!(matches!(worker.issue_token_set(&ctx, None), Err(AntiForgeryError::SslRequired)));
        assert!(matches!(worker.validate_from_request(&ctx), Err(AntiForgeryError::SslRequired)));
        assert!(matches!(
            worker.validate_explicit(&ctx, Some("a"), Some("b")),
            Err(AntiForgeryError::SslRequired)
        ));
        assert!(ctx.response_headers().is_empty());

        let mut secure = get(None).with_secure(true);
        worker.issue_for_render(&mut secure).unwrap();
        assert!(secure.response_cookies()[0].contains("; Secure"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = Arc::new(AntiForgeryConfig::new().with_cookie_name("bad name"));
        let serializer: Arc<dyn TokenSerializer> = Arc::new(DefaultTokenSerializer::new(
            Arc::new(HmacDataProtector::new(generate_key()).unwrap()),
        ));
        let provider = Arc::new(TokenProvider::new(
            config.clone(),
            Arc::new(DefaultClaimUidExtractor::new()),
        ));
        let result = AntiForgeryWorker::new(
            config.clone(),
            serializer.clone(),
            Arc::new(DefaultTokenStore::new(config, serializer)),
            provider.clone(),
            provider,
        );
        assert!(matches!(result, Err(AntiForgeryError::Configuration(_))));
    }

    #[test]
    fn test_html_attribute_encode() {
        assert_eq!(html_attribute_encode(r#"a"<b>&'"#), "a&quot;&lt;b&gt;&amp;&#39;");
        assert_eq!(html_attribute_encode("plain-token_1"), "plain-token_1");
    }
}
