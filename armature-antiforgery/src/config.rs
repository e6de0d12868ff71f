use crate::context::HttpContext;
use crate::error::{AntiForgeryError, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use std::env;
use std::sync::Arc;

/// Default form field name, also the base of the default cookie name.
pub const DEFAULT_FORM_FIELD_NAME: &str = "__RequestVerificationToken";

/// Supplies extra data bound into form tokens, such as a tenant id or a
/// nonce, and checks it again at validation time.
pub trait AdditionalDataProvider: Send + Sync {
    fn get_additional_data(&self, ctx: &dyn HttpContext) -> String;

    fn validate_additional_data(&self, ctx: &dyn HttpContext, additional_data: &str) -> bool;
}

/// Anti-forgery configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AntiForgeryConfig {
    /// Form field name for the form token
    pub form_field_name: String,

    /// Cookie name for the cookie token; derived from the field name when unset
    pub cookie_name: Option<String>,

    /// Application path used to qualify the derived cookie name
    pub app_path: String,

    /// Request header consulted when the form field is absent
    pub header_name: Option<String>,

    /// Refuse to issue or validate tokens over plaintext
    pub require_ssl: bool,

    /// Do not add `X-Frame-Options: SAMEORIGIN` when rendering a form token
    pub suppress_x_frame_options_header: bool,

    /// Allow authenticated identities that cannot be bound to a form token
    pub suppress_identity_heuristic_checks: bool,

    /// Cookie path
    pub cookie_path: String,

    /// Cookie domain
    pub cookie_domain: Option<String>,

    /// Cookie SameSite policy
    pub cookie_same_site: Option<SameSite>,

    /// Extra data bound into form tokens
    #[serde(skip)]
    pub additional_data_provider: Option<Arc<dyn AdditionalDataProvider>>,
}

/// Cookie SameSite attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

impl AntiForgeryConfig {
    /// Create a configuration with default names and no SSL requirement
    pub fn new() -> Self {
        Self {
            form_field_name: DEFAULT_FORM_FIELD_NAME.to_string(),
            cookie_name: None,
            app_path: "/".to_string(),
            header_name: None,
            require_ssl: false,
            suppress_x_frame_options_header: false,
            suppress_identity_heuristic_checks: false,
            cookie_path: "/".to_string(),
            cookie_domain: None,
            cookie_same_site: Some(SameSite::Strict),
            additional_data_provider: None,
        }
    }

    /// Load configuration from `ARMATURE_ANTIFORGERY_*` environment variables.
    ///
    /// - `ARMATURE_ANTIFORGERY_COOKIE_NAME`
    /// - `ARMATURE_ANTIFORGERY_FIELD_NAME`
    /// - `ARMATURE_ANTIFORGERY_HEADER_NAME`
    /// - `ARMATURE_ANTIFORGERY_APP_PATH`
    /// - `ARMATURE_ANTIFORGERY_REQUIRE_SSL=1|true`
    /// - `ARMATURE_ANTIFORGERY_SUPPRESS_XFRAME=1|true`
    /// - `ARMATURE_ANTIFORGERY_SUPPRESS_HEURISTICS=1|true`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            lookup(key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };

        let mut config = Self::new();
        if let Some(name) = lookup("ARMATURE_ANTIFORGERY_FIELD_NAME") {
            config.form_field_name = name;
        }
        config.cookie_name = lookup("ARMATURE_ANTIFORGERY_COOKIE_NAME");
        config.header_name = lookup("ARMATURE_ANTIFORGERY_HEADER_NAME");
        if let Some(path) = lookup("ARMATURE_ANTIFORGERY_APP_PATH") {
            config.app_path = path;
        }
        config.require_ssl = flag("ARMATURE_ANTIFORGERY_REQUIRE_SSL");
        config.suppress_x_frame_options_header = flag("ARMATURE_ANTIFORGERY_SUPPRESS_XFRAME");
        config.suppress_identity_heuristic_checks =
            flag("ARMATURE_ANTIFORGERY_SUPPRESS_HEURISTICS");
        config
    }

    /// The effective cookie name.
    ///
    /// Without an explicit name, apps mounted below `/` get the form field
    /// name suffixed with their encoded path so they do not share a cookie.
    pub fn cookie_name(&self) -> String {
        if let Some(name) = &self.cookie_name {
            return name.clone();
        }
        if self.app_path.is_empty() || self.app_path == "/" {
            return self.form_field_name.clone();
        }
        format!(
            "{}_{}",
            self.form_field_name,
            URL_SAFE_NO_PAD.encode(self.app_path.as_bytes())
        )
    }

    /// Check names for emptiness and characters a cookie cannot carry.
    pub fn validate(&self) -> Result<()> {
        if self.form_field_name.is_empty() {
            return Err(AntiForgeryError::Configuration(
                "form field name must not be empty".to_string(),
            ));
        }

        let cookie_name = self.cookie_name();
        if cookie_name.is_empty() || !cookie_name.bytes().all(is_token_char) {
            return Err(AntiForgeryError::Configuration(format!(
                "'{}' is not a valid cookie name",
                cookie_name
            )));
        }

        if let Some(header) = &self.header_name {
            if http::HeaderName::from_bytes(header.as_bytes()).is_err() {
                return Err(AntiForgeryError::Configuration(format!(
                    "'{}' is not a valid header name",
                    header
                )));
            }
        }

        Ok(())
    }

    /// Set form field name
    pub fn with_form_field_name(mut self, name: impl Into<String>) -> Self {
        self.form_field_name = name.into();
        self
    }

    /// Set cookie name
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = Some(name.into());
        self
    }

    /// Set application path
    pub fn with_app_path(mut self, path: impl Into<String>) -> Self {
        self.app_path = path.into();
        self
    }

    /// Set header name
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = Some(name.into());
        self
    }

    /// Require SSL
    pub fn with_require_ssl(mut self, require: bool) -> Self {
        self.require_ssl = require;
        self
    }

    pub fn with_suppress_x_frame_options_header(mut self, suppress: bool) -> Self {
        self.suppress_x_frame_options_header = suppress;
        self
    }

    pub fn with_suppress_identity_heuristic_checks(mut self, suppress: bool) -> Self {
        self.suppress_identity_heuristic_checks = suppress;
        self
    }

    /// Set cookie path
    pub fn with_cookie_path(mut self, path: impl Into<String>) -> Self {
        self.cookie_path = path.into();
        self
    }

    /// Set cookie domain
    pub fn with_cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.cookie_domain = Some(domain.into());
        self
    }

    /// Set cookie SameSite policy
    pub fn with_cookie_same_site(mut self, same_site: Option<SameSite>) -> Self {
        self.cookie_same_site = same_site;
        self
    }

    pub fn with_additional_data_provider(
        mut self,
        provider: Arc<dyn AdditionalDataProvider>,
    ) -> Self {
        self.additional_data_provider = Some(provider);
        self
    }
}

// RFC 6265 cookie-name token characters.
fn is_token_char(b: u8) -> bool {
    b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
}

impl Default for AntiForgeryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AntiForgeryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AntiForgeryConfig")
            .field("form_field_name", &self.form_field_name)
            .field("cookie_name", &self.cookie_name())
            .field("header_name", &self.header_name)
            .field("require_ssl", &self.require_ssl)
            .field(
                "suppress_x_frame_options_header",
                &self.suppress_x_frame_options_header,
            )
            .field(
                "suppress_identity_heuristic_checks",
                &self.suppress_identity_heuristic_checks,
            )
            .field("cookie_path", &self.cookie_path)
            .field("cookie_domain", &self.cookie_domain)
            .field("cookie_same_site", &self.cookie_same_site)
            .field(
                "additional_data_provider",
                &self.additional_data_provider.is_some(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let config = AntiForgeryConfig::default();
        assert_eq!(config.form_field_name, "__RequestVerificationToken");
        assert_eq!(config.cookie_name(), "__RequestVerificationToken");
        assert!(!config.require_ssl);
        assert_eq!(config.cookie_same_site, Some(SameSite::Strict));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = AntiForgeryConfig::new()
            .with_cookie_name("_af")
            .with_form_field_name("_af_field")
            .with_require_ssl(true)
            .with_cookie_same_site(Some(SameSite::Lax));

        assert_eq!(config.cookie_name(), "_af");
        assert_eq!(config.form_field_name, "_af_field");
        assert!(config.require_ssl);
        assert_eq!(config.cookie_same_site, Some(SameSite::Lax));
    }

    #[test]
    fn test_cookie_name_is_app_path_qualified() {
        let config = AntiForgeryConfig::new().with_app_path("/shop");
        assert_eq!(config.cookie_name(), "__RequestVerificationToken_L3Nob3A");
        assert!(config.validate().is_ok());

        let explicit = config.with_cookie_name("csrf");
        assert_eq!(explicit.cookie_name(), "csrf");
    }

    #[test]
    fn test_invalid_names() {
        assert!(AntiForgeryConfig::new().with_form_field_name("").validate().is_err());
        assert!(AntiForgeryConfig::new().with_cookie_name("a b").validate().is_err());
        assert!(AntiForgeryConfig::new().with_cookie_name("a;b").validate().is_err());
        assert!(AntiForgeryConfig::new().with_header_name("bad header").validate().is_err());
        assert!(AntiForgeryConfig::new().with_header_name("X-CSRF-Token").validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("ARMATURE_ANTIFORGERY_COOKIE_NAME", "af_cookie"),
            ("ARMATURE_ANTIFORGERY_REQUIRE_SSL", "TRUE"),
            ("ARMATURE_ANTIFORGERY_SUPPRESS_XFRAME", "1"),
            ("ARMATURE_ANTIFORGERY_SUPPRESS_HEURISTICS", "no"),
        ]
        .into_iter()
        .collect();

        let config =
            AntiForgeryConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.cookie_name(), "af_cookie");
        assert_eq!(config.form_field_name, DEFAULT_FORM_FIELD_NAME);
        assert!(config.require_ssl);
        assert!(config.suppress_x_frame_options_header);
        assert!(!config.suppress_identity_heuristic_checks);
    }

    #[test]
    fn test_deserialize_from_json() {
        let config: AntiForgeryConfig = serde_json::from_str(
            r#"{ "require_ssl": true, "cookie_same_site": "Lax", "app_path": "/admin" }"#,
        )
        .unwrap();
        assert!(config.require_ssl);
        assert_eq!(config.cookie_same_site, Some(SameSite::Lax));
        assert_eq!(config.form_field_name, DEFAULT_FORM_FIELD_NAME);
        assert!(config.additional_data_provider.is_none());
    }

    #[test]
    fn test_same_site_enum() {
        assert_eq!(SameSite::Strict.as_str(), "Strict");
        assert_eq!(SameSite::Lax.as_str(), "Lax");
        assert_eq!(SameSite::None.as_str(), "None");
    }
}
