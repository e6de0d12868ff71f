//! # Armature Anti-Forgery
//!
//! Cross-Site Request Forgery (CSRF) protection using identity-bound token
//! pairs for Armature applications.
//!
//! ## Features
//!
//! - ✅ **Token Pairs** - A cookie token and a form token sharing one secret
//! - ✅ **Identity Binding** - Form tokens bound to the user name or a claims fingerprint
//! - ✅ **Sealed Tokens** - AES-256-GCM (default) or HMAC-SHA256 data protection
//! - ✅ **Key Rotation** - Retired keys keep validating previously issued tokens
//! - ✅ **SSL Policy** - Optional hard gate against plaintext requests
//! - ✅ **Additional Data** - Pluggable extra data bound into form tokens
//!
//! ## Quick Start
//!
//! ```rust
//! use armature_antiforgery::{AntiForgery, AntiForgeryConfig, RequestContext};
//! use armature_antiforgery::protection::generate_key;
//!
//! let antiforgery = AntiForgery::with_aes_key(AntiForgeryConfig::default(), &generate_key()).unwrap();
//!
//! // Rendering a form
//! let request = http::Request::get("http://localhost/form").body(Vec::new()).unwrap();
//! let mut ctx = RequestContext::new(request);
//! let hidden_input = antiforgery.issue_for_render(&mut ctx).unwrap();
//!
//! assert!(hidden_input.contains("__RequestVerificationToken"));
//! assert_eq!(ctx.response_cookies().len(), 1);
//! ```
//!
//! ## Token Pairs for API Clients
//!
//! ```rust
//! use armature_antiforgery::{AntiForgery, AntiForgeryConfig, RequestContext};
//! use armature_antiforgery::protection::generate_key;
//!
//! let antiforgery = AntiForgery::with_aes_key(AntiForgeryConfig::default(), &generate_key()).unwrap();
//! let ctx = RequestContext::new(http::Request::get("http://localhost/").body(Vec::new()).unwrap());
//!
//! let issued = antiforgery.issue_token_pair(&ctx, None).unwrap();
//! let cookie = issued.new_cookie_token.expect("no cookie was supplied, so one is minted");
//!
//! assert!(antiforgery
//!     .validate_explicit(&ctx, Some(&cookie), Some(&issued.form_token))
//!     .is_ok());
//! ```
//!
//! ## Handling Failures
//!
//! ```ignore
//! match antiforgery.validate_from_request(&ctx) {
//!     Ok(()) => { /* process the form */ }
//!     Err(e) => {
//!         // e.failure() carries the precise reason for logs;
//!         // end users only ever see e.public_message().
//!         return HttpResponse::new(e.status_code()).with_body(e.public_message().into());
//!     }
//! }
//! ```

pub mod binary_blob;
pub mod claims;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod protection;
pub mod provider;
pub mod serializer;
pub mod store;
pub mod token;
pub mod worker;

pub use binary_blob::BinaryBlob;
pub use claims::{ClaimUidExtractor, DefaultClaimUidExtractor};
pub use config::{AdditionalDataProvider, AntiForgeryConfig, SameSite};
pub use context::{HttpContext, RequestContext, ResponseCookie};
pub use error::{AntiForgeryError, Result, TokenDecodeError, ValidationFailure};
pub use identity::{Claim, ClaimsIdentity};
pub use protection::{AesGcmDataProtector, DataProtector, HmacDataProtector};
pub use provider::{TokenGenerator, TokenProvider, TokenValidator};
pub use serializer::{DefaultTokenSerializer, TokenSerializer};
pub use store::{DefaultTokenStore, TokenStore};
pub use token::{AntiForgeryToken, AntiForgeryTokenSet};
pub use worker::{AntiForgeryWorker, IssuedTokens};

use std::sync::Arc;

/// Wires the default collaborators into an [`AntiForgeryWorker`].
#[derive(Debug)]
pub struct AntiForgery;

impl AntiForgery {
    /// Build a worker with the default extractor, provider, serializer and
    /// store around `protector`.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(
        config: AntiForgeryConfig,
        protector: Arc<dyn DataProtector>,
    ) -> Result<AntiForgeryWorker> {
        let config = Arc::new(config);
        let serializer: Arc<dyn TokenSerializer> = Arc::new(DefaultTokenSerializer::new(protector));
        let store = Arc::new(DefaultTokenStore::new(config.clone(), serializer.clone()));
        let provider = Arc::new(TokenProvider::new(
            config.clone(),
            Arc::new(DefaultClaimUidExtractor::new()),
        ));

        AntiForgeryWorker::new(config, serializer, store, provider.clone(), provider)
    }

    /// Build a worker sealing tokens with AES-256-GCM under key id 1.
    pub fn with_aes_key(config: AntiForgeryConfig, key: &[u8]) -> Result<AntiForgeryWorker> {
        let protector = AesGcmDataProtector::new(1, key)?;
        Self::new(config, Arc::new(protector))
    }
}
