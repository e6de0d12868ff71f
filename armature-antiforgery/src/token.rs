use crate::binary_blob::BinaryBlob;
use crate::error::{AntiForgeryError, Result};

/// One half of an anti-forgery token pair.
///
/// A cookie (session) token carries only the security token. A form token
/// shares the cookie token's security token and may be bound to the current
/// user by name or by claim UID, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntiForgeryToken {
    security_token: BinaryBlob,
    is_session_token: bool,
    username: String,
    claim_uid: Option<BinaryBlob>,
    additional_data: String,
}

impl AntiForgeryToken {
    /// A new cookie token with a fresh random security token.
    pub fn new_cookie_token() -> Self {
        Self::cookie_token(BinaryBlob::new_security_token())
    }

    /// A cookie token around an existing security token.
    pub fn cookie_token(security_token: BinaryBlob) -> Self {
        Self {
            security_token,
            is_session_token: true,
            username: String::new(),
            claim_uid: None,
            additional_data: String::new(),
        }
    }

    /// An unbound form token sharing `security_token`.
    pub fn form_token(security_token: BinaryBlob) -> Self {
        Self {
            security_token,
            is_session_token: false,
            username: String::new(),
            claim_uid: None,
            additional_data: String::new(),
        }
    }

    /// Bind to a user name. Clears any claim UID.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self.claim_uid = None;
        self
    }

    /// Bind to a claim UID. Clears any user name.
    pub fn with_claim_uid(mut self, claim_uid: BinaryBlob) -> Self {
        self.claim_uid = Some(claim_uid);
        self.username.clear();
        self
    }

    pub fn with_additional_data(mut self, additional_data: impl Into<String>) -> Self {
        self.additional_data = additional_data.into();
        self
    }

    pub fn security_token(&self) -> &BinaryBlob {
        &self.security_token
    }

    pub fn is_session_token(&self) -> bool {
        self.is_session_token
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn claim_uid(&self) -> Option<&BinaryBlob> {
        self.claim_uid.as_ref()
    }

    pub fn additional_data(&self) -> &str {
        &self.additional_data
    }

    /// Whether the token is bound to a claims identity rather than a name.
    pub fn is_claims_based(&self) -> bool {
        self.claim_uid.is_some()
    }
}

/// A serialized form token together with its serialized cookie token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntiForgeryTokenSet {
    form_token: String,
    cookie_token: String,
}

impl AntiForgeryTokenSet {
    /// Create a token set. Both halves must be non-empty.
    pub fn new(form_token: impl Into<String>, cookie_token: impl Into<String>) -> Result<Self> {
        let form_token = form_token.into();
        let cookie_token = cookie_token.into();

        if form_token.is_empty() {
            return Err(AntiForgeryError::InvalidArgument(
                "form token must not be empty".to_string(),
            ));
        }
        if cookie_token.is_empty() {
            return Err(AntiForgeryError::InvalidArgument(
                "cookie token must not be empty".to_string(),
            ));
        }

        Ok(Self {
            form_token,
            cookie_token,
        })
    }

    pub fn form_token(&self) -> &str {
        &self.form_token
    }

    pub fn cookie_token(&self) -> &str {
        &self.cookie_token
    }
}
