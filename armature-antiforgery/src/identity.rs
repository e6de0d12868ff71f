//! Claims-based identity supplied by the host.

/// Well-known claim types.
pub mod claim_types {
    pub const NAME_IDENTIFIER: &str =
        "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";
    pub const NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
    pub const EMAIL: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
    pub const ROLE: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";
}

/// A single claim about a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// The identity of the current request.
///
/// An identity is authenticated when it has a non-empty authentication type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimsIdentity {
    authentication_type: Option<String>,
    name: Option<String>,
    claims: Vec<Claim>,
}

impl ClaimsIdentity {
    /// An unauthenticated identity.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// An authenticated identity using the given scheme.
    pub fn authenticated(authentication_type: impl Into<String>) -> Self {
        Self {
            authentication_type: Some(authentication_type.into()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_claim(mut self, claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.push(Claim::new(claim_type, value));
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.authentication_type
            .as_deref()
            .is_some_and(|scheme| !scheme.is_empty())
    }

    pub fn authentication_type(&self) -> &str {
        self.authentication_type.as_deref().unwrap_or("")
    }

    /// The identity's name, or the empty string.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// First claim of the given type.
    pub fn find_first(&self, claim_type: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.claim_type == claim_type)
    }
}
