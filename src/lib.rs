// Armature - An Angular-inspired HTTP framework for Rust
//
// This package bundles Armature's anti-forgery (CSRF) protection: token pair
// issuance for rendered forms and API clients, and identity-bound validation.

// Re-export optional crates
#[cfg(feature = "antiforgery")]
pub use armature_antiforgery as antiforgery;

// Prelude for common imports
#[cfg(feature = "antiforgery")]
pub mod prelude {
    pub use crate::antiforgery::{
        AntiForgery,
        AntiForgeryConfig,
        AntiForgeryError,
        AntiForgeryTokenSet,
        AntiForgeryWorker,
        ClaimsIdentity,
        HttpContext,
        IssuedTokens,
        RequestContext,
        ValidationFailure,
    };
}
