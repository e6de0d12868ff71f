//! The HTTP boundary.
//!
//! Token storage only needs a handful of request and response capabilities,
//! captured by [`HttpContext`]. Hosts implement it over their own request
//! types; [`RequestContext`] is a ready-made implementation over the `http`
//! crate.

use crate::config::SameSite;
use crate::identity::ClaimsIdentity;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Request};

/// Request and response capabilities used by the anti-forgery system.
pub trait HttpContext {
    /// Whether the request arrived over a secure transport.
    fn is_secure(&self) -> bool;

    /// The current user, if the host resolved one.
    fn identity(&self) -> Option<&ClaimsIdentity>;

    fn request_cookie(&self, name: &str) -> Option<String>;

    fn form_field(&self, name: &str) -> Option<String>;

    fn request_header(&self, name: &str) -> Option<String>;

    fn response_header(&self, name: &str) -> Option<String>;

    fn set_response_header(&mut self, name: &str, value: &str);

    fn append_response_cookie(&mut self, cookie: ResponseCookie);
}

/// A cookie to be sent with the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl ResponseCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut cookie = format!("{}={}", self.name, self.value);

        if let Some(ref path) = self.path {
            cookie.push_str(&format!("; Path={}", path));
        }

        if let Some(ref domain) = self.domain {
            cookie.push_str(&format!("; Domain={}", domain));
        }

        if self.secure {
            cookie.push_str("; Secure");
        }

        if self.http_only {
            cookie.push_str("; HttpOnly");
        }

        if let Some(same_site) = self.same_site {
            cookie.push_str(&format!("; SameSite={}", same_site.as_str()));
        }

        cookie
    }
}

/// [`HttpContext`] over an `http::Request` with a buffered body.
#[derive(Debug)]
pub struct RequestContext {
    request: Request<Vec<u8>>,
    identity: Option<ClaimsIdentity>,
    secure: bool,
    secure_cookies_by_default: bool,
    response_headers: HeaderMap,
}

impl RequestContext {
    /// Wrap a request. It counts as secure when its URI scheme is `https`.
    pub fn new(request: Request<Vec<u8>>) -> Self {
        let secure = request.uri().scheme_str() == Some("https");
        Self {
            request,
            identity: None,
            secure,
            secure_cookies_by_default: false,
            response_headers: HeaderMap::new(),
        }
    }

    pub fn with_identity(mut self, identity: ClaimsIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Mark the request secure, e.g. when TLS terminates at a trusted proxy.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Mark every response cookie `Secure` regardless of what the caller asks.
    pub fn with_secure_cookies_by_default(mut self, secure: bool) -> Self {
        self.secure_cookies_by_default = secure;
        self
    }

    pub fn request(&self) -> &Request<Vec<u8>> {
        &self.request
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// All `Set-Cookie` values queued on the response.
    pub fn response_cookies(&self) -> Vec<String> {
        self.response_headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    pub fn into_response_headers(self) -> HeaderMap {
        self.response_headers
    }
}

impl HttpContext for RequestContext {
    fn is_secure(&self) -> bool {
        self.secure
    }

    fn identity(&self) -> Option<&ClaimsIdentity> {
        self.identity.as_ref()
    }

    fn request_cookie(&self, name: &str) -> Option<String> {
        self.request
            .headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim_matches('"').to_string())
    }

    fn form_field(&self, name: &str) -> Option<String> {
        let body = self.request.body();
        if body.is_empty() {
            return None;
        }

        // JSON object first, then urlencoded.
        if let Ok(serde_json::Value::Object(json)) = serde_json::from_slice(body) {
            return json.get(name).and_then(|v| v.as_str()).map(str::to_string);
        }

        if let Ok(form_data) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            for (key, value) in form_data {
                if key == name {
                    return Some(value);
                }
            }
        }

        None
    }

    fn request_header(&self, name: &str) -> Option<String> {
        self.request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn response_header(&self, name: &str) -> Option<String> {
        self.response_headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn set_response_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.response_headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping response header with invalid name or value"),
        }
    }

    fn append_response_cookie(&mut self, mut cookie: ResponseCookie) {
        cookie.secure |= self.secure_cookies_by_default;
        match HeaderValue::from_str(&cookie.to_header_value()) {
            Ok(value) => {
                self.response_headers.append(SET_COOKIE, value);
            }
            Err(_) => tracing::warn!(cookie = %cookie.name, "Dropping cookie with invalid value"),
        }
    }
}
