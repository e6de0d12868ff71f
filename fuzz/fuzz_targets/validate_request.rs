//! Fuzz target for request validation.
//!
//! Builds requests with arbitrary cookie headers, bodies and identities and
//! checks that validation only ever returns validation failures.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

use armature_antiforgery::{
    AntiForgery, AntiForgeryConfig, AntiForgeryWorker, ClaimsIdentity, RequestContext,
};

/// Arbitrary submission for fuzzing.
#[derive(Debug, Arbitrary)]
struct FuzzSubmission {
    cookie_header: String,
    body: Vec<u8>,
    json: bool,
    user: Option<String>,
    claims: Vec<(String, String)>,
}

fn worker() -> &'static AntiForgeryWorker {
    static WORKER: OnceLock<AntiForgeryWorker> = OnceLock::new();
    WORKER.get_or_init(|| {
        let config = AntiForgeryConfig::default().with_header_name("X-CSRF-Token");
        AntiForgery::with_aes_key(config, &[3u8; 32]).unwrap()
    })
}

fuzz_target!(|data: FuzzSubmission| {
    let content_type = if data.json {
        "application/json"
    } else {
        "application/x-www-form-urlencoded"
    };

    let Ok(request) = http::Request::post("http://localhost/")
        .header(http::header::COOKIE, data.cookie_header.as_str())
        .header(http::header::CONTENT_TYPE, content_type)
        .body(data.body)
    else {
        return;
    };

    let mut ctx = RequestContext::new(request);
    if let Some(user) = data.user {
        let identity = data
            .claims
            .into_iter()
            .fold(ClaimsIdentity::authenticated("Fuzz").with_name(user), |id, (t, v)| {
                id.with_claim(t, v)
            });
        ctx = ctx.with_identity(identity);
    }

    if let Err(e) = worker().validate_from_request(&ctx) {
        assert!(e.is_validation_failure());
    }
});
