//! Test doubles for the greeting service dependency.
//!
//! - [`stub::StubServer`] stands in for the external greeting service.
//! - [`process::ProcessHarness`] runs the real service as a separate process.

pub mod process;
pub mod stub;

use axum::http::Method;

use self::stub::{RequestMatcher, StubError, StubResponse, StubServer};

/// Body the greeting stub answers `GET /helloext` with.
pub const GREETING_STUB_BODY: &str = "Hi ";

/// Priority of the catch-all proxy rule installed by [`greeting_stub`].
pub const PROXY_FALLBACK_PRIORITY: u32 = 10;

/// Stub server for the greeting service: `GET /helloext` answers
/// [`GREETING_STUB_BODY`] and every other request is proxied to `upstream`.
/// The server is returned unstarted.
pub fn greeting_stub(upstream: &str) -> Result<StubServer, StubError> {
    let server = StubServer::new();

    server.register(
        RequestMatcher::exact("/helloext").method(Method::GET),
        StubResponse::text(GREETING_STUB_BODY),
    );
    server.register_with_priority(
        RequestMatcher::pattern(".*")?.method(Method::GET),
        StubResponse::proxied_from(upstream)?,
        PROXY_FALLBACK_PRIORITY,
    );

    Ok(server)
}
