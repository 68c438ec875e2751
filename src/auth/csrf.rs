//! CSRF token issuance and validation.
//!
//! Cookie-bound 32-byte random tokens with a fixed 7-day lifetime. The
//! token is also surfaced through a response header at issuance so clients
//! can echo it back; validation compares cookie and request header in
//! constant time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

/// Cookie carrying the token.
pub const CSRF_COOKIE: &str = "kollab_csrf";
/// Request/response header carrying the token.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Fixed cookie lifetime in seconds (7 days).
pub const CSRF_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Paths exempt from validation (they establish the session or must stay
/// reachable without one).
const EXEMPT_PATHS: &[&str] = &["/api/auth/login", "/api/auth/register", "/health"];

/// Generate a fresh 32-byte token.
pub fn issue_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time token comparison.
pub fn tokens_match(cookie_token: &str, header_token: &str) -> bool {
    ring::constant_time::verify_slices_are_equal(
        cookie_token.as_bytes(),
        header_token.as_bytes(),
    )
    .is_ok()
}

/// Whether a path is exempt from CSRF validation.
pub fn is_exempt(path: &str) -> bool {
    EXEMPT_PATHS.iter().any(|p| path.starts_with(p))
}

/// Render the Set-Cookie value for a token.
pub fn build_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Strict",
        CSRF_COOKIE, token, CSRF_TTL_SECS
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_urlsafe() {
        let a = issue_token();
        let b = issue_token();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_match_discipline() {
        let token = issue_token();
        assert!(tokens_match(&token, &token));
        assert!(!tokens_match(&token, &issue_token()));
        assert!(!tokens_match(&token, ""));
    }

    #[test]
    fn test_exemptions() {
        assert!(is_exempt("/api/auth/login"));
        assert!(is_exempt("/api/auth/register"));
        assert!(is_exempt("/health/ready"));
        assert!(!is_exempt("/api/documents"));
    }

    #[test]
    fn test_cookie_attributes() {
        let cookie = build_cookie("tok", true);
        assert!(cookie.starts_with("kollab_csrf=tok"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains(&format!("Max-Age={}", CSRF_TTL_SECS)));

        let dev_cookie = build_cookie("tok", false);
        assert!(!dev_cookie.contains("Secure"));
    }
}
