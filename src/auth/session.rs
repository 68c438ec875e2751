//! # Session Authenticator
//!
//! Opaque session ids bound to an HMAC-signed cookie. Validation is
//! cache-fronted under the `session:` namespace; the source of truth is the
//! `sessions` table. Sliding renewal extends the absolute expiry once less
//! than half the lifetime remains and flags the session `fresh` so the
//! pipeline re-issues the cookie.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::keys::{CachedSession, SessionKey};
use crate::cache::{CacheClient, CacheKey};
use crate::error::{AppError, AppResult};
use crate::models::{Principal, SessionRecord};

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying the signed session id.
pub const SESSION_COOKIE: &str = "kollab_session";

/// A validated session plus its principal.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    /// The session row (post-renewal when `fresh`)
    pub session: SessionRecord,
    /// The owning principal
    pub principal: Principal,
    /// Set when sliding renewal extended the expiry this request
    pub fresh: bool,
}

/// Whether a session is inside the sliding-renewal window.
fn needs_renewal(session: &SessionRecord, now: DateTime<Utc>, lifetime: ChronoDuration) -> bool {
    session.expires_at - now < lifetime / 2
}

/// Session lifecycle manager.
pub struct SessionManager {
    db: PgPool,
    cache: Arc<CacheClient>,
    secret: Vec<u8>,
    lifetime: ChronoDuration,
    secure_cookies: bool,
}

impl SessionManager {
    /// Create a manager with the configured HMAC secret and lifetime.
    pub fn new(
        db: PgPool,
        cache: Arc<CacheClient>,
        secret: &str,
        expiry_days: u32,
        secure_cookies: bool,
    ) -> Self {
        Self {
            db,
            cache,
            secret: secret.as_bytes().to_vec(),
            lifetime: ChronoDuration::days(i64::from(expiry_days)),
            secure_cookies,
        }
    }

    // ------------------------------------------------------------------
    // Cookie codec
    // ------------------------------------------------------------------

    fn sign(&self, session_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(session_id.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// `{id}.{signature}` cookie value for a session id.
    pub fn cookie_value(&self, session_id: &str) -> String {
        format!("{}.{}", session_id, self.sign(session_id))
    }

    /// Verify a cookie value and extract the session id. Signature
    /// comparison is constant time via HMAC verification.
    pub fn parse_cookie_value(&self, value: &str) -> Option<String> {
        let (id, signature) = value.split_once('.')?;
        let expected = URL_SAFE_NO_PAD.decode(signature).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(id.as_bytes());
        mac.verify_slice(&expected).ok()?;
        Some(id.to_string())
    }

    /// Render the session Set-Cookie header value.
    pub fn build_cookie(&self, session_id: &str) -> String {
        let max_age = self.lifetime.num_seconds();
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Strict",
            SESSION_COOKIE,
            self.cookie_value(session_id),
            max_age
        );
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Render a blank, immediately-expiring session cookie.
    pub fn blank_cookie(&self) -> String {
        format!(
            "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Strict",
            SESSION_COOKIE
        )
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a session for `principal` and return the row.
    pub async fn create(&self, principal: &Principal) -> AppResult<SessionRecord> {
        let mut id_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let id = URL_SAFE_NO_PAD.encode(id_bytes);

        let now = Utc::now();
        let session = sqlx::query_as::<_, SessionRecord>(
            "INSERT INTO sessions (id, principal_id, created_at, expires_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, principal_id, created_at, expires_at",
        )
        .bind(&id)
        .bind(principal.id)
        .bind(now)
        .bind(now + self.lifetime)
        .fetch_one(&self.db)
        .await?;

        self.cache_session(&session, principal).await;
        Ok(session)
    }

    /// Validate a raw cookie value into a session + principal.
    ///
    /// A session exactly at its absolute expiry is rejected.
    pub async fn validate(&self, cookie_value: &str) -> AppResult<AuthenticatedSession> {
        let id = self
            .parse_cookie_value(cookie_value)
            .ok_or_else(|| AppError::unauthenticated("Invalid session cookie"))?;

        let now = Utc::now();
        let cached = self.cache.get(&SessionKey(&id)).await;

        let (session, principal) = match cached {
            Some(cached) => (cached.session, cached.principal),
            None => {
                let session = sqlx::query_as::<_, SessionRecord>(
                    "SELECT id, principal_id, created_at, expires_at FROM sessions WHERE id = $1",
                )
                .bind(&id)
                .fetch_optional(&self.db)
                .await?
                .ok_or_else(|| AppError::unauthenticated("Session not found"))?;

                let principal = sqlx::query_as::<_, Principal>(
                    "SELECT id, email, name, password_hash, created_at \
                     FROM principals WHERE id = $1",
                )
                .bind(session.principal_id)
                .fetch_optional(&self.db)
                .await?
                .ok_or_else(|| AppError::unauthenticated("Principal no longer exists"))?;

                self.cache_session(&session, &principal).await;
                (session, principal)
            }
        };

        if !session.is_valid_at(now) {
            let _ = self.cache.delete(&SessionKey(&session.id).render()).await;
            return Err(AppError::unauthenticated("Session expired"));
        }

        if needs_renewal(&session, now, self.lifetime) {
            let renewed = self.renew(&session).await?;
            return Ok(AuthenticatedSession {
                session: renewed,
                principal,
                fresh: true,
            });
        }

        Ok(AuthenticatedSession {
            session,
            principal,
            fresh: false,
        })
    }

    /// Extend a session's absolute expiry. The `session:` cache entry is
    /// invalidated so replicas observe the new expiry.
    async fn renew(&self, session: &SessionRecord) -> AppResult<SessionRecord> {
        let renewed = sqlx::query_as::<_, SessionRecord>(
            "UPDATE sessions SET expires_at = $1 WHERE id = $2 \
             RETURNING id, principal_id, created_at, expires_at",
        )
        .bind(Utc::now() + self.lifetime)
        .bind(&session.id)
        .fetch_one(&self.db)
        .await?;

        let _ = self.cache.delete(&SessionKey(&session.id).render()).await;
        Ok(renewed)
    }

    /// Destroy one session (logout).
    pub async fn destroy(&self, session_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.db)
            .await?;
        let _ = self.cache.delete(&SessionKey(session_id).render()).await;
        Ok(())
    }

    /// Destroy every session a principal holds (invalidate-all).
    pub async fn destroy_all(&self, principal_id: uuid::Uuid) -> AppResult<u64> {
        let ids: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM sessions WHERE principal_id = $1")
                .bind(principal_id)
                .fetch_all(&self.db)
                .await?;

        let removed = sqlx::query("DELETE FROM sessions WHERE principal_id = $1")
            .bind(principal_id)
            .execute(&self.db)
            .await?
            .rows_affected();

        for (id,) in ids {
            let _ = self.cache.delete(&SessionKey(&id).render()).await;
        }
        Ok(removed)
    }

    async fn cache_session(&self, session: &SessionRecord, principal: &Principal) {
        let remaining = (session.expires_at - Utc::now()).to_std().unwrap_or_default();
        if remaining.is_zero() {
            return;
        }
        let ttl = remaining.min(SessionKey::TTL);
        let value = CachedSession {
            session: session.clone(),
            principal: principal.clone(),
        };
        let _ = self
            .cache
            .set_with_ttl(&SessionKey(&session.id), &value, ttl)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn manager() -> SessionManager {
        SessionManager::new(
            PgPool::connect_lazy("postgres://localhost/kollab_test").unwrap(),
            Arc::new(CacheClient::in_memory()),
            "test-secret-material-16+",
            30,
            false,
        )
    }

    fn session_expiring_in(days: i64) -> SessionRecord {
        SessionRecord {
            id: "sid".to_string(),
            principal_id: Uuid::new_v4(),
            created_at: Utc::now(),
            expires_at: Utc::now() + ChronoDuration::days(days),
        }
    }

    #[tokio::test]
    async fn test_cookie_round_trip() {
        let mgr = manager();
        let value = mgr.cookie_value("abc123");
        assert_eq!(mgr.parse_cookie_value(&value), Some("abc123".to_string()));
    }

    #[tokio::test]
    async fn test_tampered_cookie_rejected() {
        let mgr = manager();
        let value = mgr.cookie_value("abc123");
        let forged = value.replacen("abc123", "abc124", 1);
        assert_eq!(mgr.parse_cookie_value(&forged), None);
        assert_eq!(mgr.parse_cookie_value("no-signature"), None);
        assert_eq!(mgr.parse_cookie_value(""), None);
    }

    #[test]
    fn test_renewal_window() {
        let lifetime = ChronoDuration::days(30);
        // 20 days left of 30: outside the window.
        assert!(!needs_renewal(&session_expiring_in(20), Utc::now(), lifetime));
        // 10 days left: inside.
        assert!(needs_renewal(&session_expiring_in(10), Utc::now(), lifetime));
    }

    #[tokio::test]
    async fn test_blank_cookie_expires_immediately() {
        let cookie = manager().blank_cookie();
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.starts_with("kollab_session=;"));
    }
}
