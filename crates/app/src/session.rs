use std::time::Duration;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use uni_apply_core::types::{Role, UserAccount};

pub const SESSION_COOKIE: &str = "session";

/// Claims carried by the signed session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and validates HS256 session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
    secure_cookie: bool,
}

impl SessionKeys {
    pub fn new(secret: &[u8], ttl: Duration, secure_cookie: bool) -> Self {
        // Expiry is checked against the application clock in `validate`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
            secure_cookie,
        }
    }

    pub fn issue(&self, account: &UserAccount, now: DateTime<Utc>) -> Result<String, SessionError> {
        let claims = SessionClaims {
            sub: account.id.clone(),
            email: account.email.clone(),
            roles: account.roles.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + self.ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| SessionError::Encode(err.to_string()))
    }

    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| SessionError::Invalid(err.to_string()))?;
        let claims = data.claims;
        if now.timestamp() >= claims.exp {
            return Err(SessionError::Expired);
        }
        if claims.sub.is_empty() {
            return Err(SessionError::Invalid("empty_subject".to_string()));
        }
        Ok(claims)
    }

    /// `Set-Cookie` value that stores the session token.
    pub fn cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.ttl.as_secs()
        );
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value that removes the session cookie.
    pub fn clearing_cookie(&self) -> String {
        let mut cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Reads the session token from `Authorization: Bearer` or the session cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
    {
        return Some(token);
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value)
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session token: {0}")]
    Invalid(String),
    #[error("session expired")]
    Expired,
    #[error("failed to sign session token: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Duration as ChronoDuration;

    fn keys() -> SessionKeys {
        SessionKeys::new(b"test-session-secret", Duration::from_secs(3600), false)
    }

    fn account() -> UserAccount {
        UserAccount {
            id: "user-1".to_string(),
            email: "student@example.com".to_string(),
            email_confirmed: true,
            roles: vec![Role::Student],
        }
    }

    #[test]
    fn issued_tokens_validate() {
        let now = Utc::now();
        let token = keys().issue(&account(), now).unwrap();
        let claims = keys().validate(&token, now).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.roles, vec![Role::Student]);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let now = Utc::now();
        let token = keys().issue(&account(), now).unwrap();
        let later = now + ChronoDuration::seconds(3600);
        assert!(matches!(
            keys().validate(&token, later),
            Err(SessionError::Expired)
        ));
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let now = Utc::now();
        let other = SessionKeys::new(b"another-secret", Duration::from_secs(60), false);
        let token = other.issue(&account(), now).unwrap();
        assert!(matches!(
            keys().validate(&token, now),
            Err(SessionError::Invalid(_))
        ));
    }

    #[test]
    fn reads_bearer_before_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=from-cookie"),
        );
        assert_eq!(token_from_headers(&headers), Some("from-cookie"));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(token_from_headers(&headers), Some("from-header"));
    }

    #[test]
    fn empty_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(token_from_headers(&headers), None);
    }

    #[test]
    fn secure_flag_follows_configuration() {
        let secure = SessionKeys::new(b"secret", Duration::from_secs(60), true);
        assert!(secure.cookie("abc").ends_with("; Secure"));
        assert!(!keys().cookie("abc").contains("Secure"));
        assert!(keys().clearing_cookie().contains("Max-Age=0"));
    }
}
