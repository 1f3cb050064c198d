use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Form body for actions that carry nothing but the anti-forgery token.
#[derive(Debug, Default, Deserialize)]
pub struct TokenForm {
    #[serde(default)]
    pub csrf_token: String,
}

/// Derives and checks per-user anti-forgery tokens.
#[derive(Clone)]
pub struct CsrfGuard {
    secret: Arc<[u8]>,
}

impl CsrfGuard {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: Arc::from(secret.to_vec().into_boxed_slice()),
        }
    }

    /// Returns the token a form rendered for `user_id` must echo back.
    pub fn token_for(&self, user_id: &str) -> Result<String, CsrfError> {
        Ok(hex::encode(self.digest(user_id)?))
    }

    pub fn verify(&self, user_id: &str, provided: &str) -> Result<(), CsrfError> {
        let provided = provided.trim();
        if provided.is_empty() {
            return Err(CsrfError::Missing);
        }
        let provided_bytes = hex::decode(provided).map_err(|_| CsrfError::Malformed)?;
        let expected = self.digest(user_id)?;

        if expected.as_slice().ct_eq(provided_bytes.as_slice()).into() {
            Ok(())
        } else {
            Err(CsrfError::Mismatch)
        }
    }

    fn digest(&self, user_id: &str) -> Result<Vec<u8>, CsrfError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret).map_err(|_| CsrfError::Key)?;
        mac.update(b"csrf:");
        mac.update(user_id.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CsrfError {
    #[error("anti-forgery token is missing")]
    Missing,
    #[error("anti-forgery token is not valid hex")]
    Malformed,
    #[error("anti-forgery token does not match the session")]
    Mismatch,
    #[error("failed to initialize anti-forgery key")]
    Key,
}

impl CsrfError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Missing => "csrf_missing",
            Self::Malformed => "csrf_malformed",
            Self::Mismatch => "csrf_mismatch",
            Self::Key => "csrf_key",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_bound_to_the_user() {
        let guard = CsrfGuard::new(b"secret");
        let token = guard.token_for("user-a").unwrap();
        assert_eq!(guard.verify("user-a", &token), Ok(()));
        assert_eq!(guard.verify("user-b", &token), Err(CsrfError::Mismatch));
    }

    #[test]
    fn rejects_missing_and_malformed_tokens() {
        let guard = CsrfGuard::new(b"secret");
        assert_eq!(guard.verify("user-a", "  "), Err(CsrfError::Missing));
        assert_eq!(guard.verify("user-a", "not-hex"), Err(CsrfError::Malformed));
        assert_eq!(guard.verify("user-a", "abcd"), Err(CsrfError::Mismatch));
    }

    #[test]
    fn tokens_depend_on_the_secret() {
        let a = CsrfGuard::new(b"secret-a").token_for("user").unwrap();
        let b = CsrfGuard::new(b"secret-b").token_for("user").unwrap();
        assert_ne!(a, b);
    }
}
