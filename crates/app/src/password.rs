//! PBKDF2-HMAC-SHA256 password hashing.
//!
//! Encoded hashes look like `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`
//! so the work factor can be raised without invalidating stored passwords.

use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const UNKNOWN_ACCOUNT_SALT: [u8; SALT_LEN] = *b"no-such-account!";

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    /// Hashes a password with a fresh random salt.
    pub fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let derived = derive_key(password.as_bytes(), &salt, self.iterations);
        format!(
            "{SCHEME}${}${}${}",
            self.iterations,
            hex::encode(salt),
            hex::encode(derived)
        )
    }

    /// Checks a password against an encoded hash using the hash's own work factor.
    pub fn verify(&self, password: &str, encoded: &str) -> Result<bool, PasswordError> {
        let mut parts = encoded.split('$');
        let (Some(SCHEME), Some(iterations), Some(salt), Some(expected), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(PasswordError::Malformed);
        };

        let iterations: u32 = iterations.parse().map_err(|_| PasswordError::Malformed)?;
        if iterations == 0 {
            return Err(PasswordError::Malformed);
        }
        let salt = hex::decode(salt).map_err(|_| PasswordError::Malformed)?;
        let expected = hex::decode(expected).map_err(|_| PasswordError::Malformed)?;

        let derived = derive_key(password.as_bytes(), &salt, iterations);
        Ok(derived.ct_eq(expected.as_slice()).into())
    }

    /// [`Self::hash`] on the blocking pool.
    pub async fn hash_in_background(&self, password: &str) -> Result<String, PasswordError> {
        let hasher = *self;
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|_| PasswordError::Task)
    }

    /// [`Self::verify`] on the blocking pool.
    ///
    /// With no stored hash the key is still derived at the configured work
    /// factor and the answer is `false`, so unknown accounts cost the same.
    pub async fn verify_in_background(
        &self,
        password: &str,
        encoded: Option<&str>,
    ) -> Result<bool, PasswordError> {
        let hasher = *self;
        let password = password.to_owned();
        let encoded = encoded.map(str::to_owned);
        tokio::task::spawn_blocking(move || match encoded {
            Some(encoded) => hasher.verify(&password, &encoded),
            None => {
                std::hint::black_box(derive_key(
                    password.as_bytes(),
                    &UNKNOWN_ACCOUNT_SALT,
                    hasher.iterations,
                ));
                Ok(false)
            }
        })
        .await
        .map_err(|_| PasswordError::Task)?
    }
}

fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key);
    key
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("stored password hash is malformed")]
    Malformed,
    #[error("password hashing task failed")]
    Task,
}
