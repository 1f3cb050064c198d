use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use uni_apply_core::types::Role;
use uni_apply_core::validation::{normalize_email, password_policy_violations};
use uni_apply_storage::{Database, UserError};
use uni_apply_util::AdminSeed;

use crate::auth::{create_account, AccountError};
use crate::password::PasswordHasher;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub roles_created: usize,
    pub admin_created: bool,
}

/// Ensures both roles exist and the configured admin account is present.
///
/// Safe to run on every start; existing rows are left untouched.
pub async fn seed_identity(
    database: &Database,
    passwords: &PasswordHasher,
    admin: &AdminSeed,
    now: DateTime<Utc>,
) -> Result<SeedReport, SeedError> {
    let users = database.users();
    let mut report = SeedReport::default();

    for role in Role::ALL {
        if users.ensure_role(role).await? {
            info!(stage = "seed", role = %role, "role created");
            report.roles_created += 1;
        }
    }

    let email = normalize_email(&admin.email);
    if email.is_empty() {
        return Err(SeedError::MissingAdminEmail);
    }
    if users.find_by_email(&email).await?.is_some() {
        return Ok(report);
    }

    let violations = password_policy_violations(&admin.password);
    if !violations.is_empty() {
        return Err(SeedError::WeakAdminPassword(violations.join("; ")));
    }

    match create_account(database, passwords, &email, &admin.password, Role::Admin, true, now).await {
        Ok(account) => {
            info!(stage = "seed", user_id = %account.id, email = %account.email, "admin account created");
            report.admin_created = true;
        }
        // Another instance seeded the account between the lookup and the insert.
        Err(AccountError::User(UserError::DuplicateEmail)) => {}
        Err(err) => return Err(SeedError::Account(err)),
    }

    Ok(report)
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("admin email is empty")]
    MissingAdminEmail,
    #[error("admin password does not satisfy the password policy: {0}")]
    WeakAdminPassword(String),
    #[error(transparent)]
    Account(AccountError),
    #[error(transparent)]
    Users(#[from] UserError),
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn database() -> Database {
        let database = Database::connect("sqlite::memory:").await.unwrap();
        database.run_migrations().await.unwrap();
        database
    }

    fn admin(password: &str) -> AdminSeed {
        AdminSeed {
            email: "Admin@Example.com".to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn seeds_roles_and_admin_once() {
        let database = database().await;
        let hasher = PasswordHasher::new(1_000);

        let first = seed_identity(&database, &hasher, &admin("Adm1nPass"), Utc::now())
            .await
            .unwrap();
        assert_eq!(
            first,
            SeedReport {
                roles_created: 2,
                admin_created: true
            }
        );

        let second = seed_identity(&database, &hasher, &admin("Adm1nPass"), Utc::now())
            .await
            .unwrap();
        assert_eq!(second, SeedReport::default());

        let users = database.users();
        let stored = users
            .find_by_email("admin@example.com")
            .await
            .unwrap()
            .expect("admin stored");
        assert!(stored.email_confirmed);
        assert!(hasher.verify("Adm1nPass", &stored.password_hash).unwrap());
        assert_eq!(users.roles_for(&stored.id).await.unwrap(), vec![Role::Admin]);
    }

    #[tokio::test]
    async fn existing_admin_is_not_promoted_or_rehashed() {
        let database = database().await;
        let hasher = PasswordHasher::new(1_000);
        seed_identity(&database, &hasher, &admin("Adm1nPass"), Utc::now())
            .await
            .unwrap();

        // A different configured password does not overwrite the stored one.
        seed_identity(&database, &hasher, &admin("Chang3dPass"), Utc::now())
            .await
            .unwrap();
        let stored = database
            .users()
            .find_by_email("admin@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(hasher.verify("Adm1nPass", &stored.password_hash).unwrap());
    }

    #[tokio::test]
    async fn weak_admin_password_fails_fast() {
        let database = database().await;
        let hasher = PasswordHasher::new(1_000);

        let err = seed_identity(&database, &hasher, &admin("short"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SeedError::WeakAdminPassword(_)));
        assert!(database
            .users()
            .find_by_email("admin@example.com")
            .await
            .unwrap()
            .is_none());
    }
}
