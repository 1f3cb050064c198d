use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use thiserror::Error;

use uni_apply_core::types::{
    Application, ApplicationId, ApplicationStatus, Role, University, UniversityId, UnknownStatus,
};
use uni_apply_core::validation::NewUniversity;

const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Foreign keys are enforced on every pooled connection.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(5000));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for the identity store (users, roles, role assignments).
    pub fn users(&self) -> UserRepository {
        UserRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for university records.
    pub fn universities(&self) -> UniversityRepository {
        UniversityRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for application records.
    pub fn applications(&self) -> ApplicationRepository {
        ApplicationRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Constraint {
    Unique,
    ForeignKey,
}

fn violated_constraint(err: &sqlx::Error) -> Option<Constraint> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    match db_err.code().as_deref() {
        Some(SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY) => Some(Constraint::Unique),
        Some(SQLITE_CONSTRAINT_FOREIGNKEY) => Some(Constraint::ForeignKey),
        _ => None,
    }
}

/// Repository backing the identity store.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Creates the role when missing. Returns `true` if a row was inserted.
    pub async fn ensure_role(&self, role: Role) -> Result<bool, UserError> {
        let result = sqlx::query("INSERT OR IGNORE INTO roles (name) VALUES (?)")
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Inserts a user and assigns the given role in a single transaction.
    pub async fn create_with_role(&self, user: &NewUser<'_>, role: Role) -> Result<(), UserError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, email_confirmed, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.id)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.email_confirmed)
        .bind(to_rfc3339(user.created_at))
        .execute(&mut *tx)
        .await
        .map_err(|err| match violated_constraint(&err) {
            Some(Constraint::Unique) => UserError::DuplicateEmail,
            _ => UserError::Database(err),
        })?;

        sqlx::query("INSERT INTO user_roles (user_id, role_name) VALUES (?, ?)")
            .bind(user.id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|err| match violated_constraint(&err) {
                Some(Constraint::ForeignKey) => UserError::MissingRole(role),
                _ => UserError::Database(err),
            })?;

        tx.commit().await?;
        Ok(())
    }

    /// Loads the credentials for an email address (case-insensitive).
    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserCredentials>, UserError> {
        let row = sqlx::query_as::<_, UserCredentials>(
            "SELECT id, email, password_hash, email_confirmed FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Lists the roles assigned to a user, ignoring names the domain does not know.
    pub async fn roles_for(&self, user_id: &str) -> Result<Vec<Role>, UserError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT role_name FROM user_roles WHERE user_id = ? ORDER BY role_name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names.iter().filter_map(|name| Role::parse(name)).collect())
    }
}

/// Data required to create a user.
pub struct NewUser<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub email_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

/// Stored credentials used during login.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserCredentials {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub email_confirmed: bool,
}

/// Errors raised by the identity store.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("a user with this email already exists")]
    DuplicateEmail,
    #[error("role {0} has not been created")]
    MissingRole(Role),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for university records.
#[derive(Clone)]
pub struct UniversityRepository {
    pool: SqlitePool,
}

impl UniversityRepository {
    /// Lists every university ordered by id.
    pub async fn list(&self) -> Result<Vec<University>, UniversityError> {
        let rows = sqlx::query_as::<_, UniversityRow>(
            "SELECT id, name, location, description FROM universities ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(University::from).collect())
    }

    /// Loads a university by id.
    pub async fn fetch(&self, id: UniversityId) -> Result<Option<University>, UniversityError> {
        let row = sqlx::query_as::<_, UniversityRow>(
            "SELECT id, name, location, description FROM universities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(University::from))
    }

    /// Inserts a university and returns the stored record.
    pub async fn insert(&self, university: &NewUniversity) -> Result<University, UniversityError> {
        let result =
            sqlx::query("INSERT INTO universities (name, location, description) VALUES (?, ?, ?)")
                .bind(&university.name)
                .bind(&university.location)
                .bind(&university.description)
                .execute(&self.pool)
                .await?;

        Ok(University {
            id: result.last_insert_rowid(),
            name: university.name.clone(),
            location: university.location.clone(),
            description: university.description.clone(),
        })
    }

    /// Deletes a university unless applications still reference it.
    pub async fn delete_restricted(&self, id: UniversityId) -> Result<(), UniversityError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM universities WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(UniversityError::NotFound);
        }

        let references: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM applications WHERE university_id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if references > 0 {
            return Err(UniversityError::HasApplications(references as u64));
        }

        sqlx::query("DELETE FROM universities WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|err| match violated_constraint(&err) {
                Some(Constraint::ForeignKey) => UniversityError::HasApplications(1),
                _ => UniversityError::Database(err),
            })?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UniversityRow {
    id: i64,
    name: String,
    location: Option<String>,
    description: Option<String>,
}

impl From<UniversityRow> for University {
    fn from(row: UniversityRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            location: row.location,
            description: row.description,
        }
    }
}

/// Errors raised while reading or mutating universities.
#[derive(Debug, Error)]
pub enum UniversityError {
    #[error("university not found")]
    NotFound,
    #[error("university is referenced by {0} application(s)")]
    HasApplications(u64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for application records.
#[derive(Clone)]
pub struct ApplicationRepository {
    pool: SqlitePool,
}

impl ApplicationRepository {
    /// Returns `true` when the user already applied to the university.
    pub async fn exists_for(
        &self,
        user_id: &str,
        university_id: UniversityId,
    ) -> Result<bool, ApplicationStoreError> {
        let row = sqlx::query("SELECT 1 FROM applications WHERE user_id = ? AND university_id = ?")
            .bind(user_id)
            .bind(university_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Inserts a new application.
    ///
    /// A second application for the same `(user, university)` pair is reported
    /// as [`ApplicationInsertOutcome::Duplicate`] rather than an error.
    pub async fn insert(
        &self,
        record: &NewApplication<'_>,
    ) -> Result<ApplicationInsertOutcome, ApplicationStoreError> {
        let result = sqlx::query(
            "INSERT INTO applications (user_id, university_id, application_date, status) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(record.user_id)
        .bind(record.university_id)
        .bind(to_rfc3339(record.application_date))
        .bind(record.status.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(ApplicationInsertOutcome::Inserted(Application {
                id: done.last_insert_rowid(),
                user_id: record.user_id.to_string(),
                university_id: record.university_id,
                application_date: record.application_date,
                status: record.status,
            })),
            Err(err) => match violated_constraint(&err) {
                Some(Constraint::Unique) => Ok(ApplicationInsertOutcome::Duplicate),
                Some(Constraint::ForeignKey) => Err(ApplicationStoreError::MissingReference),
                None => Err(ApplicationStoreError::Database(err)),
            },
        }
    }

    /// Lists every application ordered by id.
    pub async fn list_all(&self) -> Result<Vec<Application>, ApplicationStoreError> {
        let rows = sqlx::query_as::<_, ApplicationRow>(
            "SELECT id, user_id, university_id, application_date, status \
             FROM applications ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ApplicationRow::into_domain).collect()
    }

    /// Lists the applications owned by a user ordered by id.
    pub async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Application>, ApplicationStoreError> {
        let rows = sqlx::query_as::<_, ApplicationRow>(
            "SELECT id, user_id, university_id, application_date, status \
             FROM applications WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ApplicationRow::into_domain).collect()
    }

    /// Loads a single application.
    pub async fn fetch(
        &self,
        id: ApplicationId,
    ) -> Result<Option<Application>, ApplicationStoreError> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            "SELECT id, user_id, university_id, application_date, status \
             FROM applications WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ApplicationRow::into_domain).transpose()
    }

    /// Overwrites every column of an existing application. Returns `false` when no row matched.
    pub async fn update(&self, application: &Application) -> Result<bool, ApplicationStoreError> {
        let result = sqlx::query(
            "UPDATE applications \
             SET user_id = ?, university_id = ?, application_date = ?, status = ? \
             WHERE id = ?",
        )
        .bind(&application.user_id)
        .bind(application.university_id)
        .bind(to_rfc3339(application.application_date))
        .bind(application.status.as_str())
        .bind(application.id)
        .execute(&self.pool)
        .await
        .map_err(|err| match violated_constraint(&err) {
            Some(Constraint::Unique) => ApplicationStoreError::DuplicatePair,
            Some(Constraint::ForeignKey) => ApplicationStoreError::MissingReference,
            None => ApplicationStoreError::Database(err),
        })?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes an application. Returns `false` when no row matched.
    pub async fn delete(&self, id: ApplicationId) -> Result<bool, ApplicationStoreError> {
        let result = sqlx::query("DELETE FROM applications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Parameters required to insert an application.
pub struct NewApplication<'a> {
    pub user_id: &'a str,
    pub university_id: UniversityId,
    pub application_date: DateTime<Utc>,
    pub status: ApplicationStatus,
}

/// Result of attempting to insert an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationInsertOutcome {
    Inserted(Application),
    Duplicate,
}

#[derive(Debug, sqlx::FromRow)]
struct ApplicationRow {
    id: i64,
    user_id: String,
    university_id: i64,
    application_date: DateTime<Utc>,
    status: String,
}

impl ApplicationRow {
    fn into_domain(self) -> Result<Application, ApplicationStoreError> {
        let status = self.status.parse::<ApplicationStatus>()?;
        Ok(Application {
            id: self.id,
            user_id: self.user_id,
            university_id: self.university_id,
            application_date: self.application_date,
            status,
        })
    }
}

/// Errors raised while reading or mutating applications.
#[derive(Debug, Error)]
pub enum ApplicationStoreError {
    #[error("another application already exists for this user and university")]
    DuplicatePair,
    #[error("referenced user or university does not exist")]
    MissingReference,
    #[error("stored row has an invalid status: {0}")]
    InvalidStatus(#[from] UnknownStatus),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
