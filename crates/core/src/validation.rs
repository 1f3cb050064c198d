//! Boundary validation for submitted forms.
//!
//! Forms arrive as raw strings so that a malformed submission can be echoed
//! back to the caller together with per-field messages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Application, ApplicationId, ApplicationStatus, UniversityId};

pub const MIN_PASSWORD_LEN: usize = 6;

/// A single problem with a submitted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Collection of field errors produced while validating a form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.iter().any(|error| error.field == field)
    }

    fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Credentials submitted to register a new account.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl Registration {
    /// Validates the address shape and the password policy, returning the normalized email.
    pub fn validate(&self) -> Result<String, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        let email = normalize_email(&self.email);
        if !looks_like_email(&email) {
            errors.push("email", "must be a valid email address");
        }
        for message in password_policy_violations(&self.password) {
            errors.push("password", message);
        }
        errors.into_result(email)
    }
}

/// Lower-cases and trims an email address for lookups.
pub fn normalize_email(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !value.chars().any(char::is_whitespace)
}

/// Lists the password policy rules the candidate breaks.
///
/// Digits, an uppercase and a lowercase letter are required; symbols are not.
pub fn password_policy_violations(password: &str) -> Vec<&'static str> {
    let mut violations = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LEN {
        violations.push("must be at least 6 characters long");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push("must contain a digit");
    }
    if !password.chars().any(char::is_uppercase) {
        violations.push("must contain an uppercase letter");
    }
    if !password.chars().any(char::is_lowercase) {
        violations.push("must contain a lowercase letter");
    }
    violations
}

/// University fields as submitted by an administrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversityForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
}

/// Validated data required to create a university.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUniversity {
    pub name: String,
    pub location: Option<String>,
    pub description: Option<String>,
}

impl UniversityForm {
    pub fn validate(&self) -> Result<NewUniversity, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        let name = self.name.trim();
        if name.is_empty() {
            errors.push("name", "is required");
        }
        errors.into_result(NewUniversity {
            name: name.to_string(),
            location: non_blank(&self.location),
            description: non_blank(&self.description),
        })
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Application record as submitted through the edit form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationForm {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub university_id: String,
    #[serde(default)]
    pub application_date: String,
    #[serde(default)]
    pub status: String,
}

impl ApplicationForm {
    /// Pre-fills the form from a stored record.
    pub fn from_application(application: &Application) -> Self {
        Self {
            id: application.id.to_string(),
            user_id: application.user_id.clone(),
            university_id: application.university_id.to_string(),
            application_date: application.application_date.to_rfc3339(),
            status: application.status.as_str().to_string(),
        }
    }

    /// Returns the record id carried by the form, if it parses.
    pub fn submitted_id(&self) -> Option<ApplicationId> {
        self.id.trim().parse().ok()
    }

    /// Validates every field and builds the full replacement record.
    ///
    /// The id is not checked here; callers compare [`Self::submitted_id`]
    /// against the addressed record first.
    pub fn validate(&self, id: ApplicationId) -> Result<Application, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let user_id = self.user_id.trim();
        if user_id.is_empty() {
            errors.push("user_id", "is required");
        }

        let university_id = match self.university_id.trim().parse::<UniversityId>() {
            Ok(value) if value > 0 => value,
            _ => {
                errors.push("university_id", "must be a positive integer");
                0
            }
        };

        let application_date = match DateTime::parse_from_rfc3339(self.application_date.trim()) {
            Ok(value) => value.with_timezone(&Utc),
            Err(_) => {
                errors.push("application_date", "must be an RFC 3339 timestamp");
                DateTime::<Utc>::MIN_UTC
            }
        };

        let status = match self.status.parse::<ApplicationStatus>() {
            Ok(status) => status,
            Err(err) => {
                errors.push("status", err.to_string());
                ApplicationStatus::default()
            }
        };

        errors.into_result(Application {
            id,
            user_id: user_id.to_string(),
            university_id,
            application_date,
            status,
        })
    }
}
