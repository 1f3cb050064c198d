use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use uni_apply_core::types::{Role, UserAccount};
use uni_apply_core::validation::{normalize_email, Registration, ValidationErrors};
use uni_apply_storage::{Database, NewUser, UserError};

use crate::csrf::TokenForm;
use crate::password::{PasswordError, PasswordHasher};
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::session::token_from_headers;

const AFTER_LOGIN_REDIRECT: &str = "/applications/mine";
const AFTER_LOGOUT_REDIRECT: &str = "/";

/// Caller identity resolved from a valid session token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub roles: Vec<Role>,
}

impl CurrentUser {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Rejects the request unless `token` is this user's anti-forgery token.
    pub fn verify_csrf(&self, state: &AppState, token: &str) -> Result<(), ProblemResponse> {
        state.csrf().verify(&self.id, token).map_err(|err| {
            counter!("auth_rejections_total", "reason" => err.reason()).increment(1);
            warn!(stage = "auth", user_id = %self.id, error = %err, "anti-forgery check failed");
            ProblemResponse::new(StatusCode::BAD_REQUEST, "invalid_csrf_token", err.to_string())
        })
    }

    pub fn csrf_token(&self, state: &AppState) -> Result<String, ProblemResponse> {
        state.csrf().token_for(&self.id).map_err(|err| {
            error!(stage = "auth", error = %err, "failed to derive anti-forgery token");
            ProblemResponse::internal("failed to derive anti-forgery token")
        })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = token_from_headers(&parts.headers) else {
            counter!("auth_rejections_total", "reason" => "missing_session").increment(1);
            return Err(ProblemResponse::new(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "sign in to continue",
            ));
        };

        let claims = state.sessions().validate(token, state.now()).map_err(|err| {
            counter!("auth_rejections_total", "reason" => "invalid_session").increment(1);
            warn!(stage = "auth", error = %err, "rejected session token");
            ProblemResponse::new(StatusCode::UNAUTHORIZED, "invalid_session", err.to_string())
        })?;

        Ok(Self {
            id: claims.sub,
            email: claims.email,
            roles: claims.roles,
        })
    }
}

/// Caller holding the `Admin` role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.has_role(Role::Admin) {
            counter!("auth_rejections_total", "reason" => "forbidden").increment(1);
            warn!(stage = "auth", user_id = %user.id, path = %parts.uri.path(), "admin role required");
            return Err(ProblemResponse::new(
                StatusCode::FORBIDDEN,
                "forbidden",
                "the Admin role is required",
            ));
        }
        Ok(Self(user))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisteredView {
    pub id: String,
    pub email: String,
    pub roles: Vec<Role>,
}

#[derive(Debug, Serialize)]
struct FormErrorsView {
    errors: ValidationErrors,
}

/// Creates a `Student` account.
pub async fn register(
    State(state): State<AppState>,
    Form(form): Form<Registration>,
) -> Result<Response, ProblemResponse> {
    let email = match form.validate() {
        Ok(email) => email,
        Err(errors) => {
            return Ok((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(FormErrorsView { errors }),
            )
                .into_response())
        }
    };

    let account = create_account(
        state.storage(),
        state.passwords(),
        &email,
        &form.password,
        Role::Student,
        false,
        state.now(),
    )
    .await
    .map_err(|err| match err {
        AccountError::User(UserError::DuplicateEmail) => ProblemResponse::new(
            StatusCode::CONFLICT,
            "email_taken",
            "an account with this email already exists",
        ),
        other => {
            error!(stage = "auth", error = %other, "failed to create account");
            ProblemResponse::internal("failed to create account")
        }
    })?;

    info!(stage = "auth", user_id = %account.id, "student account registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisteredView {
            id: account.id,
            email: account.email,
            roles: account.roles,
        }),
    )
        .into_response())
}

/// Verifies credentials and stores a session cookie.
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, ProblemResponse> {
    let email = normalize_email(&form.email);
    let users = state.storage().users();

    let credentials = users.find_by_email(&email).await.map_err(|err| {
        error!(stage = "auth", error = %err, "failed to load credentials");
        ProblemResponse::internal("failed to load credentials")
    })?;

    let stored_hash = credentials
        .as_ref()
        .map(|stored| stored.password_hash.as_str());
    let verified = state
        .passwords()
        .verify_in_background(&form.password, stored_hash)
        .await
        .unwrap_or_else(|err| {
            error!(stage = "auth", error = %err, "password verification failed");
            false
        });

    let Some(credentials) = credentials.filter(|_| verified) else {
        counter!("auth_logins_total", "result" => "rejected").increment(1);
        warn!(stage = "auth", "login rejected");
        return Err(ProblemResponse::new(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "email or password is incorrect",
        ));
    };

    let roles = users.roles_for(&credentials.id).await.map_err(|err| {
        error!(stage = "auth", error = %err, "failed to load roles");
        ProblemResponse::internal("failed to load roles")
    })?;
    let account = UserAccount {
        id: credentials.id,
        email: credentials.email,
        email_confirmed: credentials.email_confirmed,
        roles,
    };

    let token = state
        .sessions()
        .issue(&account, state.now())
        .map_err(|err| {
            error!(stage = "auth", error = %err, "failed to issue session");
            ProblemResponse::internal("failed to issue session")
        })?;

    counter!("auth_logins_total", "result" => "ok").increment(1);
    info!(stage = "auth", user_id = %account.id, "user signed in");
    Ok((
        [(header::SET_COOKIE, state.sessions().cookie(&token))],
        Redirect::to(AFTER_LOGIN_REDIRECT),
    )
        .into_response())
}

pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<TokenForm>,
) -> Result<Response, ProblemResponse> {
    user.verify_csrf(&state, &form.csrf_token)?;
    info!(stage = "auth", user_id = %user.id, email = %user.email, "user signed out");
    Ok((
        [(header::SET_COOKIE, state.sessions().clearing_cookie())],
        Redirect::to(AFTER_LOGOUT_REDIRECT),
    )
        .into_response())
}

/// Hashes the password and stores a new account with a single role.
pub async fn create_account(
    database: &Database,
    passwords: &PasswordHasher,
    email: &str,
    password: &str,
    role: Role,
    email_confirmed: bool,
    now: DateTime<Utc>,
) -> Result<UserAccount, AccountError> {
    let id = Uuid::new_v4().to_string();
    let password_hash = passwords.hash_in_background(password).await?;

    database
        .users()
        .create_with_role(
            &NewUser {
                id: &id,
                email,
                password_hash: &password_hash,
                email_confirmed,
                created_at: now,
            },
            role,
        )
        .await?;

    Ok(UserAccount {
        id,
        email: email.to_string(),
        email_confirmed,
        roles: vec![role],
    })
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("failed to hash password: {0}")]
    Hash(#[from] PasswordError),
    #[error(transparent)]
    User(#[from] UserError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Duration as ChronoDuration;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::router::app_router;
    use crate::testing::{form_request, get_request, read_json, TestContext, ADMIN_EMAIL, ADMIN_PASSWORD};

    fn session_cookie(response: &Response) -> String {
        response
            .headers()
            .get(header::SET_COOKIE)
            .expect("set-cookie header")
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn seeded_admin_can_sign_in() {
        let context = TestContext::new().await;
        let response = context
            .send(form_request(
                "/account/login",
                None,
                &[("email", ADMIN_EMAIL), ("password", ADMIN_PASSWORD)],
            ))
            .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            AFTER_LOGIN_REDIRECT
        );
        let cookie = session_cookie(&response);
        assert!(cookie.starts_with("session="));

        let listing = context
            .router()
            .oneshot(
                Request::builder()
                    .uri("/applications")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(listing.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let context = TestContext::new().await;
        let response = context
            .send(form_request(
                "/account/login",
                None,
                &[("email", ADMIN_EMAIL), ("password", "Wrong123")],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = context
            .send(form_request(
                "/account/login",
                None,
                &[("email", "nobody@example.com"), ("password", "Wrong123")],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_creates_student_who_can_sign_in() {
        let context = TestContext::new().await;
        let response = context
            .send(form_request(
                "/account/register",
                None,
                &[("email", "New.Student@Example.com"), ("password", "Passw0rd")],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = read_json(response).await;
        assert_eq!(body["email"], "new.student@example.com");
        assert_eq!(body["roles"], serde_json::json!(["Student"]));

        let response = context
            .send(form_request(
                "/account/login",
                None,
                &[("email", "new.student@example.com"), ("password", "Passw0rd")],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = context
            .send(form_request(
                "/account/register",
                None,
                &[("email", "new.student@example.com"), ("password", "Passw0rd")],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn register_enforces_password_policy() {
        let context = TestContext::new().await;
        let response = context
            .send(form_request(
                "/account/register",
                None,
                &[("email", "student@example.com"), ("password", "password")],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = read_json(response).await;
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|error| error["field"].as_str())
            .collect();
        assert!(fields.iter().all(|field| *field == "password"));
        assert_eq!(fields.len(), 2);
    }

    #[tokio::test]
    async fn missing_session_is_unauthorized() {
        let context = TestContext::new().await;
        let response = context.send(get_request("/applications/mine", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = context
            .send(get_request("/applications/mine", Some("garbage")))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn students_are_forbidden_from_admin_routes() {
        let context = TestContext::new().await;
        let student = context.create_student("a@example.com").await;
        for uri in ["/applications", "/applications/1", "/applications/1/edit"] {
            let response = context.send(get_request(uri, Some(&student.token))).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
        }
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected() {
        let context = TestContext::new().await;
        let student = context.create_student("a@example.com").await;
        let later = context.state.now() + ChronoDuration::hours(9);
        let app = app_router(context.state.clone().with_clock(Arc::new(move || later)));

        let response = app
            .oneshot(get_request("/applications/mine", Some(&student.token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_requires_token_and_clears_cookie() {
        let context = TestContext::new().await;
        let student = context.create_student("a@example.com").await;

        let response = context
            .send(form_request("/account/logout", Some(&student.token), &[]))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = context
            .send(form_request(
                "/account/logout",
                Some(&student.token),
                &[("csrf_token", &student.csrf)],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(session_cookie(&response).ends_with("session="));
    }
}
