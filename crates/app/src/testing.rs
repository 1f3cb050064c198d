//! Router and database fixtures shared by the handler tests.

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use tower::ServiceExt;

use uni_apply_core::types::{Role, University};
use uni_apply_core::validation::NewUniversity;
use uni_apply_storage::Database;
use uni_apply_util::AdminSeed;

use crate::auth::create_account;
use crate::router::{app_router, AppState, AuthSettings};
use crate::seed::seed_identity;
use crate::session::SESSION_COOKIE;
use crate::telemetry;

pub const ADMIN_EMAIL: &str = "admin@system.com";
pub const ADMIN_PASSWORD: &str = "Admin@123";
pub const STUDENT_PASSWORD: &str = "Stud3ntPass";

/// A signed-in caller: session token plus the matching anti-forgery token.
pub struct TestSession {
    pub user_id: String,
    pub token: String,
    pub csrf: String,
}

pub struct TestContext {
    pub database: Database,
    pub state: AppState,
}

impl TestContext {
    pub async fn new() -> Self {
        let metrics = telemetry::init_metrics().expect("metrics");
        let database = Database::connect("sqlite::memory:").await.expect("connect");
        database.run_migrations().await.expect("migrations");

        let auth = AuthSettings {
            secret: b"test-session-secret-0123456789abcdef".to_vec(),
            session_ttl: Duration::from_secs(8 * 60 * 60),
            password_iterations: 1_000,
            secure_cookie: false,
        };
        let state = AppState::new(metrics, database.clone(), auth);

        let admin = AdminSeed {
            email: ADMIN_EMAIL.to_string(),
            password: ADMIN_PASSWORD.to_string(),
        };
        seed_identity(&database, state.passwords(), &admin, Utc::now())
            .await
            .expect("seed identity");

        Self { database, state }
    }

    pub fn router(&self) -> Router {
        app_router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router()
            .oneshot(request)
            .await
            .expect("handler should respond")
    }

    /// Signs in as the seeded admin through the login endpoint.
    pub async fn login_admin(&self) -> TestSession {
        let response = self
            .send(form_request(
                "/account/login",
                None,
                &[("email", ADMIN_EMAIL), ("password", ADMIN_PASSWORD)],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("session cookie")
            .to_str()
            .expect("ascii cookie");
        let token = cookie
            .split(';')
            .next()
            .and_then(|pair| pair.strip_prefix(&format!("{SESSION_COOKIE}=")))
            .expect("session token")
            .to_string();
        let claims = self
            .state
            .sessions()
            .validate(&token, self.state.now())
            .expect("valid session");

        self.session_for(claims.sub, token)
    }

    /// Registers a student directly in storage and issues a session for it.
    pub async fn create_student(&self, email: &str) -> TestSession {
        let account = create_account(
            &self.database,
            self.state.passwords(),
            email,
            STUDENT_PASSWORD,
            Role::Student,
            false,
            Utc::now(),
        )
        .await
        .expect("create student");
        let token = self
            .state
            .sessions()
            .issue(&account, self.state.now())
            .expect("issue session");

        self.session_for(account.id, token)
    }

    pub async fn create_university(&self, name: &str) -> University {
        self.database
            .universities()
            .insert(&NewUniversity {
                name: name.to_string(),
                location: None,
                description: None,
            })
            .await
            .expect("insert university")
    }

    fn session_for(&self, user_id: String, token: String) -> TestSession {
        let csrf = self.state.csrf().token_for(&user_id).expect("csrf token");
        TestSession {
            user_id,
            token,
            csrf,
        }
    }
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

pub fn form_request(uri: &str, token: Option<&str>, fields: &[(&str, &str)]) -> Request<Body> {
    let body = serde_urlencoded::to_string(fields).expect("form body");
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).expect("request")
}

pub async fn read_json<T: DeserializeOwned>(response: Response) -> T {
    let collected = response
        .into_body()
        .collect()
        .await
        .expect("body should read");
    serde_json::from_slice(&collected.to_bytes()).expect("json body")
}
