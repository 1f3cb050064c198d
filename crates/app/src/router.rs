use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use uni_apply_storage::Database;
use uni_apply_util::AppConfig;

use crate::csrf::CsrfGuard;
use crate::password::PasswordHasher;
use crate::problem::ProblemResponse;
use crate::session::SessionKeys;
use crate::workflow::ApplicationWorkflow;
use crate::{applications, auth, telemetry, universities};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Secrets and work factors used by the identity layer.
#[derive(Clone)]
pub struct AuthSettings {
    pub secret: Vec<u8>,
    pub session_ttl: Duration,
    pub password_iterations: u32,
    pub secure_cookie: bool,
}

impl AuthSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            secret: config.session_secret.clone(),
            session_ttl: config.session_ttl,
            password_iterations: config.password_iterations,
            secure_cookie: !config.environment.is_development(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Clock,
    sessions: SessionKeys,
    csrf: CsrfGuard,
    passwords: PasswordHasher,
    workflow: ApplicationWorkflow,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database, auth: AuthSettings) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        let workflow = ApplicationWorkflow::new(storage.clone(), clock.clone());
        Self {
            metrics,
            sessions: SessionKeys::new(&auth.secret, auth.session_ttl, auth.secure_cookie),
            csrf: CsrfGuard::new(&auth.secret),
            passwords: PasswordHasher::new(auth.password_iterations),
            workflow,
            storage,
            clock,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock.clone();
        self.workflow = ApplicationWorkflow::new(self.storage.clone(), clock);
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn sessions(&self) -> &SessionKeys {
        &self.sessions
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    pub fn passwords(&self) -> &PasswordHasher {
        &self.passwords
    }

    pub fn workflow(&self) -> &ApplicationWorkflow {
        &self.workflow
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/account/register", post(auth::register))
        .route("/account/login", post(auth::login))
        .route("/account/logout", post(auth::logout))
        .route(
            "/universities",
            get(universities::list).post(universities::create),
        )
        .route("/universities/:id/delete", post(universities::delete))
        .route("/applications", get(applications::index))
        .route("/applications/apply", post(applications::apply))
        .route("/applications/mine", get(applications::mine))
        .route("/applications/:id", get(applications::details))
        .route(
            "/applications/:id/edit",
            get(applications::edit_form).post(applications::edit_submit),
        )
        .route(
            "/applications/:id/delete",
            get(applications::delete_confirm).post(applications::delete_confirmed),
        )
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> Result<Response, ProblemResponse> {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .map(IntoResponse::into_response)
        .map_err(|err| ProblemResponse::internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::testing::TestContext;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let context = TestContext::new().await;

        let response = context
            .router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let context = TestContext::new().await;

        let response = context
            .router()
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn unknown_routes_return_not_found() {
        let context = TestContext::new().await;

        let response = context
            .router()
            .oneshot(
                Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
