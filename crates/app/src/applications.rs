use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use uni_apply_core::types::{Application, ApplicationId, ApplicationStatus, University};
use uni_apply_core::validation::{ApplicationForm, ValidationErrors};

use crate::auth::{AdminUser, CurrentUser};
use crate::csrf::TokenForm;
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::workflow::{ApplicationsOverview, WorkflowError};

const ADMIN_LIST: &str = "/applications";
const STUDENT_LIST: &str = "/applications/mine";

#[derive(Debug, Serialize)]
pub struct MineView {
    pub applications: Vec<Application>,
    pub universities: Vec<University>,
    pub csrf_token: String,
}

#[derive(Debug, Serialize)]
pub struct DetailsView {
    pub application: Application,
    pub university: Option<University>,
}

#[derive(Debug, Serialize)]
pub struct EditView {
    pub application: ApplicationForm,
    pub statuses: Vec<&'static str>,
    pub errors: ValidationErrors,
    pub csrf_token: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteView {
    pub application: Application,
    pub university: Option<University>,
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ApplyForm {
    #[serde(default)]
    pub university_id: String,
    #[serde(default)]
    pub csrf_token: String,
}

/// Edit form fields plus the anti-forgery token.
#[derive(Debug, Deserialize)]
pub struct EditSubmission {
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
    #[serde(default)]
    pub csrf_token: String,
}

impl EditSubmission {
    fn into_parts(self) -> (ApplicationForm, String) {
        (
            ApplicationForm {
                id: self.id,
                user_id: self.user_id,
                university_id: self.university_id,
                application_date: self.application_date,
                status: self.status,
            },
            self.csrf_token,
        )
    }
}

pub async fn index(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<ApplicationsOverview>, ProblemResponse> {
    state
        .workflow()
        .list_all()
        .await
        .map(Json)
        .map_err(workflow_problem)
}

pub async fn apply(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<ApplyForm>,
) -> Result<Redirect, ProblemResponse> {
    user.verify_csrf(&state, &form.csrf_token)?;
    let university_id = form
        .university_id
        .trim()
        .parse()
        .map_err(|_| ProblemResponse::not_found("university_not_found", "university not found"))?;

    // Both a new record and an existing one land on the caller's list.
    state
        .workflow()
        .apply(&user.id, university_id)
        .await
        .map_err(workflow_problem)?;
    Ok(Redirect::to(STUDENT_LIST))
}

pub async fn mine(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<MineView>, ProblemResponse> {
    let overview = state
        .workflow()
        .list_mine(&user.id)
        .await
        .map_err(workflow_problem)?;
    Ok(Json(MineView {
        applications: overview.applications,
        universities: overview.universities,
        csrf_token: user.csrf_token(&state)?,
    }))
}

pub async fn details(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(raw_id): Path<String>,
) -> Result<Json<DetailsView>, ProblemResponse> {
    let id = parse_id(&raw_id)?;
    let details = state
        .workflow()
        .get_details(id)
        .await
        .map_err(workflow_problem)?;
    Ok(Json(DetailsView {
        application: details.application,
        university: details.university,
    }))
}

pub async fn edit_form(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(raw_id): Path<String>,
) -> Result<Json<EditView>, ProblemResponse> {
    let id = parse_id(&raw_id)?;
    let application = state.workflow().find(id).await.map_err(workflow_problem)?;
    Ok(Json(edit_view(
        &state,
        &admin,
        ApplicationForm::from_application(&application),
        ValidationErrors::default(),
    )?))
}

pub async fn edit_submit(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(raw_id): Path<String>,
    Form(submission): Form<EditSubmission>,
) -> Result<Response, ProblemResponse> {
    let (form, csrf_token) = submission.into_parts();
    admin.verify_csrf(&state, &csrf_token)?;
    let id = parse_id(&raw_id)?;

    match state.workflow().update_status(id, &form).await {
        Ok(_) => Ok(Redirect::to(ADMIN_LIST).into_response()),
        Err(WorkflowError::Invalid(errors)) => {
            warn!(stage = "workflow", application_id = id, errors = %errors, "edit rejected");
            let view = edit_view(&state, &admin, form, errors)?;
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(view)).into_response())
        }
        Err(err) => Err(workflow_problem(err)),
    }
}

pub async fn delete_confirm(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(raw_id): Path<String>,
) -> Result<Json<DeleteView>, ProblemResponse> {
    let id = parse_id(&raw_id)?;
    let details = state
        .workflow()
        .get_details(id)
        .await
        .map_err(workflow_problem)?;
    Ok(Json(DeleteView {
        application: details.application,
        university: details.university,
        csrf_token: admin.csrf_token(&state)?,
    }))
}

pub async fn delete_confirmed(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(raw_id): Path<String>,
    Form(form): Form<TokenForm>,
) -> Result<Redirect, ProblemResponse> {
    admin.verify_csrf(&state, &form.csrf_token)?;
    let id = parse_id(&raw_id)?;
    state.workflow().delete(id).await.map_err(workflow_problem)?;
    Ok(Redirect::to(ADMIN_LIST))
}

fn edit_view(
    state: &AppState,
    admin: &CurrentUser,
    application: ApplicationForm,
    errors: ValidationErrors,
) -> Result<EditView, ProblemResponse> {
    Ok(EditView {
        application,
        statuses: ApplicationStatus::ALL.iter().map(|status| status.as_str()).collect(),
        errors,
        csrf_token: admin.csrf_token(state)?,
    })
}

/// Path ids that are not integers address no record.
fn parse_id(raw: &str) -> Result<ApplicationId, ProblemResponse> {
    raw.parse()
        .map_err(|_| ProblemResponse::not_found("application_not_found", "application not found"))
}

fn workflow_problem(err: WorkflowError) -> ProblemResponse {
    match err {
        WorkflowError::ApplicationNotFound(_) => {
            ProblemResponse::not_found("application_not_found", err.to_string())
        }
        WorkflowError::UniversityNotFound(_) => {
            ProblemResponse::not_found("university_not_found", err.to_string())
        }
        WorkflowError::UserNotFound(_) => ProblemResponse::new(
            StatusCode::UNAUTHORIZED,
            "account_missing",
            "the signed-in account no longer exists",
        ),
        WorkflowError::Invalid(_) => ProblemResponse::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_application",
            err.to_string(),
        ),
        WorkflowError::Conflict => {
            ProblemResponse::new(StatusCode::CONFLICT, "duplicate_application", err.to_string())
        }
        WorkflowError::Applications(_) | WorkflowError::Universities(_) => {
            error!(stage = "workflow", error = %err, "storage failure");
            ProblemResponse::internal("storage failure")
        }
    }
}
