use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use uni_apply_core::types::{University, UniversityId};
use uni_apply_core::validation::{UniversityForm, ValidationErrors};
use uni_apply_storage::UniversityError;

use crate::auth::{AdminUser, CurrentUser};
use crate::csrf::TokenForm;
use crate::problem::ProblemResponse;
use crate::router::AppState;

const UNIVERSITY_LIST: &str = "/universities";

#[derive(Debug, Serialize)]
pub struct UniversitiesView {
    pub universities: Vec<University>,
    pub csrf_token: String,
}

#[derive(Debug, Serialize)]
struct CreateRejectedView {
    university: UniversityForm,
    errors: ValidationErrors,
}

#[derive(Debug, Deserialize)]
pub struct CreateUniversity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub csrf_token: String,
}

pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<UniversitiesView>, ProblemResponse> {
    let universities = state
        .storage()
        .universities()
        .list()
        .await
        .map_err(storage_problem)?;
    Ok(Json(UniversitiesView {
        universities,
        csrf_token: user.csrf_token(&state)?,
    }))
}

pub async fn create(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Form(submission): Form<CreateUniversity>,
) -> Result<Response, ProblemResponse> {
    admin.verify_csrf(&state, &submission.csrf_token)?;
    let form = UniversityForm {
        name: submission.name,
        location: submission.location,
        description: submission.description,
    };

    let new_university = match form.validate() {
        Ok(value) => value,
        Err(errors) => {
            let view = CreateRejectedView {
                university: form,
                errors,
            };
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(view)).into_response());
        }
    };

    let university = state
        .storage()
        .universities()
        .insert(&new_university)
        .await
        .map_err(storage_problem)?;
    info!(
        stage = "universities",
        university_id = university.id,
        name = %university.name,
        "university created"
    );
    Ok(Redirect::to(UNIVERSITY_LIST).into_response())
}

/// Removes a university that no application references.
pub async fn delete(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(raw_id): Path<String>,
    Form(form): Form<TokenForm>,
) -> Result<Redirect, ProblemResponse> {
    admin.verify_csrf(&state, &form.csrf_token)?;
    let id: UniversityId = raw_id
        .parse()
        .map_err(|_| ProblemResponse::not_found("university_not_found", "university not found"))?;

    state
        .storage()
        .universities()
        .delete_restricted(id)
        .await
        .map_err(storage_problem)?;
    info!(stage = "universities", university_id = id, "university deleted");
    Ok(Redirect::to(UNIVERSITY_LIST))
}

fn storage_problem(err: UniversityError) -> ProblemResponse {
    match err {
        UniversityError::NotFound => {
            ProblemResponse::not_found("university_not_found", "university not found")
        }
        UniversityError::HasApplications(count) => ProblemResponse::new(
            StatusCode::CONFLICT,
            "university_in_use",
            format!("{count} application(s) still reference this university"),
        ),
        UniversityError::Database(_) => {
            error!(stage = "universities", error = %err, "storage failure");
            ProblemResponse::internal("storage failure")
        }
    }
}
