use chrono::{DateTime, SubsecRound, Utc};
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use uni_apply_core::types::{Application, ApplicationId, ApplicationStatus, University, UniversityId};
use uni_apply_core::validation::{ApplicationForm, ValidationErrors};
use uni_apply_storage::{
    ApplicationInsertOutcome, ApplicationStoreError, Database, NewApplication, UniversityError,
};

use crate::router::Clock;

/// Applies the application rules on top of the repositories.
#[derive(Clone)]
pub struct ApplicationWorkflow {
    database: Database,
    clock: Clock,
}

/// Every application with the universities needed to label them.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationsOverview {
    pub applications: Vec<Application>,
    pub universities: Vec<University>,
}

/// One application with the university it targets.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationDetails {
    pub application: Application,
    pub university: Option<University>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created(Application),
    AlreadyApplied,
}

impl ApplicationWorkflow {
    pub fn new(database: Database, clock: Clock) -> Self {
        Self { database, clock }
    }

    /// Current time at the millisecond precision the store keeps.
    fn now(&self) -> DateTime<Utc> {
        (self.clock)().trunc_subsecs(3)
    }

    /// Lists every application together with all universities.
    pub async fn list_all(&self) -> Result<ApplicationsOverview, WorkflowError> {
        let applications = self.database.applications().list_all().await?;
        let universities = self.database.universities().list().await?;
        Ok(ApplicationsOverview {
            applications,
            universities,
        })
    }

    /// Creates a pending application unless the student already applied.
    pub async fn apply(
        &self,
        student_id: &str,
        university_id: UniversityId,
    ) -> Result<ApplyOutcome, WorkflowError> {
        if self
            .database
            .universities()
            .fetch(university_id)
            .await?
            .is_none()
        {
            return Err(WorkflowError::UniversityNotFound(university_id));
        }

        let applications = self.database.applications();
        if applications.exists_for(student_id, university_id).await? {
            return Ok(self.already_applied(student_id, university_id));
        }

        let record = NewApplication {
            user_id: student_id,
            university_id,
            application_date: self.now(),
            status: ApplicationStatus::Pending,
        };
        match applications.insert(&record).await {
            Ok(ApplicationInsertOutcome::Inserted(application)) => {
                counter!("applications_submitted_total", "result" => "created").increment(1);
                info!(
                    stage = "workflow",
                    application_id = application.id,
                    user_id = %student_id,
                    university_id,
                    "application submitted"
                );
                Ok(ApplyOutcome::Created(application))
            }
            // Lost the race against a concurrent submission for the same pair.
            Ok(ApplicationInsertOutcome::Duplicate) => {
                Ok(self.already_applied(student_id, university_id))
            }
            // Either row may have vanished since the pre-check.
            Err(ApplicationStoreError::MissingReference) => {
                if self.database.universities().fetch(university_id).await?.is_some() {
                    Err(WorkflowError::UserNotFound(student_id.to_string()))
                } else {
                    Err(WorkflowError::UniversityNotFound(university_id))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn already_applied(&self, student_id: &str, university_id: UniversityId) -> ApplyOutcome {
        counter!("applications_submitted_total", "result" => "duplicate").increment(1);
        info!(
            stage = "workflow",
            user_id = %student_id,
            university_id,
            "duplicate application ignored"
        );
        ApplyOutcome::AlreadyApplied
    }

    /// Lists the student's own applications together with all universities.
    pub async fn list_mine(&self, student_id: &str) -> Result<ApplicationsOverview, WorkflowError> {
        let applications = self
            .database
            .applications()
            .list_for_user(student_id)
            .await?;
        let universities = self.database.universities().list().await?;
        Ok(ApplicationsOverview {
            applications,
            universities,
        })
    }

    pub async fn get_details(&self, id: ApplicationId) -> Result<ApplicationDetails, WorkflowError> {
        let application = self.find(id).await?;
        let university = self
            .database
            .universities()
            .fetch(application.university_id)
            .await?;
        Ok(ApplicationDetails {
            application,
            university,
        })
    }

    pub async fn find(&self, id: ApplicationId) -> Result<Application, WorkflowError> {
        self.database
            .applications()
            .fetch(id)
            .await?
            .ok_or(WorkflowError::ApplicationNotFound(id))
    }

    /// Overwrites the stored record with the submitted form.
    ///
    /// The submitted id must match `id`; nothing is written otherwise.
    pub async fn update_status(
        &self,
        id: ApplicationId,
        form: &ApplicationForm,
    ) -> Result<Application, WorkflowError> {
        if form.submitted_id() != Some(id) {
            counter!("application_updates_total", "result" => "id_mismatch").increment(1);
            return Err(WorkflowError::ApplicationNotFound(id));
        }

        self.find(id).await?;

        let updated = form.validate(id).map_err(|errors| {
            counter!("application_updates_total", "result" => "invalid").increment(1);
            WorkflowError::Invalid(errors)
        })?;

        if self
            .database
            .universities()
            .fetch(updated.university_id)
            .await?
            .is_none()
        {
            counter!("application_updates_total", "result" => "invalid").increment(1);
            let mut errors = ValidationErrors::default();
            errors.push("university_id", "does not reference an existing university");
            return Err(WorkflowError::Invalid(errors));
        }

        match self.database.applications().update(&updated).await {
            Ok(true) => {}
            Ok(false) => return Err(WorkflowError::ApplicationNotFound(id)),
            Err(ApplicationStoreError::MissingReference) => {
                counter!("application_updates_total", "result" => "invalid").increment(1);
                let mut errors = ValidationErrors::default();
                errors.push("user_id", "does not reference an existing user");
                return Err(WorkflowError::Invalid(errors));
            }
            Err(ApplicationStoreError::DuplicatePair) => {
                counter!("application_updates_total", "result" => "conflict").increment(1);
                return Err(WorkflowError::Conflict);
            }
            Err(err) => return Err(err.into()),
        }

        counter!("application_updates_total", "result" => "updated").increment(1);
        info!(
            stage = "workflow",
            application_id = id,
            status = %updated.status,
            "application updated"
        );
        Ok(updated)
    }

    pub async fn delete(&self, id: ApplicationId) -> Result<(), WorkflowError> {
        if !self.database.applications().delete(id).await? {
            return Err(WorkflowError::ApplicationNotFound(id));
        }
        counter!("application_deletes_total").increment(1);
        info!(stage = "workflow", application_id = id, "application deleted");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("application {0} not found")]
    ApplicationNotFound(ApplicationId),
    #[error("university {0} not found")]
    UniversityNotFound(UniversityId),
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("submitted application is invalid: {0}")]
    Invalid(ValidationErrors),
    #[error("another application already exists for this user and university")]
    Conflict,
    #[error(transparent)]
    Applications(#[from] ApplicationStoreError),
    #[error(transparent)]
    Universities(#[from] UniversityError),
}
