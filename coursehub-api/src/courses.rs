use axum::{
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use uuid::Uuid;

use coursehub_core::Course;
use coursehub_lifecycle::SubmitCourseCommand;

use crate::error::AppError;
use crate::middleware::{Claims, Role};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/courses/{id}/submit", post(submit_course))
        .route("/v1/courses/{id}/edits", post(record_edit))
        .route("/v1/courses/{id}/withdraw", post(withdraw_submission))
        .route("/v1/courses/{id}/publish", post(publish_course))
        .route("/v1/courses/{id}/unpublish", post(unpublish_course))
}

fn command(claims: &Claims, course_id: Uuid) -> Result<SubmitCourseCommand, AppError> {
    claims.require(Role::Instructor)?;
    Ok(SubmitCourseCommand {
        course_id,
        instructor_id: claims.sub,
    })
}

async fn submit_course(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Course>, AppError> {
    let cmd = command(&claims, course_id)?;
    let course = state.courses.submit_for_review(cmd).await?;
    state.metrics.course_submissions.inc();
    Ok(Json(course))
}

/// Content edits happen elsewhere; this records that a published course now
/// differs from what was reviewed.
async fn record_edit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Course>, AppError> {
    claims.require(Role::Instructor)?;
    let course = state.courses.record_edit(course_id, claims.sub).await?;
    Ok(Json(course))
}

async fn withdraw_submission(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Course>, AppError> {
    let cmd = command(&claims, course_id)?;
    Ok(Json(state.courses.withdraw_submission(cmd).await?))
}

async fn publish_course(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Course>, AppError> {
    let cmd = command(&claims, course_id)?;
    Ok(Json(state.courses.set_published(cmd, true).await?))
}

async fn unpublish_course(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Course>, AppError> {
    let cmd = command(&claims, course_id)?;
    Ok(Json(state.courses.set_published(cmd, false).await?))
}
