use axum::{
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use coursehub_core::{Course, RefundRequest};
use coursehub_lifecycle::{ReconciliationReport, ReviewDecision};

use crate::error::AppError;
use crate::middleware::{Claims, Role};
use crate::state::AppState;
use crate::worker;

#[derive(Debug, Deserialize)]
pub struct ReviewCourseRequest {
    pub decision: ReviewDecision,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/courses/{id}/review", post(review_course))
        .route("/v1/admin/refunds/{id}/complete", post(complete_refund))
        .route("/v1/admin/reconciliation", post(run_reconciliation))
}

async fn review_course(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<ReviewCourseRequest>,
) -> Result<Json<Course>, AppError> {
    claims.require(Role::Admin)?;
    let course = state.review.decide(course_id, claims.sub, req.decision).await?;
    Ok(Json(course))
}

/// Settlement callback: the payout for an approved refund has gone out.
async fn complete_refund(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(refund_id): Path<Uuid>,
) -> Result<Json<RefundRequest>, AppError> {
    claims.require(Role::Admin)?;
    Ok(Json(state.refunds.complete(refund_id).await?))
}

async fn run_reconciliation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReconciliationReport>, AppError> {
    claims.require(Role::Admin)?;
    let holder = format!("admin:{}", claims.sub);
    match worker::run_pass(&state, &holder).await? {
        Some(report) => Ok(Json(report)),
        None => Err(worker::lease_conflict().into()),
    }
}
