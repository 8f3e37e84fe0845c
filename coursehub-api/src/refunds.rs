use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use coursehub_core::{ContactMethod, RefundFilter, RefundRequest};
use coursehub_lifecycle::{
    ApproveRefundCommand, ApprovedRefund, CancelRefundCommand, CreateRefundCommand, RejectRefundCommand,
};

use crate::error::AppError;
use crate::middleware::{Claims, Role};
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateRefundRequest {
    pub enrollment_id: Uuid,
    pub reason: String,
    #[serde(default)]
    pub description: String,
    pub contact_method: ContactMethod,
    pub amount: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRefundRequest {
    pub notes: Option<String>,
    pub refund_method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRefundRequest {
    pub reason: String,
    pub notes: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/refunds", post(create_refund).get(list_refunds))
        .route("/v1/refunds/{id}", get(get_refund))
        .route("/v1/refunds/{id}/approve", post(approve_refund))
        .route("/v1/refunds/{id}/reject", post(reject_refund))
        .route("/v1/refunds/{id}/cancel", post(cancel_refund))
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_refund(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRefundRequest>,
) -> Result<(StatusCode, Json<RefundRequest>), AppError> {
    claims.require(Role::Student)?;
    let refund = state
        .refunds
        .create_refund_request(CreateRefundCommand {
            student_id: claims.sub,
            enrollment_id: req.enrollment_id,
            reason: req.reason,
            description: req.description,
            contact_method: req.contact_method,
            amount: req.amount,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(refund)))
}

/// Students see their own requests, instructors the ones addressed to them.
async fn list_refunds(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(mut filter): Query<RefundFilter>,
) -> Result<Json<Vec<RefundRequest>>, AppError> {
    match claims.role {
        Role::Student => filter.student_id = Some(claims.sub),
        Role::Instructor => filter.teacher_id = Some(claims.sub),
        Role::Admin => {}
    }
    Ok(Json(state.refunds.list_refunds(&filter).await?))
}

async fn get_refund(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(refund_id): Path<Uuid>,
) -> Result<Json<RefundRequest>, AppError> {
    let refund = state.refunds.get_refund(refund_id).await?;
    let visible = match claims.role {
        Role::Student => refund.student_id == claims.sub,
        Role::Instructor => refund.teacher_id == claims.sub,
        Role::Admin => true,
    };
    if !visible {
        return Err(AppError::AuthorizationError(format!("refund {} is not yours", refund_id)));
    }
    Ok(Json(refund))
}

async fn approve_refund(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(refund_id): Path<Uuid>,
    body: Option<Json<ApproveRefundRequest>>,
) -> Result<Json<ApprovedRefund>, AppError> {
    claims.require(Role::Instructor)?;
    let Json(req) = body.unwrap_or_default();
    let approved = state
        .refunds
        .approve(ApproveRefundCommand {
            refund_id,
            teacher_id: claims.sub,
            notes: req.notes,
            refund_method: req.refund_method,
        })
        .await?;
    state.metrics.observe_approval(&approved.cascade);
    Ok(Json(approved))
}

async fn reject_refund(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(refund_id): Path<Uuid>,
    Json(req): Json<RejectRefundRequest>,
) -> Result<Json<RefundRequest>, AppError> {
    claims.require(Role::Instructor)?;
    let refund = state
        .refunds
        .reject(RejectRefundCommand {
            refund_id,
            teacher_id: claims.sub,
            reason: req.reason,
            notes: req.notes,
        })
        .await?;
    Ok(Json(refund))
}

async fn cancel_refund(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(refund_id): Path<Uuid>,
) -> Result<Json<RefundRequest>, AppError> {
    claims.require(Role::Student)?;
    let refund = state
        .refunds
        .cancel(CancelRefundCommand {
            refund_id,
            student_id: claims.sub,
        })
        .await?;
    Ok(Json(refund))
}
