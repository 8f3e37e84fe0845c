use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use coursehub_core::filters::{BillFilter, RefundFilter};
use coursehub_core::models::{
    Bill, BillStatus, ContactMethod, Enrollment, RefundRequest, RefundStatus, RefundTransition,
};
use coursehub_core::repository::CascadeWrites;
use coursehub_core::{CoreError, CoreResult, Notifier, RefundPolicy};
use coursehub_shared::models::events::{LifecycleEvent, RefundProcessedEvent, RefundRequestedEvent};

use crate::Repositories;

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone)]
pub struct CreateRefundCommand {
    pub student_id: Uuid,
    pub enrollment_id: Uuid,
    pub reason: String,
    pub description: String,
    pub contact_method: ContactMethod,
    /// Must equal the billed amount when given
    pub amount: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ApproveRefundCommand {
    pub refund_id: Uuid,
    pub teacher_id: Uuid,
    pub notes: Option<String>,
    pub refund_method: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RejectRefundCommand {
    pub refund_id: Uuid,
    pub teacher_id: Uuid,
    pub reason: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CancelRefundCommand {
    pub refund_id: Uuid,
    pub student_id: Uuid,
}

// ============================================================================
// Cascade reporting
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    Skipped(String),
    Failed(String),
}

impl StepOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, StepOutcome::Applied)
    }
}

/// What happened to each record after the refund itself was approved.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub bill: StepOutcome,
    pub enrollment: StepOutcome,
    pub course: StepOutcome,
}

impl CascadeReport {
    pub fn is_complete(&self) -> bool {
        self.bill.is_applied() && self.enrollment.is_applied() && self.course.is_applied()
    }

    pub fn failed_steps(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if matches!(self.bill, StepOutcome::Failed(_)) {
            failed.push("bill");
        }
        if matches!(self.enrollment, StepOutcome::Failed(_)) {
            failed.push("enrollment");
        }
        if matches!(self.course, StepOutcome::Failed(_)) {
            failed.push("course");
        }
        failed
    }

    pub fn skipped_steps(&self) -> Vec<&'static str> {
        let mut skipped = Vec::new();
        if matches!(self.bill, StepOutcome::Skipped(_)) {
            skipped.push("bill");
        }
        if matches!(self.enrollment, StepOutcome::Skipped(_)) {
            skipped.push("enrollment");
        }
        if matches!(self.course, StepOutcome::Skipped(_)) {
            skipped.push("course");
        }
        skipped
    }

    fn from_writes(writes: &CascadeWrites) -> Self {
        let outcome = |applied: bool, reason: &str| {
            if applied {
                StepOutcome::Applied
            } else {
                StepOutcome::Skipped(reason.to_string())
            }
        };
        Self {
            bill: outcome(writes.bill_refunded, "bill not in completed state"),
            enrollment: outcome(writes.enrollment_deactivated, "enrollment already inactive"),
            course: outcome(writes.course_decremented, "enrollment was not deactivated"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovedRefund {
    pub refund: RefundRequest,
    pub cascade: CascadeReport,
}

// ============================================================================
// Workflow
// ============================================================================

/// Owns `RefundRequest.status` and the cascade that approval triggers.
pub struct RefundWorkflow {
    repos: Repositories,
    notifier: Arc<dyn Notifier>,
    policy: Arc<RefundPolicy>,
}

impl RefundWorkflow {
    pub fn new(repos: Repositories, notifier: Arc<dyn Notifier>, policy: Arc<RefundPolicy>) -> Self {
        Self { repos, notifier, policy }
    }

    pub async fn create_refund_request(&self, cmd: CreateRefundCommand) -> CoreResult<RefundRequest> {
        let enrollment = self
            .repos
            .enrollments
            .get_enrollment(cmd.enrollment_id)
            .await?
            .ok_or_else(|| CoreError::NotFoundError(format!("enrollment {}", cmd.enrollment_id)))?;

        if enrollment.student_id != cmd.student_id {
            return Err(CoreError::AuthorizationError(format!(
                "enrollment {} does not belong to student {}",
                enrollment.id, cmd.student_id
            )));
        }
        if !enrollment.is_active {
            return Err(CoreError::ValidationError(format!(
                "enrollment {} is not active",
                enrollment.id
            )));
        }
        if cmd.reason.trim().is_empty() {
            return Err(CoreError::ValidationError("refund reason is required".to_string()));
        }
        cmd.contact_method.validate()?;
        self.check_refund_window(&enrollment)?;

        let pending = self
            .repos
            .refunds
            .list_refunds(&RefundFilter::pending_for_enrollment(enrollment.id))
            .await?;
        if !pending.is_empty() {
            return Err(CoreError::ConflictError(format!(
                "enrollment {} already has a pending refund request",
                enrollment.id
            )));
        }

        let course = self
            .repos
            .courses
            .get_course(enrollment.course_id)
            .await?
            .ok_or_else(|| CoreError::NotFoundError(format!("course {}", enrollment.course_id)))?;

        let (bill, synthesized) = self.resolve_bill(&enrollment, course.price).await?;

        // Whole purchases only: the amount is what was billed.
        if bill.amount <= 0 {
            return Err(CoreError::ValidationError(format!(
                "bill {} has nothing to refund",
                bill.id
            )));
        }
        if let Some(requested) = cmd.amount {
            if requested != bill.amount {
                return Err(CoreError::ValidationError(format!(
                    "refund amount {} must equal the billed {}",
                    requested, bill.amount
                )));
            }
        }
        let amount = bill.amount;

        let refund = RefundRequest {
            id: Uuid::new_v4(),
            student_id: cmd.student_id,
            teacher_id: course.instructor_id,
            course_id: course.id,
            enrollment_id: enrollment.id,
            bill_id: bill.id,
            amount,
            reason: cmd.reason,
            description: cmd.description,
            contact_method: cmd.contact_method,
            status: RefundStatus::Pending,
            requested_at: Utc::now(),
            processed_by: None,
            processed_at: None,
            rejection_reason: None,
            refund_method: None,
            notes: None,
        };

        let new_bill = if synthesized { Some(&bill) } else { None };
        if !self.repos.refunds.insert_pending(&refund, new_bill).await? {
            return Err(CoreError::ConflictError(format!(
                "enrollment {} already has a pending refund request",
                enrollment.id
            )));
        }
        if synthesized {
            warn!(
                bill_id = %bill.id,
                enrollment_id = %enrollment.id,
                amount = bill.amount,
                "Synthesized missing bill from course price"
            );
        }

        info!(
            refund_id = %refund.id,
            enrollment_id = %refund.enrollment_id,
            amount = refund.amount,
            contact = %refund.contact_method.value,
            "Refund requested"
        );

        self.signal(LifecycleEvent::RefundRequested(RefundRequestedEvent {
            refund_id: refund.id,
            student_id: refund.student_id,
            teacher_id: refund.teacher_id,
            course_id: refund.course_id,
            amount: refund.amount,
            timestamp: refund.requested_at.timestamp(),
        }))
        .await;

        Ok(refund)
    }

    /// pending → approved, then Bill → Enrollment → Course. Stores with a
    /// `RefundCascade` apply all four as one unit; otherwise each cascade step
    /// is attempted in order and reported, never rolled back.
    pub async fn approve(&self, cmd: ApproveRefundCommand) -> CoreResult<ApprovedRefund> {
        let current = self.load_pending_for_teacher(cmd.refund_id, cmd.teacher_id).await?;
        let now = Utc::now();

        let mut transition = RefundTransition::to(RefundStatus::Approved).processed(cmd.teacher_id, now);
        transition.refund_method = cmd.refund_method;
        transition.notes = cmd.notes;

        let (refund, cascade) = match &self.repos.cascade {
            Some(atomic) => {
                let (refund, writes) = atomic
                    .approve_with_cascade(current.id, &transition)
                    .await?
                    .ok_or_else(|| {
                        CoreError::ConflictError(format!("refund {} was processed concurrently", current.id))
                    })?;
                (refund, CascadeReport::from_writes(&writes))
            }
            None => {
                let refund = self
                    .repos
                    .refunds
                    .transition(current.id, RefundStatus::Pending, &transition)
                    .await?
                    .ok_or_else(|| {
                        CoreError::ConflictError(format!("refund {} was processed concurrently", current.id))
                    })?;
                let cascade = self.run_cascade(&refund).await;
                (refund, cascade)
            }
        };

        info!(refund_id = %refund.id, teacher_id = %cmd.teacher_id, "Refund approved");

        if !cascade.is_complete() {
            warn!(
                refund_id = %refund.id,
                failed = ?cascade.failed_steps(),
                skipped = ?cascade.skipped_steps(),
                "Refund cascade incomplete; reconciliation will repair aggregates"
            );
        }

        self.signal(LifecycleEvent::RefundApproved(processed_event(&refund, None)))
            .await;

        Ok(ApprovedRefund { refund, cascade })
    }

    pub async fn reject(&self, cmd: RejectRefundCommand) -> CoreResult<RefundRequest> {
        if cmd.reason.trim().is_empty() {
            return Err(CoreError::ValidationError("rejection reason is required".to_string()));
        }
        let current = self.load_pending_for_teacher(cmd.refund_id, cmd.teacher_id).await?;

        let mut transition =
            RefundTransition::to(RefundStatus::Rejected).processed(cmd.teacher_id, Utc::now());
        transition.rejection_reason = Some(cmd.reason.clone());
        transition.notes = cmd.notes;

        let refund = self
            .repos
            .refunds
            .transition(current.id, RefundStatus::Pending, &transition)
            .await?
            .ok_or_else(|| {
                CoreError::ConflictError(format!("refund {} was processed concurrently", current.id))
            })?;

        info!(refund_id = %refund.id, teacher_id = %cmd.teacher_id, "Refund rejected");
        self.signal(LifecycleEvent::RefundRejected(processed_event(&refund, Some(cmd.reason))))
            .await;

        Ok(refund)
    }

    pub async fn cancel(&self, cmd: CancelRefundCommand) -> CoreResult<RefundRequest> {
        let current = self.get_refund(cmd.refund_id).await?;
        if current.student_id != cmd.student_id {
            return Err(CoreError::AuthorizationError(format!(
                "refund {} was not requested by student {}",
                current.id, cmd.student_id
            )));
        }
        if current.status != RefundStatus::Pending {
            return Err(CoreError::ConflictError(format!(
                "refund {} is already {}",
                current.id, current.status
            )));
        }

        let transition =
            RefundTransition::to(RefundStatus::Cancelled).processed(cmd.student_id, Utc::now());
        let refund = self
            .repos
            .refunds
            .transition(current.id, RefundStatus::Pending, &transition)
            .await?
            .ok_or_else(|| {
                CoreError::ConflictError(format!("refund {} was processed concurrently", current.id))
            })?;

        info!(refund_id = %refund.id, "Refund cancelled by student");
        self.signal(LifecycleEvent::RefundCancelled(processed_event(&refund, None)))
            .await;

        Ok(refund)
    }

    /// Settlement hook: the payout for an approved refund went through.
    pub async fn complete(&self, refund_id: Uuid) -> CoreResult<RefundRequest> {
        self.repos
            .refunds
            .transition(refund_id, RefundStatus::Approved, &RefundTransition::to(RefundStatus::Completed))
            .await?
            .ok_or_else(|| {
                CoreError::ConflictError(format!("refund {} is not awaiting settlement", refund_id))
            })
    }

    pub async fn get_refund(&self, refund_id: Uuid) -> CoreResult<RefundRequest> {
        self.repos
            .refunds
            .get_refund(refund_id)
            .await?
            .ok_or_else(|| CoreError::NotFoundError(format!("refund {}", refund_id)))
    }

    pub async fn list_refunds(&self, filter: &RefundFilter) -> CoreResult<Vec<RefundRequest>> {
        filter.validate()?;
        Ok(self.repos.refunds.list_refunds(filter).await?)
    }

    async fn load_pending_for_teacher(&self, refund_id: Uuid, teacher_id: Uuid) -> CoreResult<RefundRequest> {
        let refund = self.get_refund(refund_id).await?;
        if refund.teacher_id != teacher_id {
            return Err(CoreError::AuthorizationError(format!(
                "teacher {} cannot process refund {}",
                teacher_id, refund_id
            )));
        }
        if refund.status != RefundStatus::Pending {
            return Err(CoreError::ConflictError(format!(
                "refund {} is already {}",
                refund_id, refund.status
            )));
        }
        Ok(refund)
    }

    fn check_refund_window(&self, enrollment: &Enrollment) -> CoreResult<()> {
        if let Some(days) = self.policy.refund_window_days {
            if Utc::now() - enrollment.enrolled_at > Duration::days(days) {
                return Err(CoreError::ValidationError(format!(
                    "refund window of {} days has passed",
                    days
                )));
            }
        }
        Ok(())
    }

    /// Find the paid bill behind an enrollment. The flag marks a bill built
    /// here that is not stored yet; it is persisted with the request.
    async fn resolve_bill(&self, enrollment: &Enrollment, course_price: i64) -> CoreResult<(Bill, bool)> {
        let bills = self
            .repos
            .bills
            .find_bills(&BillFilter::for_purchase(enrollment.student_id, enrollment.course_id))
            .await?;

        if let Some(bill) = bills.iter().find(|b| b.status == BillStatus::Completed) {
            return Ok((bill.clone(), false));
        }
        if bills.iter().any(|b| b.status == BillStatus::Refunded) {
            return Err(CoreError::ConflictError(format!(
                "purchase of course {} has already been refunded",
                enrollment.course_id
            )));
        }
        if !bills.is_empty() || !self.policy.synthesize_missing_bill {
            return Err(CoreError::NotFoundError(format!(
                "completed bill for enrollment {}",
                enrollment.id
            )));
        }

        // Enrollments from before billing was recorded: bill them at today's price.
        let bill = Bill::completed(
            enrollment.student_id,
            enrollment.course_id,
            course_price,
            Some("legacy".to_string()),
        );
        Ok((bill, true))
    }

    async fn run_cascade(&self, refund: &RefundRequest) -> CascadeReport {
        let now = Utc::now();

        let bill = match self.repos.bills.mark_refunded(refund.bill_id, now).await {
            Ok(true) => StepOutcome::Applied,
            Ok(false) => {
                warn!(bill_id = %refund.bill_id, refund_id = %refund.id, "Bill was not in completed state; left unchanged");
                StepOutcome::Skipped("bill not in completed state".to_string())
            }
            Err(e) => {
                error!(bill_id = %refund.bill_id, refund_id = %refund.id, "Failed to mark bill refunded: {}", e);
                StepOutcome::Failed(e.to_string())
            }
        };

        let enrollment = match self
            .repos
            .enrollments
            .deactivate_for_refund(refund.enrollment_id, now)
            .await
        {
            Ok(true) => StepOutcome::Applied,
            Ok(false) => {
                warn!(enrollment_id = %refund.enrollment_id, "Enrollment already inactive");
                StepOutcome::Skipped("enrollment already inactive".to_string())
            }
            Err(e) => {
                error!(enrollment_id = %refund.enrollment_id, refund_id = %refund.id, "Failed to deactivate enrollment: {}", e);
                StepOutcome::Failed(e.to_string())
            }
        };

        // Only an enrollment that actually left the active set moves the aggregate.
        let course = if enrollment.is_applied() {
            match self.repos.courses.adjust_total_students(refund.course_id, -1).await {
                Ok(()) => StepOutcome::Applied,
                Err(e) => {
                    error!(course_id = %refund.course_id, refund_id = %refund.id, "Failed to decrement total_students: {}", e);
                    StepOutcome::Failed(e.to_string())
                }
            }
        } else {
            StepOutcome::Skipped("enrollment was not deactivated".to_string())
        };

        CascadeReport { bill, enrollment, course }
    }

    async fn signal(&self, event: LifecycleEvent) {
        if let Err(e) = self.notifier.notify(&event).await {
            warn!("Failed to publish {} for {}: {}", event.topic(), event.key(), e);
        }
    }
}

fn processed_event(refund: &RefundRequest, reason: Option<String>) -> RefundProcessedEvent {
    RefundProcessedEvent {
        refund_id: refund.id,
        student_id: refund.student_id,
        course_id: refund.course_id,
        processed_by: refund.processed_by.unwrap_or(refund.teacher_id),
        status: refund.status.to_string(),
        amount: refund.amount,
        reason,
        timestamp: refund
            .processed_at
            .unwrap_or_else(Utc::now)
            .timestamp(),
    }
}

#[cfg(test)]
mod tests;
