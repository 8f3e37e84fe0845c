//! Administrative side of the course state machine: the decisions that move a
//! course out of `submitted` and onto the storefront.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use coursehub_core::models::{Course, CourseStatus};
use coursehub_core::repository::CourseRepository;
use coursehub_core::{CoreError, CoreResult, Notifier};
use coursehub_shared::models::events::{CourseReviewedEvent, LifecycleEvent};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
    RequestRevision,
    Publish,
}

impl ReviewDecision {
    fn source(&self) -> CourseStatus {
        match self {
            ReviewDecision::Approve | ReviewDecision::Reject | ReviewDecision::RequestRevision => {
                CourseStatus::Submitted
            }
            ReviewDecision::Publish => CourseStatus::Approved,
        }
    }

    fn target(&self) -> CourseStatus {
        match self {
            ReviewDecision::Approve => CourseStatus::Approved,
            ReviewDecision::Reject => CourseStatus::Rejected,
            ReviewDecision::RequestRevision => CourseStatus::NeedsRevision,
            ReviewDecision::Publish => CourseStatus::Published,
        }
    }
}

pub struct CourseReview {
    courses: Arc<dyn CourseRepository>,
    notifier: Arc<dyn Notifier>,
}

impl CourseReview {
    pub fn new(courses: Arc<dyn CourseRepository>, notifier: Arc<dyn Notifier>) -> Self {
        Self { courses, notifier }
    }

    pub async fn decide(
        &self,
        course_id: Uuid,
        reviewer_id: Uuid,
        decision: ReviewDecision,
    ) -> CoreResult<Course> {
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or_else(|| CoreError::NotFoundError(format!("course {}", course_id)))?;

        let next = plan_review(&course, decision, Utc::now())?;
        if !self.courses.compare_and_set(&course.guard(), &next).await? {
            return Err(CoreError::ConflictError(format!(
                "course {} changed during review",
                course_id
            )));
        }

        info!(%course_id, %reviewer_id, from = %course.status, to = %next.status, "Course reviewed");

        let event = LifecycleEvent::CourseReviewed(CourseReviewedEvent {
            course_id,
            instructor_id: next.instructor_id,
            reviewer_id,
            new_status: next.status.to_string(),
            timestamp: Utc::now().timestamp(),
        });
        if let Err(e) = self.notifier.notify(&event).await {
            warn!("Failed to notify review of course {}: {}", course_id, e);
        }

        Ok(next)
    }
}

pub fn plan_review(course: &Course, decision: ReviewDecision, now: DateTime<Utc>) -> CoreResult<Course> {
    if course.status != decision.source() {
        return Err(CoreError::ConflictError(format!(
            "cannot {:?} a course that is {}",
            decision, course.status
        )));
    }

    let mut next = course.clone();
    next.status = decision.target();
    if decision == ReviewDecision::Publish {
        next.has_unsaved_changes = false;
    }
    next.updated_at = now;
    next.sync_legacy_flags();
    Ok(next)
}
