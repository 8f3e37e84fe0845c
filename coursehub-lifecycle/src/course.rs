use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use coursehub_core::models::{Course, CourseStatus};
use coursehub_core::repository::CourseRepository;
use coursehub_core::{CoreError, CoreResult, Notifier};
use coursehub_shared::models::events::{CourseSubmittedEvent, LifecycleEvent};

/// Instructor asks for a course to be (re)reviewed
#[derive(Debug, Clone)]
pub struct SubmitCourseCommand {
    pub course_id: Uuid,
    pub instructor_id: Uuid,
}

/// Owns the instructor-facing half of the course state machine.
pub struct CourseLifecycle {
    courses: Arc<dyn CourseRepository>,
    notifier: Arc<dyn Notifier>,
}

impl CourseLifecycle {
    pub fn new(courses: Arc<dyn CourseRepository>, notifier: Arc<dyn Notifier>) -> Self {
        Self { courses, notifier }
    }

    /// draft | published | rejected | needs_revision → submitted
    pub async fn submit_for_review(&self, cmd: SubmitCourseCommand) -> CoreResult<Course> {
        let course = self.load_owned(cmd.course_id, cmd.instructor_id).await?;
        let next = plan_submission(&course, Utc::now())?;

        if !self.courses.compare_and_set(&course.guard(), &next).await? {
            return Err(CoreError::ConflictError(format!(
                "course {} changed while being submitted",
                course.id
            )));
        }

        info!(
            course_id = %course.id,
            from = %course.status,
            "Course submitted for review"
        );

        let event = LifecycleEvent::CourseSubmitted(CourseSubmittedEvent {
            course_id: next.id,
            instructor_id: next.instructor_id,
            previous_status: course.status.to_string(),
            timestamp: Utc::now().timestamp(),
        });
        if let Err(e) = self.notifier.notify(&event).await {
            warn!("Failed to notify course submission for {}: {}", next.id, e);
        }

        Ok(next)
    }

    /// Withdrawing a pending submission is not offered to instructors.
    pub async fn withdraw_submission(&self, cmd: SubmitCourseCommand) -> CoreResult<Course> {
        warn!(course_id = %cmd.course_id, instructor_id = %cmd.instructor_id, "Refused submission withdrawal");
        Err(CoreError::AuthorizationError(
            "submissions cannot be withdrawn".to_string(),
        ))
    }

    /// Publish/unpublish belongs to administrators, never to the instructor surface.
    pub async fn set_published(&self, cmd: SubmitCourseCommand, publish: bool) -> CoreResult<Course> {
        warn!(
            course_id = %cmd.course_id,
            instructor_id = %cmd.instructor_id,
            publish,
            "Refused instructor publish toggle"
        );
        Err(CoreError::AuthorizationError(
            "only administrators can publish or unpublish courses".to_string(),
        ))
    }

    /// Side effect of an instructor edit: a published course now differs from
    /// what was reviewed. Other states are left as they are.
    pub async fn record_edit(&self, course_id: Uuid, instructor_id: Uuid) -> CoreResult<Course> {
        let course = self.load_owned(course_id, instructor_id).await?;
        if course.status == CourseStatus::Published && !course.has_unsaved_changes {
            self.courses.mark_unsaved_changes(course_id).await?;
        }
        self.courses
            .get_course(course_id)
            .await?
            .ok_or_else(|| CoreError::NotFoundError(format!("course {}", course_id)))
    }

    async fn load_owned(&self, course_id: Uuid, instructor_id: Uuid) -> CoreResult<Course> {
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or_else(|| CoreError::NotFoundError(format!("course {}", course_id)))?;

        if !course.is_owned_by(instructor_id) {
            return Err(CoreError::AuthorizationError(format!(
                "instructor {} does not own course {}",
                instructor_id, course_id
            )));
        }
        Ok(course)
    }
}

/// Decide the submitted form of `course`, or why it cannot be submitted.
/// Never touches storage.
pub fn plan_submission(course: &Course, now: DateTime<Utc>) -> CoreResult<Course> {
    let mut next = course.clone();

    match course.status {
        CourseStatus::Draft => {
            if course.submitted_for_review {
                return Err(CoreError::ConflictError(
                    "draft has already been submitted for review".to_string(),
                ));
            }
        }
        CourseStatus::Published => {
            if !course.has_unsaved_changes {
                return Err(CoreError::ConflictError(
                    "published course has no changes to review".to_string(),
                ));
            }
            next.has_unsaved_changes = false;
        }
        CourseStatus::Rejected | CourseStatus::NeedsRevision => {
            next.has_unsaved_changes = false;
        }
        CourseStatus::Submitted | CourseStatus::Approved => {
            return Err(CoreError::ConflictError(format!(
                "course is {} and cannot be submitted",
                course.status
            )));
        }
    }

    next.status = CourseStatus::Submitted;
    next.submitted_at = Some(now);
    next.submitted_for_review = true;
    next.updated_at = now;
    next.sync_legacy_flags();
    Ok(next)
}
