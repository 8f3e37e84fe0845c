use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::filters::{BillFilter, CourseFilter, EnrollmentFilter, RefundFilter};
use crate::models::{Bill, Course, CourseGuard, Enrollment, RefundRequest, RefundStatus, RefundTransition};

pub type RepoResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Repository trait for course records
#[async_trait]
pub trait CourseRepository: Send + Sync {
    async fn insert_course(&self, course: &Course) -> RepoResult<()>;

    async fn get_course(&self, id: Uuid) -> RepoResult<Option<Course>>;

    async fn list_courses(&self, filter: &CourseFilter) -> RepoResult<Vec<Course>>;

    /// Persist the lifecycle fields of `next` only if the stored row still
    /// matches `expected`. Returns `false` when another writer got there first.
    async fn compare_and_set(&self, expected: &CourseGuard, next: &Course) -> RepoResult<bool>;

    /// Set `has_unsaved_changes` on a published course. Returns `false` when the
    /// course is not published.
    async fn mark_unsaved_changes(&self, id: Uuid) -> RepoResult<bool>;

    /// Relative change of the student aggregate, floored at zero.
    async fn adjust_total_students(&self, id: Uuid, delta: i64) -> RepoResult<()>;

    /// Absolute overwrite.
    async fn set_total_students(&self, id: Uuid, value: i64) -> RepoResult<()>;

    /// Recount active enrollments and store the result as one atomic step.
    /// Returns `(recorded, actual)`: the value before and after.
    async fn recompute_total_students(&self, id: Uuid) -> RepoResult<(i64, i64)>;
}

/// Repository trait for enrollment records
#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    async fn insert_enrollment(&self, enrollment: &Enrollment) -> RepoResult<()>;

    async fn get_enrollment(&self, id: Uuid) -> RepoResult<Option<Enrollment>>;

    async fn list_enrollments(&self, filter: &EnrollmentFilter) -> RepoResult<Vec<Enrollment>>;

    async fn count_enrollments(&self, filter: &EnrollmentFilter) -> RepoResult<i64>;

    /// Flip an active enrollment to refunded. Returns `false` if it was already inactive.
    async fn deactivate_for_refund(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<bool>;
}

/// Repository trait for bills produced by the payment collaborator
#[async_trait]
pub trait BillRepository: Send + Sync {
    async fn insert_bill(&self, bill: &Bill) -> RepoResult<()>;

    async fn get_bill(&self, id: Uuid) -> RepoResult<Option<Bill>>;

    async fn find_bills(&self, filter: &BillFilter) -> RepoResult<Vec<Bill>>;

    /// `completed -> refunded`, at most once. Returns `false` when the bill was
    /// not in `completed`.
    async fn mark_refunded(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<bool>;
}

/// Repository trait for refund requests
#[async_trait]
pub trait RefundRepository: Send + Sync {
    /// Insert a pending request. Returns `false` if the enrollment already has
    /// a pending request; the check and the insert are one atomic step.
    /// `synthesized_bill` is stored in the same step and only if the request is.
    async fn insert_pending(&self, refund: &RefundRequest, synthesized_bill: Option<&Bill>) -> RepoResult<bool>;

    async fn get_refund(&self, id: Uuid) -> RepoResult<Option<RefundRequest>>;

    async fn list_refunds(&self, filter: &RefundFilter) -> RepoResult<Vec<RefundRequest>>;

    /// Conditional status write: applies `transition` only while the stored
    /// status is still `from`. Returns the updated request, or `None` if the
    /// guard no longer held.
    async fn transition(
        &self,
        id: Uuid,
        from: RefundStatus,
        transition: &RefundTransition,
    ) -> RepoResult<Option<RefundRequest>>;
}

/// Rows touched by an atomic approval besides the refund itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeWrites {
    pub bill_refunded: bool,
    pub enrollment_deactivated: bool,
    pub course_decremented: bool,
}

/// Stores that can span records in one unit of work.
#[async_trait]
pub trait RefundCascade: Send + Sync {
    /// `pending -> approved` together with the Bill, Enrollment and Course
    /// writes, all or nothing. Returns `None` when the request was no longer
    /// pending; nothing is written in that case.
    async fn approve_with_cascade(
        &self,
        id: Uuid,
        transition: &RefundTransition,
    ) -> RepoResult<Option<(RefundRequest, CascadeWrites)>>;
}
