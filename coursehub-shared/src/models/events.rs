use uuid::Uuid;

/// Kafka topics the lifecycle publishes to.
pub mod topics {
    pub const COURSE_SUBMITTED: &str = "course.submitted";
    pub const COURSE_REVIEWED: &str = "course.reviewed";
    pub const REFUND_REQUESTED: &str = "refund.requested";
    pub const REFUND_APPROVED: &str = "refund.approved";
    pub const REFUND_REJECTED: &str = "refund.rejected";
    pub const REFUND_CANCELLED: &str = "refund.cancelled";
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct CourseSubmittedEvent {
    pub course_id: Uuid,
    pub instructor_id: Uuid,
    pub previous_status: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct CourseReviewedEvent {
    pub course_id: Uuid,
    pub instructor_id: Uuid,
    pub reviewer_id: Uuid,
    pub new_status: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct RefundRequestedEvent {
    pub refund_id: Uuid,
    pub student_id: Uuid,
    pub teacher_id: Uuid,
    pub course_id: Uuid,
    pub amount: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct RefundProcessedEvent {
    pub refund_id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub processed_by: Uuid,
    pub status: String,
    pub amount: i64,
    pub reason: Option<String>,
    pub timestamp: i64,
}

/// Everything the notification collaborator can be told about.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    CourseSubmitted(CourseSubmittedEvent),
    CourseReviewed(CourseReviewedEvent),
    RefundRequested(RefundRequestedEvent),
    RefundApproved(RefundProcessedEvent),
    RefundRejected(RefundProcessedEvent),
    RefundCancelled(RefundProcessedEvent),
}

impl LifecycleEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            LifecycleEvent::CourseSubmitted(_) => topics::COURSE_SUBMITTED,
            LifecycleEvent::CourseReviewed(_) => topics::COURSE_REVIEWED,
            LifecycleEvent::RefundRequested(_) => topics::REFUND_REQUESTED,
            LifecycleEvent::RefundApproved(_) => topics::REFUND_APPROVED,
            LifecycleEvent::RefundRejected(_) => topics::REFUND_REJECTED,
            LifecycleEvent::RefundCancelled(_) => topics::REFUND_CANCELLED,
        }
    }

    /// Partition key: events about the same aggregate stay ordered.
    pub fn key(&self) -> String {
        match self {
            LifecycleEvent::CourseSubmitted(e) => e.course_id.to_string(),
            LifecycleEvent::CourseReviewed(e) => e.course_id.to_string(),
            LifecycleEvent::RefundRequested(e) => e.refund_id.to_string(),
            LifecycleEvent::RefundApproved(e)
            | LifecycleEvent::RefundRejected(e)
            | LifecycleEvent::RefundCancelled(e) => e.refund_id.to_string(),
        }
    }
}
