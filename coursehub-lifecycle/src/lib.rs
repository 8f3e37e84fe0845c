pub mod course;
pub mod memory;
pub mod reconciliation;
pub mod refund;
pub mod review;

use std::sync::Arc;

use coursehub_core::repository::{
    BillRepository, CourseRepository, EnrollmentRepository, RefundCascade, RefundRepository,
};

pub use course::{CourseLifecycle, SubmitCourseCommand};
pub use memory::InMemoryStore;
pub use reconciliation::{Anomaly, CourseDrift, ReconciliationJob, ReconciliationReport};
pub use refund::{
    ApproveRefundCommand, ApprovedRefund, CancelRefundCommand, CascadeReport, CreateRefundCommand,
    RefundWorkflow, RejectRefundCommand, StepOutcome,
};
pub use review::{CourseReview, ReviewDecision};

/// One handle per entity store. Services hold the handles they need.
#[derive(Clone)]
pub struct Repositories {
    pub courses: Arc<dyn CourseRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub bills: Arc<dyn BillRepository>,
    pub refunds: Arc<dyn RefundRepository>,
    /// Set when the store can run a refund approval and its cascade as one
    /// unit. Without it the cascade runs step by step.
    pub cascade: Option<Arc<dyn RefundCascade>>,
}

impl Repositories {
    /// Wire all four handles to a single backing store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CourseRepository
            + EnrollmentRepository
            + BillRepository
            + RefundRepository
            + RefundCascade
            + 'static,
    {
        Self {
            courses: store.clone(),
            enrollments: store.clone(),
            bills: store.clone(),
            refunds: store.clone(),
            cascade: Some(store),
        }
    }
}
