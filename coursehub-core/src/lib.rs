pub mod filters;
pub mod models;
pub mod notify;
pub mod repository;
pub mod settings;

pub use filters::{BillFilter, CourseFilter, EnrollmentFilter, RefundFilter};
pub use models::{
    Bill, BillStatus, ContactChannel, ContactMethod, Course, CourseGuard, CourseStatus,
    Enrollment, EnrollmentStatus, RefundRequest, RefundStatus, RefundTransition,
};
pub use notify::{LogNotifier, Notifier};
pub use settings::{ReconciliationPolicy, RefundPolicy};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFoundError(String),
    #[error("Conflict: {0}")]
    ConflictError(String),
    #[error("Not authorized: {0}")]
    AuthorizationError(String),
    #[error("Storage error: {0}")]
    StorageError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl CoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::ConflictError(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFoundError(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
