use chrono::{DateTime, Utc};
use coursehub_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::CoreError;

// ============================================================================
// Course
// ============================================================================

/// Publication stage of a course
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    NeedsRevision,
    Published,
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Draft => "draft",
            CourseStatus::Submitted => "submitted",
            CourseStatus::Approved => "approved",
            CourseStatus::Rejected => "rejected",
            CourseStatus::NeedsRevision => "needs_revision",
            CourseStatus::Published => "published",
        }
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourseStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CourseStatus::Draft),
            "submitted" => Ok(CourseStatus::Submitted),
            "approved" => Ok(CourseStatus::Approved),
            "rejected" => Ok(CourseStatus::Rejected),
            "needs_revision" => Ok(CourseStatus::NeedsRevision),
            "published" => Ok(CourseStatus::Published),
            other => Err(CoreError::ValidationError(format!("unknown course status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub title: String,
    pub price: i64,
    pub status: CourseStatus,
    /// Legacy flag, mirrors `status == published`
    pub is_published: bool,
    /// Legacy flag, mirrors `status ∈ {approved, published}`
    pub is_approved: bool,
    pub has_unsaved_changes: bool,
    pub submitted_for_review: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub total_students: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Course {
    pub fn new(instructor_id: Uuid, title: String, price: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            instructor_id,
            title,
            price,
            status: CourseStatus::Draft,
            is_published: false,
            is_approved: false,
            has_unsaved_changes: false,
            submitted_for_review: false,
            submitted_at: None,
            total_students: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, instructor_id: Uuid) -> bool {
        self.instructor_id == instructor_id
    }

    /// Recompute the legacy booleans from `status`.
    pub fn sync_legacy_flags(&mut self) {
        self.is_published = self.status == CourseStatus::Published;
        self.is_approved = matches!(self.status, CourseStatus::Approved | CourseStatus::Published);
    }

    /// Snapshot of the fields a lifecycle decision was made on.
    pub fn guard(&self) -> CourseGuard {
        CourseGuard {
            id: self.id,
            status: self.status,
            submitted_for_review: self.submitted_for_review,
            has_unsaved_changes: self.has_unsaved_changes,
        }
    }
}

/// Precondition of an optimistic course write: the row must still look like this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseGuard {
    pub id: Uuid,
    pub status: CourseStatus,
    pub submitted_for_review: bool,
    pub has_unsaved_changes: bool,
}

impl CourseGuard {
    pub fn holds_for(&self, course: &Course) -> bool {
        course.id == self.id
            && course.status == self.status
            && course.submitted_for_review == self.submitted_for_review
            && course.has_unsaved_changes == self.has_unsaved_changes
    }
}

// ============================================================================
// Enrollment
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Refunded,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Refunded => "refunded",
            EnrollmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "completed" => Ok(EnrollmentStatus::Completed),
            "refunded" => Ok(EnrollmentStatus::Refunded),
            "cancelled" => Ok(EnrollmentStatus::Cancelled),
            other => Err(CoreError::ValidationError(format!("unknown enrollment status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub is_active: bool,
    pub status: EnrollmentStatus,
    pub progress: i32,
    pub enrolled_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn new(student_id: Uuid, course_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            course_id,
            is_active: true,
            status: EnrollmentStatus::Active,
            progress: 0,
            enrolled_at: Utc::now(),
            refunded_at: None,
        }
    }

    /// Deactivate after an approved refund (never delete)
    pub fn mark_refunded(&mut self, at: DateTime<Utc>) {
        self.is_active = false;
        self.status = EnrollmentStatus::Refunded;
        self.refunded_at = Some(at);
    }
}

// ============================================================================
// Bill
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Pending,
    Completed,
    Refunded,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "pending",
            BillStatus::Completed => "completed",
            BillStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for BillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BillStatus::Pending),
            "completed" => Ok(BillStatus::Completed),
            "refunded" => Ok(BillStatus::Refunded),
            other => Err(CoreError::ValidationError(format!("unknown bill status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub amount: i64,
    pub status: BillStatus,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Bill {
    pub fn completed(student_id: Uuid, course_id: Uuid, amount: i64, payment_method: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            course_id,
            amount,
            status: BillStatus::Completed,
            payment_method,
            created_at: Utc::now(),
            refunded_at: None,
        }
    }
}

// ============================================================================
// Refund request
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Approved => "approved",
            RefundStatus::Rejected => "rejected",
            RefundStatus::Cancelled => "cancelled",
            RefundStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RefundStatus::Pending)
    }

    /// Approved or settled: the money actually went back.
    pub fn is_granted(&self) -> bool {
        matches!(self, RefundStatus::Approved | RefundStatus::Completed)
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RefundStatus::Pending),
            "approved" => Ok(RefundStatus::Approved),
            "rejected" => Ok(RefundStatus::Rejected),
            "cancelled" => Ok(RefundStatus::Cancelled),
            "completed" => Ok(RefundStatus::Completed),
            other => Err(CoreError::ValidationError(format!("unknown refund status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContactChannel {
    Email,
    Phone,
    Chat,
}

impl ContactChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactChannel::Email => "email",
            ContactChannel::Phone => "phone",
            ContactChannel::Chat => "chat",
        }
    }
}

impl FromStr for ContactChannel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(ContactChannel::Email),
            "phone" => Ok(ContactChannel::Phone),
            "chat" => Ok(ContactChannel::Chat),
            other => Err(CoreError::ValidationError(format!("unknown contact channel '{}'", other))),
        }
    }
}

/// How the student wants to be reached about the refund
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactMethod {
    pub channel: ContactChannel,
    pub value: Masked<String>,
}

impl ContactMethod {
    pub fn new(channel: ContactChannel, value: impl Into<String>) -> Self {
        Self { channel, value: Masked(value.into()) }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.value.is_blank() {
            return Err(CoreError::ValidationError(format!(
                "contact {} must not be empty",
                self.channel.as_str()
            )));
        }
        if self.channel == ContactChannel::Email && !self.value.expose().contains('@') {
            return Err(CoreError::ValidationError("contact email is malformed".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: Uuid,
    pub student_id: Uuid,
    pub teacher_id: Uuid,
    pub course_id: Uuid,
    pub enrollment_id: Uuid,
    pub bill_id: Uuid,
    pub amount: i64,
    pub reason: String,
    pub description: String,
    pub contact_method: ContactMethod,
    pub status: RefundStatus,
    pub requested_at: DateTime<Utc>,
    pub processed_by: Option<Uuid>,
    pub processed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub refund_method: Option<String>,
    pub notes: Option<String>,
}

impl RefundRequest {
    /// Apply a transition in memory; stores call this once their guard passed.
    pub fn apply(&mut self, transition: &RefundTransition) {
        self.status = transition.to;
        if transition.processed_by.is_some() {
            self.processed_by = transition.processed_by;
        }
        if transition.processed_at.is_some() {
            self.processed_at = transition.processed_at;
        }
        if transition.rejection_reason.is_some() {
            self.rejection_reason = transition.rejection_reason.clone();
        }
        if transition.refund_method.is_some() {
            self.refund_method = transition.refund_method.clone();
        }
        if transition.notes.is_some() {
            self.notes = transition.notes.clone();
        }
    }
}

/// Fields written by a refund status change. `None` leaves the column untouched.
#[derive(Debug, Clone)]
pub struct RefundTransition {
    pub to: RefundStatus,
    pub processed_by: Option<Uuid>,
    pub processed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub refund_method: Option<String>,
    pub notes: Option<String>,
}

impl RefundTransition {
    pub fn to(status: RefundStatus) -> Self {
        Self {
            to: status,
            processed_by: None,
            processed_at: None,
            rejection_reason: None,
            refund_method: None,
            notes: None,
        }
    }

    pub fn processed(mut self, by: Uuid, at: DateTime<Utc>) -> Self {
        self.processed_by = Some(by);
        self.processed_at = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip_through_storage_form() {
        for status in [
            CourseStatus::Draft,
            CourseStatus::Submitted,
            CourseStatus::Approved,
            CourseStatus::Rejected,
            CourseStatus::NeedsRevision,
            CourseStatus::Published,
        ] {
            assert_eq!(status.as_str().parse::<CourseStatus>().unwrap(), status);
        }
        assert!("archived".parse::<CourseStatus>().is_err());
    }

    #[test]
    fn test_legacy_flags_follow_status() {
        let mut course = Course::new(Uuid::new_v4(), "Rust 101".to_string(), 500_000);
        course.status = CourseStatus::Published;
        course.sync_legacy_flags();
        assert!(course.is_published && course.is_approved);

        course.status = CourseStatus::Submitted;
        course.sync_legacy_flags();
        assert!(!course.is_published && !course.is_approved);
    }

    #[test]
    fn test_guard_detects_changed_flags() {
        let mut course = Course::new(Uuid::new_v4(), "Rust 101".to_string(), 0);
        let guard = course.guard();
        assert!(guard.holds_for(&course));

        course.submitted_for_review = true;
        assert!(!guard.holds_for(&course));
    }

    #[test]
    fn test_refund_terminal_states() {
        assert!(!RefundStatus::Pending.is_terminal());
        for status in [
            RefundStatus::Approved,
            RefundStatus::Rejected,
            RefundStatus::Cancelled,
            RefundStatus::Completed,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn test_contact_method_validation() {
        assert!(ContactMethod::new(ContactChannel::Phone, "0901234567").validate().is_ok());
        assert!(ContactMethod::new(ContactChannel::Phone, "  ").validate().is_err());
        assert!(ContactMethod::new(ContactChannel::Email, "not-an-email").validate().is_err());
    }
}
