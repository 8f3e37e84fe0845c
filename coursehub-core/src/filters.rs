//! Typed query filters, one per entity. Every field is optional and the set
//! fields are AND-ed together.

use serde::Deserialize;
use uuid::Uuid;

use crate::models::{Bill, BillStatus, Course, CourseStatus, Enrollment, EnrollmentStatus, RefundRequest, RefundStatus};
use crate::CoreError;

pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourseFilter {
    pub instructor_id: Option<Uuid>,
    pub status: Option<CourseStatus>,
}

impl CourseFilter {
    pub fn matches(&self, course: &Course) -> bool {
        self.instructor_id.map_or(true, |id| course.instructor_id == id)
            && self.status.map_or(true, |s| course.status == s)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrollmentFilter {
    pub course_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub is_active: Option<bool>,
    pub status: Option<EnrollmentStatus>,
}

impl EnrollmentFilter {
    /// The population counted into `Course::total_students`
    pub fn active_in(course_id: Uuid) -> Self {
        Self {
            course_id: Some(course_id),
            is_active: Some(true),
            ..Default::default()
        }
    }

    pub fn matches(&self, enrollment: &Enrollment) -> bool {
        self.course_id.map_or(true, |id| enrollment.course_id == id)
            && self.student_id.map_or(true, |id| enrollment.student_id == id)
            && self.is_active.map_or(true, |a| enrollment.is_active == a)
            && self.status.map_or(true, |s| enrollment.status == s)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BillFilter {
    pub student_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    pub status: Option<BillStatus>,
}

impl BillFilter {
    pub fn for_purchase(student_id: Uuid, course_id: Uuid) -> Self {
        Self {
            student_id: Some(student_id),
            course_id: Some(course_id),
            status: None,
        }
    }

    pub fn matches(&self, bill: &Bill) -> bool {
        self.student_id.map_or(true, |id| bill.student_id == id)
            && self.course_id.map_or(true, |id| bill.course_id == id)
            && self.status.map_or(true, |s| bill.status == s)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefundFilter {
    pub student_id: Option<Uuid>,
    pub teacher_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    pub enrollment_id: Option<Uuid>,
    pub bill_id: Option<Uuid>,
    pub status: Option<RefundStatus>,
    pub limit: Option<u32>,
}

impl RefundFilter {
    pub fn pending_for_enrollment(enrollment_id: Uuid) -> Self {
        Self {
            enrollment_id: Some(enrollment_id),
            status: Some(RefundStatus::Pending),
            ..Default::default()
        }
    }

    pub fn for_bill(bill_id: Uuid) -> Self {
        Self {
            bill_id: Some(bill_id),
            ..Default::default()
        }
    }

    /// Boundary check for filters that arrive from callers.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(limit) = self.limit {
            if limit == 0 || limit > MAX_PAGE_SIZE {
                return Err(CoreError::ValidationError(format!(
                    "limit must be between 1 and {}",
                    MAX_PAGE_SIZE
                )));
            }
        }
        Ok(())
    }

    pub fn page_size(&self) -> u32 {
        self.limit.unwrap_or(MAX_PAGE_SIZE)
    }

    pub fn matches(&self, refund: &RefundRequest) -> bool {
        self.student_id.map_or(true, |id| refund.student_id == id)
            && self.teacher_id.map_or(true, |id| refund.teacher_id == id)
            && self.course_id.map_or(true, |id| refund.course_id == id)
            && self.enrollment_id.map_or(true, |id| refund.enrollment_id == id)
            && self.bill_id.map_or(true, |id| refund.bill_id == id)
            && self.status.map_or(true, |s| refund.status == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_in_ignores_inactive_enrollments() {
        let course_id = Uuid::new_v4();
        let filter = EnrollmentFilter::active_in(course_id);

        let mut enrollment = Enrollment::new(Uuid::new_v4(), course_id);
        assert!(filter.matches(&enrollment));

        enrollment.mark_refunded(chrono::Utc::now());
        assert!(!filter.matches(&enrollment));
        assert!(!filter.matches(&Enrollment::new(Uuid::new_v4(), Uuid::new_v4())));
    }

    #[test]
    fn test_refund_filter_limit_bounds() {
        assert!(RefundFilter::default().validate().is_ok());
        let zero = RefundFilter { limit: Some(0), ..Default::default() };
        assert!(zero.validate().is_err());
        let huge = RefundFilter { limit: Some(MAX_PAGE_SIZE + 1), ..Default::default() };
        assert!(huge.validate().is_err());
    }
}
