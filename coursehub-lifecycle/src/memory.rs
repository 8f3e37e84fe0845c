use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use coursehub_core::filters::{BillFilter, CourseFilter, EnrollmentFilter, RefundFilter};
use coursehub_core::models::{
    Bill, BillStatus, Course, CourseGuard, CourseStatus, Enrollment, RefundRequest, RefundStatus,
    RefundTransition,
};
use coursehub_core::repository::{
    BillRepository, CascadeWrites, CourseRepository, EnrollmentRepository, RefundCascade,
    RefundRepository, RepoResult,
};

/// Process-local store with the same conditional-write semantics as the
/// Postgres repositories. Each guard check and its write happen under one
/// write lock, which plays the role of the single `UPDATE ... WHERE`.
/// Operations that need several maps lock them in field order: courses,
/// enrollments, bills, refunds.
#[derive(Default)]
pub struct InMemoryStore {
    courses: RwLock<HashMap<Uuid, Course>>,
    enrollments: RwLock<HashMap<Uuid, Enrollment>>,
    bills: RwLock<HashMap<Uuid, Bill>>,
    refunds: RwLock<HashMap<Uuid, RefundRequest>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CourseRepository for InMemoryStore {
    async fn insert_course(&self, course: &Course) -> RepoResult<()> {
        let mut courses = self.courses.write().await;
        if courses.contains_key(&course.id) {
            return Err(format!("course {} already exists", course.id).into());
        }
        courses.insert(course.id, course.clone());
        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> RepoResult<Option<Course>> {
        Ok(self.courses.read().await.get(&id).cloned())
    }

    async fn list_courses(&self, filter: &CourseFilter) -> RepoResult<Vec<Course>> {
        let mut courses: Vec<Course> = self
            .courses
            .read()
            .await
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        courses.sort_by_key(|c| c.created_at);
        Ok(courses)
    }

    async fn compare_and_set(&self, expected: &CourseGuard, next: &Course) -> RepoResult<bool> {
        let mut courses = self.courses.write().await;
        let Some(current) = courses.get_mut(&expected.id) else {
            return Ok(false);
        };
        if !expected.holds_for(current) {
            return Ok(false);
        }
        current.status = next.status;
        current.is_published = next.is_published;
        current.is_approved = next.is_approved;
        current.has_unsaved_changes = next.has_unsaved_changes;
        current.submitted_for_review = next.submitted_for_review;
        current.submitted_at = next.submitted_at;
        current.updated_at = next.updated_at;
        Ok(true)
    }

    async fn mark_unsaved_changes(&self, id: Uuid) -> RepoResult<bool> {
        let mut courses = self.courses.write().await;
        match courses.get_mut(&id) {
            Some(course) if course.status == CourseStatus::Published => {
                course.has_unsaved_changes = true;
                course.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn adjust_total_students(&self, id: Uuid, delta: i64) -> RepoResult<()> {
        let mut courses = self.courses.write().await;
        let course = courses
            .get_mut(&id)
            .ok_or_else(|| format!("course {} not found", id))?;
        course.total_students = (course.total_students + delta).max(0);
        Ok(())
    }

    async fn set_total_students(&self, id: Uuid, value: i64) -> RepoResult<()> {
        let mut courses = self.courses.write().await;
        let course = courses
            .get_mut(&id)
            .ok_or_else(|| format!("course {} not found", id))?;
        course.total_students = value;
        Ok(())
    }

    async fn recompute_total_students(&self, id: Uuid) -> RepoResult<(i64, i64)> {
        let mut courses = self.courses.write().await;
        let enrollments = self.enrollments.read().await;
        let course = courses
            .get_mut(&id)
            .ok_or_else(|| format!("course {} not found", id))?;

        let actual = enrollments
            .values()
            .filter(|e| e.course_id == id && e.is_active)
            .count() as i64;
        let recorded = course.total_students;
        course.total_students = actual;
        Ok((recorded, actual))
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryStore {
    async fn insert_enrollment(&self, enrollment: &Enrollment) -> RepoResult<()> {
        self.enrollments
            .write()
            .await
            .insert(enrollment.id, enrollment.clone());
        Ok(())
    }

    async fn get_enrollment(&self, id: Uuid) -> RepoResult<Option<Enrollment>> {
        Ok(self.enrollments.read().await.get(&id).cloned())
    }

    async fn list_enrollments(&self, filter: &EnrollmentFilter) -> RepoResult<Vec<Enrollment>> {
        Ok(self
            .enrollments
            .read()
            .await
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn count_enrollments(&self, filter: &EnrollmentFilter) -> RepoResult<i64> {
        let count = self
            .enrollments
            .read()
            .await
            .values()
            .filter(|e| filter.matches(e))
            .count();
        Ok(count as i64)
    }

    async fn deactivate_for_refund(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<bool> {
        let mut enrollments = self.enrollments.write().await;
        match enrollments.get_mut(&id) {
            Some(enrollment) if enrollment.is_active => {
                enrollment.mark_refunded(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl BillRepository for InMemoryStore {
    async fn insert_bill(&self, bill: &Bill) -> RepoResult<()> {
        self.bills.write().await.insert(bill.id, bill.clone());
        Ok(())
    }

    async fn get_bill(&self, id: Uuid) -> RepoResult<Option<Bill>> {
        Ok(self.bills.read().await.get(&id).cloned())
    }

    async fn find_bills(&self, filter: &BillFilter) -> RepoResult<Vec<Bill>> {
        let mut bills: Vec<Bill> = self
            .bills
            .read()
            .await
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        // newest first, like the SQL repository
        bills.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bills)
    }

    async fn mark_refunded(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<bool> {
        let mut bills = self.bills.write().await;
        match bills.get_mut(&id) {
            Some(bill) if bill.status == BillStatus::Completed => {
                bill.status = BillStatus::Refunded;
                bill.refunded_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl RefundRepository for InMemoryStore {
    async fn insert_pending(&self, refund: &RefundRequest, synthesized_bill: Option<&Bill>) -> RepoResult<bool> {
        let mut bills = self.bills.write().await;
        let mut refunds = self.refunds.write().await;
        let duplicate = refunds.values().any(|r| {
            r.enrollment_id == refund.enrollment_id && r.status == RefundStatus::Pending
        });
        if duplicate {
            return Ok(false);
        }
        if let Some(bill) = synthesized_bill {
            bills.insert(bill.id, bill.clone());
        }
        refunds.insert(refund.id, refund.clone());
        Ok(true)
    }

    async fn get_refund(&self, id: Uuid) -> RepoResult<Option<RefundRequest>> {
        Ok(self.refunds.read().await.get(&id).cloned())
    }

    async fn list_refunds(&self, filter: &RefundFilter) -> RepoResult<Vec<RefundRequest>> {
        let mut refunds: Vec<RefundRequest> = self
            .refunds
            .read()
            .await
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        refunds.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        refunds.truncate(filter.page_size() as usize);
        Ok(refunds)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: RefundStatus,
        transition: &RefundTransition,
    ) -> RepoResult<Option<RefundRequest>> {
        let mut refunds = self.refunds.write().await;
        match refunds.get_mut(&id) {
            Some(refund) if refund.status == from => {
                refund.apply(transition);
                Ok(Some(refund.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl RefundCascade for InMemoryStore {
    async fn approve_with_cascade(
        &self,
        id: Uuid,
        transition: &RefundTransition,
    ) -> RepoResult<Option<(RefundRequest, CascadeWrites)>> {
        let mut courses = self.courses.write().await;
        let mut enrollments = self.enrollments.write().await;
        let mut bills = self.bills.write().await;
        let mut refunds = self.refunds.write().await;

        let Some(refund) = refunds.get_mut(&id) else {
            return Ok(None);
        };
        if refund.status != RefundStatus::Pending {
            return Ok(None);
        }
        refund.apply(transition);
        let at = refund.processed_at.unwrap_or_else(Utc::now);

        let bill_refunded = match bills.get_mut(&refund.bill_id) {
            Some(bill) if bill.status == BillStatus::Completed => {
                bill.status = BillStatus::Refunded;
                bill.refunded_at = Some(at);
                true
            }
            _ => false,
        };
        let enrollment_deactivated = match enrollments.get_mut(&refund.enrollment_id) {
            Some(enrollment) if enrollment.is_active => {
                enrollment.mark_refunded(at);
                true
            }
            _ => false,
        };
        let course_decremented = match courses.get_mut(&refund.course_id) {
            Some(course) if enrollment_deactivated => {
                course.total_students = (course.total_students - 1).max(0);
                true
            }
            _ => false,
        };

        Ok(Some((
            refund.clone(),
            CascadeWrites {
                bill_refunded,
                enrollment_deactivated,
                course_decremented,
            },
        )))
    }
}
