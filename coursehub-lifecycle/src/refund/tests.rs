use super::*;
use async_trait::async_trait;
use chrono::DateTime;

use coursehub_core::filters::EnrollmentFilter;
use coursehub_core::models::{ContactChannel, Course, CourseStatus};
use coursehub_core::filters::{BillFilter, RefundFilter};
use coursehub_core::repository::{
    BillRepository, CascadeWrites, CourseRepository, EnrollmentRepository, RefundCascade,
    RefundRepository, RepoResult,
};
use coursehub_core::LogNotifier;

use crate::memory::InMemoryStore;

struct Scenario {
    store: Arc<InMemoryStore>,
    workflow: RefundWorkflow,
    course: Course,
    enrollment: Enrollment,
    bill: Bill,
}

/// Course with ten active students, one of whom paid 500 000 for it.
async fn scenario_with(policy: RefundPolicy) -> Scenario {
    let store = Arc::new(InMemoryStore::new());
    let mut course = Course::new(Uuid::new_v4(), "Systems Programming".to_string(), 650_000);
    course.status = CourseStatus::Published;
    course.sync_legacy_flags();
    store.insert_course(&course).await.unwrap();

    for _ in 0..9 {
        store
            .insert_enrollment(&Enrollment::new(Uuid::new_v4(), course.id))
            .await
            .unwrap();
    }
    let student_id = Uuid::new_v4();
    let enrollment = Enrollment::new(student_id, course.id);
    store.insert_enrollment(&enrollment).await.unwrap();
    store.set_total_students(course.id, 10).await.unwrap();

    let bill = Bill::completed(student_id, course.id, 500_000, Some("card".to_string()));
    store.insert_bill(&bill).await.unwrap();

    let workflow = RefundWorkflow::new(
        Repositories::from_store(store.clone()),
        Arc::new(LogNotifier),
        Arc::new(policy),
    );

    Scenario { store, workflow, course, enrollment, bill }
}

async fn scenario() -> Scenario {
    scenario_with(RefundPolicy::default()).await
}

fn create_cmd(s: &Scenario) -> CreateRefundCommand {
    CreateRefundCommand {
        student_id: s.enrollment.student_id,
        enrollment_id: s.enrollment.id,
        reason: "not helpful".to_string(),
        description: "The course did not cover async".to_string(),
        contact_method: ContactMethod::new(ContactChannel::Email, "student@example.com"),
        amount: None,
    }
}

fn approve_cmd(s: &Scenario, refund_id: Uuid) -> ApproveRefundCommand {
    ApproveRefundCommand {
        refund_id,
        teacher_id: s.course.instructor_id,
        notes: None,
        refund_method: Some("bank_transfer".to_string()),
    }
}

async fn total_students(s: &Scenario) -> i64 {
    s.store.get_course(s.course.id).await.unwrap().unwrap().total_students
}

#[tokio::test]
async fn test_end_to_end_refund_cascade() {
    let s = scenario().await;

    let refund = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();
    assert_eq!(refund.status, RefundStatus::Pending);
    assert_eq!(refund.amount, 500_000);
    assert_eq!(refund.teacher_id, s.course.instructor_id);
    assert_eq!(refund.bill_id, s.bill.id);

    let approved = s.workflow.approve(approve_cmd(&s, refund.id)).await.unwrap();
    assert_eq!(approved.refund.status, RefundStatus::Approved);
    assert_eq!(approved.refund.processed_by, Some(s.course.instructor_id));
    assert_eq!(approved.refund.refund_method.as_deref(), Some("bank_transfer"));
    assert!(approved.cascade.is_complete());

    let bill = s.store.get_bill(s.bill.id).await.unwrap().unwrap();
    assert_eq!(bill.status, BillStatus::Refunded);

    let enrollment = s.store.get_enrollment(s.enrollment.id).await.unwrap().unwrap();
    assert!(!enrollment.is_active);
    assert_eq!(enrollment.status, coursehub_core::EnrollmentStatus::Refunded);
    assert!(enrollment.refunded_at.is_some());

    assert_eq!(total_students(&s).await, 9);
    let active = s
        .store
        .count_enrollments(&EnrollmentFilter::active_in(s.course.id))
        .await
        .unwrap();
    assert_eq!(active, 9);
}

#[tokio::test]
async fn test_duplicate_pending_refund_is_conflict() {
    let s = scenario().await;
    s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();

    let second = s.workflow.create_refund_request(create_cmd(&s)).await;
    assert!(matches!(second, Err(CoreError::ConflictError(_))));
}

#[tokio::test]
async fn test_new_request_allowed_after_cancel() {
    let s = scenario().await;
    let first = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();
    s.workflow
        .cancel(CancelRefundCommand {
            refund_id: first.id,
            student_id: s.enrollment.student_id,
        })
        .await
        .unwrap();

    let second = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();
    assert_eq!(second.status, RefundStatus::Pending);
}

#[tokio::test]
async fn test_approving_twice_is_conflict_without_side_effects() {
    let s = scenario().await;
    let refund = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();
    s.workflow.approve(approve_cmd(&s, refund.id)).await.unwrap();

    let again = s.workflow.approve(approve_cmd(&s, refund.id)).await;
    assert!(matches!(again, Err(CoreError::ConflictError(_))));
    assert_eq!(total_students(&s).await, 9);
}

#[tokio::test]
async fn test_concurrent_approvals_cascade_once() {
    let s = scenario().await;
    let refund = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();
    let workflow = Arc::new(s.workflow);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let workflow = workflow.clone();
            let cmd = ApproveRefundCommand {
                refund_id: refund.id,
                teacher_id: s.course.instructor_id,
                notes: None,
                refund_method: None,
            };
            tokio::spawn(async move { workflow.approve(cmd).await })
        })
        .collect();

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) => assert!(e.is_conflict()),
        }
    }
    assert_eq!(wins, 1);

    let course = s.store.get_course(s.course.id).await.unwrap().unwrap();
    assert_eq!(course.total_students, 9);
}

#[tokio::test]
async fn test_amount_above_bill_is_validation_error() {
    let s = scenario().await;
    let mut cmd = create_cmd(&s);
    cmd.amount = Some(500_001);

    let result = s.workflow.create_refund_request(cmd).await;
    assert!(matches!(result, Err(CoreError::ValidationError(_))));
}

#[tokio::test]
async fn test_partial_amount_is_validation_error() {
    let s = scenario().await;
    let mut cmd = create_cmd(&s);
    cmd.amount = Some(200_000);

    let result = s.workflow.create_refund_request(cmd).await;
    assert!(matches!(result, Err(CoreError::ValidationError(_))));
    let pending = s
        .store
        .list_refunds(&RefundFilter::pending_for_enrollment(s.enrollment.id))
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_explicit_amount_equal_to_bill_is_accepted() {
    let s = scenario().await;
    let mut cmd = create_cmd(&s);
    cmd.amount = Some(500_000);

    let refund = s.workflow.create_refund_request(cmd).await.unwrap();
    assert_eq!(refund.amount, 500_000);
}

#[tokio::test]
async fn test_concurrent_requests_leave_one_pending() {
    let s = scenario().await;
    let workflow = Arc::new(s.workflow);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let workflow = workflow.clone();
            let cmd = CreateRefundCommand {
                student_id: s.enrollment.student_id,
                enrollment_id: s.enrollment.id,
                reason: "not helpful".to_string(),
                description: String::new(),
                contact_method: ContactMethod::new(ContactChannel::Email, "student@example.com"),
                amount: None,
            };
            tokio::spawn(async move { workflow.create_refund_request(cmd).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(e.is_conflict()),
        }
    }
    assert_eq!(created, 1);

    let pending = s
        .store
        .list_refunds(&RefundFilter::pending_for_enrollment(s.enrollment.id))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_rejection_leaves_other_records_untouched() {
    let s = scenario().await;
    let refund = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();

    let rejected = s
        .workflow
        .reject(RejectRefundCommand {
            refund_id: refund.id,
            teacher_id: s.course.instructor_id,
            reason: "policy".to_string(),
            notes: None,
        })
        .await
        .unwrap();
    assert_eq!(rejected.status, RefundStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("policy"));

    let bill = s.store.get_bill(s.bill.id).await.unwrap().unwrap();
    assert_eq!(bill.status, BillStatus::Completed);
    let enrollment = s.store.get_enrollment(s.enrollment.id).await.unwrap().unwrap();
    assert!(enrollment.is_active);
    assert_eq!(total_students(&s).await, 10);
}

#[tokio::test]
async fn test_reject_requires_reason() {
    let s = scenario().await;
    let refund = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();

    let result = s
        .workflow
        .reject(RejectRefundCommand {
            refund_id: refund.id,
            teacher_id: s.course.instructor_id,
            reason: "  ".to_string(),
            notes: None,
        })
        .await;
    assert!(matches!(result, Err(CoreError::ValidationError(_))));
}

#[tokio::test]
async fn test_only_course_teacher_may_decide() {
    let s = scenario().await;
    let refund = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();

    let mut cmd = approve_cmd(&s, refund.id);
    cmd.teacher_id = Uuid::new_v4();
    let result = s.workflow.approve(cmd).await;
    assert!(matches!(result, Err(CoreError::AuthorizationError(_))));
}

#[tokio::test]
async fn test_cancel_rules() {
    let s = scenario().await;
    let refund = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();

    let stranger = s
        .workflow
        .cancel(CancelRefundCommand {
            refund_id: refund.id,
            student_id: Uuid::new_v4(),
        })
        .await;
    assert!(matches!(stranger, Err(CoreError::AuthorizationError(_))));

    s.workflow.approve(approve_cmd(&s, refund.id)).await.unwrap();
    let late = s
        .workflow
        .cancel(CancelRefundCommand {
            refund_id: refund.id,
            student_id: s.enrollment.student_id,
        })
        .await;
    assert!(matches!(late, Err(CoreError::ConflictError(_))));
}

#[tokio::test]
async fn test_terminal_states_allow_no_transition() {
    let s = scenario().await;
    let refund = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();
    s.workflow
        .cancel(CancelRefundCommand {
            refund_id: refund.id,
            student_id: s.enrollment.student_id,
        })
        .await
        .unwrap();

    let approve = s.workflow.approve(approve_cmd(&s, refund.id)).await;
    assert!(matches!(approve, Err(CoreError::ConflictError(_))));
    let complete = s.workflow.complete(refund.id).await;
    assert!(matches!(complete, Err(CoreError::ConflictError(_))));
}

#[tokio::test]
async fn test_settlement_completes_approved_refund() {
    let s = scenario().await;
    let refund = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();
    s.workflow.approve(approve_cmd(&s, refund.id)).await.unwrap();

    let settled = s.workflow.complete(refund.id).await.unwrap();
    assert_eq!(settled.status, RefundStatus::Completed);
    assert!(s.workflow.complete(refund.id).await.is_err());
}

#[tokio::test]
async fn test_inactive_enrollment_cannot_be_refunded() {
    let s = scenario().await;
    s.store
        .deactivate_for_refund(s.enrollment.id, Utc::now())
        .await
        .unwrap();

    let result = s.workflow.create_refund_request(create_cmd(&s)).await;
    assert!(matches!(result, Err(CoreError::ValidationError(_))));
}

#[tokio::test]
async fn test_foreign_enrollment_is_unauthorized() {
    let s = scenario().await;
    let mut cmd = create_cmd(&s);
    cmd.student_id = Uuid::new_v4();

    let result = s.workflow.create_refund_request(cmd).await;
    assert!(matches!(result, Err(CoreError::AuthorizationError(_))));
}

#[tokio::test]
async fn test_missing_enrollment_is_not_found() {
    let s = scenario().await;
    let mut cmd = create_cmd(&s);
    cmd.enrollment_id = Uuid::new_v4();

    let result = s.workflow.create_refund_request(cmd).await;
    assert!(matches!(result, Err(CoreError::NotFoundError(_))));
}

#[tokio::test]
async fn test_blank_contact_is_validation_error() {
    let s = scenario().await;
    let mut cmd = create_cmd(&s);
    cmd.contact_method = ContactMethod::new(ContactChannel::Phone, "");

    let result = s.workflow.create_refund_request(cmd).await;
    assert!(matches!(result, Err(CoreError::ValidationError(_))));
}

#[tokio::test]
async fn test_already_refunded_bill_is_conflict() {
    let s = scenario().await;
    s.store.mark_refunded(s.bill.id, Utc::now()).await.unwrap();

    let result = s.workflow.create_refund_request(create_cmd(&s)).await;
    assert!(matches!(result, Err(CoreError::ConflictError(_))));
}

#[tokio::test]
async fn test_missing_bill_is_synthesized_from_course_price() {
    let s = scenario().await;
    let legacy = Enrollment::new(Uuid::new_v4(), s.course.id);
    s.store.insert_enrollment(&legacy).await.unwrap();

    let mut cmd = create_cmd(&s);
    cmd.student_id = legacy.student_id;
    cmd.enrollment_id = legacy.id;

    let refund = s.workflow.create_refund_request(cmd).await.unwrap();
    assert_eq!(refund.amount, s.course.price);
    let bill = s.store.get_bill(refund.bill_id).await.unwrap().unwrap();
    assert_eq!(bill.status, BillStatus::Completed);
    assert_eq!(bill.payment_method.as_deref(), Some("legacy"));
}

#[tokio::test]
async fn test_rejected_legacy_request_stores_no_bill() {
    let s = scenario().await;
    let free = Course::new(Uuid::new_v4(), "Intro to Git".to_string(), 0);
    s.store.insert_course(&free).await.unwrap();
    let legacy = Enrollment::new(Uuid::new_v4(), free.id);
    s.store.insert_enrollment(&legacy).await.unwrap();

    let mut cmd = create_cmd(&s);
    cmd.student_id = legacy.student_id;
    cmd.enrollment_id = legacy.id;

    let result = s.workflow.create_refund_request(cmd).await;
    assert!(matches!(result, Err(CoreError::ValidationError(_))));
    let bills = s
        .store
        .find_bills(&BillFilter::for_purchase(legacy.student_id, free.id))
        .await
        .unwrap();
    assert!(bills.is_empty());
}

#[tokio::test]
async fn test_concurrent_legacy_requests_synthesize_one_bill() {
    let s = scenario().await;
    let legacy = Enrollment::new(Uuid::new_v4(), s.course.id);
    s.store.insert_enrollment(&legacy).await.unwrap();
    let workflow = Arc::new(s.workflow);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let workflow = workflow.clone();
            let cmd = CreateRefundCommand {
                student_id: legacy.student_id,
                enrollment_id: legacy.id,
                reason: "never used it".to_string(),
                description: String::new(),
                contact_method: ContactMethod::new(ContactChannel::Email, "legacy@example.com"),
                amount: None,
            };
            tokio::spawn(async move { workflow.create_refund_request(cmd).await })
        })
        .collect();

    let mut refunds = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(refund) => refunds.push(refund),
            Err(e) => assert!(e.is_conflict()),
        }
    }
    assert_eq!(refunds.len(), 1);

    let bills = s
        .store
        .find_bills(&BillFilter::for_purchase(legacy.student_id, s.course.id))
        .await
        .unwrap();
    assert_eq!(bills.len(), 1);
    assert_eq!(bills[0].id, refunds[0].bill_id);
}

#[tokio::test]
async fn test_missing_bill_without_synthesis_is_not_found() {
    let s = scenario_with(RefundPolicy {
        synthesize_missing_bill: false,
        refund_window_days: None,
    })
    .await;
    let legacy = Enrollment::new(Uuid::new_v4(), s.course.id);
    s.store.insert_enrollment(&legacy).await.unwrap();

    let mut cmd = create_cmd(&s);
    cmd.student_id = legacy.student_id;
    cmd.enrollment_id = legacy.id;

    let result = s.workflow.create_refund_request(cmd).await;
    assert!(matches!(result, Err(CoreError::NotFoundError(_))));
}

#[tokio::test]
async fn test_refund_window_is_enforced() {
    let s = scenario_with(RefundPolicy {
        synthesize_missing_bill: true,
        refund_window_days: Some(7),
    })
    .await;
    let mut old = Enrollment::new(s.enrollment.student_id, Uuid::new_v4());
    old.enrolled_at = Utc::now() - Duration::days(30);
    s.store.insert_enrollment(&old).await.unwrap();

    let mut cmd = create_cmd(&s);
    cmd.enrollment_id = old.id;
    let result = s.workflow.create_refund_request(cmd).await;
    assert!(matches!(result, Err(CoreError::ValidationError(_))));

    // the fresh enrollment is inside the window
    assert!(s.workflow.create_refund_request(create_cmd(&s)).await.is_ok());
}

#[tokio::test]
async fn test_list_rejects_oversized_page() {
    let s = scenario().await;
    let filter = RefundFilter {
        limit: Some(10_000),
        ..Default::default()
    };
    assert!(matches!(
        s.workflow.list_refunds(&filter).await,
        Err(CoreError::ValidationError(_))
    ));
}

/// Enrollment store whose deactivation always fails, to exercise a broken cascade.
struct BrokenEnrollments(Arc<InMemoryStore>);

#[async_trait]
impl EnrollmentRepository for BrokenEnrollments {
    async fn insert_enrollment(&self, enrollment: &Enrollment) -> RepoResult<()> {
        self.0.insert_enrollment(enrollment).await
    }

    async fn get_enrollment(&self, id: Uuid) -> RepoResult<Option<Enrollment>> {
        self.0.get_enrollment(id).await
    }

    async fn list_enrollments(&self, filter: &EnrollmentFilter) -> RepoResult<Vec<Enrollment>> {
        self.0.list_enrollments(filter).await
    }

    async fn count_enrollments(&self, filter: &EnrollmentFilter) -> RepoResult<i64> {
        self.0.count_enrollments(filter).await
    }

    async fn deactivate_for_refund(&self, _id: Uuid, _at: DateTime<Utc>) -> RepoResult<bool> {
        Err("connection reset".into())
    }
}

#[tokio::test]
async fn test_stepwise_cascade_failure_still_approves() {
    let s = scenario().await;
    let mut repos = Repositories::from_store(s.store.clone());
    repos.enrollments = Arc::new(BrokenEnrollments(s.store.clone()));
    repos.cascade = None;
    let workflow = RefundWorkflow::new(repos, Arc::new(LogNotifier), Arc::new(RefundPolicy::default()));

    let refund = workflow.create_refund_request(create_cmd(&s)).await.unwrap();
    let approved = workflow.approve(approve_cmd(&s, refund.id)).await.unwrap();

    assert_eq!(approved.refund.status, RefundStatus::Approved);
    assert_eq!(approved.cascade.bill, StepOutcome::Applied);
    assert!(matches!(approved.cascade.enrollment, StepOutcome::Failed(_)));
    assert!(matches!(approved.cascade.course, StepOutcome::Skipped(_)));
    assert_eq!(approved.cascade.failed_steps(), vec!["enrollment"]);

    // no rollback of the committed steps
    let stored = s.store.get_refund(refund.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RefundStatus::Approved);
    let bill = s.store.get_bill(s.bill.id).await.unwrap().unwrap();
    assert_eq!(bill.status, BillStatus::Refunded);
    assert_eq!(total_students(&s).await, 10);
}

/// Store whose combined approval always fails part way through.
struct FailingCascade;

#[async_trait]
impl RefundCascade for FailingCascade {
    async fn approve_with_cascade(
        &self,
        _id: Uuid,
        _transition: &RefundTransition,
    ) -> RepoResult<Option<(RefundRequest, CascadeWrites)>> {
        Err("deadlock detected".into())
    }
}

#[tokio::test]
async fn test_failed_atomic_approval_changes_nothing() {
    let s = scenario().await;
    let mut repos = Repositories::from_store(s.store.clone());
    repos.cascade = Some(Arc::new(FailingCascade));
    let workflow = RefundWorkflow::new(repos, Arc::new(LogNotifier), Arc::new(RefundPolicy::default()));

    let refund = workflow.create_refund_request(create_cmd(&s)).await.unwrap();
    assert!(workflow.approve(approve_cmd(&s, refund.id)).await.is_err());

    let stored = s.store.get_refund(refund.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RefundStatus::Pending);
    let bill = s.store.get_bill(s.bill.id).await.unwrap().unwrap();
    assert_eq!(bill.status, BillStatus::Completed);
    let enrollment = s.store.get_enrollment(s.enrollment.id).await.unwrap().unwrap();
    assert!(enrollment.is_active);
    assert_eq!(total_students(&s).await, 10);
}

#[tokio::test]
async fn test_atomic_approval_reports_skipped_bill() {
    let s = scenario().await;
    let refund = s.workflow.create_refund_request(create_cmd(&s)).await.unwrap();
    s.store.mark_refunded(s.bill.id, Utc::now()).await.unwrap();

    let approved = s.workflow.approve(approve_cmd(&s, refund.id)).await.unwrap();
    assert!(matches!(approved.cascade.bill, StepOutcome::Skipped(_)));
    assert_eq!(approved.cascade.enrollment, StepOutcome::Applied);
    assert_eq!(approved.cascade.course, StepOutcome::Applied);
    assert!(approved.cascade.failed_steps().is_empty());
    assert_eq!(total_students(&s).await, 9);
}
