//! Periodic consistency pass. Recomputes `Course::total_students` from the
//! active enrollments and flags refund side effects that have no granted
//! refund behind them. Safe to run any number of times.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use coursehub_core::filters::{BillFilter, CourseFilter, EnrollmentFilter, RefundFilter};
use coursehub_core::models::{BillStatus, Course, EnrollmentStatus};
use coursehub_core::{CoreResult, ReconciliationPolicy};

use crate::Repositories;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CourseDrift {
    pub course_id: Uuid,
    pub recorded: i64,
    pub actual: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    RefundedBillWithoutGrant { bill_id: Uuid, course_id: Uuid },
    RefundedEnrollmentWithoutGrant { enrollment_id: Uuid, course_id: Uuid },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub courses_checked: usize,
    pub drift: Vec<CourseDrift>,
    pub anomalies: Vec<Anomaly>,
    /// Courses or records the pass could not read or write
    pub errors: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn exceeds_alert_threshold(&self, threshold: usize) -> bool {
        self.drift.len() >= threshold || !self.anomalies.is_empty()
    }
}

pub struct ReconciliationJob {
    repos: Repositories,
    policy: ReconciliationPolicy,
}

impl ReconciliationJob {
    pub fn new(repos: Repositories, policy: ReconciliationPolicy) -> Self {
        Self { repos, policy }
    }

    pub fn policy(&self) -> &ReconciliationPolicy {
        &self.policy
    }

    /// One full pass. Only failing to enumerate courses aborts it; per-item
    /// failures are logged and counted.
    pub async fn run(&self) -> CoreResult<ReconciliationReport> {
        let started_at = Utc::now();
        let courses = self.repos.courses.list_courses(&CourseFilter::default()).await?;

        let mut drift = Vec::new();
        let mut errors = 0;
        for course in &courses {
            match self.repair_course(course).await {
                Ok(Some(d)) => drift.push(d),
                Ok(None) => {}
                Err(e) => {
                    errors += 1;
                    error!(course_id = %course.id, "Reconciliation failed for course: {}", e);
                }
            }
        }

        let mut anomalies = Vec::new();
        errors += self.scan_bills(&mut anomalies).await;
        errors += self.scan_enrollments(&mut anomalies).await;

        let report = ReconciliationReport {
            courses_checked: courses.len(),
            drift,
            anomalies,
            errors,
            started_at,
            finished_at: Utc::now(),
        };

        if report.exceeds_alert_threshold(self.policy.alert_threshold) {
            error!(
                drifted = report.drift.len(),
                anomalies = report.anomalies.len(),
                "Reconciliation found inconsistencies above alert threshold"
            );
        } else {
            info!(
                courses = report.courses_checked,
                drifted = report.drift.len(),
                errors = report.errors,
                "Reconciliation pass finished"
            );
        }

        Ok(report)
    }

    /// Count and write happen under one lock in the store, so a refund
    /// cascade landing mid-pass cannot be overwritten by a stale count.
    async fn repair_course(&self, course: &Course) -> CoreResult<Option<CourseDrift>> {
        let (recorded, actual) = self.repos.courses.recompute_total_students(course.id).await?;
        if recorded == actual {
            return Ok(None);
        }

        warn!(
            course_id = %course.id,
            recorded,
            actual,
            "Corrected total_students drift"
        );
        Ok(Some(CourseDrift {
            course_id: course.id,
            recorded,
            actual,
        }))
    }

    async fn scan_bills(&self, anomalies: &mut Vec<Anomaly>) -> usize {
        let filter = BillFilter {
            status: Some(BillStatus::Refunded),
            ..Default::default()
        };
        let bills = match self.repos.bills.find_bills(&filter).await {
            Ok(bills) => bills,
            Err(e) => {
                error!("Failed to list refunded bills: {}", e);
                return 1;
            }
        };

        let mut errors = 0;
        for bill in bills {
            match self.repos.refunds.list_refunds(&RefundFilter::for_bill(bill.id)).await {
                Ok(refunds) if refunds.iter().any(|r| r.status.is_granted()) => {}
                Ok(_) => {
                    warn!(bill_id = %bill.id, course_id = %bill.course_id, "Refunded bill has no approved refund");
                    anomalies.push(Anomaly::RefundedBillWithoutGrant {
                        bill_id: bill.id,
                        course_id: bill.course_id,
                    });
                }
                Err(e) => {
                    errors += 1;
                    error!(bill_id = %bill.id, "Failed to load refunds for bill: {}", e);
                }
            }
        }
        errors
    }

    async fn scan_enrollments(&self, anomalies: &mut Vec<Anomaly>) -> usize {
        let filter = EnrollmentFilter {
            is_active: Some(false),
            status: Some(EnrollmentStatus::Refunded),
            ..Default::default()
        };
        let enrollments = match self.repos.enrollments.list_enrollments(&filter).await {
            Ok(enrollments) => enrollments,
            Err(e) => {
                error!("Failed to list refunded enrollments: {}", e);
                return 1;
            }
        };

        let mut errors = 0;
        for enrollment in enrollments {
            let by_enrollment = RefundFilter {
                enrollment_id: Some(enrollment.id),
                ..Default::default()
            };
            match self.repos.refunds.list_refunds(&by_enrollment).await {
                Ok(refunds) if refunds.iter().any(|r| r.status.is_granted()) => {}
                Ok(_) => {
                    warn!(
                        enrollment_id = %enrollment.id,
                        course_id = %enrollment.course_id,
                        "Refunded enrollment has no approved refund"
                    );
                    anomalies.push(Anomaly::RefundedEnrollmentWithoutGrant {
                        enrollment_id: enrollment.id,
                        course_id: enrollment.course_id,
                    });
                }
                Err(e) => {
                    errors += 1;
                    error!(enrollment_id = %enrollment.id, "Failed to load refunds for enrollment: {}", e);
                }
            }
        }
        errors
    }
}
