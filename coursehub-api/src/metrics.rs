use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use coursehub_lifecycle::{CascadeReport, ReconciliationReport};

/// Per-process registry; `/metrics` renders it in the text format.
pub struct Metrics {
    registry: Registry,
    pub course_submissions: IntCounter,
    pub refund_approvals: IntCounter,
    pub cascade_failures: IntCounterVec,
    pub reconciliation_runs: IntCounter,
    pub drifted_courses: IntGauge,
    pub anomalies: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("coursehub".to_string()), None)?;

        let course_submissions = IntCounter::new("course_submissions_total", "Courses submitted for review")?;
        let refund_approvals = IntCounter::new("refund_approvals_total", "Refund requests approved")?;
        let cascade_failures = IntCounterVec::new(
            Opts::new("refund_cascade_failures_total", "Cascade steps that failed after approval"),
            &["step"],
        )?;
        let reconciliation_runs = IntCounter::new("reconciliation_runs_total", "Completed reconciliation passes")?;
        let drifted_courses = IntGauge::new(
            "reconciliation_drifted_courses",
            "Courses corrected by the last reconciliation pass",
        )?;
        let anomalies = IntGauge::new("reconciliation_anomalies", "Anomalies found by the last reconciliation pass")?;

        registry.register(Box::new(course_submissions.clone()))?;
        registry.register(Box::new(refund_approvals.clone()))?;
        registry.register(Box::new(cascade_failures.clone()))?;
        registry.register(Box::new(reconciliation_runs.clone()))?;
        registry.register(Box::new(drifted_courses.clone()))?;
        registry.register(Box::new(anomalies.clone()))?;

        Ok(Self {
            registry,
            course_submissions,
            refund_approvals,
            cascade_failures,
            reconciliation_runs,
            drifted_courses,
            anomalies,
        })
    }

    pub fn observe_approval(&self, cascade: &CascadeReport) {
        self.refund_approvals.inc();
        for step in cascade.failed_steps() {
            self.cascade_failures.with_label_values(&[step]).inc();
        }
    }

    pub fn observe_reconciliation(&self, report: &ReconciliationReport) {
        self.reconciliation_runs.inc();
        self.drifted_courses.set(report.drift.len() as i64);
        self.anomalies.set(report.anomalies.len() as i64);
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
