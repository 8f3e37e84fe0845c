use serde::Deserialize;

/// Refund rules, loaded once at startup and shared by reference.
#[derive(Debug, Deserialize, Clone)]
pub struct RefundPolicy {
    /// Older enrollments predate billing records; refund them against the
    /// current course price by synthesizing a bill.
    #[serde(default = "default_true")]
    pub synthesize_missing_bill: bool,
    /// Days after enrollment during which a refund may be requested.
    #[serde(default)]
    pub refund_window_days: Option<i64>,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            synthesize_missing_bill: true,
            refund_window_days: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationPolicy {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// Drifted courses in one pass at which the job logs at error level.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: usize,
    /// TTL of the lease that keeps other replicas from running the same pass.
    #[serde(default = "default_lease")]
    pub lease_seconds: u64,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            alert_threshold: default_alert_threshold(),
            lease_seconds: default_lease(),
        }
    }
}

fn default_true() -> bool { true }
fn default_interval() -> u64 { 300 }
fn default_alert_threshold() -> usize { 3 }
fn default_lease() -> u64 { 240 }
