use coursehub_core::{ReconciliationPolicy, RefundPolicy};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

#[derive(sqlx::FromRow)]
struct SettingRow {
    setting_key: String,
    setting_value: Value,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlay rows of `system_settings` onto the file defaults. Rows hold
    /// `{"value": ...}`; unknown keys and mistyped values are ignored.
    pub async fn fetch_policies(
        &self,
        refunds: RefundPolicy,
        reconciliation: ReconciliationPolicy,
    ) -> Result<(RefundPolicy, ReconciliationPolicy), sqlx::Error> {
        let rows = sqlx::query_as::<_, SettingRow>(
            "SELECT setting_key, setting_value FROM system_settings",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut refunds = refunds;
        let mut reconciliation = reconciliation;
        for row in rows {
            let Some(v) = row.setting_value.get("value") else {
                warn!(key = %row.setting_key, "system setting without a value field");
                continue;
            };
            apply_setting(&mut refunds, &mut reconciliation, &row.setting_key, v);
        }

        Ok((refunds, reconciliation))
    }
}

fn apply_setting(
    refunds: &mut RefundPolicy,
    reconciliation: &mut ReconciliationPolicy,
    key: &str,
    v: &Value,
) {
    match key {
        "synthesize_missing_bill" => {
            if let Some(b) = v.as_bool() {
                refunds.synthesize_missing_bill = b;
            }
        }
        "refund_window_days" => {
            // null clears the window
            refunds.refund_window_days = v.as_i64();
        }
        "reconciliation_interval_seconds" => {
            if let Some(u) = v.as_u64() {
                reconciliation.interval_seconds = u;
            }
        }
        "reconciliation_alert_threshold" => {
            if let Some(u) = v.as_u64() {
                reconciliation.alert_threshold = u as usize;
            }
        }
        _ => {}
    }
}
