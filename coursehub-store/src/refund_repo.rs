use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use coursehub_core::filters::RefundFilter;
use coursehub_core::models::{
    Bill, ContactChannel, ContactMethod, RefundRequest, RefundStatus, RefundTransition,
};
use coursehub_core::repository::{CascadeWrites, RefundCascade, RefundRepository, RepoResult};

use crate::bill_repo::insert_bill_with;

const REFUND_COLUMNS: &str = "id, student_id, teacher_id, course_id, enrollment_id, bill_id, amount, reason, \
     description, contact_channel, contact_value, status, requested_at, processed_by, processed_at, \
     rejection_reason, refund_method, notes";

pub struct StoreRefundRepository {
    pool: PgPool,
}

impl StoreRefundRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: Uuid,
    student_id: Uuid,
    teacher_id: Uuid,
    course_id: Uuid,
    enrollment_id: Uuid,
    bill_id: Uuid,
    amount: i64,
    reason: String,
    description: String,
    contact_channel: String,
    contact_value: String,
    status: String,
    requested_at: DateTime<Utc>,
    processed_by: Option<Uuid>,
    processed_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    refund_method: Option<String>,
    notes: Option<String>,
}

impl TryFrom<RefundRow> for RefundRequest {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(row: RefundRow) -> Result<Self, Self::Error> {
        let channel = row.contact_channel.parse::<ContactChannel>()?;
        Ok(RefundRequest {
            id: row.id,
            student_id: row.student_id,
            teacher_id: row.teacher_id,
            course_id: row.course_id,
            enrollment_id: row.enrollment_id,
            bill_id: row.bill_id,
            amount: row.amount,
            reason: row.reason,
            description: row.description,
            contact_method: ContactMethod::new(channel, row.contact_value),
            status: row.status.parse::<RefundStatus>()?,
            requested_at: row.requested_at,
            processed_by: row.processed_by,
            processed_at: row.processed_at,
            rejection_reason: row.rejection_reason,
            refund_method: row.refund_method,
            notes: row.notes,
        })
    }
}

#[async_trait]
impl RefundRepository for StoreRefundRepository {
    async fn insert_pending(&self, refund: &RefundRequest, synthesized_bill: Option<&Bill>) -> RepoResult<bool> {
        let mut tx = self.pool.begin().await?;

        if let Some(bill) = synthesized_bill {
            insert_bill_with(&mut *tx, bill).await?;
        }

        // The partial unique index on pending requests turns a concurrent
        // duplicate into a no-op insert.
        let result = sqlx::query(
            r#"
            INSERT INTO refund_requests (id, student_id, teacher_id, course_id, enrollment_id, bill_id, amount,
                                         reason, description, contact_channel, contact_value, status, requested_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'pending', $12)
            ON CONFLICT (enrollment_id) WHERE status = 'pending' DO NOTHING
            "#,
        )
        .bind(refund.id)
        .bind(refund.student_id)
        .bind(refund.teacher_id)
        .bind(refund.course_id)
        .bind(refund.enrollment_id)
        .bind(refund.bill_id)
        .bind(refund.amount)
        .bind(&refund.reason)
        .bind(&refund.description)
        .bind(refund.contact_method.channel.as_str())
        .bind(refund.contact_method.value.expose())
        .bind(refund.requested_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            // drops the synthesized bill with it
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn get_refund(&self, id: Uuid) -> RepoResult<Option<RefundRequest>> {
        let row = sqlx::query_as::<_, RefundRow>(&format!(
            "SELECT {} FROM refund_requests WHERE id = $1",
            REFUND_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RefundRequest::try_from).transpose()
    }

    async fn list_refunds(&self, filter: &RefundFilter) -> RepoResult<Vec<RefundRequest>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM refund_requests WHERE TRUE",
            REFUND_COLUMNS
        ));
        if let Some(student_id) = filter.student_id {
            qb.push(" AND student_id = ").push_bind(student_id);
        }
        if let Some(teacher_id) = filter.teacher_id {
            qb.push(" AND teacher_id = ").push_bind(teacher_id);
        }
        if let Some(course_id) = filter.course_id {
            qb.push(" AND course_id = ").push_bind(course_id);
        }
        if let Some(enrollment_id) = filter.enrollment_id {
            qb.push(" AND enrollment_id = ").push_bind(enrollment_id);
        }
        if let Some(bill_id) = filter.bill_id {
            qb.push(" AND bill_id = ").push_bind(bill_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY requested_at DESC LIMIT ")
            .push_bind(i64::from(filter.page_size()));

        let rows = qb.build_query_as::<RefundRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(RefundRequest::try_from).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: RefundStatus,
        transition: &RefundTransition,
    ) -> RepoResult<Option<RefundRequest>> {
        transition_with(&self.pool, id, from, transition).await
    }
}

async fn transition_with<'e, E>(
    executor: E,
    id: Uuid,
    from: RefundStatus,
    transition: &RefundTransition,
) -> RepoResult<Option<RefundRequest>>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        r#"
        UPDATE refund_requests
        SET status = $3,
            processed_by = COALESCE($4, processed_by),
            processed_at = COALESCE($5, processed_at),
            rejection_reason = COALESCE($6, rejection_reason),
            refund_method = COALESCE($7, refund_method),
            notes = COALESCE($8, notes)
        WHERE id = $1 AND status = $2
        RETURNING {}
        "#,
        REFUND_COLUMNS
    );
    let row = sqlx::query_as::<_, RefundRow>(&sql)
        .bind(id)
        .bind(from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.processed_by)
        .bind(transition.processed_at)
        .bind(&transition.rejection_reason)
        .bind(&transition.refund_method)
        .bind(&transition.notes)
        .fetch_optional(executor)
        .await?;

    row.map(RefundRequest::try_from).transpose()
}

/// Approval and its cascade in one transaction. Row locks are taken in the
/// order refund, bill, enrollment, course.
#[async_trait]
impl RefundCascade for StoreRefundRepository {
    async fn approve_with_cascade(
        &self,
        id: Uuid,
        transition: &RefundTransition,
    ) -> RepoResult<Option<(RefundRequest, CascadeWrites)>> {
        let mut tx = self.pool.begin().await?;

        let Some(refund) = transition_with(&mut *tx, id, RefundStatus::Pending, transition).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        let at = refund.processed_at.unwrap_or_else(Utc::now);

        let bill = sqlx::query(
            "UPDATE bills SET status = 'refunded', refunded_at = $2 WHERE id = $1 AND status = 'completed'",
        )
        .bind(refund.bill_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        let enrollment = sqlx::query(
            "UPDATE enrollments SET is_active = FALSE, status = 'refunded', refunded_at = $2 WHERE id = $1 AND is_active",
        )
        .bind(refund.enrollment_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        let enrollment_deactivated = enrollment.rows_affected() == 1;

        let mut course_decremented = false;
        if enrollment_deactivated {
            let course = sqlx::query(
                "UPDATE courses SET total_students = GREATEST(total_students - 1, 0), updated_at = NOW() WHERE id = $1",
            )
            .bind(refund.course_id)
            .execute(&mut *tx)
            .await?;
            course_decremented = course.rows_affected() == 1;
        }

        tx.commit().await?;

        let writes = CascadeWrites {
            bill_refunded: bill.rows_affected() == 1,
            enrollment_deactivated,
            course_decremented,
        };
        debug!(refund_id = %refund.id, ?writes, "Refund approval committed");
        Ok(Some((refund, writes)))
    }
}
