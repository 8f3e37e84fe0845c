use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use coursehub_core::filters::BillFilter;
use coursehub_core::models::{Bill, BillStatus};
use coursehub_core::repository::{BillRepository, RepoResult};

pub struct StoreBillRepository {
    pool: PgPool,
}

impl StoreBillRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BillRow {
    id: Uuid,
    student_id: Uuid,
    course_id: Uuid,
    amount: i64,
    status: String,
    payment_method: Option<String>,
    created_at: DateTime<Utc>,
    refunded_at: Option<DateTime<Utc>>,
}

impl TryFrom<BillRow> for Bill {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(row: BillRow) -> Result<Self, Self::Error> {
        Ok(Bill {
            id: row.id,
            student_id: row.student_id,
            course_id: row.course_id,
            amount: row.amount,
            status: row.status.parse::<BillStatus>()?,
            payment_method: row.payment_method,
            created_at: row.created_at,
            refunded_at: row.refunded_at,
        })
    }
}

pub(crate) async fn insert_bill_with<'e, E>(executor: E, bill: &Bill) -> RepoResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO bills (id, student_id, course_id, amount, status, payment_method, created_at, refunded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(bill.id)
    .bind(bill.student_id)
    .bind(bill.course_id)
    .bind(bill.amount)
    .bind(bill.status.as_str())
    .bind(&bill.payment_method)
    .bind(bill.created_at)
    .bind(bill.refunded_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl BillRepository for StoreBillRepository {
    async fn insert_bill(&self, bill: &Bill) -> RepoResult<()> {
        insert_bill_with(&self.pool, bill).await
    }

    async fn get_bill(&self, id: Uuid) -> RepoResult<Option<Bill>> {
        let row = sqlx::query_as::<_, BillRow>(
            "SELECT id, student_id, course_id, amount, status, payment_method, created_at, refunded_at FROM bills WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Bill::try_from).transpose()
    }

    async fn find_bills(&self, filter: &BillFilter) -> RepoResult<Vec<Bill>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT id, student_id, course_id, amount, status, payment_method, created_at, refunded_at FROM bills WHERE TRUE",
        );
        if let Some(student_id) = filter.student_id {
            qb.push(" AND student_id = ").push_bind(student_id);
        }
        if let Some(course_id) = filter.course_id {
            qb.push(" AND course_id = ").push_bind(course_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at DESC");

        let rows = qb.build_query_as::<BillRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Bill::try_from).collect()
    }

    async fn mark_refunded(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE bills SET status = 'refunded', refunded_at = $2 WHERE id = $1 AND status = 'completed'",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
