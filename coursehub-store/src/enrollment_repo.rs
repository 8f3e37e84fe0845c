use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use coursehub_core::filters::EnrollmentFilter;
use coursehub_core::models::{Enrollment, EnrollmentStatus};
use coursehub_core::repository::{EnrollmentRepository, RepoResult};

pub struct StoreEnrollmentRepository {
    pool: PgPool,
}

impl StoreEnrollmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    id: Uuid,
    student_id: Uuid,
    course_id: Uuid,
    is_active: bool,
    status: String,
    progress: i32,
    enrolled_at: DateTime<Utc>,
    refunded_at: Option<DateTime<Utc>>,
}

impl TryFrom<EnrollmentRow> for Enrollment {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(row: EnrollmentRow) -> Result<Self, Self::Error> {
        Ok(Enrollment {
            id: row.id,
            student_id: row.student_id,
            course_id: row.course_id,
            is_active: row.is_active,
            status: row.status.parse::<EnrollmentStatus>()?,
            progress: row.progress,
            enrolled_at: row.enrolled_at,
            refunded_at: row.refunded_at,
        })
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &EnrollmentFilter) {
    if let Some(course_id) = filter.course_id {
        qb.push(" AND course_id = ").push_bind(course_id);
    }
    if let Some(student_id) = filter.student_id {
        qb.push(" AND student_id = ").push_bind(student_id);
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(is_active);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
}

#[async_trait]
impl EnrollmentRepository for StoreEnrollmentRepository {
    async fn insert_enrollment(&self, enrollment: &Enrollment) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO enrollments (id, student_id, course_id, is_active, status, progress, enrolled_at, refunded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(enrollment.id)
        .bind(enrollment.student_id)
        .bind(enrollment.course_id)
        .bind(enrollment.is_active)
        .bind(enrollment.status.as_str())
        .bind(enrollment.progress)
        .bind(enrollment.enrolled_at)
        .bind(enrollment.refunded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_enrollment(&self, id: Uuid) -> RepoResult<Option<Enrollment>> {
        let row = sqlx::query_as::<_, EnrollmentRow>(
            "SELECT id, student_id, course_id, is_active, status, progress, enrolled_at, refunded_at FROM enrollments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Enrollment::try_from).transpose()
    }

    async fn list_enrollments(&self, filter: &EnrollmentFilter) -> RepoResult<Vec<Enrollment>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT id, student_id, course_id, is_active, status, progress, enrolled_at, refunded_at FROM enrollments WHERE TRUE",
        );
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY enrolled_at");

        let rows = qb.build_query_as::<EnrollmentRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Enrollment::try_from).collect()
    }

    async fn count_enrollments(&self, filter: &EnrollmentFilter) -> RepoResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM enrollments WHERE TRUE");
        push_filter(&mut qb, filter);

        let (count,) = qb.build_query_as::<(i64,)>().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn deactivate_for_refund(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE enrollments SET is_active = FALSE, status = 'refunded', refunded_at = $2 WHERE id = $1 AND is_active",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
