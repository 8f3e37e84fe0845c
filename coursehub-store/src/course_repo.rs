use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use coursehub_core::filters::CourseFilter;
use coursehub_core::models::{Course, CourseGuard, CourseStatus};
use coursehub_core::repository::{CourseRepository, RepoResult};

const COURSE_COLUMNS: &str = "id, instructor_id, title, price, status, is_published, is_approved, \
     has_unsaved_changes, submitted_for_review, submitted_at, total_students, created_at, updated_at";

pub struct StoreCourseRepository {
    pool: PgPool,
}

impl StoreCourseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    instructor_id: Uuid,
    title: String,
    price: i64,
    status: String,
    is_published: bool,
    is_approved: bool,
    has_unsaved_changes: bool,
    submitted_for_review: bool,
    submitted_at: Option<DateTime<Utc>>,
    total_students: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CourseRow> for Course {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(row: CourseRow) -> Result<Self, Self::Error> {
        Ok(Course {
            id: row.id,
            instructor_id: row.instructor_id,
            title: row.title,
            price: row.price,
            status: row.status.parse::<CourseStatus>()?,
            is_published: row.is_published,
            is_approved: row.is_approved,
            has_unsaved_changes: row.has_unsaved_changes,
            submitted_for_review: row.submitted_for_review,
            submitted_at: row.submitted_at,
            total_students: row.total_students,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl CourseRepository for StoreCourseRepository {
    async fn insert_course(&self, course: &Course) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO courses (id, instructor_id, title, price, status, is_published, is_approved,
                                 has_unsaved_changes, submitted_for_review, submitted_at, total_students,
                                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(course.id)
        .bind(course.instructor_id)
        .bind(&course.title)
        .bind(course.price)
        .bind(course.status.as_str())
        .bind(course.is_published)
        .bind(course.is_approved)
        .bind(course.has_unsaved_changes)
        .bind(course.submitted_for_review)
        .bind(course.submitted_at)
        .bind(course.total_students)
        .bind(course.created_at)
        .bind(course.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> RepoResult<Option<Course>> {
        let row = sqlx::query_as::<_, CourseRow>(&format!(
            "SELECT {} FROM courses WHERE id = $1",
            COURSE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Course::try_from).transpose()
    }

    async fn list_courses(&self, filter: &CourseFilter) -> RepoResult<Vec<Course>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM courses WHERE TRUE", COURSE_COLUMNS));
        if let Some(instructor_id) = filter.instructor_id {
            qb.push(" AND instructor_id = ").push_bind(instructor_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at");

        let rows = qb.build_query_as::<CourseRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Course::try_from).collect()
    }

    async fn compare_and_set(&self, expected: &CourseGuard, next: &Course) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE courses
            SET status = $1, is_published = $2, is_approved = $3, has_unsaved_changes = $4,
                submitted_for_review = $5, submitted_at = $6, updated_at = $7
            WHERE id = $8 AND status = $9 AND submitted_for_review = $10 AND has_unsaved_changes = $11
            "#,
        )
        .bind(next.status.as_str())
        .bind(next.is_published)
        .bind(next.is_approved)
        .bind(next.has_unsaved_changes)
        .bind(next.submitted_for_review)
        .bind(next.submitted_at)
        .bind(next.updated_at)
        .bind(expected.id)
        .bind(expected.status.as_str())
        .bind(expected.submitted_for_review)
        .bind(expected.has_unsaved_changes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_unsaved_changes(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE courses SET has_unsaved_changes = TRUE, updated_at = NOW() WHERE id = $1 AND status = 'published'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn adjust_total_students(&self, id: Uuid, delta: i64) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE courses SET total_students = GREATEST(total_students + $2, 0), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(delta)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(format!("course {} not found", id).into());
        }
        Ok(())
    }

    async fn set_total_students(&self, id: Uuid, value: i64) -> RepoResult<()> {
        let result = sqlx::query("UPDATE courses SET total_students = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(value)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(format!("course {} not found", id).into());
        }
        Ok(())
    }

    async fn recompute_total_students(&self, id: Uuid) -> RepoResult<(i64, i64)> {
        let mut tx = self.pool.begin().await?;

        // Locked before counting so a refund cascade cannot decrement between
        // the count and the write.
        let recorded: Option<i64> = sqlx::query_scalar("SELECT total_students FROM courses WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(recorded) = recorded else {
            return Err(format!("course {} not found", id).into());
        };

        let actual: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments WHERE course_id = $1 AND is_active")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        if actual != recorded {
            sqlx::query("UPDATE courses SET total_students = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(actual)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok((recorded, actual))
    }
}
