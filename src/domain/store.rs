//! Transactional reads/writes of students, subjects, and marks (C9). Each
//! public function opens and commits its own short transaction; callers never
//! see a `Transaction` handle.

use anyhow::Result;
use sqlx::{PgPool, Row};

use super::models::{
    Batch, DiscoveredSubject, ExtractionJob, Grade, Mark, MarkResult, Section, Semester, Student,
    Subject,
};

#[derive(Clone)]
pub struct DomainStore {
    pool: PgPool,
}

impl DomainStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn get_batch(&self, batch_id: i32) -> Result<Option<Batch>> {
        let row = sqlx::query_as::<_, Batch>("SELECT * FROM batches WHERE id = $1")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_section(&self, section_id: i32) -> Result<Option<Section>> {
        let row = sqlx::query_as::<_, Section>("SELECT * FROM sections WHERE id = $1")
            .bind(section_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_current_semester(&self, batch_id: i32) -> Result<Option<Semester>> {
        let row = sqlx::query_as::<_, Semester>(
            "SELECT * FROM semesters WHERE batch_id = $1 AND current = TRUE",
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Look up a subject's id by `sub_code` within a given semester. Invariant
    /// (§4.5): at most one match; returns `None` if no match.
    pub async fn subject_id_by_code(&self, sem_id: i32, sub_code: &str) -> Result<Option<i32>> {
        let row = sqlx::query("SELECT id FROM subjects WHERE sem_id = $1 AND sub_code = $2")
            .bind(sem_id)
            .bind(sub_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("id")))
    }

    pub async fn list_subjects(&self, sem_id: i32) -> Result<Vec<Subject>> {
        let rows = sqlx::query_as::<_, Subject>("SELECT * FROM subjects WHERE sem_id = $1 ORDER BY sub_code")
            .bind(sem_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Insert a batch of discovered subjects for a semester in one transaction;
    /// existing `(sem_id, sub_code)` rows are left untouched (caller only inserts
    /// genuinely new subjects).
    pub async fn insert_subjects(
        &self,
        sem_id: i32,
        subjects: &[DiscoveredSubject],
    ) -> Result<Vec<Subject>> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(subjects.len());
        for s in subjects {
            let row = sqlx::query_as::<_, Subject>(
                "INSERT INTO subjects (sem_id, sub_code, sub_name, credits) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (sem_id, sub_code) DO UPDATE SET sub_name = EXCLUDED.sub_name \
                 RETURNING *",
            )
            .bind(sem_id)
            .bind(&s.sub_code)
            .bind(&s.sub_name)
            .bind(s.credits)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(row);
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn get_student_by_usn(
        &self,
        usn: &str,
        section_id: i32,
    ) -> Result<Option<Student>> {
        let row = sqlx::query_as::<_, Student>(
            "SELECT * FROM students WHERE usn = $1 AND section_id = $2",
        )
        .bind(usn)
        .bind(section_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Set `active = false` for a student row, e.g. after a portal-invalid response.
    pub async fn deactivate_student(&self, student_id: i32) -> Result<()> {
        sqlx::query("UPDATE students SET active = FALSE WHERE id = $1")
            .bind(student_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Apply the reconciliation update described in §4.5: overwrite the name if
    /// different, and set `active = true`, in a single statement.
    pub async fn reactivate_and_rename(&self, student_id: i32, stud_name: &str) -> Result<()> {
        sqlx::query(
            "UPDATE students SET stud_name = $2, active = TRUE WHERE id = $1 AND stud_name != $2 \
             OR (id = $1 AND active = FALSE)",
        )
        .bind(student_id)
        .bind(stud_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_mark(
        &self,
        stud_id: i32,
        subject_id: i32,
        section_id: i32,
    ) -> Result<Option<Mark>> {
        let row = sqlx::query_as::<_, Mark>(
            "SELECT * FROM marks WHERE stud_id = $1 AND subject_id = $2 AND section_id = $3",
        )
        .bind(stud_id)
        .bind(subject_id)
        .bind(section_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Insert or update a mark row for `(stud_id, subject_id, section_id)` (§3.7).
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_mark(
        &self,
        stud_id: i32,
        subject_id: i32,
        section_id: i32,
        internal: i32,
        external: i32,
        total: i32,
        result: MarkResult,
        grade: Grade,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO marks (stud_id, subject_id, section_id, internal, external, total, result, grade) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (stud_id, subject_id) DO UPDATE SET \
                internal = EXCLUDED.internal, external = EXCLUDED.external, \
                total = EXCLUDED.total, result = EXCLUDED.result, grade = EXCLUDED.grade",
        )
        .bind(stud_id)
        .bind(subject_id)
        .bind(section_id)
        .bind(internal)
        .bind(external)
        .bind(total)
        .bind(result)
        .bind(grade)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_extraction(&self, id: i32) -> Result<Option<ExtractionJob>> {
        let row = sqlx::query_as::<_, ExtractionJob>("SELECT * FROM extraction_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Create a job row and its companion (initially empty) `InvalidRecord`
    /// row in one transaction (§4.8: "creates the job row and an empty
    /// InvalidRecord row").
    pub async fn create_extraction_job(
        &self,
        section_id: i32,
        sem_id: i32,
        total_usns: i32,
    ) -> Result<(ExtractionJob, super::models::InvalidRecord)> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, ExtractionJob>(
            "INSERT INTO extraction_jobs (section_id, sem_id, total_usns) \
             VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(section_id)
        .bind(sem_id)
        .bind(total_usns)
        .fetch_one(&mut *tx)
        .await?;

        let invalid_record = sqlx::query_as::<_, super::models::InvalidRecord>(
            "INSERT INTO invalid_records (extraction_id, invalid_usns, captcha_usns, timeout_usns) \
             VALUES ($1, '', '', '') RETURNING *",
        )
        .bind(job.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((job, invalid_record))
    }
}
