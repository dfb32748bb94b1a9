//! Integration tests for the Domain Store (C9) and Progress Store (C7)
//! against a real, migrated Postgres instance.

use sqlx::PgPool;

use eduinsights::domain::{DiscoveredSubject, DomainStore, Grade, MarkResult, StudentRecord};
use eduinsights::engine::marks;
use eduinsights::engine::progress::{self, FlushDelta};

async fn seed_department_batch_section_semester(pool: &PgPool) -> (i32, i32, i32) {
    let department_id: i32 = sqlx::query_scalar(
        "INSERT INTO departments (name) VALUES ('Computer Science') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    let batch_id: i32 = sqlx::query_scalar(
        "INSERT INTO batches (department_id, start_year, end_year, scheme_code, start_usn, end_usn) \
         VALUES ($1, 2021, 2025, '21', '1OX21CS001', '1OX21CS100') RETURNING id",
    )
    .bind(department_id)
    .fetch_one(pool)
    .await
    .unwrap();

    let section_id: i32 = sqlx::query_scalar(
        "INSERT INTO sections (batch_id, name, start_usn, end_usn) \
         VALUES ($1, 'A', '1OX21CS001', '1OX21CS012') RETURNING id",
    )
    .bind(batch_id)
    .fetch_one(pool)
    .await
    .unwrap();

    let sem_id: i32 = sqlx::query_scalar(
        "INSERT INTO semesters (batch_id, sem_num, current) VALUES ($1, 5, TRUE) RETURNING id",
    )
    .bind(batch_id)
    .fetch_one(pool)
    .await
    .unwrap();

    (batch_id, section_id, sem_id)
}

#[sqlx::test]
async fn insert_subjects_upserts_on_conflict(pool: PgPool) {
    let (_, _, sem_id) = seed_department_batch_section_semester(&pool).await;
    let store = DomainStore::new(pool.clone());

    let discovered = vec![DiscoveredSubject {
        sub_code: "21CS51".into(),
        sub_name: "Maths".into(),
        credits: 4,
    }];
    let first = store.insert_subjects(sem_id, &discovered).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].sub_name, "Maths");

    let renamed = vec![DiscoveredSubject {
        sub_code: "21CS51".into(),
        sub_name: "Engineering Maths".into(),
        credits: 4,
    }];
    let second = store.insert_subjects(sem_id, &renamed).await.unwrap();
    assert_eq!(second[0].id, first[0].id);
    assert_eq!(second[0].sub_name, "Engineering Maths");

    let all = store.list_subjects(sem_id).await.unwrap();
    assert_eq!(all.len(), 1);
}

/// E1: a single successful scrape reconciles name/active and writes one Mark.
#[sqlx::test]
async fn reconcile_single_success_writes_one_mark(pool: PgPool) {
    let (batch_id, section_id, sem_id) = seed_department_batch_section_semester(&pool).await;
    let store = DomainStore::new(pool.clone());

    let subjects = store
        .insert_subjects(
            sem_id,
            &[DiscoveredSubject {
                sub_code: "21CS51".into(),
                sub_name: "Maths".into(),
                credits: 4,
            }],
        )
        .await
        .unwrap();
    let subject_id = subjects[0].id;

    let stud_id: i32 = sqlx::query_scalar(
        "INSERT INTO students (batch_id, section_id, usn, stud_name, active) \
         VALUES ($1, $2, '1OX21CS001', 'alice', FALSE) RETURNING id",
    )
    .bind(batch_id)
    .bind(section_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    let record = StudentRecord {
        usn: "1OX21CS001".into(),
        name: "ALICE".into(),
        marks: vec![eduinsights::domain::ScrapedMark {
            sub_code: "21CS51".into(),
            sub_name: "Maths".into(),
            internal: 25,
            external: 40,
            total: 65,
            result: MarkResult::P,
        }],
    };

    marks::reconcile(&store, sem_id, section_id, stud_id, "alice", false, &record)
        .await
        .unwrap();

    let mark = store
        .find_mark(stud_id, subject_id, section_id)
        .await
        .unwrap()
        .expect("mark row should exist");
    assert_eq!(mark.internal, 25);
    assert_eq!(mark.external, 40);
    assert_eq!(mark.total, 65);
    assert_eq!(mark.result, MarkResult::P);
    assert_eq!(mark.grade, Grade::FC);

    let student = store
        .get_student_by_usn("1OX21CS001", section_id)
        .await
        .unwrap()
        .unwrap();
    assert!(student.active);
    assert_eq!(student.stud_name, "ALICE");
}

/// Re-reconciling the same student/subject updates the existing Mark row
/// in place rather than inserting a second one (invariant: at most one
/// Mark per (stud_id, subject_id)).
#[sqlx::test]
async fn upsert_mark_replaces_existing_row(pool: PgPool) {
    let (batch_id, section_id, sem_id) = seed_department_batch_section_semester(&pool).await;
    let store = DomainStore::new(pool.clone());

    let subjects = store
        .insert_subjects(
            sem_id,
            &[DiscoveredSubject {
                sub_code: "21CS51".into(),
                sub_name: "Maths".into(),
                credits: 4,
            }],
        )
        .await
        .unwrap();
    let subject_id = subjects[0].id;

    let stud_id: i32 = sqlx::query_scalar(
        "INSERT INTO students (batch_id, section_id, usn, stud_name, active) \
         VALUES ($1, $2, '1OX21CS002', 'bob', TRUE) RETURNING id",
    )
    .bind(batch_id)
    .bind(section_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    store
        .upsert_mark(stud_id, subject_id, section_id, 10, 20, 30, MarkResult::F, Grade::FAIL)
        .await
        .unwrap();
    store
        .upsert_mark(stud_id, subject_id, section_id, 25, 45, 70, MarkResult::P, Grade::FC)
        .await
        .unwrap();

    let mark = store
        .find_mark(stud_id, subject_id, section_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mark.total, 70);
    assert_eq!(mark.grade, Grade::FC);

    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM marks WHERE stud_id = $1")
        .bind(stud_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

/// E2: an invalid-USN outcome deactivates the student and records nothing else.
#[sqlx::test]
async fn deactivate_student_on_invalid_usn(pool: PgPool) {
    let (batch_id, section_id, _) = seed_department_batch_section_semester(&pool).await;
    let store = DomainStore::new(pool.clone());

    let stud_id: i32 = sqlx::query_scalar(
        "INSERT INTO students (batch_id, section_id, usn, stud_name, active) \
         VALUES ($1, $2, '1OX21CS003', 'carol', TRUE) RETURNING id",
    )
    .bind(batch_id)
    .bind(section_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    store.deactivate_student(stud_id).await.unwrap();

    let student = store
        .get_student_by_usn("1OX21CS003", section_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!student.active);
}

/// A student previously deactivated by an invalid response is reactivated
/// by a later successful scrape, even if the name is unchanged.
#[sqlx::test]
async fn reactivate_and_rename_flips_active_even_when_name_unchanged(pool: PgPool) {
    let (batch_id, section_id, _) = seed_department_batch_section_semester(&pool).await;
    let store = DomainStore::new(pool.clone());

    let stud_id: i32 = sqlx::query_scalar(
        "INSERT INTO students (batch_id, section_id, usn, stud_name, active) \
         VALUES ($1, $2, '1OX21CS004', 'DAVE', FALSE) RETURNING id",
    )
    .bind(batch_id)
    .bind(section_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    store.reactivate_and_rename(stud_id, "DAVE").await.unwrap();

    let student = store
        .get_student_by_usn("1OX21CS004", section_id)
        .await
        .unwrap()
        .unwrap();
    assert!(student.active);
    assert_eq!(student.stud_name, "DAVE");
}

/// §8 invariants 1-3, 8: flush deltas accumulate monotonically and
/// `completed`/`progress` track `num_completed/total_usns` exactly.
#[sqlx::test]
async fn flush_accumulates_counters_and_sets_completed_at_full_progress(pool: PgPool) {
    let (batch_id, section_id, sem_id) = seed_department_batch_section_semester(&pool).await;
    let job_id: i32 = sqlx::query_scalar(
        "INSERT INTO extraction_jobs (section_id, sem_id, total_usns) VALUES ($1, $2, 12) RETURNING id",
    )
    .bind(section_id)
    .bind(sem_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    let _ = batch_id;

    // E5: flushes at counts 5, 10, 12.
    progress::flush(
        &pool,
        job_id,
        FlushDelta {
            completed: 5,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let store = DomainStore::new(pool.clone());
    let job = store.get_extraction(job_id).await.unwrap().unwrap();
    assert_eq!(job.num_completed, 5);
    assert_eq!(job.progress, 41.67);
    assert!(!job.completed);

    progress::flush(
        &pool,
        job_id,
        FlushDelta {
            completed: 5,
            invalid: 1,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let job = store.get_extraction(job_id).await.unwrap().unwrap();
    assert_eq!(job.num_completed, 10);
    assert_eq!(job.num_invalid, 1);
    assert!(!job.completed);

    progress::flush(
        &pool,
        job_id,
        FlushDelta {
            completed: 2,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let job = store.get_extraction(job_id).await.unwrap().unwrap();
    assert_eq!(job.num_completed, 12);
    assert_eq!(job.progress, 100.0);
    assert!(job.completed);
}

#[sqlx::test]
async fn append_invalid_record_joins_lists_across_multiple_flushes(pool: PgPool) {
    let (_, section_id, sem_id) = seed_department_batch_section_semester(&pool).await;
    let job_id: i32 = sqlx::query_scalar(
        "INSERT INTO extraction_jobs (section_id, sem_id, total_usns) VALUES ($1, $2, 2) RETURNING id",
    )
    .bind(section_id)
    .bind(sem_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO invalid_records (extraction_id, invalid_usns, captcha_usns, timeout_usns) \
         VALUES ($1, '', '', '')",
    )
    .bind(job_id)
    .execute(&pool)
    .await
    .unwrap();

    progress::append_invalid_record(
        &pool,
        job_id,
        &["1OX21CS001".to_string()],
        &[],
        &[],
    )
    .await
    .unwrap();
    progress::append_invalid_record(
        &pool,
        job_id,
        &["1OX21CS002".to_string()],
        &["1OX21CS003".to_string()],
        &[],
    )
    .await
    .unwrap();

    let (invalid_usns, captcha_usns): (String, String) = sqlx::query_as(
        "SELECT invalid_usns, captcha_usns FROM invalid_records WHERE extraction_id = $1",
    )
    .bind(job_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(invalid_usns, "1OX21CS001,1OX21CS002");
    assert_eq!(captcha_usns, "1OX21CS003");
}

#[sqlx::test]
async fn create_extraction_job_inserts_job_and_empty_invalid_record(pool: PgPool) {
    let (_, section_id, sem_id) = seed_department_batch_section_semester(&pool).await;
    let store = DomainStore::new(pool.clone());

    let (job, invalid_record) = store
        .create_extraction_job(section_id, sem_id, 12)
        .await
        .unwrap();

    assert_eq!(job.total_usns, 12);
    assert_eq!(job.num_completed, 0);
    assert!(!job.completed);
    assert_eq!(invalid_record.extraction_id, job.id);
    assert_eq!(invalid_record.invalid_usns, "");
}
