//! Row types for the relational store (§3). Mirrors the schema in
//! `migrations/0001_init.sql` field-for-field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Department {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Batch {
    pub id: i32,
    pub department_id: i32,
    pub start_year: i32,
    pub end_year: i32,
    pub scheme_code: String,
    pub start_usn: String,
    pub end_usn: String,
    pub lateral_start_usn: Option<String>,
    pub lateral_end_usn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Section {
    pub id: i32,
    pub batch_id: i32,
    pub name: String,
    pub start_usn: String,
    pub end_usn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Semester {
    pub id: i32,
    pub batch_id: i32,
    pub sem_num: i16,
    pub current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subject {
    pub id: i32,
    pub sem_id: i32,
    pub sub_code: String,
    pub sub_name: String,
    pub credits: i32,
}

/// A subject as scraped, before a `credits` value has been assigned by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredSubject {
    pub sub_code: String,
    pub sub_name: String,
    pub credits: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Student {
    pub id: i32,
    pub batch_id: i32,
    pub section_id: i32,
    pub usn: String,
    pub stud_name: String,
    pub active: bool,
    pub cgpa: Option<f64>,
    pub current_sem: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum MarkResult {
    P,
    F,
    A,
    W,
}

impl std::fmt::Display for MarkResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarkResult::P => "P",
            MarkResult::F => "F",
            MarkResult::A => "A",
            MarkResult::W => "W",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum Grade {
    FCD,
    FC,
    SC,
    FAIL,
    ABSENT,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Mark {
    pub id: i32,
    pub stud_id: i32,
    pub subject_id: i32,
    pub section_id: i32,
    pub internal: i32,
    pub external: i32,
    pub total: i32,
    pub result: MarkResult,
    pub grade: Grade,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExtractionJob {
    pub id: i32,
    pub section_id: i32,
    pub sem_id: i32,
    pub total_usns: i32,
    pub num_completed: i32,
    pub num_invalid: i32,
    pub num_captcha: i32,
    pub num_timeout: i32,
    pub reattempts: i32,
    pub progress: f64,
    pub completed: bool,
    pub failed: bool,
    pub time_taken: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvalidRecord {
    pub id: i32,
    pub extraction_id: i32,
    pub invalid_usns: String,
    pub captcha_usns: String,
    pub timeout_usns: String,
}

impl InvalidRecord {
    /// Split a delimited field back into a USN list; empty string yields an empty vec.
    pub fn split_field(field: &str) -> Vec<&str> {
        if field.is_empty() {
            Vec::new()
        } else {
            field.split(',').collect()
        }
    }
}

/// A scraped student record, parsed off the portal's details table by C3.
#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub usn: String,
    pub name: String,
    pub marks: Vec<ScrapedMark>,
}

/// One subject row within a scraped [`StudentRecord`], before reconciliation.
#[derive(Debug, Clone)]
pub struct ScrapedMark {
    pub sub_code: String,
    pub sub_name: String,
    pub internal: i32,
    pub external: i32,
    pub total: i32,
    pub result: MarkResult,
}
