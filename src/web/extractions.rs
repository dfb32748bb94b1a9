//! Extraction endpoints (C8): subject discovery, scrape kickoff, job lookup.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{DiscoveredSubject, ExtractionJob, Subject};
use crate::engine::coordinator::{self, JobParams};
use crate::engine::{browser, subjects};
use crate::error::ApiError;
use crate::state::AppState;
use crate::utils::split_usn;

const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct IdentifySubjectsRequest {
    usn: Option<String>,
    result_url: String,
}

#[derive(Debug, Deserialize)]
pub struct SubjectInput {
    sub_code: String,
    sub_name: String,
    credits: i32,
}

#[derive(Debug, Deserialize)]
pub struct ScrapeQuery {
    result_url: String,
}

#[derive(Debug, Serialize)]
pub struct StartScrapeResponse {
    message: String,
    extraction_id: i32,
    extraction_invalid_id: i32,
    start_usn: String,
    end_usn: String,
    number_usns: i32,
}

fn validate_url(raw: &str) -> Result<url::Url, ApiError> {
    url::Url::parse(raw).map_err(|e| ApiError::Validation(format!("invalid result_url: {e}")))
}

/// `POST /extractions/identify_subjects/{batch_id}`
pub async fn identify_subjects(
    State(state): State<AppState>,
    Path(batch_id): Path<i32>,
    Json(body): Json<IdentifySubjectsRequest>,
) -> Result<Json<Vec<DiscoveredSubject>>, ApiError> {
    validate_url(&body.result_url)?;

    let batch = state
        .store
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("batch {batch_id} not found")))?;

    let (prefix, lo) = split_usn(&batch.start_usn)
        .ok_or_else(|| ApiError::Validation("batch start_usn is not a valid USN".into()))?;
    let (_, hi) = split_usn(&batch.end_usn)
        .ok_or_else(|| ApiError::Validation("batch end_usn is not a valid USN".into()))?;

    let mut session = browser::initialize(Some(state.runtime_config.browser_executable_path.clone()))
        .await
        .map_err(ApiError::Internal)?;

    let result = subjects::identify_subjects(
        &mut session,
        &state.captcha,
        &state.runtime_config.retry,
        &state.runtime_config.timeouts,
        prefix,
        lo,
        hi,
        body.usn.as_deref(),
        &body.result_url,
    )
    .await;

    session.quit().await;

    let discovered = result.map_err(ApiError::from)?;
    Ok(Json(discovered))
}

/// `POST /extractions/add_subjects/{batch_id}`
pub async fn add_subjects(
    State(state): State<AppState>,
    Path(batch_id): Path<i32>,
    Json(subjects): Json<Vec<SubjectInput>>,
) -> Result<Json<Vec<Subject>>, ApiError> {
    if let Some(bad) = subjects.iter().find(|s| s.credits <= 0) {
        return Err(ApiError::Validation(format!(
            "subject {} has non-positive credits",
            bad.sub_code
        )));
    }

    let batch = state
        .store
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("batch {batch_id} not found")))?;

    let semester = state
        .store
        .get_current_semester(batch.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no current semester for batch {batch_id}")))?;

    let discovered: Vec<DiscoveredSubject> = subjects
        .into_iter()
        .map(|s| DiscoveredSubject {
            sub_code: s.sub_code,
            sub_name: s.sub_name,
            credits: s.credits,
        })
        .collect();

    let inserted = state.store.insert_subjects(semester.id, &discovered).await?;
    Ok(Json(inserted))
}

/// `POST /extractions/scraper/{section_id}?result_url=...`
pub async fn start_scrape(
    State(state): State<AppState>,
    Path(section_id): Path<i32>,
    Query(query): Query<ScrapeQuery>,
) -> Result<Json<StartScrapeResponse>, ApiError> {
    validate_url(&query.result_url)?;

    let preflight = reqwest::Client::builder()
        .timeout(PREFLIGHT_TIMEOUT)
        .build()
        .map_err(|e| ApiError::Internal(e.into()))?;
    let resp = preflight
        .get(&query.result_url)
        .send()
        .await
        .map_err(|e| ApiError::Validation(format!("result_url unreachable: {e}")))?;
    if !resp.status().is_success() {
        return Err(ApiError::Validation(format!(
            "result_url returned status {}",
            resp.status()
        )));
    }

    let section = state
        .store
        .get_section(section_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("section {section_id} not found")))?;

    let semester = state
        .store
        .get_current_semester(section.batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no current semester for section {section_id}")))?;

    let (prefix, lo) = split_usn(&section.start_usn)
        .ok_or_else(|| ApiError::Validation("section start_usn is not a valid USN".into()))?;
    let (_, hi) = split_usn(&section.end_usn)
        .ok_or_else(|| ApiError::Validation("section end_usn is not a valid USN".into()))?;
    let number_usns = (hi - lo + 1) as i32;

    let (job, invalid_record) = state
        .store
        .create_extraction_job(section_id, semester.id, number_usns)
        .await?;

    let cancel = state.jobs.register(job.id);
    let params = JobParams {
        job_id: job.id,
        section_id,
        sem_id: semester.id,
        result_url: query.result_url.clone(),
        usn_prefix: prefix.to_string(),
        suffix_lo: lo,
        suffix_hi: hi,
        flush_every: state.runtime_config.flush_every,
    };

    let store = state.store.clone();
    let captcha = (*state.captcha).clone();
    let runtime_config = state.runtime_config.clone();
    let jobs = state.jobs.clone();
    let job_id = job.id;

    state
        .spawn_job(async move {
            coordinator::run(store, captcha, runtime_config, params, cancel).await;
            jobs.remove(job_id);
        })
        .await;

    info!(job_id = job.id, section_id, "scrape job scheduled");

    Ok(Json(StartScrapeResponse {
        message: "extraction scheduled".to_string(),
        extraction_id: job.id,
        extraction_invalid_id: invalid_record.id,
        start_usn: section.start_usn,
        end_usn: section.end_usn,
        number_usns,
    }))
}

/// `GET /extractions/{id}`
pub async fn get_extraction(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ExtractionJob>, ApiError> {
    let job = state
        .store
        .get_extraction(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("extraction {id} not found")))?;
    Ok(Json(job))
}
