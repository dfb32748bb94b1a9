//! Job Coordinator (C6): iterates a section's USN range, enforces the
//! retry policy, and batch-flushes progress (§4.6).

use std::time::Instant;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{RetryConfig, TimeoutConfig};
use crate::domain::DomainStore;
use crate::engine::browser;
use crate::engine::captcha::CaptchaClient;
use crate::engine::marks;
use crate::engine::progress::{self, FlushDelta};
use crate::engine::scraper::{self, ScrapeOutcome};
use crate::utils;

pub struct JobParams {
    pub job_id: i32,
    pub section_id: i32,
    pub sem_id: i32,
    pub result_url: String,
    pub usn_prefix: String,
    pub suffix_lo: u32,
    pub suffix_hi: u32,
    pub flush_every: u32,
}

/// The slice of application config a Coordinator actually needs, handed down
/// from `AppState` rather than the full top-level `Config`.
#[derive(Clone)]
pub struct RuntimeConfig {
    pub browser_executable_path: String,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub flush_every: u32,
}

/// Run one extraction job to completion or cancellation. Owns a single
/// browser session for the job's entire lifetime.
pub async fn run(
    store: DomainStore,
    captcha: CaptchaClient,
    config: RuntimeConfig,
    params: JobParams,
    cancel: CancellationToken,
) {
    let span = info_span!("extraction_job", job_id = params.job_id, section_id = params.section_id);
    async move {
        if let Err(e) = run_inner(store, captcha, &config, params, cancel).await {
            warn!(error = %e, "extraction job terminated with an error");
        }
    }
    .instrument(span)
    .await;
}

async fn run_inner(
    store: DomainStore,
    captcha: CaptchaClient,
    config: &RuntimeConfig,
    params: JobParams,
    cancel: CancellationToken,
) -> Result<()> {
    let mut session = browser::initialize(Some(config.browser_executable_path.clone())).await?;

    let mut batch = FlushDelta::default();
    let mut count: u32 = 0;
    let mut t_start = Instant::now();
    let mut invalid_usns: Vec<String> = Vec::new();
    let mut captcha_usns: Vec<String> = Vec::new();
    let mut timeout_usns: Vec<String> = Vec::new();

    'outer: for n in params.suffix_lo..=params.suffix_hi {
        if cancel.is_cancelled() {
            info!(job_id = params.job_id, "cancellation observed at iteration boundary");
            if count > 0 {
                flush(&store, params.job_id, &mut batch, &mut t_start).await?;
            }
            progress::mark_failed(store.pool(), params.job_id).await?;
            break 'outer;
        }

        if should_flush(count, params.flush_every) {
            flush(&store, params.job_id, &mut batch, &mut t_start).await?;
            count = 0;
        }

        let usn = utils::assemble_usn(&params.usn_prefix, n);
        count += 1;

        let existing = store.get_student_by_usn(&usn, params.section_id).await?;
        if let Some(student) = &existing {
            if !student.active {
                batch.invalid += 1;
                batch.completed += 1;
                invalid_usns.push(usn.clone());
                continue;
            }
        }

        let outcome = scraper::scrape(
            &mut session,
            &captcha,
            &config.retry,
            &config.timeouts,
            &usn,
            &params.result_url,
        )
        .await;

        match outcome {
            Ok((Some(record), scrape_outcome @ ScrapeOutcome::Success { .. })) => {
                bucket_outcome(&mut batch, &config.retry, &scrape_outcome);

                let (stud_id, stored_name, stored_active) = match &existing {
                    Some(s) => (s.id, s.stud_name.clone(), s.active),
                    None => {
                        warn!(usn, "success scrape for a USN with no student row, skipping reconciliation");
                        batch.completed += 1;
                        continue;
                    }
                };

                marks::reconcile(
                    &store,
                    params.sem_id,
                    params.section_id,
                    stud_id,
                    &stored_name,
                    stored_active,
                    &record,
                )
                .await?;
            }
            Ok((None, scrape_outcome @ ScrapeOutcome::InvalidUsn)) => {
                bucket_outcome(&mut batch, &config.retry, &scrape_outcome);
                invalid_usns.push(usn.clone());
                if let Some(student) = &existing {
                    store.deactivate_student(student.id).await?;
                }
            }
            Ok((None, scrape_outcome @ ScrapeOutcome::CaptchaMax)) => {
                bucket_outcome(&mut batch, &config.retry, &scrape_outcome);
                captcha_usns.push(usn.clone());
            }
            Ok((None, scrape_outcome @ ScrapeOutcome::TimeoutMax)) => {
                bucket_outcome(&mut batch, &config.retry, &scrape_outcome);
                timeout_usns.push(usn.clone());
            }
            Ok((None, scrape_outcome)) => {
                bucket_outcome(&mut batch, &config.retry, &scrape_outcome);
            }
            Ok((Some(_), _)) => unreachable!("only Success carries a record"),
            Err(e) => {
                warn!(usn, error = %e, "unrecoverable scrape error, abandoning USN");
                batch.reattempts += config.retry.max_timeout_attempts as i32;
            }
        }

        batch.completed += 1;
    }

    if count > 0 && !cancel.is_cancelled() {
        flush(&store, params.job_id, &mut batch, &mut t_start).await?;
    }

    progress::append_invalid_record(
        store.pool(),
        params.job_id,
        &invalid_usns,
        &captcha_usns,
        &timeout_usns,
    )
    .await?;

    session.quit().await;
    Ok(())
}

async fn flush(
    store: &DomainStore,
    job_id: i32,
    batch: &mut FlushDelta,
    t_start: &mut Instant,
) -> Result<()> {
    batch.elapsed_secs = t_start.elapsed().as_secs() as i32;
    progress::flush(store.pool(), job_id, *batch).await?;
    *batch = FlushDelta::default();
    *t_start = Instant::now();
    Ok(())
}

/// Whether the batch accumulated so far should be flushed before processing
/// the next USN, per §4.6 step 3's "every N" cadence.
fn should_flush(count: u32, flush_every: u32) -> bool {
    count == flush_every
}

/// Applies a scrape outcome's counter deltas onto `batch`, mirroring §4.6
/// step 3's status-code dispatch. `Success` only contributes to `reattempts`
/// (soft-retry counts folded into its composite code); callers handle mark
/// reconciliation and USN-list bookkeeping separately.
fn bucket_outcome(batch: &mut FlushDelta, retry: &RetryConfig, outcome: &ScrapeOutcome) {
    match *outcome {
        ScrapeOutcome::Success { code } => {
            if (10..20).contains(&code) {
                batch.reattempts += code - 10;
            } else if (20..30).contains(&code) {
                batch.reattempts += code - 20;
            }
        }
        ScrapeOutcome::InvalidUsn => {
            batch.invalid += 1;
        }
        ScrapeOutcome::CaptchaMax => {
            batch.captcha += 1;
            batch.reattempts += retry.max_captcha_attempts as i32;
        }
        ScrapeOutcome::TimeoutMax => {
            batch.timeout += 1;
            batch.reattempts += retry.max_timeout_attempts as i32;
        }
        ScrapeOutcome::DnsFailure
        | ScrapeOutcome::DriverException
        | ScrapeOutcome::OtherException
        | ScrapeOutcome::ConnectionRefusedMax => {
            batch.reattempts += retry.max_timeout_attempts as i32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// E5: with `total_usns=12` and the default flush-every-5 cadence,
    /// flushes land at cumulative `num_completed` 5, 10, and 12 (the final
    /// partial batch of 2).
    #[test]
    fn flush_cadence_lands_at_five_ten_twelve() {
        let flush_every = 5;
        let total = 12u32;
        let mut count = 0u32;
        let mut completed = 0u32;
        let mut flush_points = Vec::new();

        for _ in 0..total {
            if should_flush(count, flush_every) {
                flush_points.push(completed);
                count = 0;
            }
            count += 1;
            completed += 1;
        }
        if count > 0 {
            flush_points.push(completed);
        }

        assert_eq!(flush_points, vec![5, 10, 12]);
    }

    #[test]
    fn should_flush_only_at_exact_cadence_boundary() {
        assert!(!should_flush(0, 5));
        assert!(!should_flush(4, 5));
        assert!(should_flush(5, 5));
        assert!(!should_flush(6, 5));
    }

    #[test]
    fn bucket_outcome_success_folds_captcha_retries_into_reattempts() {
        let retry = RetryConfig::default();
        let mut batch = FlushDelta::default();
        bucket_outcome(&mut batch, &retry, &ScrapeOutcome::Success { code: 12 });
        assert_eq!(batch.reattempts, 2);
        assert_eq!(batch.invalid, 0);
        assert_eq!(batch.captcha, 0);
    }

    #[test]
    fn bucket_outcome_success_folds_timeout_retries_into_reattempts() {
        let retry = RetryConfig::default();
        let mut batch = FlushDelta::default();
        bucket_outcome(&mut batch, &retry, &ScrapeOutcome::Success { code: 21 });
        assert_eq!(batch.reattempts, 1);
        assert_eq!(batch.timeout, 0);
    }

    #[test]
    fn bucket_outcome_success_zero_code_touches_nothing() {
        let retry = RetryConfig::default();
        let mut batch = FlushDelta::default();
        bucket_outcome(&mut batch, &retry, &ScrapeOutcome::Success { code: 0 });
        assert_eq!(batch, FlushDelta::default());
    }

    #[test]
    fn bucket_outcome_invalid_usn_increments_invalid_only() {
        let retry = RetryConfig::default();
        let mut batch = FlushDelta::default();
        bucket_outcome(&mut batch, &retry, &ScrapeOutcome::InvalidUsn);
        assert_eq!(batch.invalid, 1);
        assert_eq!(batch.reattempts, 0);
    }

    #[test]
    fn bucket_outcome_captcha_max_increments_captcha_and_reattempts() {
        let retry = RetryConfig::default();
        let mut batch = FlushDelta::default();
        bucket_outcome(&mut batch, &retry, &ScrapeOutcome::CaptchaMax);
        assert_eq!(batch.captcha, 1);
        assert_eq!(batch.reattempts, retry.max_captcha_attempts as i32);
    }

    #[test]
    fn bucket_outcome_timeout_max_increments_timeout_and_reattempts() {
        let retry = RetryConfig::default();
        let mut batch = FlushDelta::default();
        bucket_outcome(&mut batch, &retry, &ScrapeOutcome::TimeoutMax);
        assert_eq!(batch.timeout, 1);
        assert_eq!(batch.reattempts, retry.max_timeout_attempts as i32);
    }

    #[test]
    fn bucket_outcome_unclassified_failures_only_add_reattempts() {
        let retry = RetryConfig::default();
        for outcome in [
            ScrapeOutcome::DnsFailure,
            ScrapeOutcome::DriverException,
            ScrapeOutcome::OtherException,
            ScrapeOutcome::ConnectionRefusedMax,
        ] {
            let mut batch = FlushDelta::default();
            bucket_outcome(&mut batch, &retry, &outcome);
            assert_eq!(batch.invalid, 0);
            assert_eq!(batch.captcha, 0);
            assert_eq!(batch.timeout, 0);
            assert_eq!(batch.reattempts, retry.max_timeout_attempts as i32);
        }
    }
}
