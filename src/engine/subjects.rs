//! Subject Discoverer (C4): one-shot scrape to enumerate a batch's subject
//! codes/names ahead of any extraction job (§4.4).

use anyhow::Result;
use rand::Rng;

use crate::config::{RetryConfig, TimeoutConfig};
use crate::domain::DiscoveredSubject;
use crate::engine::browser::Session;
use crate::engine::captcha::CaptchaClient;
use crate::engine::scraper::{self, ScrapeOutcome};
use crate::error::EngineError;

/// Discover subjects for a batch. If `usn` is absent, a USN is assembled from
/// a uniformly random suffix within `[suffix_lo, suffix_hi]`, prefixed with
/// the batch's fixed 7-character prefix.
#[allow(clippy::too_many_arguments)]
pub async fn identify_subjects(
    session: &mut Session,
    captcha: &CaptchaClient,
    retry: &RetryConfig,
    timeouts: &TimeoutConfig,
    usn_prefix: &str,
    suffix_lo: u32,
    suffix_hi: u32,
    usn: Option<&str>,
    result_url: &str,
) -> Result<Vec<DiscoveredSubject>, EngineError> {
    let usn = match usn {
        Some(given) => given.to_string(),
        None => {
            let suffix = rand::rng().random_range(suffix_lo..=suffix_hi);
            crate::utils::assemble_usn(usn_prefix, suffix)
        }
    };

    let (record, outcome) = scraper::scrape(session, captcha, retry, timeouts, &usn, result_url)
        .await
        .map_err(|e| EngineError::Fatal(e.to_string()))?;

    match outcome {
        ScrapeOutcome::Success { .. } => {
            let record = record.expect("success outcome carries a record");
            Ok(record
                .marks
                .into_iter()
                .map(|m| DiscoveredSubject {
                    sub_code: m.sub_code,
                    sub_name: m.sub_name,
                    credits: 0,
                })
                .collect())
        }
        ScrapeOutcome::InvalidUsn => Err(EngineError::PortalInvalidUsn),
        ScrapeOutcome::CaptchaMax | ScrapeOutcome::TimeoutMax | ScrapeOutcome::ConnectionRefusedMax => {
            Err(EngineError::ExternalUnavailable(format!(
                "scrape outcome {} for {usn}",
                outcome.code()
            )))
        }
        ScrapeOutcome::DnsFailure => Err(EngineError::Fatal(format!("DNS resolution failed for {result_url}"))),
        ScrapeOutcome::DriverException | ScrapeOutcome::OtherException => {
            Err(EngineError::Fatal(format!("driver exception scraping {usn}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_suffix_is_within_inclusive_range() {
        for _ in 0..100 {
            let suffix = rand::rng().random_range(1..=999u32);
            assert!((1..=999).contains(&suffix));
        }
    }
}
