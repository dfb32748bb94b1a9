//! Page Scraper (C3): drives one form submission for one USN against the
//! result portal and returns a typed outcome (§4.3).

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use futures::StreamExt;
use html_scraper::{Html, Selector};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{RetryConfig, TimeoutConfig};
use crate::domain::{MarkResult, ScrapedMark, StudentRecord};
use crate::engine::browser::Session;
use crate::engine::captcha::CaptchaClient;

const CAPTCHA_IMAGE_SELECTOR: &str = "#ctl00_ContentPlaceHolder1_imgCaptcha";
const CAPTCHA_REFRESH_SELECTOR: &str = "#ctl00_ContentPlaceHolder1_btnRefresh";
const USN_FIELD_SELECTOR: &str = "#ctl00_ContentPlaceHolder1_txt_uscode";
const CAPTCHA_FIELD_SELECTOR: &str = "#ctl00_ContentPlaceHolder1_txtcap";
const SUBMIT_SELECTOR: &str = "#ctl00_ContentPlaceHolder1_btnsubmit";
const DETAILS_TABLE_SELECTOR: &str = "#ctl00_ContentPlaceHolder1_gvDetails";

const ALERT_INVALID_USN: &str = "not available or Invalid";
const ALERT_INVALID_CAPTCHA: &str = "Invalid captcha code";
const ALERT_COOLDOWN: &str = "Please check website after 2 hour";

static NAME_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#ctl00_ContentPlaceHolder1_lblName").unwrap());
static USN_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#ctl00_ContentPlaceHolder1_lblUSN").unwrap());
static ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").unwrap());
static CELL_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());

/// One outcome of a single `Scrape` call, matching the §4.3 status-code table.
/// `Success` already folds in the composite `10+k`/`20+k` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeOutcome {
    Success { code: i32 },
    InvalidUsn,
    CaptchaMax,
    TimeoutMax,
    DnsFailure,
    DriverException,
    OtherException,
    ConnectionRefusedMax,
}

impl ScrapeOutcome {
    pub fn code(self) -> i32 {
        match self {
            ScrapeOutcome::Success { code } => code,
            ScrapeOutcome::InvalidUsn => 1,
            ScrapeOutcome::CaptchaMax => 2,
            ScrapeOutcome::TimeoutMax => 3,
            ScrapeOutcome::DnsFailure => 4,
            ScrapeOutcome::DriverException => 5,
            ScrapeOutcome::OtherException => 6,
            ScrapeOutcome::ConnectionRefusedMax => 7,
        }
    }
}

/// Scrape one USN's result page. Owns no session state across calls; the
/// caller's `Session` may be reset in place on transient driver failures.
pub async fn scrape(
    session: &mut Session,
    captcha: &CaptchaClient,
    retry: &RetryConfig,
    timeouts: &TimeoutConfig,
    usn: &str,
    result_url: &str,
) -> Result<(Option<StudentRecord>, ScrapeOutcome)> {
    let mut captcha_retries: u32 = 0;
    let mut timeout_retries: u32 = 0;
    let mut refused_attempts: u32 = 0;

    loop {
        let page = match session.new_page().await {
            Ok(p) => p,
            Err(e) => return Ok((None, classify_launch_error(&e))),
        };

        let dialogs = listen_for_dialogs(&page)
            .await
            .context("registering javascript dialog listener")?;

        let nav = page.goto(result_url).await;
        if let Err(e) = nav {
            match classify_driver_error(&e.to_string()) {
                DriverFailure::Timeout => {
                    timeout_retries += 1;
                    if timeout_retries >= retry.max_timeout_attempts {
                        return Ok((None, ScrapeOutcome::TimeoutMax));
                    }
                    continue;
                }
                DriverFailure::DnsFailure => return Ok((None, ScrapeOutcome::DnsFailure)),
                DriverFailure::ConnectionRefused => {
                    refused_attempts += 1;
                    if refused_attempts >= retry.max_refused_attempts {
                        return Ok((None, ScrapeOutcome::ConnectionRefusedMax));
                    }
                    tokio::time::sleep(timeouts.refused_wait).await;
                    let _ = session.reset().await;
                    continue;
                }
                DriverFailure::Other => return Ok((None, ScrapeOutcome::DriverException)),
            }
        }

        if let Err(e) = page
            .wait_for_navigation()
            .await
            .context("waiting for page load")
        {
            warn!(usn, error = %e, "navigation settle failed, continuing anyway");
        }

        let captcha_bytes = match page.find_element(CAPTCHA_IMAGE_SELECTOR).await {
            Ok(el) => el
                .screenshot(chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat::Png)
                .await
                .context("screenshotting captcha element")?,
            Err(_) => return Ok((None, ScrapeOutcome::OtherException)),
        };

        let mut solved = captcha
            .solve(&captcha_bytes, usn)
            .await
            .map(Some)
            .unwrap_or_else(|e| {
                warn!(usn, error = %e, "captcha service call failed");
                None
            });

        while solved.as_deref().map(str::len) != Some(6) {
            captcha_retries += 1;
            if captcha_retries >= retry.max_captcha_attempts {
                return Ok((None, ScrapeOutcome::CaptchaMax));
            }
            if let Ok(refresh) = page.find_element(CAPTCHA_REFRESH_SELECTOR).await {
                let _ = refresh.click().await;
            }
            let bytes = page
                .find_element(CAPTCHA_IMAGE_SELECTOR)
                .await
                .context("re-locating captcha element after refresh")?
                .screenshot(chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat::Png)
                .await?;
            solved = captcha.solve(&bytes, usn).await.ok();
        }
        let captcha_text = solved.expect("loop exit guarantees Some(len == 6)");

        fill_and_submit(&page, usn, &captcha_text).await?;

        match read_alert(dialogs).await {
            Some(text) if text.contains(ALERT_INVALID_USN) => {
                debug!(usn, "invalid-usn alert accepted");
                return Ok((None, ScrapeOutcome::InvalidUsn));
            }
            Some(text) if text.contains(ALERT_INVALID_CAPTCHA) => {
                debug!(usn, "invalid-captcha alert accepted");
                captcha_retries += 1;
                if captcha_retries >= retry.max_captcha_attempts {
                    return Ok((None, ScrapeOutcome::CaptchaMax));
                }
                continue;
            }
            Some(text) if text.contains(ALERT_COOLDOWN) => {
                debug!(usn, "cooldown alert accepted");
                tokio::time::sleep(timeouts.cooldown_wait).await;
                session.reset().await.context("resetting session after cooldown alert")?;
                continue;
            }
            Some(other) => {
                warn!(usn, alert = %other, "unrecognized portal alert, treating as other exception");
                return Ok((None, ScrapeOutcome::OtherException));
            }
            None => {}
        }

        let details_html = match tokio::time::timeout(timeouts.details_wait, wait_for_details(&page))
            .await
        {
            Ok(Ok(html)) => html,
            Ok(Err(e)) => {
                warn!(usn, error = %e, "details table lookup failed");
                return Ok((None, ScrapeOutcome::OtherException));
            }
            Err(_) => {
                timeout_retries += 1;
                if timeout_retries >= retry.max_timeout_attempts {
                    return Ok((None, ScrapeOutcome::TimeoutMax));
                }
                continue;
            }
        };

        let record = parse_student_record(&details_html, usn)?;
        let code = if captcha_retries > 0 {
            10 + captcha_retries as i32
        } else if timeout_retries > 0 {
            20 + timeout_retries as i32
        } else {
            0
        };
        info!(usn, code, "scrape succeeded");
        return Ok((Some(record), ScrapeOutcome::Success { code }));
    }
}

async fn fill_and_submit(
    page: &chromiumoxide::Page,
    usn: &str,
    captcha_text: &str,
) -> Result<()> {
    page.find_element(USN_FIELD_SELECTOR)
        .await
        .context("locating USN field")?
        .click()
        .await?
        .type_str(usn)
        .await?;

    page.find_element(CAPTCHA_FIELD_SELECTOR)
        .await
        .context("locating captcha field")?
        .click()
        .await?
        .type_str(captcha_text)
        .await?;

    page.find_element(SUBMIT_SELECTOR)
        .await
        .context("locating submit button")?
        .click()
        .await?;

    Ok(())
}

/// Registers a `Page.javascriptDialogOpening` listener for this page and
/// spawns a task that immediately dismisses every dialog it sees via
/// `Page.handleJavaScriptDialog`, forwarding the captured message. A native
/// `alert()` blocks the renderer until handled, so the dialog must be
/// dismissed as soon as the event arrives rather than after classification.
async fn listen_for_dialogs(page: &chromiumoxide::Page) -> Result<mpsc::UnboundedReceiver<String>> {
    let mut events = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .context("subscribing to javascriptDialogOpening events")?;
    let page = page.clone();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let message = event.message.clone();
            match HandleJavaScriptDialogParams::builder().accept(true).build() {
                Ok(params) => {
                    if let Err(e) = page.execute(params).await {
                        warn!(error = %e, "failed to dismiss javascript dialog");
                    }
                }
                Err(e) => warn!(error = %e, "failed to build dialog-dismissal params"),
            }
            if tx.send(message).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Wait briefly for a dialog message captured by [`listen_for_dialogs`]. Most
/// submissions never raise one, so the wait is bounded rather than indefinite.
async fn read_alert(mut dialogs: mpsc::UnboundedReceiver<String>) -> Option<String> {
    tokio::time::timeout(Duration::from_millis(500), dialogs.recv())
        .await
        .ok()
        .flatten()
}

async fn wait_for_details(page: &chromiumoxide::Page) -> Result<String> {
    loop {
        if page.find_element(DETAILS_TABLE_SELECTOR).await.is_ok() {
            return page.content().await.context("reading page content");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn parse_student_record(html: &str, fallback_usn: &str) -> Result<StudentRecord> {
    let document = Html::parse_document(html);

    let usn = document
        .select(&USN_CELL)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_usn.to_string());

    let name = document
        .select(&NAME_CELL)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .context("student name cell missing from details table")?;

    let table = document
        .select(&Selector::parse(DETAILS_TABLE_SELECTOR).unwrap())
        .next()
        .context("details table missing")?;

    let mut marks = Vec::new();
    for row in table.select(&ROW_SELECTOR) {
        let cells: Vec<String> = row
            .select(&CELL_SELECTOR)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .collect();
        if cells.len() < 6 {
            continue;
        }
        let (Ok(internal), Ok(external), Ok(total)) = (
            cells[2].parse::<i32>(),
            cells[3].parse::<i32>(),
            cells[4].parse::<i32>(),
        ) else {
            continue;
        };
        let result = match cells[5].trim().to_uppercase().as_str() {
            "P" => MarkResult::P,
            "F" => MarkResult::F,
            "A" => MarkResult::A,
            "W" => MarkResult::W,
            _ => continue,
        };
        marks.push(ScrapedMark {
            sub_code: cells[0].clone(),
            sub_name: cells[1].clone(),
            internal,
            external,
            total,
            result,
        });
    }
    marks.sort_by(|a, b| a.sub_code.cmp(&b.sub_code));

    Ok(StudentRecord { usn, name, marks })
}

enum DriverFailure {
    Timeout,
    DnsFailure,
    ConnectionRefused,
    Other,
}

fn classify_driver_error(message: &str) -> DriverFailure {
    if message.contains("ERR_CONNECTION_TIMED_OUT") || message.contains("timed out") {
        DriverFailure::Timeout
    } else if message.contains("ERR_NAME_NOT_RESOLVED") {
        DriverFailure::DnsFailure
    } else if message.contains("ERR_CONNECTION_REFUSED") {
        DriverFailure::ConnectionRefused
    } else {
        DriverFailure::Other
    }
}

fn classify_launch_error(err: &anyhow::Error) -> ScrapeOutcome {
    let message = err.to_string();
    match classify_driver_error(&message) {
        DriverFailure::DnsFailure => ScrapeOutcome::DnsFailure,
        DriverFailure::Other => ScrapeOutcome::DriverException,
        _ => ScrapeOutcome::OtherException,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_marks_table_sorted_by_code() {
        let html = r#"
            <html><body>
            <span id="ctl00_ContentPlaceHolder1_lblUSN">1OX21CS001</span>
            <span id="ctl00_ContentPlaceHolder1_lblName"> ALICE </span>
            <table id="ctl00_ContentPlaceHolder1_gvDetails">
                <tr><td>21CS52</td><td>Data Structures</td><td>20</td><td>35</td><td>55</td><td>P</td></tr>
                <tr><td>21CS51</td><td>Maths</td><td>25</td><td>40</td><td>65</td><td>P</td></tr>
            </table>
            </body></html>
        "#;
        let record = parse_student_record(html, "1OX21CS001").unwrap();
        assert_eq!(record.name, "ALICE");
        assert_eq!(record.marks.len(), 2);
        assert_eq!(record.marks[0].sub_code, "21CS51");
        assert_eq!(record.marks[1].sub_code, "21CS52");
    }

    #[test]
    fn classifies_known_driver_errors() {
        assert!(matches!(
            classify_driver_error("net::ERR_NAME_NOT_RESOLVED"),
            DriverFailure::DnsFailure
        ));
        assert!(matches!(
            classify_driver_error("net::ERR_CONNECTION_REFUSED"),
            DriverFailure::ConnectionRefused
        ));
        assert!(matches!(
            classify_driver_error("net::ERR_CONNECTION_TIMED_OUT"),
            DriverFailure::Timeout
        ));
        assert!(matches!(
            classify_driver_error("some opaque cdp error"),
            DriverFailure::Other
        ));
    }

    #[test]
    fn success_code_picks_captcha_band_over_timeout() {
        let outcome = ScrapeOutcome::Success { code: 12 };
        assert_eq!(outcome.code(), 12);
    }
}
