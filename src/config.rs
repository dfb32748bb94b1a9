//! Application configuration, loaded via [`figment`] from a TOML file merged
//! under environment variables. Duration fields accept both bare seconds and
//! unit-suffixed strings (`"5s"`, `"2m"`) via a `fundu`-backed deserializer.

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Log level for the application's own target (e.g. "debug" -> "warn,eduinsights=debug").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Bind address for the HTTP gateway.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Postgres connection string.
    pub database_url: String,

    #[serde(default = "default_shutdown_timeout", deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,

    /// Base URL of the external CAPTCHA OCR service.
    pub captcha_service_url: String,
    /// Bearer credential for the OCR service, if required.
    pub captcha_service_token: Option<String>,

    /// Path to the headless browser executable (e.g. a Chromium binary).
    pub browser_executable_path: String,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Flush the job row's counters after this many processed USNs.
    #[serde(default = "default_flush_every")]
    pub flush_every: u32,

    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_flush_every() -> u32 {
    5
}

/// Bounded-attempt caps for each retryable failure class in the page scraper (§4.3).
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetryConfig {
    #[serde(default = "default_max_captcha_attempts")]
    pub max_captcha_attempts: u32,
    #[serde(default = "default_max_timeout_attempts")]
    pub max_timeout_attempts: u32,
    #[serde(default = "default_max_refused_attempts")]
    pub max_refused_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_captcha_attempts: default_max_captcha_attempts(),
            max_timeout_attempts: default_max_timeout_attempts(),
            max_refused_attempts: default_max_refused_attempts(),
        }
    }
}

fn default_max_captcha_attempts() -> u32 {
    3
}

fn default_max_timeout_attempts() -> u32 {
    3
}

fn default_max_refused_attempts() -> u32 {
    3
}

/// Explicit wait ceilings named in §5.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TimeoutConfig {
    #[serde(default = "default_details_wait", deserialize_with = "deserialize_duration")]
    pub details_wait: Duration,
    #[serde(default = "default_captcha_timeout", deserialize_with = "deserialize_duration")]
    pub captcha_timeout: Duration,
    #[serde(default = "default_cooldown_wait", deserialize_with = "deserialize_duration")]
    pub cooldown_wait: Duration,
    #[serde(default = "default_refused_wait", deserialize_with = "deserialize_duration")]
    pub refused_wait: Duration,
    #[serde(default = "default_field_wait", deserialize_with = "deserialize_duration")]
    pub field_wait: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            details_wait: default_details_wait(),
            captcha_timeout: default_captcha_timeout(),
            cooldown_wait: default_cooldown_wait(),
            refused_wait: default_refused_wait(),
            field_wait: default_field_wait(),
        }
    }
}

fn default_details_wait() -> Duration {
    Duration::from_secs(4)
}

fn default_captcha_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_cooldown_wait() -> Duration {
    Duration::from_secs(10)
}

fn default_refused_wait() -> Duration {
    Duration::from_secs(5)
}

fn default_field_wait() -> Duration {
    Duration::from_secs(10)
}

/// Per-IP rate limiting for job-starting endpoints, enforced by [`crate::web::middleware`].
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RateLimitingConfig {
    #[serde(default = "default_start_scrape_rpm")]
    pub start_scrape_rpm: u32,
    #[serde(default = "default_burst_allowance")]
    pub burst_allowance: u32,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            start_scrape_rpm: default_start_scrape_rpm(),
            burst_allowance: default_burst_allowance(),
        }
    }
}

fn default_start_scrape_rpm() -> u32 {
    6
}

fn default_burst_allowance() -> u32 {
    2
}

/// Duration parser: accepts seconds/milliseconds/minutes/hours, default unit seconds.
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[
        TimeUnit::Second,
        TimeUnit::MilliSecond,
        TimeUnit::Minute,
        TimeUnit::Hour,
    ])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Accepts a bare number (seconds) or a unit-suffixed duration string.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number of seconds")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| serde::de::Error::custom(format!("invalid duration '{value}': {e}")))?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("duration conversion error: {e}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
