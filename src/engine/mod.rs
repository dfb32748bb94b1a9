//! The extraction engine: C1 (captcha) through C7 (progress), composed by
//! the Job Coordinator (C6) and invoked ahead-of-time by the Subject
//! Discoverer (C4).

pub mod browser;
pub mod captcha;
pub mod coordinator;
pub mod marks;
pub mod progress;
pub mod scraper;
pub mod subjects;

pub use captcha::CaptchaClient;
pub use coordinator::{JobParams, RuntimeConfig};
