//! Per-IP rate limiting for the scrape-starting endpoint (§4.8, §6).
//!
//! A single keyed token bucket per client IP. `start_scrape_rpm` requests per
//! minute, with `burst_allowance` extra cells available immediately.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter, clock::Clock};
use tower::{Layer, Service};
use tracing::warn;

use crate::config::RateLimitingConfig;
use crate::web::middleware::client_ip::header_str;

pub struct RateLimitState {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
}

impl RateLimitState {
    pub fn new(config: RateLimitingConfig) -> Self {
        let period = Duration::from_secs(60) / config.start_scrape_rpm.max(1);
        let burst = config.start_scrape_rpm + config.burst_allowance;
        let quota = Quota::with_period(period)
            .expect("non-zero period")
            .allow_burst(NonZeroU32::new(burst.max(1)).expect("non-zero burst"));
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    fn check(&self, ip: IpAddr) -> Result<(), u64> {
        match self.limiter.check_key(&ip) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(governor::clock::DefaultClock::default().now());
                Err(wait.as_secs().max(1))
            }
        }
    }
}

pub type SharedRateLimitState = Arc<RateLimitState>;

#[derive(Clone)]
pub struct RateLimitLayer {
    state: SharedRateLimitState,
}

impl RateLimitLayer {
    pub fn new(state: SharedRateLimitState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: SharedRateLimitState,
}

impl<S, ResBody> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response<ResBody>> + Send + Clone + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Debug + Send,
    ResBody: Send + 'static,
    Body: Into<ResBody>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let ip = extract_ip_from_headers(req.headers());

        match ip {
            Some(ip) => match self.state.check(ip) {
                Ok(()) => {
                    let future = self.inner.call(req);
                    Box::pin(future)
                }
                Err(retry_after) => {
                    warn!(client_ip = %ip, retry_after_secs = retry_after, "scrape start rate limited");
                    let resp = rate_limit_response(retry_after).map(Into::into);
                    Box::pin(async move { Ok(resp) })
                }
            },
            None => {
                let future = self.inner.call(req);
                Box::pin(future)
            }
        }
    }
}

fn extract_ip_from_headers(headers: &http::HeaderMap) -> Option<IpAddr> {
    if let Some(ip) = header_str(headers, "cf-connecting-ip").and_then(|s| s.parse().ok()) {
        return Some(ip);
    }
    if let Some(xff) = header_str(headers, "x-forwarded-for")
        && let Some(ip) = xff.rsplit(',').next().map(str::trim).and_then(|s| s.parse().ok())
    {
        return Some(ip);
    }
    None
}

fn rate_limit_response(retry_after: u64) -> Response<Body> {
    let body = format!(r#"{{"error":"rate limited, retry after {retry_after} seconds"}}"#);
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));
    response
        .headers_mut()
        .insert("retry-after", HeaderValue::from_str(&retry_after.to_string()).unwrap());
    response
}
