use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use sqlx::ConnectOptions;
use sqlx::postgres::PgPoolOptions;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cli::Args;
use crate::config::Config;
use crate::engine::CaptchaClient;
use crate::state::AppState;
use crate::utils::fmt_duration;
use crate::web;

/// Top-level application: owns the database pool and the axum router, and
/// drives graceful shutdown.
pub struct App {
    config: Config,
    state: AppState,
    router: Router,
}

impl App {
    pub async fn new(args: &Args) -> Result<Self, anyhow::Error> {
        let config: Config = Figment::new()
            .merge(Toml::file(&args.config))
            .merge(Env::raw())
            .extract()
            .context("failed to load config")?;

        let connect_options = sqlx::postgres::PgConnectOptions::from_str(&config.database_url)
            .context("failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("failed to create database pool")?;

        info!(
            min_connections = 0,
            max_connections = 4,
            acquire_timeout = "4s",
            idle_timeout = "2m",
            max_lifetime = "30m",
            "database pool established"
        );

        info!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("failed to run database migrations")?;
        info!("database migrations completed");

        let captcha = CaptchaClient::new(
            config.captcha_service_url.clone(),
            config.captcha_service_token.clone(),
        )
        .context("failed to build captcha client")?;

        let runtime_config = crate::engine::RuntimeConfig {
            browser_executable_path: config.browser_executable_path.clone(),
            retry: config.retry,
            timeouts: config.timeouts,
            flush_every: config.flush_every,
        };
        let state = AppState::new(db_pool, captcha, runtime_config, config.rate_limiting);

        let router = web::router(state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new())
            .layer(TimeoutLayer::new(Duration::from_secs(30)))
            .layer(CorsLayer::permissive());

        Ok(App {
            config,
            state,
            router,
        })
    }

    /// Bind and serve until a shutdown signal arrives, then drain in-flight
    /// jobs for up to `shutdown_timeout` before returning.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.bind_addr))?;
        info!(addr = %self.config.bind_addr, "listening");

        let jobs = self.state.jobs.clone();
        let server = axum::serve(listener, self.router).with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received, cancelling in-flight jobs");
            jobs.cancel_all();
        });

        if let Err(e) = server.await {
            warn!(error = %e, "server exited with an error");
        }

        info!(timeout = fmt_duration(self.config.shutdown_timeout), "draining in-flight jobs");
        self.state.drain_jobs(self.config.shutdown_timeout).await;
        Ok(())
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
