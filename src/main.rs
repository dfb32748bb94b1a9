use clap::Parser;

use eduinsights::app::App;
use eduinsights::cli::Args;
use eduinsights::config;
use eduinsights::logging::setup_logging;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let early_config: config::Config = {
        use figment::providers::{Env, Format, Toml};
        figment::Figment::new()
            .merge(Toml::file(&args.config))
            .merge(Env::raw())
            .extract()
            .expect("failed to load config for logging setup")
    };
    setup_logging(&early_config, args.tracing);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) { "development" } else { "production" },
        "starting eduinsights"
    );

    let app = match App::new(&args).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = ?e, "failed to initialize application");
            return std::process::ExitCode::FAILURE;
        }
    };

    match app.run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "application exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}
