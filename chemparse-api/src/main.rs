use anyhow::Context;
use chemparse_api::{
    app::{router, AppState},
    init_tracing,
};
use chemparse_core::{BackendArgs, ComparisonHarness, HarnessConfig};
use clap::Parser;
use mimalloc::MiMalloc;
use std::path::PathBuf;
use tokio::net::TcpListener;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// OpenTelemetry collector endpoint, e.g. http://localhost:4317
    #[arg(long, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Sentry DSN
    #[arg(long, env = "SENTRY_DSN")]
    sentry_dsn: Option<String>,

    /// Sentry environment
    #[arg(long, env = "SENTRY_ENVIRONMENT", default_value = "dev")]
    sentry_environment: String,

    /// API listen address
    #[arg(long, env = "API_LISTEN_ADDR", default_value = "0.0.0.0:3002")]
    listen_addr: String,

    #[command(flatten)]
    backends: BackendArgs,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("can't listen for shutdown signal: {e}");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    // Initialize Sentry if DSN is provided
    let use_sentry = args.sentry_dsn.is_some();
    let _guard = args.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                traces_sample_rate: 1f32,
                sample_rate: 1f32,
                environment: Some(args.sentry_environment.clone().into()),
                ..Default::default()
            },
        ))
    });

    init_tracing(
        args.otlp_endpoint.as_deref(),
        "chemparse-api".into(),
        use_sentry,
    )
    .context("can't setup tracing for API")?;

    let mut config = HarnessConfig::from(args.backends);
    // The web UI always caches example conversions
    config.cache_dir.get_or_insert_with(|| PathBuf::from("cache"));
    if config.mistral.api_key.is_none() {
        tracing::warn!("MISTRAL_API_KEY is not set, Mistral OCR will report a missing credential");
    }
    let harness = ComparisonHarness::from_config(&config).context("can't build harness")?;

    let app = router(AppState::new(harness));

    let listener = TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("can't bind {}", args.listen_addr))?;
    tracing::info!(
        "Starting chemparse service listening on {}",
        listener.local_addr()?
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    opentelemetry::global::shutdown_tracer_provider();
    Ok(())
}
