use accent_probe::api::{AccentRequest, AccentResponse};
use accent_probe::bail_service;
use accent_probe::config::{Config, DEFAULT_CONFIG_FILE};
use accent_probe::error::{ServiceError, ServiceResult};
use accent_probe::pipeline::{Pipeline, SharedPipeline};
use accent_probe::telemetry;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use clap_serde_derive::ClapSerde;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

#[derive(Clone)]
struct AppState {
    pipeline: SharedPipeline,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match Config::from_toml(&args.config_file) {
        Ok(conf) => conf.merge(args.opt_config),
        Err(_) if args.config_file == DEFAULT_CONFIG_FILE => {
            Config::default().merge(args.opt_config)
        }
        Err(err) => {
            return Err(err).with_context(|| {
                format!("Failed to read configuration file {}", args.config_file)
            })
        }
    };
    telemetry::init_telemetry(config.otlp_endpoint().as_deref(), config.console)?;

    let pipeline = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Pipeline::from_config(&config)).await??
    };
    if let Err(err) = pipeline.preflight() {
        warn!("{}", err);
    }
    let state = AppState {
        pipeline: SharedPipeline::new(pipeline),
    };

    let router = Router::new()
        .route("/accent", post(handle_accent_request))
        .route("/health", get(|| async { StatusCode::OK }))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(format!("{}:{}", config.address, config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);
    info!(
        "Supported features: avx: {}, neon: {}, simd128: {}, f16c: {}",
        candle_core::utils::with_avx(),
        candle_core::utils::with_neon(),
        candle_core::utils::with_simd128(),
        candle_core::utils::with_f16c()
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

#[axum_macros::debug_handler]
async fn handle_accent_request(
    State(state): State<AppState>,
    Json(req): Json<AccentRequest>,
) -> ServiceResult<(StatusCode, Json<AccentResponse>)> {
    let pipeline = state.pipeline.clone();
    let run = tokio::task::spawn_blocking(move || -> ServiceResult<AccentResponse> {
        match pipeline.run(&req.url) {
            Ok(report) => Ok(AccentResponse::from(report)),
            Err(err) => {
                warn!(stage = err.stage(), "Run failed: {}", err);
                Err(ServiceError::from(err))
            }
        }
    });

    match run.await {
        Ok(response) => Ok((StatusCode::OK, Json(response?))),
        Err(err) => bail_service!(StatusCode::INTERNAL_SERVER_ERROR, "Run aborted: {}", err),
    }
}
