//! # Command Stream Server - Main Entry Point
//!
//! Starts the Actix-web server that accepts WebSocket audio streams and
//! classifies spoken commands in real time.
//!
//! ## Startup Order:
//! 1. **Configuration** is loaded from config.toml and environment variables
//! 2. **The keyword model** is fetched and loaded before the server binds,
//!    so a broken model fails the process instead of the first session
//! 3. **Shared state** (config, metrics, session registry, classifier
//!    engine) is built once and handed to every worker
//! 4. **The HTTP server** runs until a shutdown signal arrives
//!
//! ## Application Architecture:
//! - **config**: TOML files + environment variables
//! - **state**: shared metrics and live configuration
//! - **websocket**: the streaming session actor
//! - **classifier**: the CNN and the window classification engine
//! - **handlers/health**: the REST surface under /api/v1

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use command_stream::audio::session::SessionManager;
use command_stream::classifier::{Classifier, ClassifierEngine, KeywordModel};
use command_stream::config::AppConfig;
use command_stream::constants::WINDOW_SAMPLES;
use command_stream::device::{device_from_config, device_label};
use command_stream::state::AppState;
use command_stream::{handlers, health, middleware, websocket};

/// Global shutdown signal, set by the signal handler task and polled by
/// the main task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // Environment first so RUST_LOG and APP__* overrides apply everywhere
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting command-stream v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    let device = device_from_config(&config.classifier.device);
    info!("Classifier device: {}", device_label(&device));
    let model = KeywordModel::load(&config.classifier, device).await?;
    info!("Keyword vocabulary: {:?}", model.labels());

    let engine = ClassifierEngine::new(Arc::new(model) as Arc<dyn Classifier>, WINDOW_SAMPLES);

    let session_manager = SessionManager::new(config.performance.max_concurrent_sessions);
    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let engine_data = web::Data::new(engine);
    let manager_data = web::Data::new(session_manager);
    let state_data = web::Data::new(app_state);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state_data.clone())
            .app_data(engine_data.clone())
            .app_data(manager_data.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/classify", web::post().to(handlers::classify_file)),
            )
            .route("/ws/audio", web::get().to(websocket::audio_stream))
            // Health at the root as well, for load balancer probes
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown flag
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize structured logging.
///
/// `RUST_LOG` controls the filter; without it the crate logs at debug and
/// actix-web at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "command_stream=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms until it is raised.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
