// Web server entry point
use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{web, App, HttpServer};
use candle::Device;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use translation_gateway::executor::InferenceExecutor;
use translation_gateway::logsink::RequestLog;
use translation_gateway::models::HubModelSource;
use translation_gateway::registry::ModelRegistry;
use translation_gateway::state::AppState;
use translation_gateway::{api, GatewayConfig, StartupPolicy};

fn config_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("GATEWAY_CONFIG").map(PathBuf::from))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = match config_path() {
        Some(path) => GatewayConfig::from_file(&path)?,
        None => GatewayConfig::default(),
    };

    let mut registry = ModelRegistry::from_configs(&config.models);
    let source = HubModelSource::new(Device::Cpu);
    let summary = registry.load_all(&source);
    info!("{}/{} models ready", summary.ready, summary.total);

    if !summary.all_ready() {
        match config.startup_policy {
            StartupPolicy::RequireAll => {
                error!(
                    "Failed to load models: {}. Exiting...",
                    summary
                        .failed
                        .iter()
                        .map(|(id, _)| id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                std::process::exit(1);
            }
            StartupPolicy::Degraded => {
                warn!(
                    "Starting in degraded mode; unavailable: {}",
                    summary
                        .failed
                        .iter()
                        .map(|(id, _)| id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
    }

    let request_log = match &config.request_log_path {
        Some(path) => Some(RequestLog::spawn(path)?),
        None => None,
    };

    let state = web::Data::new(AppState {
        registry: Arc::new(registry),
        executor: InferenceExecutor::new(Duration::from_secs(config.request_timeout_secs)),
        request_log,
    });

    info!("Starting server on {}:{}", config.host, config.port);
    let bind_addr = (config.host.clone(), config.port);
    let cors_origin = config.cors_allowed_origin.clone();

    HttpServer::new(move || {
        let cors = match &cors_origin {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allowed_methods(["GET", "POST", "HEAD", "OPTIONS"])
                .allowed_headers([header::CONTENT_TYPE, header::ACCEPT]),
            None => Cors::default(),
        };
        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .configure(api::configure)
    })
    .bind(bind_addr)?
    .run()
    .await?;

    Ok(())
}
