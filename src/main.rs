// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use log::{info, warn};
use std::sync::Arc;

mod errors;
mod handlers;
mod models;
mod services;

use crate::handlers::{
    StudioSession, cancel_generation, clear_history, generate_image, get_history, get_session,
    get_styles, restore_history, upload_image,
};
use crate::services::generation::GenerateApi;
use crate::services::history::HistoryStorage;
use crate::services::{
    GenerationWorkflow, HistoryStore, HttpGenerateApi, ImageNormalizer, LogNotifier,
    MemoryStorage, MockGenerateApi, Notifier, RedisStorage,
};

#[derive(Clone)]
pub struct AppState {
    normalizer: Arc<ImageNormalizer>,
    workflow: Arc<GenerationWorkflow>,
    history: Arc<HistoryStore>,
    notifier: Arc<dyn Notifier>,
    session: Arc<StudioSession>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting Aether Studio service...");

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let bind_addr = std::env::var("STUDIO_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    // History degrades to in-memory state when Redis is unreachable.
    let storage: Arc<dyn HistoryStorage> = match RedisStorage::new(&redis_url).await {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            warn!(
                "Redis unavailable at {}, keeping history in memory only: {}",
                redis_url, e
            );
            Arc::new(MemoryStorage::new())
        }
    };

    let api: Arc<dyn GenerateApi> = match std::env::var("GENERATE_API_URL") {
        Ok(url) => {
            info!("Using generation endpoint {}", url);
            Arc::new(HttpGenerateApi::new(url))
        }
        Err(_) => {
            info!("GENERATE_API_URL not set, using the simulated provider");
            Arc::new(MockGenerateApi::new())
        }
    };

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let history = Arc::new(HistoryStore::new(storage));
    let loaded = history.load().await;
    info!("Loaded {} history item(s)", loaded.len());

    let app_state = AppState {
        normalizer: Arc::new(ImageNormalizer::new()),
        workflow: Arc::new(GenerationWorkflow::new(api, notifier.clone())),
        history,
        notifier,
        session: Arc::new(StudioSession::new()),
    };

    info!("Starting HTTP server on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .service(
                web::scope("/api/v1")
                    .route("/upload", web::post().to(upload_image))
                    .route("/generate", web::post().to(generate_image))
                    .route("/cancel", web::post().to(cancel_generation))
                    .route("/session", web::get().to(get_session))
                    .route("/styles", web::get().to(get_styles))
                    .route("/history", web::get().to(get_history))
                    .route("/history", web::delete().to(clear_history))
                    .route("/history/{id}/restore", web::post().to(restore_history)),
            )
            .route("/health", web::get().to(health_check))
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "aether-studio",
        "version": "0.1.0"
    }))
}
