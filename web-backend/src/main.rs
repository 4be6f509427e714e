use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use anyhow::Result;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod state;

use state::AppState;

async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "codecheck",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn index() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "message": "Code Analysis API is running!"
    }))
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codecheck_web=debug,codecheck_core=info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 初始化状态（配置只在启动时加载一次）
    let state = AppState::new()?;
    let json_limit = api::json_limit(state.analyzer.config());

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    tracing::info!("codecheck server listening on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(api::json_config(json_limit))
            .wrap(Cors::permissive())
            .wrap(TracingLogger::default())
            .configure(api::configure_api)
            .route("/health", web::get().to(health_check))
            .route("/", web::get().to(index))
    })
    .bind(bind_address.as_str())?
    .run()
    .await?;

    Ok(())
}
