use actix_web::{web, HttpResponse, Responder};
use codecheck_core::error::CoreError;
use codecheck_core::AnalysisRequest;

use crate::state::AppState;

pub fn configure_analyze_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/analyze", web::post().to(analyze_code));
}

/// 运行完整分析流程。只要流程跑完就返回 200，即使发现了问题或测试失败。
pub async fn analyze_code(
    state: web::Data<AppState>,
    req: web::Json<AnalysisRequest>,
) -> impl Responder {
    match state.analyzer.analyze(req.into_inner()).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => error_response(e),
    }
}

fn error_response(err: CoreError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });
    match err {
        CoreError::InvalidRequest(_) => {
            tracing::warn!("Rejected analysis request: {}", err);
            HttpResponse::BadRequest().json(body)
        }
        CoreError::RequestTimeout(_) => {
            tracing::error!("{}", err);
            HttpResponse::GatewayTimeout().json(body)
        }
        _ => {
            tracing::error!("Analysis failed: {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}
