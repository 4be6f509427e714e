use actix_web::{error, web, HttpResponse};
use codecheck_core::AnalyzerConfig;

pub mod analyze;

pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.configure(analyze::configure_analyze_routes);
}

/// JSON 转义最坏情况下一个字节会变成六个（`\u0000`）
const MAX_ESCAPE_GROWTH: usize = 6;

/// 请求体上限：源码与测试代码各自的上限（按最坏转义计算），再加上 JSON 外壳的余量。
/// 真正的大小检查在 core 里按解码后的字节数进行。
pub fn json_limit(config: &AnalyzerConfig) -> usize {
    config.max_source_bytes * 2 * MAX_ESCAPE_GROWTH + 4096
}

pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| {
            tracing::warn!("Rejected request body: {}", err);
            let response = HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Invalid request body: {}", err)
            }));
            error::InternalError::from_response(err, response).into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limit_fits_fully_escaped_sources() {
        let config = AnalyzerConfig {
            max_source_bytes: 256,
            ..Default::default()
        };
        let worst = "\u{1}".repeat(config.max_source_bytes);
        let body = serde_json::json!({
            "code": worst,
            "tests": worst,
            "language": "python"
        })
        .to_string();

        assert!(body.len() > config.max_source_bytes * 4);
        assert!(body.len() <= json_limit(&config));
    }
}
