// Pipeline - 单次分析请求的完整流程
// 获取工作区 -> 并发运行三个工具 -> 聚合 -> 释放工作区

use crate::config::AnalyzerConfig;
use crate::error::{CoreError, Result};
use crate::report::{aggregate, AnalysisReport, ToolKind, ToolResult, ToolStatus};
use crate::tools::{AnalysisTool, QualityTool, SecurityTool, TestTool};
use crate::workspace::{Workspace, WorkspaceLayout};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

fn default_language() -> String {
    "python".to_string()
}

/// 一次分析请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub code: String,
    #[serde(default, alias = "test_code")]
    pub tests: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

impl AnalysisRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            tests: None,
            language: default_language(),
        }
    }

    pub fn with_tests(mut self, tests: impl Into<String>) -> Self {
        self.tests = Some(tests.into());
        self
    }
}

#[derive(Clone)]
pub struct Analyzer {
    config: Arc<AnalyzerConfig>,
    quality: Arc<dyn AnalysisTool>,
    security: Arc<dyn AnalysisTool>,
    tests: Arc<dyn AnalysisTool>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            quality: Arc::new(QualityTool::new(config.quality.clone())),
            security: Arc::new(SecurityTool::new(config.security.clone())),
            tests: Arc::new(TestTool::new(config.tests.clone())),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    #[instrument(skip_all, fields(request_id = tracing::field::Empty))]
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReport> {
        let request = self.validate(request)?;
        let request_id = Uuid::new_v4().simple().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());

        let start = Instant::now();
        let workspace = Workspace::acquire(&self.config.workspace_root(), &request_id, &request)?;

        let limit = self.config.request_timeout();
        let outcome = tokio::time::timeout(limit, self.run_tools(workspace.layout())).await;

        // 无论工具阶段结果如何，先释放工作区
        let released = workspace.release();

        let [quality, security, tests] = match outcome {
            Ok(results) => results,
            Err(_) => {
                warn!("Request exceeded {}s, tools cancelled", limit.as_secs());
                if let Err(e) = released {
                    error!("Workspace cleanup after timeout failed: {}", e);
                }
                return Err(CoreError::RequestTimeout(limit.as_secs()));
            }
        };
        released?;

        ensure_launched(&[&quality, &security, &tests])?;

        let report = aggregate(request_id, quality, security, tests, start.elapsed());
        info!(
            "Analysis finished: {:?} in {}ms",
            report.overall_status, report.duration_ms
        );
        Ok(report)
    }

    fn validate(&self, mut request: AnalysisRequest) -> Result<AnalysisRequest> {
        if !request.language.eq_ignore_ascii_case("python") {
            return Err(CoreError::InvalidRequest(format!(
                "Unsupported language: {}",
                request.language
            )));
        }
        if request.code.trim().is_empty() {
            return Err(CoreError::InvalidRequest("code must not be empty".to_string()));
        }

        let max = self.config.max_source_bytes;
        if request.code.len() > max {
            return Err(CoreError::InvalidRequest(format!(
                "code exceeds {} bytes",
                max
            )));
        }
        if request.tests.as_ref().is_some_and(|t| t.len() > max) {
            return Err(CoreError::InvalidRequest(format!(
                "tests exceed {} bytes",
                max
            )));
        }

        if request.tests.as_ref().is_some_and(|t| t.trim().is_empty()) {
            request.tests = None;
        }
        Ok(request)
    }

    /// 三个工具各自独立运行；全部到达终态后才返回。
    /// 被 drop 时 JoinSet 会中止所有任务，子进程随之被 kill。
    async fn run_tools(&self, layout: WorkspaceLayout) -> [ToolResult; 3] {
        let mut set = JoinSet::new();
        let mut kinds = HashMap::new();
        let output_limit = self.config.max_output_bytes;

        for tool in [&self.quality, &self.security, &self.tests] {
            let tool = Arc::clone(tool);
            let layout = layout.clone();
            let kind = tool.kind();
            let handle = set.spawn(async move { tool.execute(&layout, output_limit).await });
            kinds.insert(handle.id(), kind);
        }

        let mut results: HashMap<ToolKind, ToolResult> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => {
                    results.insert(result.tool, result);
                }
                Err(e) => {
                    let Some(kind) = kinds.get(&e.id()).copied() else {
                        error!("Unknown tool task failed: {}", e);
                        continue;
                    };
                    error!("{} task failed: {}", kind, e);
                    results.insert(
                        kind,
                        ToolResult::tool_error(kind, None, format!("{} task failed: {}", kind, e), Duration::ZERO),
                    );
                }
            }
        }

        ToolKind::ALL.map(|kind| {
            results.remove(&kind).unwrap_or_else(|| {
                ToolResult::tool_error(kind, None, "tool did not report a result", Duration::ZERO)
            })
        })
    }
}

/// 所有尝试运行的工具都没能启动时，整个请求视为基础设施故障
fn ensure_launched(results: &[&ToolResult]) -> Result<()> {
    let attempted: Vec<&&ToolResult> = results
        .iter()
        .filter(|r| r.status != ToolStatus::Skipped)
        .collect();

    if attempted.is_empty() || !attempted.iter().all(|r| r.launch_failed()) {
        return Ok(());
    }

    let detail = attempted
        .iter()
        .map(|r| format!("{}: {}", r.tool, r.error.as_deref().unwrap_or("unknown error")))
        .collect::<Vec<_>>()
        .join("; ");
    Err(CoreError::AllToolsFailed(detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolSettings;
    use crate::report::Finding;
    use crate::runner::ProcessOutput;
    use crate::tools::normalize::ParseError;
    use async_trait::async_trait;

    fn analyzer() -> Analyzer {
        Analyzer::new(AnalyzerConfig::default())
    }

    /// 执行时直接 panic 的工具
    struct CrashingTool {
        settings: ToolSettings,
    }

    #[async_trait]
    impl AnalysisTool for CrashingTool {
        fn kind(&self) -> ToolKind {
            ToolKind::Quality
        }

        fn name(&self) -> &'static str {
            "crashing"
        }

        fn settings(&self) -> &ToolSettings {
            &self.settings
        }

        fn arguments(&self, _layout: &WorkspaceLayout) -> Option<Vec<String>> {
            Some(Vec::new())
        }

        fn exit_is_findings(&self, code: i32) -> bool {
            code == 0
        }

        fn parse(&self, _output: &ProcessOutput) -> std::result::Result<Vec<Finding>, ParseError> {
            Ok(Vec::new())
        }

        async fn execute(&self, _layout: &WorkspaceLayout, _output_limit: usize) -> ToolResult {
            panic!("analyzer blew up");
        }
    }

    #[tokio::test]
    async fn panicking_tool_degrades_to_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalyzerConfig {
            security: ToolSettings::new("codecheck-missing-bandit"),
            tests: ToolSettings::new("codecheck-missing-pytest"),
            ..Default::default()
        };
        let mut analyzer = Analyzer::new(config);
        analyzer.quality = Arc::new(CrashingTool {
            settings: ToolSettings::new("crashing"),
        });
        let layout = WorkspaceLayout {
            root: dir.path().to_path_buf(),
            has_tests: true,
        };

        let [quality, security, tests] = analyzer.run_tools(layout).await;

        assert_eq!(quality.tool, ToolKind::Quality);
        assert_eq!(quality.status, ToolStatus::ToolError);
        assert!(quality.error.as_deref().unwrap().contains("task failed"));
        assert!(!quality.launch_failed());
        assert!(security.launch_failed());
        assert!(tests.launch_failed());

        // 崩溃的工具确实启动过，不能算作"全部启动失败"
        assert!(ensure_launched(&[&quality, &security, &tests]).is_ok());
    }

    #[test]
    fn request_accepts_legacy_test_code_key() {
        let request: AnalysisRequest =
            serde_json::from_str(r#"{"code": "x = 1", "test_code": "def test_x(): pass"}"#).unwrap();
        assert_eq!(request.tests.as_deref(), Some("def test_x(): pass"));
        assert_eq!(request.language, "python");
    }

    #[test]
    fn blank_tests_are_treated_as_absent() {
        let request = analyzer()
            .validate(AnalysisRequest::new("x = 1\n").with_tests("  \n"))
            .unwrap();
        assert!(request.tests.is_none());
    }

    #[test]
    fn rejects_empty_code_and_other_languages() {
        assert!(matches!(
            analyzer().validate(AnalysisRequest::new("   ")),
            Err(CoreError::InvalidRequest(_))
        ));

        let mut request = AnalysisRequest::new("fn main() {}");
        request.language = "rust".to_string();
        assert!(matches!(
            analyzer().validate(request),
            Err(CoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn rejects_oversized_source() {
        let mut config = AnalyzerConfig::default();
        config.max_source_bytes = 8;
        let err = Analyzer::new(config)
            .validate(AnalysisRequest::new("x = 'way too long'"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[test]
    fn all_launch_failures_are_fatal() {
        let q = ToolResult::launch_error(ToolKind::Quality, "flake8 missing");
        let s = ToolResult::launch_error(ToolKind::Security, "bandit missing");
        let t = ToolResult::skipped(ToolKind::Tests, "no tests provided");

        let err = ensure_launched(&[&q, &s, &t]).unwrap_err();
        assert!(err.to_string().contains("bandit missing"));
    }

    #[test]
    fn one_working_tool_is_enough() {
        let q = ToolResult::launch_error(ToolKind::Quality, "flake8 missing");
        let s = ToolResult::completed(ToolKind::Security, 0, vec![], String::new(), Duration::ZERO);
        let t = ToolResult::skipped(ToolKind::Tests, "no tests provided");

        assert!(ensure_launched(&[&q, &s, &t]).is_ok());
    }
}
