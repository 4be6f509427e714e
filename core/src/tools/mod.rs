// Tools module - 分析工具模块
// 定义分析工具的统一接口：构造命令、区分退出码、规范化输出

pub mod normalize;
pub mod quality;
pub mod security;
pub mod test_runner;

pub use quality::QualityTool;
pub use security::SecurityTool;
pub use test_runner::TestTool;

use crate::config::ToolSettings;
use crate::report::{Finding, Severity, ToolKind, ToolResult};
use crate::runner::{self, ProcessOutput, ToolFailure, ToolInvocation};
use crate::workspace::WorkspaceLayout;
use async_trait::async_trait;
use normalize::ParseError;
use std::time::Duration;
use tracing::{debug, warn};

/// 分析工具 trait - 三种工具都需要实现此接口
#[async_trait]
pub trait AnalysisTool: Send + Sync {
    fn kind(&self) -> ToolKind;

    /// 工具名称（flake8 / bandit / pytest）
    fn name(&self) -> &'static str;

    fn settings(&self) -> &ToolSettings;

    /// 工具自身的参数，位于配置的额外参数之后。返回 None 表示无事可做。
    fn arguments(&self, layout: &WorkspaceLayout) -> Option<Vec<String>>;

    fn skip_reason(&self) -> &'static str {
        "nothing to analyze"
    }

    /// 该退出码是否代表"正常运行（可能有发现）"，而非工具自身崩溃
    fn exit_is_findings(&self, code: i32) -> bool;

    /// 严格解析；部分行无法识别时跳过，整体无法识别时返回错误
    fn parse(&self, output: &ProcessOutput) -> Result<Vec<Finding>, ParseError>;

    fn degraded_severity(&self, _output: &ProcessOutput) -> Severity {
        Severity::Warning
    }

    fn invocation(&self, layout: &WorkspaceLayout) -> Option<ToolInvocation> {
        let own_args = self.arguments(layout)?;
        let settings = self.settings();
        let mut args = settings.args.clone();
        args.extend(own_args);
        Some(ToolInvocation {
            tool: self.kind(),
            program: settings.path.clone(),
            args,
            working_dir: layout.root.clone(),
            timeout: settings.timeout(),
        })
    }

    /// 宽容的规范化：解析失败时退化为一条概括性的 Finding
    fn normalize(&self, output: &ProcessOutput) -> Vec<Finding> {
        match self.parse(output) {
            Ok(findings) => findings,
            Err(e) => {
                debug!("{} output not parseable ({}), degrading", self.name(), e);
                vec![normalize::degraded(self.kind(), output, self.degraded_severity(output))]
            }
        }
    }

    /// 在工作区中运行工具并产出结果。永远不会返回错误：
    /// 启动失败、崩溃、超时都被记录进 ToolResult。
    async fn execute(&self, layout: &WorkspaceLayout, output_limit: usize) -> ToolResult {
        let kind = self.kind();
        if !self.settings().enabled {
            return ToolResult::skipped(kind, format!("{} is disabled", self.name()));
        }
        let Some(invocation) = self.invocation(layout) else {
            return ToolResult::skipped(kind, self.skip_reason());
        };

        match runner::run(&invocation, output_limit).await {
            Ok(output) => self.interpret(output),
            Err(ToolFailure::Timeout(limit)) => ToolResult::timeout(kind, limit),
            Err(e @ ToolFailure::Launch { .. }) => {
                warn!("{} could not start: {}", self.name(), e);
                ToolResult::launch_error(kind, e.to_string())
            }
            Err(e) => {
                warn!("{} failed: {}", self.name(), e);
                ToolResult::tool_error(kind, None, e.to_string(), Duration::ZERO)
            }
        }
    }

    fn interpret(&self, output: ProcessOutput) -> ToolResult {
        let kind = self.kind();
        let code = output.exit_code.unwrap_or(-1);

        if output.exit_code.is_none() || !self.exit_is_findings(code) {
            warn!("{} exited abnormally with {}", self.name(), code);
            return ToolResult::tool_error(
                kind,
                Some(code),
                crash_detail(self.name(), code, &output),
                output.duration,
            );
        }

        let findings = self.normalize(&output);
        let mut raw = output.stdout;
        if output.truncated {
            raw.push_str("\n[output truncated]");
        }
        ToolResult::completed(kind, code, findings, raw, output.duration)
    }
}

fn crash_detail(name: &str, code: i32, output: &ProcessOutput) -> String {
    let stderr = output.stderr.trim();
    let detail = if stderr.is_empty() {
        output.stdout.trim()
    } else {
        stderr
    };
    if detail.is_empty() {
        format!("{} exited with status {}", name, code)
    } else {
        format!(
            "{} exited with status {}: {}",
            name,
            code,
            normalize::excerpt(detail)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn layout(has_tests: bool) -> WorkspaceLayout {
        WorkspaceLayout {
            root: PathBuf::from("/tmp/analysis-x"),
            has_tests,
        }
    }

    #[test]
    fn configured_args_come_before_tool_args() {
        let tool = QualityTool::new(
            ToolSettings::new("/opt/flake8")
                .with_args(["--max-line-length=100"])
                .with_timeout(9),
        );
        let invocation = tool.invocation(&layout(false)).unwrap();

        assert_eq!(invocation.program, "/opt/flake8");
        assert_eq!(invocation.args, vec!["--max-line-length=100", "code_under_test.py"]);
        assert_eq!(invocation.working_dir, PathBuf::from("/tmp/analysis-x"));
        assert_eq!(invocation.timeout, Duration::from_secs(9));
    }

    #[test]
    fn test_tool_has_nothing_to_run_without_tests() {
        let tool = TestTool::new(ToolSettings::new("pytest"));
        assert!(tool.invocation(&layout(false)).is_none());
        assert!(tool.invocation(&layout(true)).is_some());
    }

    #[tokio::test]
    async fn disabled_tool_is_skipped() {
        let mut settings = ToolSettings::new("bandit");
        settings.enabled = false;
        let result = SecurityTool::new(settings).execute(&layout(false), 1024).await;
        assert_eq!(result.status, crate::report::ToolStatus::Skipped);
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout {
            root: dir.path().to_path_buf(),
            has_tests: false,
        };
        let tool = QualityTool::new(ToolSettings::new("codecheck-no-such-flake8"));

        let result = tool.execute(&layout, 1024).await;
        assert_eq!(result.status, crate::report::ToolStatus::ToolError);
        assert!(result.launch_failed());
        assert!(result.error.unwrap().contains("codecheck-no-such-flake8"));
    }

    #[test]
    fn unexpected_exit_code_is_a_tool_error() {
        let tool = QualityTool::new(ToolSettings::new("flake8"));
        let result = tool.interpret(ProcessOutput {
            exit_code: Some(2),
            stderr: "flake8: error: unrecognized arguments".to_string(),
            ..Default::default()
        });
        assert_eq!(result.status, crate::report::ToolStatus::ToolError);
        assert_eq!(result.exit_code, Some(2));
        assert!(result.error.unwrap().contains("unrecognized arguments"));
    }

    #[test]
    fn signal_termination_is_a_tool_error_not_a_launch_failure() {
        let tool = QualityTool::new(ToolSettings::new("flake8"));
        let result = tool.interpret(ProcessOutput::default());
        assert_eq!(result.status, crate::report::ToolStatus::ToolError);
        assert!(!result.launch_failed());
    }
}
