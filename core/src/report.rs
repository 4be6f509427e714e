// Report module - 报告模块
// 统一的发现结果、单工具结果以及聚合后的分析报告

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 工具身份：固定的三种分析工具
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Quality,
    Security,
    Tests,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [ToolKind::Quality, ToolKind::Security, ToolKind::Tests];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Quality => "quality",
            ToolKind::Security => "security",
            ToolKind::Tests => "tests",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 统一的严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Pass,
    Fail,
}

/// bandit 原生的严重度 / 置信度刻度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Undefined,
}

impl RiskLevel {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => RiskLevel::Low,
            "medium" => RiskLevel::Medium,
            "high" => RiskLevel::High,
            _ => RiskLevel::Undefined,
        }
    }
}

/// 单条规范化后的发现
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            line: None,
            column: None,
            message: message.into(),
            code: code.into(),
            confidence: None,
            risk: None,
            cwe: None,
            test_name: None,
        }
    }

    pub fn at(mut self, line: usize, column: Option<usize>) -> Self {
        self.line = Some(line);
        self.column = column;
        self
    }
}

/// 工具运行的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    /// 未提供测试代码或工具被禁用
    Skipped,
    ToolError,
    Timeout,
}

/// 按严重级别的计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Summary {
            total: findings.len(),
            ..Default::default()
        };
        for finding in findings {
            match finding.severity {
                Severity::Error => summary.errors += 1,
                Severity::Warning => summary.warnings += 1,
                Severity::Info => summary.info += 1,
                Severity::Pass => summary.passed += 1,
                Severity::Fail => summary.failed += 1,
            }
        }
        summary
    }
}

/// 单个工具的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool: ToolKind,
    pub status: ToolStatus,
    pub exit_code: Option<i32>,
    pub findings: Vec<Finding>,
    pub summary: Summary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// 进程根本没有启动（可执行文件缺失、无权限等），不对外序列化
    #[serde(skip)]
    launch_failure: bool,
}

impl ToolResult {
    pub fn completed(
        tool: ToolKind,
        exit_code: i32,
        findings: Vec<Finding>,
        raw_output: String,
        duration: Duration,
    ) -> Self {
        Self {
            tool,
            status: ToolStatus::Success,
            exit_code: Some(exit_code),
            summary: Summary::from_findings(&findings),
            findings,
            raw_output: Some(raw_output),
            error: None,
            duration_ms: duration.as_millis() as u64,
            launch_failure: false,
        }
    }

    pub fn skipped(tool: ToolKind, reason: impl Into<String>) -> Self {
        Self {
            tool,
            status: ToolStatus::Skipped,
            exit_code: None,
            findings: Vec::new(),
            summary: Summary::default(),
            raw_output: None,
            error: Some(reason.into()),
            duration_ms: 0,
            launch_failure: false,
        }
    }

    pub fn tool_error(
        tool: ToolKind,
        exit_code: Option<i32>,
        detail: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            tool,
            status: ToolStatus::ToolError,
            exit_code,
            findings: Vec::new(),
            summary: Summary::default(),
            raw_output: None,
            error: Some(detail.into()),
            duration_ms: duration.as_millis() as u64,
            launch_failure: false,
        }
    }

    pub fn timeout(tool: ToolKind, limit: Duration) -> Self {
        Self {
            tool,
            status: ToolStatus::Timeout,
            exit_code: None,
            findings: Vec::new(),
            summary: Summary::default(),
            raw_output: None,
            error: Some(format!("{} timed out after {}s", tool, limit.as_secs())),
            duration_ms: limit.as_millis() as u64,
            launch_failure: false,
        }
    }

    /// 工具进程没能启动；已启动但中途出错的不算
    pub fn launch_error(tool: ToolKind, detail: impl Into<String>) -> Self {
        Self {
            launch_failure: true,
            ..Self::tool_error(tool, None, detail, Duration::ZERO)
        }
    }

    pub fn launch_failed(&self) -> bool {
        self.launch_failure
    }

    fn has(&self, severity: Severity) -> bool {
        self.findings.iter().any(|f| f.severity == severity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Pass,
    Warn,
    Fail,
}

/// 聚合后的分析报告，顺序固定为 quality, security, tests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub request_id: String,
    pub quality: ToolResult,
    pub security: ToolResult,
    pub tests: ToolResult,
    pub overall_status: OverallStatus,
    pub analyzed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl AnalysisReport {
    pub fn sections(&self) -> [&ToolResult; 3] {
        [&self.quality, &self.security, &self.tests]
    }
}

/// 合并三个工具结果。纯函数，不做任何 I/O。
pub fn aggregate(
    request_id: impl Into<String>,
    quality: ToolResult,
    security: ToolResult,
    tests: ToolResult,
    duration: Duration,
) -> AnalysisReport {
    let overall_status = overall_status(&quality, &security, &tests);
    AnalysisReport {
        request_id: request_id.into(),
        quality,
        security,
        tests,
        overall_status,
        analyzed_at: Utc::now(),
        duration_ms: duration.as_millis() as u64,
    }
}

/// worst-of:
/// - fail: 有失败的测试，或 security 有 error 级 (bandit HIGH) 发现
/// - warn: quality 有 error/warning，security 有 warning 及以上，或任一工具出错/超时
/// - pass: 其余情况
pub fn overall_status(
    quality: &ToolResult,
    security: &ToolResult,
    tests: &ToolResult,
) -> OverallStatus {
    if tests.has(Severity::Fail) || security.has(Severity::Error) {
        return OverallStatus::Fail;
    }

    let degraded = [quality, security, tests]
        .iter()
        .any(|r| matches!(r.status, ToolStatus::ToolError | ToolStatus::Timeout));

    if degraded
        || quality.has(Severity::Error)
        || quality.has(Severity::Warning)
        || security.has(Severity::Warning)
    {
        return OverallStatus::Warn;
    }

    OverallStatus::Pass
}
