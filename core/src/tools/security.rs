use super::normalize::ParseError;
use super::AnalysisTool;
use async_trait::async_trait;
use crate::config::ToolSettings;
use crate::report::{Finding, RiskLevel, Severity, ToolKind};
use crate::runner::ProcessOutput;
use crate::workspace::{WorkspaceLayout, SOURCE_FILE};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// bandit 安全扫描（JSON 输出）
pub struct SecurityTool {
    settings: ToolSettings,
}

impl SecurityTool {
    pub fn new(settings: ToolSettings) -> Self {
        Self { settings }
    }
}

#[derive(Debug, Deserialize)]
struct BanditReport {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct BanditIssue {
    line_number: usize,
    #[serde(default)]
    col_offset: Option<usize>,
    issue_text: String,
    test_id: String,
    issue_severity: String,
    issue_confidence: String,
    #[serde(default)]
    issue_cwe: Option<BanditCwe>,
}

#[derive(Debug, Deserialize)]
struct BanditCwe {
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BanditError {
    #[serde(default)]
    filename: String,
    reason: String,
}

/// HIGH -> error, MEDIUM/LOW -> warning, UNDEFINED -> info
fn bandit_severity(risk: RiskLevel) -> Severity {
    match risk {
        RiskLevel::High => Severity::Error,
        RiskLevel::Medium | RiskLevel::Low => Severity::Warning,
        RiskLevel::Undefined => Severity::Info,
    }
}

fn cwe_id(cwe: Option<BanditCwe>) -> Option<String> {
    match cwe?.id? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() && s != "N/A" => Some(s),
        _ => None,
    }
}

impl BanditIssue {
    fn into_finding(self) -> Finding {
        let risk = RiskLevel::parse(&self.issue_severity);
        let cwe = cwe_id(self.issue_cwe);
        let message = format!(
            "{} (CWE: {})",
            self.issue_text,
            cwe.as_deref().unwrap_or("N/A")
        );
        let mut finding = Finding::new(bandit_severity(risk), self.test_id, message)
            .at(self.line_number, self.col_offset.map(|c| c + 1));
        finding.risk = Some(risk);
        finding.confidence = Some(RiskLevel::parse(&self.issue_confidence));
        finding.cwe = cwe;
        finding
    }
}

/// bandit 偶尔会在 JSON 前后打印日志，尝试截取最外层的对象
fn parse_report(raw: &str) -> Result<BanditReport, ParseError> {
    match serde_json::from_str(raw) {
        Ok(report) => Ok(report),
        Err(e) => match (raw.find('{'), raw.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                Ok(serde_json::from_str(&raw[start..=end])?)
            }
            _ => Err(ParseError::Json(e)),
        },
    }
}

#[async_trait]
impl AnalysisTool for SecurityTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Security
    }

    fn name(&self) -> &'static str {
        "bandit"
    }

    fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    fn arguments(&self, _layout: &WorkspaceLayout) -> Option<Vec<String>> {
        Some(vec![
            "-f".to_string(),
            "json".to_string(),
            "-q".to_string(),
            SOURCE_FILE.to_string(),
        ])
    }

    fn exit_is_findings(&self, code: i32) -> bool {
        matches!(code, 0 | 1)
    }

    fn parse(&self, output: &ProcessOutput) -> Result<Vec<Finding>, ParseError> {
        if output.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        let report = parse_report(&output.stdout)?;

        let mut findings = Vec::with_capacity(report.results.len());
        for entry in report.results {
            match serde_json::from_value::<BanditIssue>(entry) {
                Ok(issue) => findings.push(issue.into_finding()),
                Err(e) => debug!("Skipping malformed bandit result: {}", e),
            }
        }
        for entry in report.errors {
            match serde_json::from_value::<BanditError>(entry) {
                Ok(err) => findings.push(Finding::new(
                    Severity::Warning,
                    "bandit-error",
                    format!("{}: {}", err.filename, err.reason),
                )),
                Err(e) => debug!("Skipping malformed bandit error: {}", e),
            }
        }

        Ok(findings)
    }
}
