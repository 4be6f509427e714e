use super::normalize::{self, ParseError};
use super::AnalysisTool;
use async_trait::async_trait;
use crate::config::ToolSettings;
use crate::report::{Finding, Severity, ToolKind};
use crate::runner::ProcessOutput;
use crate::workspace::{WorkspaceLayout, SOURCE_FILE};
use regex::Regex;

/// flake8 风格检查
pub struct QualityTool {
    settings: ToolSettings,
    line: Regex,
}

impl QualityTool {
    pub fn new(settings: ToolSettings) -> Self {
        Self {
            settings,
            // path:line:col: CODE message
            line: Regex::new(r"^[^:]+:(\d+):(\d+):\s+(\w+)\s+(.+)$").expect("valid flake8 pattern"),
        }
    }
}

/// F* (pyflakes) 与 E9* (语法/IO 错误) 为 error，其余 E/W 为 warning，其他为 info
fn flake8_severity(code: &str) -> Severity {
    if code.starts_with('F') || code.starts_with("E9") {
        Severity::Error
    } else if code.starts_with('E') || code.starts_with('W') {
        Severity::Warning
    } else {
        Severity::Info
    }
}

#[async_trait]
impl AnalysisTool for QualityTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Quality
    }

    fn name(&self) -> &'static str {
        "flake8"
    }

    fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    fn arguments(&self, _layout: &WorkspaceLayout) -> Option<Vec<String>> {
        Some(vec![SOURCE_FILE.to_string()])
    }

    fn exit_is_findings(&self, code: i32) -> bool {
        matches!(code, 0 | 1)
    }

    fn parse(&self, output: &ProcessOutput) -> Result<Vec<Finding>, ParseError> {
        let mut findings = Vec::new();

        for line in output.stdout.lines() {
            let Some(caps) = self.line.captures(line.trim_end()) else {
                continue;
            };
            let (Ok(line_no), Ok(column)) = (caps[1].parse::<usize>(), caps[2].parse::<usize>())
            else {
                continue;
            };
            let code = &caps[3];
            findings.push(
                Finding::new(flake8_severity(code), code, caps[4].trim()).at(line_no, Some(column)),
            );
        }

        let recognized = findings.len();
        normalize::require_some(findings, recognized, &output.stdout)
    }
}
