use super::normalize::{self, ParseError};
use super::AnalysisTool;
use async_trait::async_trait;
use crate::config::ToolSettings;
use crate::report::{Finding, Severity, ToolKind};
use crate::runner::ProcessOutput;
use crate::workspace::{WorkspaceLayout, TEST_FILE};
use regex::Regex;
use std::collections::HashMap;

/// pytest 测试执行（-v --tb=short 输出）
pub struct TestTool {
    settings: ToolSettings,
    result_line: Regex,
    summary_line: Regex,
    section_header: Regex,
    location: Regex,
}

impl TestTool {
    pub fn new(settings: ToolSettings) -> Self {
        Self {
            settings,
            // test_code.py::test_add PASSED    [ 50%]
            result_line: Regex::new(
                r"^(?P<file>[^\s:]+)::(?P<name>\S+)\s+(?P<status>PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)\b",
            )
            .expect("valid pytest result pattern"),
            // FAILED test_code.py::test_sub - assert 1 == 3
            summary_line: Regex::new(
                r"^(?P<status>FAILED|ERROR)\s+(?P<file>[^\s:]+)::(?P<name>\S+)(?:\s+-\s+(?P<detail>.+))?$",
            )
            .expect("valid pytest summary pattern"),
            // ____________ test_sub ____________
            section_header: Regex::new(r"^_{3,}\s+(?P<name>.+?)\s+_{3,}$")
                .expect("valid pytest section pattern"),
            // test_code.py:7: in test_sub
            location: Regex::new(r"^(?P<file>[^\s:]+\.py):(?P<line>\d+):")
                .expect("valid pytest location pattern"),
        }
    }
}

/// 失败/错误用例在 FAILURES / ERRORS 段中的细节
#[derive(Debug, Default)]
struct FailureSection {
    assertion: Vec<String>,
    line: Option<usize>,
}

fn test_severity(status: &str) -> Severity {
    match status {
        "PASSED" | "XPASS" => Severity::Pass,
        "FAILED" | "ERROR" => Severity::Fail,
        _ => Severity::Info,
    }
}

fn section_test_name(header: &str) -> &str {
    header
        .strip_prefix("ERROR at setup of ")
        .or_else(|| header.strip_prefix("ERROR at teardown of "))
        .unwrap_or(header)
}

impl TestTool {
    fn failure_sections(&self, stdout: &str) -> HashMap<String, FailureSection> {
        let mut sections: HashMap<String, FailureSection> = HashMap::new();
        let mut current: Option<String> = None;

        for line in stdout.lines() {
            if let Some(caps) = self.section_header.captures(line) {
                let name = section_test_name(&caps["name"]).to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
            if line.starts_with('=') {
                current = None;
                continue;
            }
            let Some(section) = current.as_ref().and_then(|name| sections.get_mut(name)) else {
                continue;
            };
            if let Some(detail) = line.strip_prefix("E ") {
                section.assertion.push(detail.trim().to_string());
            } else if section.line.is_none() {
                if let Some(caps) = self.location.captures(line) {
                    section.line = caps["line"].parse().ok();
                }
            }
        }

        sections
    }

    fn summary_details(&self, stdout: &str) -> HashMap<String, String> {
        stdout
            .lines()
            .filter_map(|line| self.summary_line.captures(line.trim_end()))
            .filter_map(|caps| {
                let detail = caps.name("detail")?.as_str().trim().to_string();
                Some((caps["name"].to_string(), detail))
            })
            .collect()
    }
}

#[async_trait]
impl AnalysisTool for TestTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Tests
    }

    fn name(&self) -> &'static str {
        "pytest"
    }

    fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    fn arguments(&self, layout: &WorkspaceLayout) -> Option<Vec<String>> {
        if !layout.has_tests {
            return None;
        }
        Some(
            [TEST_FILE, "-v", "--tb=short", "-p", "no:cacheprovider"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn skip_reason(&self) -> &'static str {
        "no tests provided"
    }

    /// 0 全部通过, 1 有失败, 2 被中断（如收集错误）, 5 没有收集到测试；
    /// 3 内部错误与 4 用法错误属于 pytest 自身的故障
    fn exit_is_findings(&self, code: i32) -> bool {
        matches!(code, 0 | 1 | 2 | 5)
    }

    fn degraded_severity(&self, output: &ProcessOutput) -> Severity {
        match output.exit_code {
            Some(0) | Some(5) => Severity::Info,
            _ => Severity::Fail,
        }
    }

    fn parse(&self, output: &ProcessOutput) -> Result<Vec<Finding>, ParseError> {
        let stdout = &output.stdout;
        let mut sections = self.failure_sections(stdout);
        let summaries = self.summary_details(stdout);
        let mut findings = Vec::new();

        for line in stdout.lines() {
            let line = line.trim();
            let Some(caps) = self.result_line.captures(line) else {
                continue;
            };
            let name = caps["name"].to_string();
            let status = &caps["status"];
            let severity = test_severity(status);

            let mut finding = Finding::new(severity, status, line);
            if severity == Severity::Fail {
                let section = sections.remove(&name).unwrap_or_default();
                if let Some(detail) = summaries.get(&name) {
                    finding.message = detail.clone();
                } else if !section.assertion.is_empty() {
                    finding.message = section.assertion.join("\n");
                }
                finding.line = section.line;
            }
            finding.test_name = Some(name);
            findings.push(finding);
        }

        let recognized = findings.len();
        normalize::require_some(findings, recognized, stdout)
    }
}
