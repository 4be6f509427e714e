// 结果规范化的公共部分：解析错误与降级处理

use crate::report::{Finding, Severity, ToolKind};
use crate::runner::ProcessOutput;
use thiserror::Error;

/// 降级结果中保留的原始输出最大字符数
const EXCERPT_CHARS: usize = 2000;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("No recognizable lines in {0} bytes of output")]
    Unrecognized(usize),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// 整体输出无法解析时，退化为一条概括原始输出的 Finding，而不是丢弃信息
pub fn degraded(tool: ToolKind, output: &ProcessOutput, severity: Severity) -> Finding {
    let source = if output.stdout.trim().is_empty() {
        &output.stderr
    } else {
        &output.stdout
    };
    Finding::new(
        severity,
        "unparsed",
        format!("Unparsed {} output: {}", tool, excerpt(source.trim())),
    )
}

pub fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}

/// 非空输出却一行都没识别出来时返回错误
pub fn require_some(findings: Vec<Finding>, recognized: usize, raw: &str) -> Result<Vec<Finding>, ParseError> {
    if recognized == 0 && !raw.trim().is_empty() {
        return Err(ParseError::Unrecognized(raw.len()));
    }
    Ok(findings)
}
