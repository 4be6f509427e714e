// codecheck Core Library
// 核心功能库，包含工作区管理、工具运行器、结果规范化和报告聚合

pub mod config;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod tools;
pub mod workspace;

// 重新导出常用类型
pub use config::{AnalyzerConfig, ToolSettings};
pub use pipeline::{AnalysisRequest, Analyzer};
pub use report::{
    aggregate, AnalysisReport, Finding, OverallStatus, RiskLevel, Severity, Summary, ToolKind,
    ToolResult, ToolStatus,
};
pub use tools::{AnalysisTool, QualityTool, SecurityTool, TestTool};
pub use workspace::{Workspace, WorkspaceLayout};

pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum CoreError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Workspace error: {0}")]
        Workspace(String),

        #[error("Invalid request: {0}")]
        InvalidRequest(String),

        #[error("Request timed out after {0}s")]
        RequestTimeout(u64),

        #[error("All tools failed to launch: {0}")]
        AllToolsFailed(String),

        #[error("Config error: {0}")]
        Config(String),
    }

    pub type Result<T> = std::result::Result<T, CoreError>;
}
