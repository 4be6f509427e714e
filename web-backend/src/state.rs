use codecheck_core::{Analyzer, AnalyzerConfig};

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Analyzer,
}

impl AppState {
    pub fn new() -> anyhow::Result<Self> {
        let config = load_config()?;
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: AnalyzerConfig) -> Self {
        Self {
            analyzer: Analyzer::new(config),
        }
    }
}

/// 配置来源：CODECHECK_CONFIG 指向的 YAML 文件（可选），再叠加 CODECHECK_* 环境变量
fn load_config() -> anyhow::Result<AnalyzerConfig> {
    let mut config = match std::env::var("CODECHECK_CONFIG") {
        Ok(path) => {
            tracing::info!("Loading analyzer config from {}", path);
            AnalyzerConfig::load(&path)?
        }
        Err(_) => AnalyzerConfig::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;

    tracing::info!(
        "Tools: flake8={} ({}s), bandit={} ({}s), pytest={} ({}s)",
        config.quality.path,
        config.quality.timeout_seconds,
        config.security.path,
        config.security.timeout_seconds,
        config.tests.path,
        config.tests.timeout_seconds
    );
    tracing::info!("Workspace root: {}", config.workspace_root().display());

    Ok(config)
}
