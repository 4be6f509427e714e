// Workspace module - 工作区模块
// 每个请求独占一个临时目录，请求结束时（无论成功失败）递归删除

use crate::error::{CoreError, Result};
use crate::pipeline::AnalysisRequest;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

pub const SOURCE_FILE: &str = "code_under_test.py";
pub const TEST_FILE: &str = "test_code.py";

/// 测试文件开头注入的导入语句，让测试可以直接引用被测代码
const TEST_PRELUDE: &str = "from code_under_test import *\n\n";

/// 工作区内的文件布局，可以廉价地克隆给各个工具任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    pub root: PathBuf,
    pub has_tests: bool,
}

impl WorkspaceLayout {
    pub fn source_path(&self) -> PathBuf {
        self.root.join(SOURCE_FILE)
    }

    pub fn test_path(&self) -> Option<PathBuf> {
        self.has_tests.then(|| self.root.join(TEST_FILE))
    }
}

/// 一个请求的临时工作区。
///
/// 被 drop 时目录会被删除；`release` 做同样的事，但会把删除失败报告出来。
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    layout: WorkspaceLayout,
}

impl Workspace {
    pub fn acquire(root: &Path, request_id: &str, request: &AnalysisRequest) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            CoreError::Workspace(format!("Failed to create workspace root {:?}: {}", root, e))
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("analysis-{}-", request_id))
            .tempdir_in(root)
            .map_err(|e| CoreError::Workspace(format!("Failed to create temp dir: {}", e)))?;

        let layout = WorkspaceLayout {
            root: dir.path().to_path_buf(),
            has_tests: request.tests.is_some(),
        };

        // 写入失败时 dir 被 drop，目录随之删除
        write_file(&layout.source_path(), &request.code)?;
        if let (Some(path), Some(tests)) = (layout.test_path(), request.tests.as_deref()) {
            write_file(&path, &format!("{}{}", TEST_PRELUDE, tests))?;
        }

        debug!("Workspace ready at {}", layout.root.display());
        Ok(Self { dir, layout })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout(&self) -> WorkspaceLayout {
        self.layout.clone()
    }

    pub fn release(self) -> Result<()> {
        let path = self.layout.root;
        self.dir.close().map_err(|e| {
            warn!("Failed to remove workspace {}: {}", path.display(), e);
            CoreError::Workspace(format!("Failed to remove workspace {:?}: {}", path, e))
        })?;
        debug!("Workspace {} released", path.display());
        Ok(())
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content)
        .map_err(|e| CoreError::Workspace(format!("Failed to write {:?}: {}", path, e)))
}
