//! 本地文件系统仓库：<workspace_root>/<repository>/<branch>/<path>

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use super::traits::Repository;
use crate::core::{FlowError, FlowResult};

#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 拒绝绝对路径与 `..`，保证写入不越出工作区
    fn resolve(&self, branch: &str, repository: &str, path: &str) -> FlowResult<PathBuf> {
        let mut full = self.root.clone();
        for part in [repository, branch, path] {
            let p = Path::new(part);
            if p.components().any(|c| !matches!(c, Component::Normal(_))) {
                return Err(FlowError::Repository(format!("invalid path segment: {}", part)));
            }
            full.push(p);
        }
        Ok(full)
    }
}

#[async_trait]
impl Repository for LocalRepository {
    async fn save(
        &self,
        branch: &str,
        repository: &str,
        path: &str,
        content: &str,
    ) -> FlowResult<()> {
        let full = self.resolve(branch, repository, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FlowError::Repository(e.to_string()))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| FlowError::Repository(format!("{}: {}", full.display(), e)))?;
        tracing::debug!(path = %full.display(), "saved file");
        Ok(())
    }

    async fn read(&self, branch: &str, repository: &str, path: &str) -> FlowResult<Option<String>> {
        let full = self.resolve(branch, repository, path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FlowError::Repository(format!("{}: {}", full.display(), e))),
        }
    }

    async fn delete(&self, branch: &str, repository: &str, path: &str) -> FlowResult<()> {
        let full = self.resolve(branch, repository, path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FlowError::Repository(format!("{}: {}", full.display(), e))),
        }
    }
}
