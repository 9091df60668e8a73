//! 处理器定义的读取来源
//!
//! 目录结构：agents/<key>/agent.json、tools/<key>/tool.json、prompts/<name>/message_<n>.md、
//! messages/<key>/{message.md, meta.json}。路径一律使用 `/` 分隔的相对路径。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::{FlowError, FlowResult};

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// 文件不存在时返回 ConfigNotFound
    async fn read_to_string(&self, path: &str) -> FlowResult<String>;

    /// 目录中的文件名（不含子目录）；目录不存在时返回 ConfigNotFound
    async fn list_dir(&self, path: &str) -> FlowResult<Vec<String>>;
}

/// 从本地目录读取定义
#[derive(Debug, Clone)]
pub struct DirConfigSource {
    root: PathBuf,
}

impl DirConfigSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_error(path: &Path, e: std::io::Error) -> FlowError {
    if e.kind() == std::io::ErrorKind::NotFound {
        FlowError::ConfigNotFound(path.display().to_string())
    } else {
        FlowError::ConfigParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl ConfigSource for DirConfigSource {
    async fn read_to_string(&self, path: &str) -> FlowResult<String> {
        let full = self.root.join(path);
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| io_error(&full, e))
    }

    async fn list_dir(&self, path: &str) -> FlowResult<Vec<String>> {
        let full = self.root.join(path);
        let mut entries = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| io_error(&full, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&full, e))? {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }
}
