//! 配置构建器
//!
//! 根据处理器名从 ConfigSource 组装 ProcessorConfig 并缓存：
//! - AgentProcessor：agent.json，展开 tools[].name 与 messages[].content_from_file 引用
//! - FunctionProcessor：tool.json 原样返回
//! - MessageProcessor：message.md + meta.json
//!
//! 缓存基于 moka：同一 key 的并发首次访问只会执行一次加载，失败不会被缓存。

use std::sync::{Arc, OnceLock};

use moka::future::Cache;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::config_source::ConfigSource;
use crate::core::{FlowError, FlowResult};
use crate::model::{ProcessorConfig, ProcessorName, ProcessorType};

const DEFAULT_CACHE_CAPACITY: u64 = 1024;

static FRAGMENT_RE: OnceLock<Regex> = OnceLock::new();

pub struct ConfigBuilder {
    source: Arc<dyn ConfigSource>,
    cache: Cache<String, ProcessorConfig>,
}

impl ConfigBuilder {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self {
            source,
            cache: Cache::builder().max_capacity(DEFAULT_CACHE_CAPACITY).build(),
        }
    }

    /// 构建（或从缓存取出）处理器配置
    pub async fn build(&self, processor_name: &str) -> FlowResult<ProcessorConfig> {
        if let Some(config) = self.cache.get(processor_name).await {
            tracing::debug!(processor = processor_name, "config cache hit");
            return Ok(config);
        }
        let name = ProcessorName::parse(processor_name)?;
        self.cache
            .try_get_with(processor_name.to_string(), self.load(&name))
            .await
            .map_err(|e| {
                tracing::error!(processor = processor_name, error = %e, "failed to build config");
                (*e).clone()
            })
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
        tracing::info!("config cache cleared");
    }

    pub async fn cache_size(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    async fn load(&self, name: &ProcessorName) -> FlowResult<ProcessorConfig> {
        let value = match name.kind {
            ProcessorType::Agent => self.build_agent_config(&name.key).await?,
            ProcessorType::Function => self.read_json(&tool_path(&name.key)).await?,
            ProcessorType::Message => self.build_message_config(&name.key).await?,
        };
        let path = format!("{}.{}", name.kind.prefix(), name.key);
        let config: ProcessorConfig =
            serde_json::from_value(value).map_err(|e| FlowError::ConfigParse {
                path,
                reason: e.to_string(),
            })?;
        tracing::debug!(processor = %name.key, kind = config.kind.as_str(), "config built");
        Ok(config)
    }

    async fn read_json(&self, path: &str) -> FlowResult<Value> {
        let text = self.source.read_to_string(path).await?;
        serde_json::from_str(&text).map_err(|e| FlowError::ConfigParse {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn build_agent_config(&self, key: &str) -> FlowResult<Value> {
        let mut config = self.read_json(&format!("agents/{}/agent.json", key)).await?;
        if let Some(Value::Array(tools)) = config.get_mut("tools") {
            for tool in tools.iter_mut() {
                self.resolve_tool(tool).await;
            }
        }
        if let Some(Value::Array(messages)) = config.get_mut("messages") {
            for message in messages.iter_mut() {
                self.resolve_message(message).await;
            }
        }
        Ok(config)
    }

    /// `{"name": x}` 替换为 tools/x/tool.json；找不到时保留原引用
    async fn resolve_tool(&self, tool: &mut Value) {
        let Some(name) = tool.get("name").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        match self.read_json(&tool_path(&name)).await {
            Ok(full) => *tool = full,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool config not found, keeping reference")
            }
        }
    }

    /// content_from_file 展开为 content（单元素列表）；找不到时保留原引用
    async fn resolve_message(&self, message: &mut Value) {
        let Some(obj) = message.as_object_mut() else {
            return;
        };
        let Some(prompt) = obj
            .get("content_from_file")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return;
        };
        match self.load_prompt(&prompt).await {
            Ok(content) => {
                obj.remove("content_from_file");
                obj.insert("content".to_string(), json!([content]));
            }
            Err(e) => {
                tracing::warn!(prompt = %prompt, error = %e, "prompt not found, keeping reference")
            }
        }
    }

    /// prompts/<name>/message_<n>.md 按 n 数值排序，逐个 trim 后以空行拼接
    async fn load_prompt(&self, prompt: &str) -> FlowResult<String> {
        let dir = format!("prompts/{}", prompt);
        let re = FRAGMENT_RE.get_or_init(|| Regex::new(r"^message_(\d+)\.md$").unwrap());
        let mut fragments: Vec<(u64, String)> = self
            .source
            .list_dir(&dir)
            .await?
            .into_iter()
            .filter_map(|file| {
                let n = re
                    .captures(&file)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<u64>().ok())?;
                Some((n, file))
            })
            .collect();
        if fragments.is_empty() {
            return Err(FlowError::ConfigNotFound(format!("{}/message_*.md", dir)));
        }
        fragments.sort_by_key(|(n, _)| *n);

        let mut parts = Vec::with_capacity(fragments.len());
        for (_, file) in fragments {
            let text = self
                .source
                .read_to_string(&format!("{}/{}", dir, file))
                .await?;
            parts.push(text.trim().to_string());
        }
        Ok(parts.join("\n\n"))
    }

    async fn build_message_config(&self, key: &str) -> FlowResult<Value> {
        let dir = format!("messages/{}", key);
        let body = self
            .source
            .read_to_string(&format!("{}/message.md", dir))
            .await?;
        let meta = self.read_json(&format!("{}/meta.json", dir)).await?;

        let kind = meta
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("notification")
            .to_string();
        let flag = |key: &str, default: bool| meta.get(key).and_then(Value::as_bool).unwrap_or(default);

        let mut config = Map::new();
        config.insert("type".to_string(), json!(kind));
        config.insert(kind.clone(), json!(body.trim()));
        config.insert("publish".to_string(), json!(flag("publish", true)));
        config.insert("approve".to_string(), json!(flag("approve", false)));
        config.insert(
            "allow_anonymous_users".to_string(),
            json!(flag("allow_anonymous_users", true)),
        );
        Ok(Value::Object(config))
    }
}

fn tool_path(name: &str) -> String {
    format!("tools/{}/tool.json", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::config_source::DirConfigSource;
    use crate::model::{ProcessorKind, Role};
    use std::path::Path;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn builder(root: &Path) -> ConfigBuilder {
        ConfigBuilder::new(Arc::new(DirConfigSource::new(root)))
    }

    #[tokio::test]
    async fn test_agent_config_resolves_tools_and_prompts() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "agents/chat/agent.json",
            r#"{"type": "agent",
                "tools": [{"name": "save_file"}, {"name": "ghost"}],
                "messages": [{"role": "system", "content_from_file": "intro"},
                             {"role": "user", "content_from_file": "missing"}]}"#,
        );
        write(
            dir.path(),
            "tools/save_file/tool.json",
            r#"{"type": "function", "function": {"name": "save_file"}}"#,
        );
        write(dir.path(), "prompts/intro/message_10.md", "  ten \n");
        write(dir.path(), "prompts/intro/message_2.md", "two");
        write(dir.path(), "prompts/intro/notes.txt", "ignored");

        let config = builder(dir.path()).build("AgentProcessor.chat").await.unwrap();
        assert_eq!(config.kind, ProcessorKind::Agent);
        assert_eq!(config.tools[0]["type"], "function");
        assert_eq!(config.tools[1], json!({"name": "ghost"}));
        assert_eq!(config.messages[0].role, Role::System);
        assert_eq!(config.messages[0].content, vec!["two\n\nten"]);
        assert!(config.messages[0].content_from_file.is_none());
        assert_eq!(config.messages[1].content_from_file.as_deref(), Some("missing"));
    }

    #[tokio::test]
    async fn test_message_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "messages/hello/message.md", "\nHello {name}\n");
        write(dir.path(), "messages/hello/meta.json", r#"{"type": "question"}"#);

        let config = builder(dir.path())
            .build("MessageProcessor.hello")
            .await
            .unwrap();
        assert_eq!(config.kind, ProcessorKind::Question);
        assert_eq!(config.question.as_deref(), Some("Hello {name}"));
        assert_eq!(config.publish, Some(true));
        assert_eq!(config.approve, Some(false));
        assert_eq!(config.allow_anonymous_users, Some(true));
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(dir.path());

        assert!(matches!(
            builder.build("FunctionProcessor.late").await,
            Err(FlowError::ConfigNotFound(_))
        ));
        assert_eq!(builder.cache_size().await, 0);

        write(
            dir.path(),
            "tools/late/tool.json",
            r#"{"type": "function", "function": {"name": "late"}}"#,
        );
        let config = builder.build("FunctionProcessor.late").await.unwrap();
        assert_eq!(config.function.unwrap().name, "late");
        assert_eq!(builder.cache_size().await, 1);

        builder.clear_cache();
        assert_eq!(builder.cache_size().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_names() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder(dir.path());
        assert!(matches!(
            builder.build("nodot").await,
            Err(FlowError::InvalidProcessorName(_))
        ));
        assert!(matches!(
            builder.build("WeirdProcessor.x").await,
            Err(FlowError::InvalidProcessorName(_))
        ));
    }
}
