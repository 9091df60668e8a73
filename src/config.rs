//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FLOWBEE__*` 覆盖（双下划线表示嵌套，如 `FLOWBEE__RESOLVER__MAX_FETCH_RETRIES=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub dispatcher: DispatcherSection,
    pub resolver: ResolverSection,
    pub agent: AgentSection,
    pub repository: RepositorySection,
    pub llm: LlmSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [dispatcher] 段：处理器定义目录、通用记忆标签、实体版本
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSection {
    /// agents/ tools/ prompts/ messages/ 所在的根目录
    #[serde(default = "default_config_root")]
    pub config_root: PathBuf,
    #[serde(default = "default_general_memory_tag")]
    pub general_memory_tag: String,
    #[serde(default = "default_entity_version")]
    pub entity_version: String,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            config_root: default_config_root(),
            general_memory_tag: default_general_memory_tag(),
            entity_version: default_entity_version(),
        }
    }
}

fn default_config_root() -> PathBuf {
    PathBuf::from("config/processors")
}

fn default_general_memory_tag() -> String {
    "general_memory_tag".to_string()
}

fn default_entity_version() -> String {
    "1".to_string()
}

/// [resolver] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverSection {
    /// 读取子实体失败时的重试次数（无退避）
    #[serde(default = "default_max_fetch_retries")]
    pub max_fetch_retries: u32,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            max_fetch_retries: default_max_fetch_retries(),
        }
    }
}

fn default_max_fetch_retries() -> u32 {
    3
}

/// [agent] 段：LLM 执行器的循环上限
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 响应 schema 校验失败后的最多尝试次数
    #[serde(default = "default_max_schema_attempts")]
    pub max_schema_attempts: u32,
    /// 单个回合内最多执行的工具调用数
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_schema_attempts: default_max_schema_attempts(),
            max_tool_calls: default_max_tool_calls(),
        }
    }
}

fn default_max_schema_attempts() -> u32 {
    3
}

fn default_max_tool_calls() -> u32 {
    8
}

/// [repository] 段：输出文件的工作区与仓库名
#[derive(Debug, Clone, Deserialize)]
pub struct RepositorySection {
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default = "default_python_repository")]
    pub python_repository: String,
    #[serde(default = "default_java_repository")]
    pub java_repository: String,
}

impl Default for RepositorySection {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            python_repository: default_python_repository(),
            java_repository: default_java_repository(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./workspace")
}

fn default_python_repository() -> String {
    "python_repository".to_string()
}

fn default_java_repository() -> String {
    "java_repository".to_string()
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai（OpenAI 兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 配置中未指定 model_name 时使用
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// 从 config 目录加载配置，环境变量 FLOWBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FLOWBEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FLOWBEE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
