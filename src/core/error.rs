//! 编排错误类型
//!
//! 所有负载均为字符串，保证 `FlowError: Clone`，配置缓存可以把同一个失败交给并发等待者。
//! 哪些错误会被吸收、哪些会把实体标记为 failed，由 EventProcessor / AiAgentHandler 决定。

use thiserror::Error;

/// 工作流编排过程中可能出现的错误（配置、方法分派、存储、Agent 调用等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// 配置源中缺少定义文件
    #[error("Config not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid config {path}: {reason}")]
    ConfigParse { path: String, reason: String },

    /// 处理器名格式错误或类型未知（期望 "<Type>.<key>"）
    #[error("Invalid processor name: {0}")]
    InvalidProcessorName(String),

    /// 既无法构建配置，也没有同名的注册方法
    #[error("Unknown processing step: {0}")]
    UnknownProcessor(String),

    /// 方法注册表中不存在该名称；附带全部已知名称便于诊断
    #[error("Unknown method: {name}. Available methods: {available:?}")]
    UnknownMethod { name: String, available: Vec<String> },

    #[error("Method '{name}' failed: {reason}")]
    MethodFailed { name: String, reason: String },

    /// 普通 WorkflowEntity 只支持 function 类型
    #[error("Unsupported config type for {entity}: {kind}")]
    UnsupportedForEntity { entity: String, kind: String },

    #[error("Agent execution failed: {0}")]
    AgentExecution(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transition resolution failed: {0}")]
    TransitionResolution(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        FlowError::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for FlowError {
    fn from(e: config::ConfigError) -> Self {
        FlowError::Config(e.to_string())
    }
}

pub type FlowResult<T> = Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_method_lists_available() {
        let err = FlowError::UnknownMethod {
            name: "missing".to_string(),
            available: vec!["a".to_string(), "b".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("missing"));
        assert!(text.contains("\"a\""));
        assert!(text.contains("\"b\""));
    }

    #[test]
    fn test_json_error_converts() {
        let err: FlowError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, FlowError::Serialization(_)));
    }
}
