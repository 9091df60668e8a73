//! 处理器配置
//!
//! 处理器名形如 `<Type>.<key>`，Type 为 AgentProcessor / FunctionProcessor / MessageProcessor。
//! ConfigBuilder 据此从配置目录组装出 ProcessorConfig；未识别的键通过 `extra` 原样保留。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::memory::Role;
use crate::core::{FlowError, FlowResult};

/// 处理器名中的类型前缀
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorType {
    Agent,
    Function,
    Message,
}

impl ProcessorType {
    pub fn prefix(&self) -> &'static str {
        match self {
            ProcessorType::Agent => "AgentProcessor",
            ProcessorType::Function => "FunctionProcessor",
            ProcessorType::Message => "MessageProcessor",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "AgentProcessor" => Some(ProcessorType::Agent),
            "FunctionProcessor" => Some(ProcessorType::Function),
            "MessageProcessor" => Some(ProcessorType::Message),
            _ => None,
        }
    }
}

/// 解析后的处理器名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorName {
    pub kind: ProcessorType,
    pub key: String,
}

impl ProcessorName {
    /// 解析 `<Type>.<key>`；没有 `.`、类型未知或 key 为空都返回 InvalidProcessorName
    pub fn parse(name: &str) -> FlowResult<Self> {
        let (prefix, key) = name
            .split_once('.')
            .ok_or_else(|| FlowError::InvalidProcessorName(name.to_string()))?;
        let kind = ProcessorType::from_prefix(prefix)
            .ok_or_else(|| FlowError::InvalidProcessorName(name.to_string()))?;
        if key.is_empty() {
            return Err(FlowError::InvalidProcessorName(name.to_string()));
        }
        Ok(Self {
            kind,
            key: key.to_string(),
        })
    }

    /// 名称是否带有可识别的类型前缀；不带前缀的名称直接走方法注册表
    pub fn has_known_prefix(name: &str) -> bool {
        name.split_once('.')
            .and_then(|(prefix, _)| ProcessorType::from_prefix(prefix))
            .is_some()
    }
}

/// 配置中的 `type` 字段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    Function,
    Agent,
    Prompt,
    Batch,
    Notification,
    Question,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ProcessorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorKind::Function => "function",
            ProcessorKind::Agent => "agent",
            ProcessorKind::Prompt => "prompt",
            ProcessorKind::Batch => "batch",
            ProcessorKind::Notification => "notification",
            ProcessorKind::Question => "question",
            ProcessorKind::Unknown => "unknown",
        }
    }

    /// agent / prompt / batch 由 AiAgentHandler 处理
    pub fn is_ai(&self) -> bool {
        matches!(
            self,
            ProcessorKind::Agent | ProcessorKind::Prompt | ProcessorKind::Batch
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 静态参数；为对象时作为额外参数传给方法
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// 配置中声明的静态消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMessage {
    pub role: Role,
    #[serde(default, deserialize_with = "string_or_list")]
    pub content: Vec<String>,
    /// 指向 prompts/<name>/ 的引用，由 ConfigBuilder 展开
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_from_file: Option<String>,
}

impl ConfigMessage {
    pub fn text(&self) -> String {
        self.content.join("\n")
    }
}

fn default_model_name() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    10000
}

fn default_top_p() -> f32 {
    1.0
}

/// 模型调用参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

impl ModelConfig {
    /// 参数范围检查，与 OpenAI 接口的取值范围一致
    pub fn validate(&self) -> FlowResult<()> {
        let invalid = |field: &str, value: f32| {
            Err(FlowError::ConfigParse {
                path: format!("model.{}", field),
                reason: format!("out of range: {}", value),
            })
        };
        if !(0.0..=2.0).contains(&self.temperature) {
            return invalid("temperature", self.temperature);
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return invalid("top_p", self.top_p);
        }
        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return invalid("frequency_penalty", self.frequency_penalty);
        }
        if !(-2.0..=2.0).contains(&self.presence_penalty) {
            return invalid("presence_penalty", self.presence_penalty);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSpec {
    pub local_fs: Vec<String>,
    #[serde(alias = "cyoda_edge_message")]
    pub edge_message: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSpec {
    pub local_fs: Vec<String>,
    pub workflow_cache: Vec<String>,
    #[serde(alias = "cyoda_edge_message")]
    pub edge_message: Vec<String>,
}

impl OutputSpec {
    pub fn is_empty(&self) -> bool {
        self.local_fs.is_empty() && self.workflow_cache.is_empty() && self.edge_message.is_empty()
    }
}

/// 一个处理步骤的完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(rename = "type", default)]
    pub kind: ProcessorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ConfigMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iteration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approve: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_anonymous_users: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProcessorConfig {
    /// notification / question 的文本
    pub fn message_text(&self) -> Option<&str> {
        match self.kind {
            ProcessorKind::Notification => self.notification.as_deref(),
            ProcessorKind::Question => self.question.as_deref(),
            _ => None,
        }
    }

    pub fn set_message_text(&mut self, text: String) {
        match self.kind {
            ProcessorKind::Notification => self.notification = Some(text),
            ProcessorKind::Question => self.question = Some(text),
            _ => {}
        }
    }

    /// 配置中以类型名为键的内容，写入「已解析配置」边消息
    pub fn type_payload(&self) -> Value {
        match self.kind {
            ProcessorKind::Notification => {
                self.notification.clone().map(Value::String).unwrap_or(Value::Null)
            }
            ProcessorKind::Question => {
                self.question.clone().map(Value::String).unwrap_or(Value::Null)
            }
            ProcessorKind::Function => self
                .function
                .as_ref()
                .and_then(|f| serde_json::to_value(f).ok())
                .unwrap_or(Value::Null),
            kind => self.extra.get(kind.as_str()).cloned().unwrap_or(Value::Null),
        }
    }

    /// 配置的记忆标签；未配置时使用通用标签
    pub fn memory_tags_or(&self, general: &str) -> Vec<String> {
        match &self.memory_tags {
            Some(tags) if !tags.is_empty() => tags.clone(),
            _ => vec![general.to_string()],
        }
    }

    pub fn output_local_fs(&self) -> &[String] {
        self.output.as_ref().map(|o| o.local_fs.as_slice()).unwrap_or(&[])
    }

    pub fn input_local_fs(&self) -> &[String] {
        self.input.as_ref().map(|i| i.local_fs.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_processor_name() {
        let name = ProcessorName::parse("AgentProcessor.chat").unwrap();
        assert_eq!(name.kind, ProcessorType::Agent);
        assert_eq!(name.key, "chat");

        assert!(matches!(
            ProcessorName::parse("no_dot"),
            Err(FlowError::InvalidProcessorName(_))
        ));
        assert!(matches!(
            ProcessorName::parse("Bogus.key"),
            Err(FlowError::InvalidProcessorName(_))
        ));
        assert!(ProcessorName::has_known_prefix("MessageProcessor.hi"));
        assert!(!ProcessorName::has_known_prefix("save_file"));
        assert!(!ProcessorName::has_known_prefix("module.save_file"));
    }

    #[test]
    fn test_config_defaults_and_extra_keys() {
        let config: ProcessorConfig = serde_json::from_value(json!({
            "type": "agent",
            "messages": [{"role": "user", "content": "hello {name}"}],
            "memory_tags": ["a"],
            "custom_key": 42
        }))
        .unwrap();

        assert_eq!(config.kind, ProcessorKind::Agent);
        assert_eq!(config.messages[0].content, vec!["hello {name}"]);
        assert_eq!(config.model.model_name, "gpt-4.1-mini");
        assert_eq!(config.model.max_tokens, 10000);
        assert_eq!(config.extra.get("custom_key"), Some(&json!(42)));
        assert_eq!(config.memory_tags_or("general"), vec!["a"]);
    }

    #[test]
    fn test_unknown_type_is_preserved_as_unknown() {
        let config: ProcessorConfig =
            serde_json::from_value(json!({"type": "telepathy"})).unwrap();
        assert_eq!(config.kind, ProcessorKind::Unknown);
        assert_eq!(config.memory_tags_or("general"), vec!["general"]);
    }

    #[test]
    fn test_model_validation() {
        let mut model = ModelConfig::default();
        assert!(model.validate().is_ok());
        model.temperature = 3.0;
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_type_payload() {
        let mut config = ProcessorConfig {
            kind: ProcessorKind::Question,
            question: Some("Hi?".to_string()),
            ..Default::default()
        };
        assert_eq!(config.type_payload(), json!("Hi?"));
        config.set_message_text("Bye?".to_string());
        assert_eq!(config.message_text(), Some("Bye?"));
    }
}
