//! Agent 执行器与批处理器接口

use async_trait::async_trait;
use serde_json::Value;

use crate::core::FlowResult;
use crate::dispatcher::MethodRegistry;
use crate::model::{AiMessage, FlowEntity, ModelConfig};

/// 一次 Agent 回合的全部输入
pub struct AgentRequest<'a> {
    /// 模型可调用的方法
    pub registry: &'a MethodRegistry,
    pub technical_id: &'a str,
    /// 方法调用可能修改实体
    pub entity: &'a mut FlowEntity,
    /// 配置中的工具定义（OpenAI function 格式）
    pub tools: &'a [Value],
    pub model: &'a ModelConfig,
    /// 历史 + 配置消息 + 外部输入，按顺序
    pub messages: Vec<AiMessage>,
    pub tool_choice: Option<&'a str>,
    /// 期望的响应 schema
    pub response_format: Option<&'a Value>,
}

impl AgentRequest<'_> {
    /// tools 中声明的函数名
    pub fn tool_names(&self) -> Vec<String> {
        self.tools
            .iter()
            .filter_map(|t| {
                t.pointer("/function/name")
                    .or_else(|| t.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect()
    }
}

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn run(&self, request: AgentRequest<'_>) -> FlowResult<String>;
}

/// 外部批处理：读取输入文件、写出结果文件
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process_file(&self, input: &str, output: &str) -> FlowResult<()>;
}
