//! 基于 LlmClient 的 Agent 执行器
//!
//! 回合内循环：模型输出 `{"tool": ..., "args": ...}` 时调用方法并把结果作为 Observation 回填；
//! 输出普通文本时结束。配置了响应 schema 时，不满足 schema 的输出会连同错误反馈给模型重试，
//! 尝试次数用尽后返回最后一次输出。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::schema::{extract_schema, parse_tool_call, tool_call_schema_json, validate_response};
use super::traits::{AgentExecutor, AgentRequest};
use crate::core::{FlowError, FlowResult};
use crate::llm::LlmClient;
use crate::model::AiMessage;

pub struct LlmAgentExecutor {
    llm: Arc<dyn LlmClient>,
    max_tool_calls: u32,
    max_schema_attempts: u32,
    default_model: Option<String>,
}

impl LlmAgentExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, max_tool_calls: u32, max_schema_attempts: u32) -> Self {
        Self {
            llm,
            max_tool_calls,
            max_schema_attempts: max_schema_attempts.max(1),
            default_model: None,
        }
    }

    /// 配置中 model_name 为空时使用
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }
}

fn tools_prompt(tools: &[Value]) -> String {
    let listing = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You can call the following functions:\n{}\n\n\
         To call a function, reply with only a JSON object matching this schema:\n{}\n\
         After the call you will receive an Observation. When you are done, reply with plain text.",
        listing,
        tool_call_schema_json()
    )
}

fn schema_prompt(schema: &Value) -> String {
    format!(
        "Your final answer must be a JSON object matching this schema:\n{}",
        serde_json::to_string_pretty(schema).unwrap_or_default()
    )
}

#[async_trait]
impl AgentExecutor for LlmAgentExecutor {
    async fn run(&self, request: AgentRequest<'_>) -> FlowResult<String> {
        let allowed = request.tool_names();
        let AgentRequest {
            registry,
            technical_id,
            entity,
            tools,
            model,
            mut messages,
            tool_choice,
            response_format,
        } = request;

        let tools_enabled = !allowed.is_empty() && tool_choice != Some("none");
        if tools_enabled {
            messages.insert(0, AiMessage::system(tools_prompt(tools)));
        }
        let schema = response_format.and_then(extract_schema).cloned();
        if let Some(schema) = &schema {
            messages.push(AiMessage::system(schema_prompt(schema)));
        }

        let mut model = model.clone();
        if model.model_name.is_empty() {
            if let Some(default) = &self.default_model {
                model.model_name = default.clone();
            }
        }

        let mut tool_calls = 0;
        let mut schema_attempts = 0;
        loop {
            let output = self
                .llm
                .complete(&messages, &model)
                .await
                .map_err(FlowError::AgentExecution)?;

            if tools_enabled {
                if let Some(call) = parse_tool_call(&output) {
                    if tool_calls >= self.max_tool_calls {
                        return Err(FlowError::AgentExecution(format!(
                            "tool call limit ({}) reached",
                            self.max_tool_calls
                        )));
                    }
                    tool_calls += 1;
                    let observation = if allowed.contains(&call.tool) {
                        match registry
                            .dispatch(&call.tool, technical_id, entity, call.args)
                            .await
                        {
                            Ok(result) => result,
                            Err(e) => format!("Error: {}", e),
                        }
                    } else {
                        tracing::warn!(tool = %call.tool, "model requested an undeclared tool");
                        format!("Unknown tool '{}'. Available tools: {:?}", call.tool, allowed)
                    };
                    messages.push(AiMessage::assistant(output));
                    messages.push(AiMessage::user(format!("Observation: {}", observation)));
                    continue;
                }
            }

            if let Some(schema) = &schema {
                let errors = validate_response(&output, schema);
                if !errors.is_empty() {
                    schema_attempts += 1;
                    if schema_attempts >= self.max_schema_attempts {
                        tracing::warn!(
                            attempts = schema_attempts,
                            "response still violates schema, returning last output"
                        );
                        return Ok(output);
                    }
                    tracing::debug!(attempt = schema_attempts, ?errors, "schema validation failed");
                    messages.push(AiMessage::assistant(output));
                    messages.push(AiMessage::user(format!(
                        "Your previous answer did not match the required schema:\n- {}\nPlease return a corrected JSON object.",
                        errors.join("\n- ")
                    )));
                    continue;
                }
            }

            return Ok(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FlowResult;
    use crate::dispatcher::{MethodRegistry, WorkflowMethod};
    use crate::llm::MockLlmClient;
    use crate::model::{AgenticFlowEntity, FlowEntity, ModelConfig};
    use serde_json::{json, Map};

    struct SetName;

    #[async_trait]
    impl WorkflowMethod for SetName {
        fn name(&self) -> &str {
            "set_name"
        }

        async fn call(
            &self,
            _technical_id: &str,
            entity: &mut FlowEntity,
            args: Map<String, Value>,
        ) -> FlowResult<String> {
            let name = args.get("name").cloned().unwrap_or(Value::Null);
            entity.base_mut().workflow_cache.insert("name".to_string(), name);
            Ok("saved".to_string())
        }
    }

    fn tools() -> Vec<Value> {
        vec![json!({"type": "function", "function": {"name": "set_name", "parameters": {}}})]
    }

    #[tokio::test]
    async fn test_tool_call_loop() {
        let llm = Arc::new(MockLlmClient::with_replies([
            r#"{"tool": "set_name", "args": {"name": "bee"}}"#,
            "done",
        ]));
        let executor = LlmAgentExecutor::new(llm.clone(), 4, 3);
        let mut registry = MethodRegistry::new();
        registry.register(SetName);
        let mut entity = FlowEntity::from(AgenticFlowEntity::new("u", "m"));
        let tools = tools();
        let model = ModelConfig::default();

        let out = executor
            .run(AgentRequest {
                registry: &registry,
                technical_id: "t",
                entity: &mut entity,
                tools: &tools,
                model: &model,
                messages: vec![AiMessage::user("name it")],
                tool_choice: None,
                response_format: None,
            })
            .await
            .unwrap();

        assert_eq!(out, "done");
        assert_eq!(entity.base().workflow_cache["name"], json!("bee"));
        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].last().unwrap().content, "Observation: saved");
    }

    #[tokio::test]
    async fn test_schema_retry_then_surface_last() {
        let llm = Arc::new(MockLlmClient::with_replies([
            r#"{"wrong": 1}"#,
            r#"{"still": "wrong"}"#,
        ]));
        let executor = LlmAgentExecutor::new(llm.clone(), 4, 2);
        let registry = MethodRegistry::new();
        let mut entity = FlowEntity::from(AgenticFlowEntity::new("u", "m"));
        let model = ModelConfig::default();
        let format = json!({"type": "json_schema", "json_schema": {"schema": {
            "type": "object", "required": ["answer"]
        }}});

        let out = executor
            .run(AgentRequest {
                registry: &registry,
                technical_id: "t",
                entity: &mut entity,
                tools: &[],
                model: &model,
                messages: vec![AiMessage::user("q")],
                tool_choice: None,
                response_format: Some(&format),
            })
            .await
            .unwrap();

        assert_eq!(out, r#"{"still": "wrong"}"#);
        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1]
            .last()
            .unwrap()
            .content
            .contains("missing required property 'answer'"));
    }

    #[tokio::test]
    async fn test_schema_valid_first_time() {
        let llm = Arc::new(MockLlmClient::with_replies([r#"{"answer": 42}"#]));
        let executor = LlmAgentExecutor::new(llm, 4, 3);
        let registry = MethodRegistry::new();
        let mut entity = FlowEntity::from(AgenticFlowEntity::new("u", "m"));
        let model = ModelConfig::default();
        let format = json!({"schema": {"type": "object", "required": ["answer"]}});

        let out = executor
            .run(AgentRequest {
                registry: &registry,
                technical_id: "t",
                entity: &mut entity,
                tools: &[],
                model: &model,
                messages: vec![],
                tool_choice: None,
                response_format: Some(&format),
            })
            .await
            .unwrap();
        assert_eq!(out, r#"{"answer": 42}"#);
    }
}
