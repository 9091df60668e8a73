//! AI Agent 回合处理
//!
//! run() 的顺序：批处理分流 → 迭代上限检查 → 配置消息与用户答复写入记忆 → 组装上下文 →
//! 调用 AgentExecutor → 回复写入记忆。任何内部错误都被吸收为固定的重试提示，实体不标记 failed。

use std::sync::Arc;

use serde_json::{Map, Value};

use super::format::safe_format;
use super::memory_manager::MemoryManager;
use super::method_registry::MethodRegistry;
use super::output::{branch_name, RepositoryNames};
use crate::agent::{AgentExecutor, AgentRequest, BatchProcessor};
use crate::core::consts::{AGENT_RETRY_GUIDANCE, NEXT_ITERATION_NOTICE};
use crate::core::{FlowError, FlowResult};
use crate::model::{
    AgenticFlowEntity, AiMessage, ChatMemory, EdgeMessageType, FlowEntity, MemoryRef,
    ProcessorConfig, ProcessorKind,
};
use crate::store::{EntityService, Repository};

const BATCH_UNAVAILABLE: &str = "Batch processing not available";
const BATCH_INVALID: &str = "Invalid batch processing configuration: missing file paths";

/// 迭代上限检查：首次遇到当前迁移时计数置 0 并记录上限；计数达到上限返回 true（跳过本回合），
/// 否则计数加一。没有配置 max_iteration 时总是返回 false。
pub fn iteration_exhausted(max_iteration: Option<u32>, entity: &mut AgenticFlowEntity) -> bool {
    let Some(max) = max_iteration else {
        return false;
    };
    let transition = entity.base.current_transition.clone().unwrap_or_default();
    let memory = &mut entity.transitions_memory;
    if !memory.current_iteration.contains_key(&transition) {
        memory.current_iteration.insert(transition.clone(), 0);
        memory.max_iteration.insert(transition.clone(), max);
    }
    let current = memory.current_iteration.get(&transition).copied().unwrap_or(0);
    if current >= max {
        tracing::info!(transition = %transition, current, max, "iteration limit reached");
        return true;
    }
    memory.current_iteration.insert(transition, current + 1);
    false
}

pub struct AiAgentHandler {
    executor: Arc<dyn AgentExecutor>,
    registry: Arc<MethodRegistry>,
    memory: Arc<MemoryManager>,
    entities: EntityService,
    repository: Arc<dyn Repository>,
    repository_names: RepositoryNames,
    batch: Option<Arc<dyn BatchProcessor>>,
}

impl AiAgentHandler {
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        registry: Arc<MethodRegistry>,
        memory: Arc<MemoryManager>,
        entities: EntityService,
        repository: Arc<dyn Repository>,
        repository_names: RepositoryNames,
    ) -> Self {
        Self {
            executor,
            registry,
            memory,
            entities,
            repository,
            repository_names,
            batch: None,
        }
    }

    pub fn with_batch_processor(mut self, batch: Arc<dyn BatchProcessor>) -> Self {
        self.batch = Some(batch);
        self
    }

    /// 执行一个 Agent 回合；从不返回错误
    pub async fn run(
        &self,
        config: &ProcessorConfig,
        entity: &mut FlowEntity,
        memory: &mut ChatMemory,
        technical_id: &str,
    ) -> String {
        match self.try_run(config, entity, memory, technical_id).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(technical_id, error = %e, "agent turn failed, returning retry guidance");
                AGENT_RETRY_GUIDANCE.to_string()
            }
        }
    }

    async fn try_run(
        &self,
        config: &ProcessorConfig,
        entity: &mut FlowEntity,
        memory: &mut ChatMemory,
        technical_id: &str,
    ) -> FlowResult<String> {
        if config.kind == ProcessorKind::Batch {
            return Ok(self.handle_batch(config));
        }

        let tags = config.memory_tags_or(self.memory.general_tag());
        let messages = {
            let agentic = entity
                .as_agentic_mut()
                .ok_or_else(|| FlowError::UnsupportedForEntity {
                    entity: "WorkflowEntity".to_string(),
                    kind: config.kind.as_str().to_string(),
                })?;

            if iteration_exhausted(config.max_iteration, agentic) {
                return Ok(NEXT_ITERATION_NOTICE.to_string());
            }

            self.append_config_messages(config, agentic, memory, &tags).await?;
            self.inject_latest_answer(agentic, memory, &tags).await?;
            self.collect_context(config, agentic, memory, technical_id, &tags)
                .await?
        };

        let response = self
            .executor
            .run(AgentRequest {
                registry: &self.registry,
                technical_id,
                entity,
                tools: &config.tools,
                model: &config.model,
                messages,
                tool_choice: config.tool_choice.as_deref(),
                response_format: config.response_format.as_ref(),
            })
            .await?;

        self.memory.store_ai_response(&response, memory, &tags).await?;
        Ok(response)
    }

    /// 不等待批处理完成，立即返回确认文本
    fn handle_batch(&self, config: &ProcessorConfig) -> String {
        let Some(batch) = &self.batch else {
            return BATCH_UNAVAILABLE.to_string();
        };
        let (Some(input), Some(output)) = (
            config.input_local_fs().first().cloned(),
            config.output_local_fs().first().cloned(),
        ) else {
            return BATCH_INVALID.to_string();
        };

        let batch = Arc::clone(batch);
        let ack = format!("Scheduled batch processing for {}", input);
        tokio::spawn(async move {
            match batch.process_file(&input, &output).await {
                Ok(()) => tracing::info!(input = %input, output = %output, "batch processing finished"),
                Err(e) => tracing::warn!(input = %input, error = %e, "batch processing failed"),
            }
        });
        ack
    }

    /// workflow_cache 加上 edge_messages_store 中各项的内容，用于配置消息的占位符替换
    async fn template_values(&self, entity: &AgenticFlowEntity) -> Map<String, Value> {
        let mut values = entity.base.workflow_cache.clone();
        for (name, id) in &entity.base.edge_messages_store {
            match self.entities.get_content(id).await {
                Ok(Some(content)) => {
                    let text = match content {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    values.insert(name.clone(), Value::String(text));
                }
                Ok(None) => tracing::warn!(name = %name, "edge message content missing"),
                Err(e) => tracing::warn!(name = %name, error = %e, "failed to load edge message content"),
            }
        }
        values
    }

    async fn append_config_messages(
        &self,
        config: &ProcessorConfig,
        entity: &AgenticFlowEntity,
        memory: &mut ChatMemory,
        tags: &[String],
    ) -> FlowResult<()> {
        if config.messages.is_empty() {
            return Ok(());
        }
        let values = self.template_values(entity).await;
        let mut refs = Vec::with_capacity(config.messages.len());
        for message in &config.messages {
            let content = message
                .content
                .iter()
                .map(|line| safe_format(line, &values))
                .collect::<Vec<_>>()
                .join("\n");
            let id = self
                .memory
                .store_message(&AiMessage {
                    role: message.role,
                    content,
                })
                .await?;
            refs.push(MemoryRef::new(id));
        }
        for reference in &refs {
            memory.append_to_all(tags, reference);
        }
        Ok(())
    }

    /// finished_flow 中最近一条 answer 若未消费，作为 user 消息写入每个标签并标记已消费
    async fn inject_latest_answer(
        &self,
        entity: &mut AgenticFlowEntity,
        memory: &mut ChatMemory,
        tags: &[String],
    ) -> FlowResult<()> {
        let Some(answer) = entity.latest_answer_mut() else {
            return Ok(());
        };
        if answer.consumed || answer.kind != EdgeMessageType::Answer {
            return Ok(());
        }
        let content = self.memory.edge_message_content(&answer.edge_message_id).await?;
        let text = match content {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let id = self.memory.store_message(&AiMessage::user(text)).await?;
        memory.append_to_all(tags, &MemoryRef::new(id));
        answer.mark_consumed();
        Ok(())
    }

    /// 历史消息在前，外部输入（仓库文件或内容存储）在后
    async fn collect_context(
        &self,
        config: &ProcessorConfig,
        entity: &AgenticFlowEntity,
        memory: &ChatMemory,
        technical_id: &str,
        tags: &[String],
    ) -> FlowResult<Vec<AiMessage>> {
        let mut messages = self.memory.get_ai_memory_messages(memory, tags).await?;
        let Some(input) = &config.input else {
            return Ok(messages);
        };

        if !input.local_fs.is_empty() {
            let branch = branch_name(&entity.base, technical_id);
            let repository = self.repository_names.for_entity(&entity.base);
            for file in &input.local_fs {
                let path = safe_format(file, &entity.base.workflow_cache);
                let contents = match self.repository.read(branch, repository, &path).await {
                    Ok(Some(text)) => text,
                    Ok(None) => {
                        tracing::warn!(path = %path, "input file not found");
                        String::new()
                    }
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "failed to read input file");
                        String::new()
                    }
                };
                messages.push(AiMessage::user(format!("Reference: {}: \n {}", file, contents)));
            }
        } else {
            for name in &input.edge_message {
                let Some(id) = entity.base.edge_messages_store.get(name) else {
                    tracing::warn!(name = %name, "input edge message not in store");
                    continue;
                };
                let content = self.entities.get_content(id).await?.unwrap_or(Value::Null);
                let text = match content {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                messages.push(AiMessage::user(format!("Reference: {}", text)));
            }
        }
        Ok(messages)
    }

    /// 函数调用桥：未知名称返回可用名称列表，调用失败返回错误文本
    pub async fn handle_function_calling(
        &self,
        name: &str,
        params: Map<String, Value>,
        entity: &mut FlowEntity,
        technical_id: &str,
    ) -> String {
        if !self.registry.has(name) {
            return format!(
                "Function '{}' not found. Available: {:?}",
                name,
                self.registry.list()
            );
        }
        match self.registry.dispatch(name, technical_id, entity, params).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(function = name, error = %e, "function call failed");
                format!("Error calling function '{}': {}", name, e)
            }
        }
    }

    /// 批处理配置必须同时声明输入与输出文件
    pub fn validate_config(&self, config: &ProcessorConfig) -> FlowResult<()> {
        if config.kind != ProcessorKind::Batch {
            return Ok(());
        }
        if config.input_local_fs().is_empty() {
            return Err(FlowError::ConfigParse {
                path: "input.local_fs".to_string(),
                reason: "batch config missing input.local_fs".to_string(),
            });
        }
        if config.output_local_fs().is_empty() {
            return Err(FlowError::ConfigParse {
                path: "output.local_fs".to_string(),
                reason: "batch config missing output.local_fs".to_string(),
            });
        }
        Ok(())
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }
}
