//! 事件处理器
//!
//! `process(entity, processor_name, technical_id)` 把一个处理器作用在实体上，返回（实体，回复）。
//!
//! 路由规则：
//! - 名称不带 `<Type>.` 前缀：直接走方法注册表，不构建配置
//! - 配置构建失败：注册表中有同名方法时回退调用，否则 UnknownProcessor
//! - AgenticFlowEntity：按配置类型分派，随后写入边消息与输出（finalize）
//! - 其他实体：只支持 function 类型
//!
//! 任何一步出错都会把实体标记为 failed 并返回固定文本，调用方总能拿到（实体，回复）。

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use super::ai_agent_handler::AiAgentHandler;
use super::config_builder::ConfigBuilder;
use super::format::{post_process_response, safe_format};
use super::memory_manager::MemoryManager;
use super::method_registry::MethodRegistry;
use super::output::OutputWriter;
use crate::core::consts::{NO_RESPONSE, STEP_FAILED_RESPONSE, UI_FUNCTION_PREFIX};
use crate::core::{FlowError, FlowResult};
use crate::model::{
    AgenticFlowEntity, EdgeMessagePayload, EdgeMessageType, FlowEntity, ProcessorConfig,
    ProcessorKind, ProcessorName,
};
use crate::store::UserResolver;

const UNKNOWN_CONFIG_TYPE: &str = "Unknown config type";

fn edge_type_for(kind: ProcessorKind) -> EdgeMessageType {
    match kind {
        ProcessorKind::Function => EdgeMessageType::Function,
        ProcessorKind::Agent => EdgeMessageType::Agent,
        ProcessorKind::Prompt => EdgeMessageType::Prompt,
        ProcessorKind::Batch => EdgeMessageType::Batch,
        ProcessorKind::Notification => EdgeMessageType::Notification,
        ProcessorKind::Question => EdgeMessageType::Question,
        ProcessorKind::Unknown => EdgeMessageType::Other,
    }
}

/// `{"type": "ui_function", ...}` 形式的回复作为 ui 指令透传
fn parse_ui_directive(response: &str) -> Option<Value> {
    let prefix = format!("{{\"type\": \"{}\"", UI_FUNCTION_PREFIX);
    let trimmed = response.trim();
    if !trimmed.starts_with(&prefix) {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, "ui directive is not valid JSON, treating as text");
            None
        }
    }
}

fn function_params(config: &ProcessorConfig) -> Map<String, Value> {
    config
        .function
        .as_ref()
        .and_then(|f| f.parameters.as_object().cloned())
        .unwrap_or_default()
}

fn function_name(config: &ProcessorConfig) -> FlowResult<&str> {
    config
        .function
        .as_ref()
        .map(|f| f.name.as_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| FlowError::ConfigParse {
            path: "function.name".to_string(),
            reason: "function name not specified".to_string(),
        })
}

fn agentic(entity: &FlowEntity) -> FlowResult<&AgenticFlowEntity> {
    entity.as_agentic().ok_or_else(|| FlowError::UnsupportedForEntity {
        entity: entity.kind_name().to_string(),
        kind: "agentic".to_string(),
    })
}

fn agentic_mut(entity: &mut FlowEntity) -> FlowResult<&mut AgenticFlowEntity> {
    let kind = entity.kind_name();
    entity
        .as_agentic_mut()
        .ok_or_else(|| FlowError::UnsupportedForEntity {
            entity: kind.to_string(),
            kind: "agentic".to_string(),
        })
}

pub struct EventProcessor {
    registry: Arc<MethodRegistry>,
    config_builder: Arc<ConfigBuilder>,
    agent: Arc<AiAgentHandler>,
    memory: Arc<MemoryManager>,
    output: OutputWriter,
    users: Arc<dyn UserResolver>,
    /// 所有输出写入串行执行
    output_gate: Mutex<()>,
}

impl EventProcessor {
    pub fn new(
        registry: Arc<MethodRegistry>,
        config_builder: Arc<ConfigBuilder>,
        agent: Arc<AiAgentHandler>,
        memory: Arc<MemoryManager>,
        output: OutputWriter,
        users: Arc<dyn UserResolver>,
    ) -> Self {
        Self {
            registry,
            config_builder,
            agent,
            memory,
            output,
            users,
            output_gate: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    pub fn config_builder(&self) -> &Arc<ConfigBuilder> {
        &self.config_builder
    }

    pub async fn process(
        &self,
        mut entity: FlowEntity,
        processor_name: &str,
        technical_id: &str,
    ) -> (FlowEntity, String) {
        let response = match self
            .try_process(&mut entity, processor_name, technical_id)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    processor = processor_name,
                    technical_id,
                    error = %e,
                    "processing step failed"
                );
                entity.base_mut().mark_failed(format!("Error: {}", e));
                STEP_FAILED_RESPONSE.to_string()
            }
        };
        tracing::info!(processor = processor_name, technical_id, response = %response, "processed");
        entity.base_mut().touch();
        (entity, response)
    }

    async fn try_process(
        &self,
        entity: &mut FlowEntity,
        processor_name: &str,
        technical_id: &str,
    ) -> FlowResult<String> {
        let account = self.users.resolve_account(&entity.base().user_id).await?;
        entity.base_mut().user_id = account;

        if !ProcessorName::has_known_prefix(processor_name) {
            tracing::debug!(processor = processor_name, "no processor prefix, direct dispatch");
            return self
                .registry
                .dispatch(processor_name, technical_id, entity, Map::new())
                .await;
        }

        let config = match self.config_builder.build(processor_name).await {
            Ok(config) => config,
            Err(e) => {
                let bare = processor_name
                    .split_once('.')
                    .map(|(_, key)| key)
                    .unwrap_or(processor_name);
                if !self.registry.has(bare) {
                    tracing::warn!(processor = processor_name, error = %e, "config build failed");
                    return Err(FlowError::UnknownProcessor(bare.to_string()));
                }
                tracing::warn!(
                    processor = processor_name,
                    error = %e,
                    "config build failed, falling back to method '{}'",
                    bare
                );
                return self
                    .registry
                    .dispatch(bare, technical_id, entity, Map::new())
                    .await;
            }
        };

        tracing::info!(
            processor = processor_name,
            technical_id,
            kind = config.kind.as_str(),
            entity = entity.kind_name(),
            "routing processor"
        );
        if entity.as_agentic().is_some() {
            self.handle_agentic(config, entity, technical_id).await
        } else {
            self.handle_workflow_entity(&config, entity, technical_id)
                .await
        }
    }

    async fn handle_workflow_entity(
        &self,
        config: &ProcessorConfig,
        entity: &mut FlowEntity,
        technical_id: &str,
    ) -> FlowResult<String> {
        if config.kind != ProcessorKind::Function {
            return Err(FlowError::UnsupportedForEntity {
                entity: entity.kind_name().to_string(),
                kind: config.kind.as_str().to_string(),
            });
        }
        let name = function_name(config)?;
        self.registry
            .dispatch(name, technical_id, entity, function_params(config))
            .await
    }

    /// 显式给出空列表时不写记忆；未配置时使用通用标签
    fn memory_tags(&self, config: &ProcessorConfig) -> Option<Vec<String>> {
        match &config.memory_tags {
            Some(tags) if tags.is_empty() => None,
            Some(tags) => Some(tags.clone()),
            None => Some(vec![self.memory.general_tag().to_string()]),
        }
    }

    async fn handle_agentic(
        &self,
        mut config: ProcessorConfig,
        entity: &mut FlowEntity,
        technical_id: &str,
    ) -> FlowResult<String> {
        let children_before = agentic(entity)?.child_entities.len();

        let response = match config.kind {
            ProcessorKind::Notification | ProcessorKind::Question => {
                let text = safe_format(
                    config.message_text().unwrap_or_default(),
                    &entity.base().workflow_cache,
                );
                config.set_message_text(text.clone());
                if let Some(tags) = self.memory_tags(&config) {
                    self.memory
                        .append_to_memory(agentic(entity)?, &text, &tags)
                        .await?;
                }
                text
            }
            ProcessorKind::Function => {
                let name = function_name(&config)?.to_string();
                let response = self
                    .agent
                    .handle_function_calling(&name, function_params(&config), entity, technical_id)
                    .await;
                if !response.is_empty() {
                    if let Some(tags) = self.memory_tags(&config) {
                        self.memory
                            .append_to_memory(agentic(entity)?, &response, &tags)
                            .await?;
                    }
                }
                response
            }
            ProcessorKind::Agent | ProcessorKind::Prompt | ProcessorKind::Batch => {
                let memory_id = agentic(entity)?.memory_id.clone();
                let mut memory = self.memory.get_memory(&memory_id).await?;
                let response = self
                    .agent
                    .run(&config, entity, &mut memory, technical_id)
                    .await;
                self.memory.update_memory(&memory_id, &memory).await?;
                response
            }
            ProcessorKind::Unknown => {
                tracing::warn!(technical_id, "unknown config type");
                UNKNOWN_CONFIG_TYPE.to_string()
            }
        };

        let entity = agentic_mut(entity)?;
        let new_children = entity
            .child_entities
            .get(children_before..)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        self.finalize(&config, entity, &response, &new_children, technical_id)
            .await?;

        if response.is_empty() {
            Ok(NO_RESPONSE.to_string())
        } else {
            Ok(response)
        }
    }

    /// 边消息顺序固定：已解析配置 → 回复 → 新子实体
    async fn finalize(
        &self,
        config: &ProcessorConfig,
        entity: &mut AgenticFlowEntity,
        response: &str,
        new_children: &[String],
        technical_id: &str,
    ) -> FlowResult<()> {
        let user_id = entity.base.user_id.clone();
        let publish = config.publish.unwrap_or(false);
        let approve = config.approve.unwrap_or(false);

        let resolved = EdgeMessagePayload::new(edge_type_for(config.kind), config.type_payload())
            .with_publish(publish)
            .with_approve(approve);
        self.memory
            .add_edge_message(&resolved, &mut entity.chat_flow.finished_flow, &user_id)
            .await?;

        let produces_response = matches!(
            config.kind,
            ProcessorKind::Function | ProcessorKind::Agent | ProcessorKind::Prompt
        );
        if produces_response && !response.is_empty() && response != "None" {
            let payload = match parse_ui_directive(response) {
                Some(directive) => EdgeMessagePayload::new(EdgeMessageType::UiFunction, directive),
                None => EdgeMessagePayload::new(
                    EdgeMessageType::Question,
                    Value::String(post_process_response(response, config.output_local_fs())),
                ),
            }
            .with_publish(publish)
            .with_approve(approve);
            self.memory
                .add_edge_message(&payload, &mut entity.chat_flow.finished_flow, &user_id)
                .await?;

            if let Some(output) = config.output.as_ref().filter(|o| !o.is_empty()) {
                let _gate = self.output_gate.lock().await;
                self.output
                    .write(&mut entity.base, output, response, technical_id)
                    .await?;
            }
        }

        if !new_children.is_empty() {
            tracing::info!(technical_id, children = ?new_children, "child entities spawned");
            let payload = EdgeMessagePayload::new(EdgeMessageType::ChildEntities, json!(new_children));
            self.memory
                .add_edge_message(&payload, &mut entity.chat_flow.finished_flow, &user_id)
                .await?;
        }
        Ok(())
    }
}
