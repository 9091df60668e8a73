//! 对话记忆管理
//!
//! 所有写入都是「整体读取 - 修改 - 整体写回」，没有乐观锁：同一 memory_id 上的并发回合
//! 可能互相覆盖，由上层保证同一实体的回合串行执行。

use serde_json::Value;

use crate::core::{FlowError, FlowResult};
use crate::model::{
    AgenticFlowEntity, AiMessage, ChatMemory, EdgeMessagePayload, FlowEdgeMessage, MemoryRef,
};
use crate::store::EntityService;

pub struct MemoryManager {
    entities: EntityService,
    general_tag: String,
}

impl MemoryManager {
    pub fn new(entities: EntityService, general_tag: impl Into<String>) -> Self {
        Self {
            entities,
            general_tag: general_tag.into(),
        }
    }

    pub fn general_tag(&self) -> &str {
        &self.general_tag
    }

    /// 空标签列表回退为通用标签
    pub fn tags_or_general(&self, tags: &[String]) -> Vec<String> {
        if tags.is_empty() {
            vec![self.general_tag.clone()]
        } else {
            tags.to_vec()
        }
    }

    pub async fn get_memory(&self, memory_id: &str) -> FlowResult<ChatMemory> {
        self.entities
            .get_memory(memory_id)
            .await?
            .ok_or_else(|| FlowError::Store(format!("chat memory {} not found", memory_id)))
    }

    pub async fn update_memory(&self, memory_id: &str, memory: &ChatMemory) -> FlowResult<()> {
        self.entities.update_memory(memory_id, memory).await?;
        Ok(())
    }

    /// 保存消息正文，返回引用 id
    pub async fn store_message(&self, message: &AiMessage) -> FlowResult<String> {
        self.entities.add_ai_message(message).await
    }

    /// 先保存正文拿到引用，再追加到每个标签，最后整体写回
    pub async fn append_to_memory(
        &self,
        entity: &AgenticFlowEntity,
        content: &str,
        tags: &[String],
    ) -> FlowResult<()> {
        let reference = MemoryRef::new(self.store_message(&AiMessage::assistant(content)).await?);
        let mut memory = self.get_memory(&entity.memory_id).await?;
        memory.append_to_all(&self.tags_or_general(tags), &reference);
        self.update_memory(&entity.memory_id, &memory).await
    }

    /// 把助手回复追加到内存中的 memory（由调用方负责写回）
    pub async fn store_ai_response(
        &self,
        response: &str,
        memory: &mut ChatMemory,
        tags: &[String],
    ) -> FlowResult<()> {
        let reference = MemoryRef::new(self.store_message(&AiMessage::assistant(response)).await?);
        memory.append_to_all(&self.tags_or_general(tags), &reference);
        Ok(())
    }

    /// 按标签顺序解引用全部历史消息；已丢失的引用跳过
    pub async fn get_ai_memory_messages(
        &self,
        memory: &ChatMemory,
        tags: &[String],
    ) -> FlowResult<Vec<AiMessage>> {
        let mut messages = Vec::new();
        for tag in self.tags_or_general(tags) {
            for reference in memory.refs(&tag) {
                match self.entities.get_ai_message(&reference.edge_message_id).await? {
                    Some(message) => messages.push(message),
                    None => tracing::warn!(
                        tag = %tag,
                        edge_message_id = %reference.edge_message_id,
                        "memory reference points to missing message"
                    ),
                }
            }
        }
        Ok(messages)
    }

    /// 保存边消息正文并把引用追加到 flow
    pub async fn add_edge_message(
        &self,
        payload: &EdgeMessagePayload,
        flow: &mut Vec<FlowEdgeMessage>,
        user_id: &str,
    ) -> FlowResult<FlowEdgeMessage> {
        let edge_message_id = self.entities.add_edge_message(payload).await?;
        let message = FlowEdgeMessage {
            kind: payload.kind,
            publish: payload.publish,
            approve: payload.approve,
            consumed: true,
            edge_message_id,
            user_id: user_id.to_string(),
            last_modified: payload.last_modified,
        };
        flow.push(message.clone());
        Ok(message)
    }

    /// 边消息正文（answer 的文本等）
    pub async fn edge_message_content(&self, edge_message_id: &str) -> FlowResult<Value> {
        self.entities
            .get_edge_message(edge_message_id)
            .await?
            .map(|p| p.message)
            .ok_or_else(|| FlowError::Store(format!("edge message {} not found", edge_message_id)))
    }

    pub fn entities(&self) -> &EntityService {
        &self.entities
    }
}
