//! EntityService：在 EntityStore 之上的类型化访问
//!
//! 负责 serde 转换与实体版本号，并提供边消息 / 对话记忆 / 内容存储的常用读写。

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::traits::EntityStore;
use crate::core::consts::{model_name, UPDATE_TRANSITION_META_KEY};
use crate::core::FlowResult;
use crate::model::{AgenticFlowEntity, AiMessage, ChatMemory, EdgeMessagePayload};

#[derive(Clone)]
pub struct EntityService {
    store: Arc<dyn EntityStore>,
    version: String,
}

impl EntityService {
    pub fn new(store: Arc<dyn EntityStore>, version: impl Into<String>) -> Self {
        Self {
            store,
            version: version.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn add_item<T: Serialize + Sync>(&self, model: &str, item: &T) -> FlowResult<String> {
        let value = serde_json::to_value(item)?;
        self.store.add(model, &self.version, value, None).await
    }

    pub async fn get_item<T: DeserializeOwned>(&self, model: &str, id: &str) -> FlowResult<Option<T>> {
        match self.store.get(model, &self.version, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn update_item<T: Serialize + Sync>(
        &self,
        model: &str,
        id: &str,
        item: &T,
        meta: Option<Value>,
    ) -> FlowResult<String> {
        let value = serde_json::to_value(item)?;
        self.store.update(model, &self.version, id, value, meta).await
    }

    pub async fn get_transitions(&self, id: &str) -> FlowResult<Vec<String>> {
        self.store.get_transitions(id).await
    }

    pub async fn get_agentic(&self, id: &str) -> FlowResult<Option<AgenticFlowEntity>> {
        self.get_item(model_name::AGENTIC_FLOW_ENTITY, id).await
    }

    /// 持久化实体；transition 非空时通过 meta 触发迁移
    pub async fn update_agentic(
        &self,
        id: &str,
        entity: &AgenticFlowEntity,
        transition: Option<&str>,
    ) -> FlowResult<String> {
        let meta = transition.map(|t| json!({ UPDATE_TRANSITION_META_KEY: t }));
        self.update_item(model_name::AGENTIC_FLOW_ENTITY, id, entity, meta)
            .await
    }

    pub async fn add_edge_message(&self, payload: &EdgeMessagePayload) -> FlowResult<String> {
        self.add_item(model_name::FLOW_EDGE_MESSAGE, payload).await
    }

    pub async fn get_edge_message(&self, id: &str) -> FlowResult<Option<EdgeMessagePayload>> {
        self.get_item(model_name::FLOW_EDGE_MESSAGE, id).await
    }

    pub async fn add_ai_message(&self, message: &AiMessage) -> FlowResult<String> {
        self.add_item(model_name::AI_MEMORY_EDGE_MESSAGE, message).await
    }

    pub async fn get_ai_message(&self, id: &str) -> FlowResult<Option<AiMessage>> {
        self.get_item(model_name::AI_MEMORY_EDGE_MESSAGE, id).await
    }

    pub async fn get_memory(&self, id: &str) -> FlowResult<Option<ChatMemory>> {
        self.get_item(model_name::CHAT_MEMORY, id).await
    }

    pub async fn update_memory(&self, id: &str, memory: &ChatMemory) -> FlowResult<String> {
        self.update_item(model_name::CHAT_MEMORY, id, memory, None).await
    }

    /// 内容寻址存储：写入任意 JSON，返回引用 id
    pub async fn add_content(&self, content: &Value) -> FlowResult<String> {
        self.add_item(model_name::EDGE_MESSAGE_STORE, content).await
    }

    pub async fn get_content(&self, id: &str) -> FlowResult<Option<Value>> {
        self.get_item(model_name::EDGE_MESSAGE_STORE, id).await
    }
}
