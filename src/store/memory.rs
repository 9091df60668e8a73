//! 内存实体存储
//!
//! 用于测试与离线运行。迁移不改变状态，只记录到 fired 日志中，便于断言「哪个实体被触发了什么迁移」。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::traits::EntityStore;
use crate::core::consts::{transition, UPDATE_TRANSITION_META_KEY};
use crate::core::{FlowError, FlowResult};

/// 未单独配置时每个实体可用的迁移
fn default_transitions() -> Vec<String> {
    vec![
        transition::PROCESS_USER_INPUT.to_string(),
        transition::MANUAL_APPROVE.to_string(),
        transition::ROLLBACK.to_string(),
        transition::UNLOCK_CHAT.to_string(),
    ]
}

#[derive(Default)]
pub struct InMemoryEntityStore {
    /// model -> (id -> entity)
    entities: RwLock<HashMap<String, HashMap<String, Value>>>,
    transitions: RwLock<HashMap<String, Vec<String>>>,
    unavailable: RwLock<HashSet<String>>,
    fired: RwLock<Vec<(String, String)>>,
    reads: RwLock<HashMap<String, usize>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 覆盖某个实体的可用迁移
    pub async fn set_transitions(&self, id: &str, transitions: &[&str]) {
        self.transitions.write().await.insert(
            id.to_string(),
            transitions.iter().map(|t| t.to_string()).collect(),
        );
    }

    /// 之后对该 id 的 get 一律返回存储错误
    pub async fn make_unavailable(&self, id: &str) {
        self.unavailable.write().await.insert(id.to_string());
    }

    /// 已触发的 (实体 id, 迁移名)，按触发顺序
    pub async fn fired_transitions(&self) -> Vec<(String, String)> {
        self.fired.read().await.clone()
    }

    /// 对该 id 的 get 调用次数（含失败）
    pub async fn read_count(&self, id: &str) -> usize {
        self.reads.read().await.get(id).copied().unwrap_or(0)
    }

    /// 以指定 id 写入实体，测试中用来搭建实体树
    pub async fn insert(&self, model: &str, id: &str, entity: Value) {
        self.entities
            .write()
            .await
            .entry(model.to_string())
            .or_default()
            .insert(id.to_string(), entity);
    }

    async fn record_transition(&self, id: &str, meta: Option<&Value>) {
        if let Some(name) = meta
            .and_then(|m| m.get(UPDATE_TRANSITION_META_KEY))
            .and_then(Value::as_str)
        {
            self.fired
                .write()
                .await
                .push((id.to_string(), name.to_string()));
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn add(
        &self,
        model: &str,
        _version: &str,
        entity: Value,
        meta: Option<Value>,
    ) -> FlowResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.insert(model, &id, entity).await;
        self.record_transition(&id, meta.as_ref()).await;
        Ok(id)
    }

    async fn get(&self, model: &str, _version: &str, id: &str) -> FlowResult<Option<Value>> {
        *self.reads.write().await.entry(id.to_string()).or_default() += 1;
        if self.unavailable.read().await.contains(id) {
            return Err(FlowError::Store(format!("entity {} unavailable", id)));
        }
        Ok(self
            .entities
            .read()
            .await
            .get(model)
            .and_then(|m| m.get(id))
            .cloned())
    }

    async fn update(
        &self,
        model: &str,
        _version: &str,
        id: &str,
        entity: Value,
        meta: Option<Value>,
    ) -> FlowResult<String> {
        self.insert(model, id, entity).await;
        self.record_transition(id, meta.as_ref()).await;
        Ok(id.to_string())
    }

    async fn query_by_condition(
        &self,
        model: &str,
        _version: &str,
        condition: &Map<String, Value>,
    ) -> FlowResult<Vec<Value>> {
        let guard = self.entities.read().await;
        let Some(items) = guard.get(model) else {
            return Ok(Vec::new());
        };
        Ok(items
            .values()
            .filter(|item| condition.iter().all(|(k, v)| item.get(k) == Some(v)))
            .cloned()
            .collect())
    }

    async fn get_transitions(&self, id: &str) -> FlowResult<Vec<String>> {
        Ok(self
            .transitions
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_else(default_transitions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_add_get_update() {
        let store = InMemoryEntityStore::new();
        let id = store.add("m", "1", json!({"a": 1}), None).await.unwrap();
        assert_eq!(store.get("m", "1", &id).await.unwrap(), Some(json!({"a": 1})));

        store
            .update("m", "1", &id, json!({"a": 2}), Some(json!({"update_transition": "go"})))
            .await
            .unwrap();
        assert_eq!(store.get("m", "1", &id).await.unwrap(), Some(json!({"a": 2})));
        assert_eq!(store.fired_transitions().await, vec![(id.clone(), "go".to_string())]);
        assert_eq!(store.read_count(&id).await, 2);
    }

    #[tokio::test]
    async fn test_query_and_unavailable() {
        let store = InMemoryEntityStore::new();
        store.insert("m", "x", json!({"kind": "a"})).await;
        store.insert("m", "y", json!({"kind": "b"})).await;

        let mut cond = Map::new();
        cond.insert("kind".to_string(), json!("b"));
        let found = store.query_by_condition("m", "1", &cond).await.unwrap();
        assert_eq!(found, vec![json!({"kind": "b"})]);

        store.make_unavailable("x").await;
        assert!(store.get("m", "1", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_transitions_default_and_override() {
        let store = InMemoryEntityStore::new();
        assert!(store
            .get_transitions("any")
            .await
            .unwrap()
            .contains(&"manual_approve".to_string()));
        store.set_transitions("e", &["retry"]).await;
        assert_eq!(store.get_transitions("e").await.unwrap(), vec!["retry"]);
    }
}
