//! 层级迁移解析
//!
//! 把一条外部答复（或批准）应用到实体树中正确的那个实体上。父实体启动子流程后会锁定自己，
//! 答复应当落到最近创建的、未锁定的后代上：
//!
//! - 实体未锁定：直接应用
//! - 实体锁定且有子实体：按创建顺序倒序检查子实体；锁定且有子实体的递归进入，未锁定的直接应用，
//!   第一个成功即停止
//! - 没有子实体可以应用：根实体解锁后应用到根上；非根返回 Unresolved，由上一层继续
//!
//! 每条答复恰好修改一个实体。

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::json;

use crate::core::consts::{transition, APPROVE};
use crate::core::{FlowError, FlowResult};
use crate::dispatcher::TransitionTrigger;
use crate::model::{AgenticFlowEntity, EdgeMessagePayload, EdgeMessageType, FlowEdgeMessage};
use crate::store::EntityService;

/// 一次解析的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// 存储的答复边消息 id
    pub edge_message_id: String,
    /// 是否成功触发了迁移
    pub transitioned: bool,
    /// 接收答复的实体
    pub target_id: String,
}

/// 子树遍历的结果
#[derive(Debug, Clone, PartialEq, Eq)]
enum Traversal {
    /// 答复已追加并触发了迁移
    Transitioned(String),
    /// 答复已追加但迁移未能触发
    Stalled(String),
    /// 子树中没有可应用的实体
    Unresolved,
}

/// 一次答复在整棵树遍历期间共享的数据
struct Answer<'a> {
    text: &'a str,
    edge_message_id: String,
    last_modified: i64,
    user_id: String,
    transition: Option<&'a str>,
}

pub struct TransitionResolver {
    entities: EntityService,
    trigger: Arc<dyn TransitionTrigger>,
    max_fetch_retries: u32,
}

impl TransitionResolver {
    pub fn new(
        entities: EntityService,
        trigger: Arc<dyn TransitionTrigger>,
        max_fetch_retries: u32,
    ) -> Self {
        Self {
            entities,
            trigger,
            max_fetch_retries: max_fetch_retries.max(1),
        }
    }

    /// 存储答复并应用到 root_id 所在树中的目标实体
    pub async fn apply_answer(
        &self,
        root_id: &str,
        answer: &str,
        requested: Option<&str>,
    ) -> FlowResult<Resolution> {
        let root = self
            .entities
            .get_agentic(root_id)
            .await?
            .ok_or_else(|| FlowError::TransitionResolution(format!("entity {} not found", root_id)))?;

        let payload = EdgeMessagePayload::new(EdgeMessageType::Answer, json!(answer)).with_publish(true);
        let edge_message_id = self.entities.add_edge_message(&payload).await?;
        let answer = Answer {
            text: answer,
            edge_message_id,
            last_modified: payload.last_modified,
            user_id: root.base.user_id.clone(),
            transition: requested,
        };

        let mut visited = HashSet::new();
        let outcome = self
            .traverse(root, root_id.to_string(), true, &answer, &mut visited)
            .await?;

        let (transitioned, target_id) = match outcome {
            Traversal::Transitioned(id) => (true, id),
            Traversal::Stalled(id) => (false, id),
            Traversal::Unresolved => {
                return Err(FlowError::TransitionResolution(format!(
                    "no entity accepted the answer under {}",
                    root_id
                )))
            }
        };
        tracing::info!(root_id, target_id = %target_id, transitioned, "answer applied");
        Ok(Resolution {
            edge_message_id: answer.edge_message_id,
            transitioned,
            target_id,
        })
    }

    fn traverse<'a>(
        &'a self,
        mut entity: AgenticFlowEntity,
        id: String,
        is_root: bool,
        answer: &'a Answer<'a>,
        visited: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, FlowResult<Traversal>> {
        async move {
            if !visited.insert(id.clone()) {
                tracing::warn!(entity_id = %id, "entity already visited, skipping");
                return Ok(Traversal::Unresolved);
            }

            if !entity.is_locked() {
                return self.apply(entity, &id, answer).await;
            }

            if !entity.has_children() {
                tracing::info!(entity_id = %id, "locked entity without children, unlocking");
                self.unlock(&mut entity, &id).await?;
                return self.apply(entity, &id, answer).await;
            }

            let children = entity.child_entities.clone();
            tracing::debug!(entity_id = %id, children = children.len(), "traversing locked entity");
            for child_id in children.iter().rev() {
                let Some(child) = self.fetch_child(child_id).await else {
                    tracing::warn!(child_id = %child_id, "skipping child that could not be loaded");
                    continue;
                };

                if !child.is_locked() {
                    tracing::info!(child_id = %child_id, state = %child.base.current_state, "found unlocked child");
                    return self.apply(child, child_id, answer).await;
                }

                if child.has_children() {
                    match self
                        .traverse(child, child_id.clone(), false, answer, visited)
                        .await?
                    {
                        Traversal::Unresolved => continue,
                        outcome => return Ok(outcome),
                    }
                }
                tracing::debug!(child_id = %child_id, "locked child without children, skipping");
            }

            if is_root {
                tracing::info!(entity_id = %id, "no unlocked descendants, unlocking root");
                self.unlock(&mut entity, &id).await?;
                return self.apply(entity, &id, answer).await;
            }
            tracing::debug!(entity_id = %id, "intermediate locked entity, nothing applied");
            Ok(Traversal::Unresolved)
        }
        .boxed()
    }

    /// 带重试读取子实体；读取失败、不存在或没有 current_state 的视为无效
    async fn fetch_child(&self, id: &str) -> Option<AgenticFlowEntity> {
        for attempt in 1..=self.max_fetch_retries {
            match self.entities.get_agentic(id).await {
                Ok(Some(child)) if !child.base.current_state.is_empty() => return Some(child),
                Ok(_) => {
                    tracing::warn!(child_id = id, attempt, "child entity missing or without state")
                }
                Err(e) => tracing::warn!(child_id = id, attempt, error = %e, "failed to load child entity"),
            }
        }
        None
    }

    async fn unlock(&self, entity: &mut AgenticFlowEntity, id: &str) -> FlowResult<()> {
        entity.locked = false;
        if !self
            .trigger
            .launch(id, entity, Some(transition::UNLOCK_CHAT))
            .await?
        {
            tracing::warn!(entity_id = id, "unlock transition not available");
        }
        Ok(())
    }

    /// 追加答复、执行批准钩子、触发迁移；迁移失败时只重试触发
    async fn apply(
        &self,
        mut entity: AgenticFlowEntity,
        id: &str,
        answer: &Answer<'_>,
    ) -> FlowResult<Traversal> {
        entity.chat_flow.finished_flow.push(FlowEdgeMessage {
            kind: EdgeMessageType::Answer,
            publish: true,
            approve: false,
            consumed: answer.transition == Some(transition::MANUAL_APPROVE),
            edge_message_id: answer.edge_message_id.clone(),
            user_id: answer.user_id.clone(),
            last_modified: answer.last_modified,
        });
        if answer.text == APPROVE {
            exhaust_iterations(&mut entity);
        }

        for attempt in 1..=self.max_fetch_retries {
            if self.trigger.launch(id, &entity, answer.transition).await? {
                return Ok(Traversal::Transitioned(id.to_string()));
            }
            tracing::warn!(entity_id = id, attempt, "transition launch failed");
        }
        // 答复仍需落盘
        self.entities.update_agentic(id, &entity, None).await?;
        Ok(Traversal::Stalled(id.to_string()))
    }
}

/// 批准后当前迁移的计数设为上限加一，下一次 Agent 回合直接跳过
fn exhaust_iterations(entity: &mut AgenticFlowEntity) {
    let key = entity.base.current_transition.clone().unwrap_or_default();
    let memory = &mut entity.transitions_memory;
    let exhausted = memory
        .max_iteration
        .get(&key)
        .map(|cap| cap.saturating_add(1))
        .unwrap_or(u32::MAX);
    memory.current_iteration.insert(key, exhausted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::consts::model_name;
    use crate::dispatcher::{iteration_exhausted, StoreTransitionTrigger};
    use crate::store::{EntityStore, InMemoryEntityStore};

    fn entity(state: &str, locked: bool, children: &[&str]) -> AgenticFlowEntity {
        let mut e = AgenticFlowEntity::new("u1", "mem");
        e.base.current_state = state.to_string();
        e.locked = locked;
        e.child_entities = children.iter().map(|c| c.to_string()).collect();
        e
    }

    async fn setup(tree: &[(&str, AgenticFlowEntity)]) -> (TransitionResolver, Arc<InMemoryEntityStore>) {
        let store = Arc::new(InMemoryEntityStore::new());
        for (id, e) in tree {
            store
                .insert(model_name::AGENTIC_FLOW_ENTITY, id, serde_json::to_value(e).unwrap())
                .await;
        }
        let service = EntityService::new(store.clone(), "1");
        let resolver = TransitionResolver::new(
            service.clone(),
            Arc::new(StoreTransitionTrigger::new(service)),
            3,
        );
        (resolver, store)
    }

    #[tokio::test]
    async fn test_unlocked_root_applied_directly() {
        let (resolver, store) = setup(&[("r", entity("idle", false, &[]))]).await;
        let out = resolver.apply_answer("r", "hi", None).await.unwrap();
        assert!(out.transitioned);
        assert_eq!(out.target_id, "r");
        assert_eq!(
            store.fired_transitions().await,
            vec![("r".to_string(), "process_user_input".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cycle_does_not_loop() {
        let (resolver, store) = setup(&[
            ("r", entity("locked_chat", true, &["a"])),
            ("a", entity("locked_chat", true, &["r"])),
        ])
        .await;
        let out = resolver.apply_answer("r", "hi", None).await.unwrap();
        assert_eq!(out.target_id, "r");
        let fired = store.fired_transitions().await;
        assert_eq!(fired[0], ("r".to_string(), "unlock_chat".to_string()));
    }

    #[tokio::test]
    async fn test_requested_transition_unavailable_stalls() {
        let (resolver, store) = setup(&[("r", entity("idle", false, &[]))]).await;
        let out = resolver.apply_answer("r", "hi", Some("fail")).await.unwrap();
        assert!(!out.transitioned);

        let saved: AgenticFlowEntity = serde_json::from_value(
            store.get(model_name::AGENTIC_FLOW_ENTITY, "1", "r").await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(saved.chat_flow.finished_flow.len(), 1);
        assert!(store.fired_transitions().await.is_empty());
    }

    #[tokio::test]
    async fn test_approve_exhausts_iterations() {
        let mut root = entity("idle", false, &[]);
        root.base.current_transition = Some("T".to_string());
        root.transitions_memory.max_iteration.insert("T".to_string(), 2);
        root.transitions_memory.current_iteration.insert("T".to_string(), 1);
        let (resolver, store) = setup(&[("r", root)]).await;

        let out = resolver
            .apply_answer("r", APPROVE, Some(transition::MANUAL_APPROVE))
            .await
            .unwrap();
        assert!(out.transitioned);

        let mut saved: AgenticFlowEntity = serde_json::from_value(
            store.get(model_name::AGENTIC_FLOW_ENTITY, "1", "r").await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(saved.transitions_memory.current_iteration["T"], 3);
        assert!(saved.chat_flow.finished_flow[0].consumed);
        assert!(iteration_exhausted(Some(2), &mut saved));
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let (resolver, _store) = setup(&[]).await;
        assert!(matches!(
            resolver.apply_answer("nope", "hi", None).await,
            Err(FlowError::TransitionResolution(_))
        ));
    }
}
