//! 迁移触发
//!
//! 查询实体当前可用的迁移，选出要触发的一个，然后带着 `update_transition` meta 持久化实体。

use async_trait::async_trait;

use crate::core::consts::transition;
use crate::core::FlowResult;
use crate::model::AgenticFlowEntity;
use crate::store::EntityService;

/// 从可用迁移中选择：请求的迁移不可用时返回 None；未请求时取第一个；
/// 请求 retry 且 rollback 可用时改为 rollback
pub fn select_transition<'a>(requested: Option<&'a str>, available: &'a [String]) -> Option<&'a str> {
    match requested {
        None => available.first().map(String::as_str),
        Some(t) if t == transition::MANUAL_RETRY
            && available.iter().any(|a| a == transition::ROLLBACK) =>
        {
            Some(transition::ROLLBACK)
        }
        Some(t) => available.iter().any(|a| a == t).then_some(t),
    }
}

/// 触发迁移；返回 false 表示没有可触发的迁移
#[async_trait]
pub trait TransitionTrigger: Send + Sync {
    async fn launch(
        &self,
        technical_id: &str,
        entity: &AgenticFlowEntity,
        requested: Option<&str>,
    ) -> FlowResult<bool>;
}

/// 通过 EntityStore 的 get_transitions / update 触发迁移
pub struct StoreTransitionTrigger {
    entities: EntityService,
}

impl StoreTransitionTrigger {
    pub fn new(entities: EntityService) -> Self {
        Self { entities }
    }
}

#[async_trait]
impl TransitionTrigger for StoreTransitionTrigger {
    async fn launch(
        &self,
        technical_id: &str,
        entity: &AgenticFlowEntity,
        requested: Option<&str>,
    ) -> FlowResult<bool> {
        let available = self.entities.get_transitions(technical_id).await?;
        if available.is_empty() {
            tracing::error!(technical_id, "no transitions available");
            return Ok(false);
        }
        let Some(selected) = select_transition(requested, &available) else {
            tracing::error!(technical_id, ?requested, ?available, "requested transition not available");
            return Ok(false);
        };
        self.entities
            .update_agentic(technical_id, entity, Some(selected))
            .await?;
        tracing::info!(technical_id, transition = selected, "transition launched");
        Ok(true)
    }
}
