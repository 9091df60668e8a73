//! 工作流实体定义
//!
//! WorkflowEntity 是所有实体共有的部分；AgenticFlowEntity 在其上增加对话流、迭代计数、
//! 锁与父子关系；SchedulerEntity 等待一组实体后触发下一步。FlowEntity 是核心路由时区分的实体种类。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::consts::LOCKED_STATE_PREFIX;
use crate::core::now_millis;

/// 所有实体共有的字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowEntity {
    pub technical_id: Option<String>,
    pub current_state: String,
    pub current_transition: Option<String>,
    pub user_id: String,
    pub workflow_name: Option<String>,
    /// 步骤之间共享的键值包，也是占位符替换的数据源
    pub workflow_cache: Map<String, Value>,
    /// 名称 -> 外部存储中内容的引用 id
    pub edge_messages_store: BTreeMap<String, String>,
    pub failed: bool,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub last_modified: i64,
}

impl WorkflowEntity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            last_modified: now_millis(),
            ..Default::default()
        }
    }

    /// 刷新 last_modified；保证严格递增，同一毫秒内的多次修改也可区分
    pub fn touch(&mut self) {
        self.last_modified = now_millis().max(self.last_modified + 1);
    }

    /// failed 与 error 总是成对设置，并刷新 last_modified
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.failed = true;
        self.error = Some(error.into());
        self.touch();
    }

    /// workflow_cache 中的字符串值
    pub fn cache_str(&self, key: &str) -> Option<&str> {
        self.workflow_cache.get(key).and_then(Value::as_str)
    }
}

/// 边消息类型：用户答复、提问、通知、子实体列表、ui 指令，以及处理器类型本身
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMessageType {
    Answer,
    Question,
    Notification,
    ChildEntities,
    UiFunction,
    Function,
    Agent,
    Prompt,
    Batch,
    #[serde(other)]
    Other,
}

impl EdgeMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeMessageType::Answer => "answer",
            EdgeMessageType::Question => "question",
            EdgeMessageType::Notification => "notification",
            EdgeMessageType::ChildEntities => "child_entities",
            EdgeMessageType::UiFunction => "ui_function",
            EdgeMessageType::Function => "function",
            EdgeMessageType::Agent => "agent",
            EdgeMessageType::Prompt => "prompt",
            EdgeMessageType::Batch => "batch",
            EdgeMessageType::Other => "other",
        }
    }
}

fn default_consumed() -> bool {
    true
}

/// 对话流中的一条边消息；正文在外部存储中，这里只保留引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdgeMessage {
    #[serde(rename = "type")]
    pub kind: EdgeMessageType,
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub approve: bool,
    /// 只有 answer 会以 false 创建；从 false 变为 true 至多一次
    #[serde(default = "default_consumed")]
    pub consumed: bool,
    pub edge_message_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub last_modified: i64,
}

impl FlowEdgeMessage {
    /// 标记为已消费；返回本次调用是否真正发生了 false -> true
    pub fn mark_consumed(&mut self) -> bool {
        if self.consumed {
            return false;
        }
        self.consumed = true;
        true
    }
}

/// 外部存储中的边消息正文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeMessagePayload {
    #[serde(rename = "type")]
    pub kind: EdgeMessageType,
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub approve: bool,
    #[serde(default)]
    pub last_modified: i64,
}

impl EdgeMessagePayload {
    pub fn new(kind: EdgeMessageType, message: Value) -> Self {
        Self {
            kind,
            message,
            publish: false,
            approve: false,
            last_modified: now_millis(),
        }
    }

    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }

    pub fn with_approve(mut self, approve: bool) -> Self {
        self.approve = approve;
        self
    }

    /// 正文的文本形式：字符串原样返回，其它 JSON 序列化
    pub fn message_text(&self) -> String {
        match &self.message {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatFlow {
    pub current_flow: Vec<FlowEdgeMessage>,
    pub finished_flow: Vec<FlowEdgeMessage>,
}

/// 每个迁移的迭代计数与上限
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionsMemory {
    pub conditions: Map<String, Value>,
    pub current_iteration: BTreeMap<String, u32>,
    pub max_iteration: BTreeMap<String, u32>,
}

/// 对话型工作流实体
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgenticFlowEntity {
    #[serde(flatten)]
    pub base: WorkflowEntity,
    pub chat_id: String,
    pub memory_id: String,
    pub chat_flow: ChatFlow,
    pub transitions_memory: TransitionsMemory,
    pub locked: bool,
    pub name: String,
    pub description: String,
    pub parent_id: Option<String>,
    /// 按创建顺序排列
    pub child_entities: Vec<String>,
    pub scheduled_entities: Vec<String>,
}

impl AgenticFlowEntity {
    pub fn new(user_id: impl Into<String>, memory_id: impl Into<String>) -> Self {
        Self {
            base: WorkflowEntity::new(user_id),
            memory_id: memory_id.into(),
            ..Default::default()
        }
    }

    /// 锁标志或 locked_chat 前缀的状态都视为已锁定
    pub fn is_locked(&self) -> bool {
        self.locked || self.base.current_state.starts_with(LOCKED_STATE_PREFIX)
    }

    pub fn has_children(&self) -> bool {
        !self.child_entities.is_empty()
    }

    /// finished_flow 中最近的一条 answer
    pub fn latest_answer_mut(&mut self) -> Option<&mut FlowEdgeMessage> {
        self.chat_flow
            .finished_flow
            .iter_mut()
            .rev()
            .find(|m| m.kind == EdgeMessageType::Answer)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

fn default_scheduled_action() -> String {
    "schedule_entities_flow".to_string()
}

/// 等待一组实体完成后触发另一个实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerEntity {
    #[serde(flatten)]
    pub base: WorkflowEntity,
    #[serde(default)]
    pub awaited_entity_ids: Vec<String>,
    #[serde(default)]
    pub triggered_entity_id: String,
    #[serde(default = "default_scheduled_action")]
    pub scheduled_action: String,
    #[serde(default)]
    pub triggered_entity_next_transition: Option<String>,
    #[serde(default)]
    pub status: SchedulerStatus,
}

impl SchedulerEntity {
    pub fn new(user_id: impl Into<String>, triggered_entity_id: impl Into<String>) -> Self {
        Self {
            base: WorkflowEntity::new(user_id),
            awaited_entity_ids: Vec::new(),
            triggered_entity_id: triggered_entity_id.into(),
            scheduled_action: default_scheduled_action(),
            triggered_entity_next_transition: None,
            status: SchedulerStatus::Pending,
        }
    }
}

/// 核心路由区分的实体种类
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FlowEntity {
    Workflow(WorkflowEntity),
    Agentic(Box<AgenticFlowEntity>),
    Scheduler(SchedulerEntity),
}

impl FlowEntity {
    pub fn base(&self) -> &WorkflowEntity {
        match self {
            FlowEntity::Workflow(e) => e,
            FlowEntity::Agentic(e) => &e.base,
            FlowEntity::Scheduler(e) => &e.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut WorkflowEntity {
        match self {
            FlowEntity::Workflow(e) => e,
            FlowEntity::Agentic(e) => &mut e.base,
            FlowEntity::Scheduler(e) => &mut e.base,
        }
    }

    pub fn as_agentic(&self) -> Option<&AgenticFlowEntity> {
        match self {
            FlowEntity::Agentic(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_agentic_mut(&mut self) -> Option<&mut AgenticFlowEntity> {
        match self {
            FlowEntity::Agentic(e) => Some(e),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FlowEntity::Workflow(_) => "WorkflowEntity",
            FlowEntity::Agentic(_) => "AgenticFlowEntity",
            FlowEntity::Scheduler(_) => "SchedulerEntity",
        }
    }
}

impl From<WorkflowEntity> for FlowEntity {
    fn from(e: WorkflowEntity) -> Self {
        FlowEntity::Workflow(e)
    }
}

impl From<AgenticFlowEntity> for FlowEntity {
    fn from(e: AgenticFlowEntity) -> Self {
        FlowEntity::Agentic(Box::new(e))
    }
}

impl From<SchedulerEntity> for FlowEntity {
    fn from(e: SchedulerEntity) -> Self {
        FlowEntity::Scheduler(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_failed_pairs_fields_and_bumps_time() {
        let mut entity = WorkflowEntity::new("user1");
        let before = entity.last_modified;
        entity.mark_failed("boom");
        assert!(entity.failed);
        assert_eq!(entity.error.as_deref(), Some("boom"));
        assert!(entity.last_modified > before);
    }

    #[test]
    fn test_consumed_flips_once() {
        let mut msg = FlowEdgeMessage {
            kind: EdgeMessageType::Answer,
            publish: true,
            approve: false,
            consumed: false,
            edge_message_id: "m1".to_string(),
            user_id: "u".to_string(),
            last_modified: 0,
        };
        assert!(msg.mark_consumed());
        assert!(!msg.mark_consumed());
        assert!(msg.consumed);
    }

    #[test]
    fn test_locked_by_flag_or_state() {
        let mut entity = AgenticFlowEntity::new("u", "mem");
        assert!(!entity.is_locked());
        entity.base.current_state = "locked_chat_waiting".to_string();
        assert!(entity.is_locked());
        entity.base.current_state = "idle".to_string();
        entity.locked = true;
        assert!(entity.is_locked());
    }

    #[test]
    fn test_agentic_entity_flattened_json() {
        let json = serde_json::json!({
            "user_id": "u1",
            "current_state": "s1",
            "memory_id": "mem-1",
            "child_entities": ["c1", "c2"],
            "chat_flow": {"finished_flow": [{"type": "answer", "edge_message_id": "e1", "consumed": false}]}
        });
        let entity: AgenticFlowEntity = serde_json::from_value(json).unwrap();
        assert_eq!(entity.base.user_id, "u1");
        assert_eq!(entity.base.current_state, "s1");
        assert_eq!(entity.child_entities, vec!["c1", "c2"]);
        assert!(!entity.chat_flow.finished_flow[0].consumed);
    }

    #[test]
    fn test_edge_message_defaults_to_consumed() {
        let msg: FlowEdgeMessage =
            serde_json::from_value(serde_json::json!({"type": "question", "edge_message_id": "x"}))
                .unwrap();
        assert!(msg.consumed);
        assert_eq!(msg.kind, EdgeMessageType::Question);
    }
}
