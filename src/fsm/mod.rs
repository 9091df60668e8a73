//! 状态机定义
//!
//! 与外部工作流 JSON 对应：`initialState` + 按声明顺序保存的 `states`，
//! 每个状态有一组带 `next` 的迁移。未建模的键通过 `extra` 原样保留。

mod ordering;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use ordering::{order_states, order_states_json, ordered_state_names};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(rename = "initialState")]
    pub initial_state: String,
    #[serde(default)]
    pub states: IndexMap<String, StateDefinition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowDefinition {
    /// 目标状态，按迁移声明顺序
    pub fn next_states(&self, state: &str) -> Vec<&str> {
        self.states
            .get(state)
            .map(|s| s.transitions.iter().filter_map(|t| t.next.as_deref()).collect())
            .unwrap_or_default()
    }
}
