//! 状态排序：从初始状态沿 `next` 深度优先，每个状态只访问一次，
//! 不可达的状态按原顺序追加在后面。只调整顺序，迁移内容不变。

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::WorkflowDefinition;
use crate::core::{FlowError, FlowResult};

/// 深度优先前序；`next` 给出某状态的后继（按声明顺序）
fn dfs_order<'a, I, F>(initial: &'a str, declared: I, next: F) -> Vec<&'a str>
where
    I: Iterator<Item = &'a str> + Clone,
    F: Fn(&'a str) -> Vec<&'a str>,
{
    let known: HashSet<&str> = declared.clone().collect();
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![initial];

    while let Some(state) = stack.pop() {
        if !known.contains(state) || !visited.insert(state) {
            continue;
        }
        order.push(state);
        stack.extend(next(state).into_iter().rev());
    }

    order.extend(declared.filter(|s| !visited.contains(s)));
    order
}

pub fn ordered_state_names(definition: &WorkflowDefinition) -> Vec<String> {
    dfs_order(
        &definition.initial_state,
        definition.states.keys().map(String::as_str),
        |s| definition.next_states(s),
    )
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn order_states(mut definition: WorkflowDefinition) -> WorkflowDefinition {
    let order = ordered_state_names(&definition);
    let mut states = IndexMap::with_capacity(definition.states.len());
    for name in order {
        if let Some(state) = definition.states.swap_remove(&name) {
            states.insert(name, state);
        }
    }
    definition.states = states;
    definition
}

/// 直接在 JSON 上排序，其余键与各状态内容原样保留
pub fn order_states_json(fsm: &Value) -> FlowResult<Value> {
    let initial = fsm
        .get("initialState")
        .and_then(Value::as_str)
        .ok_or_else(|| FlowError::Serialization("missing initialState".to_string()))?;
    let states = fsm
        .get("states")
        .and_then(Value::as_object)
        .ok_or_else(|| FlowError::Serialization("missing states object".to_string()))?;

    let order = dfs_order(initial, states.keys().map(String::as_str), |state| {
        states
            .get(state)
            .and_then(|s| s.get("transitions"))
            .and_then(Value::as_array)
            .map(|ts| {
                ts.iter()
                    .filter_map(|t| t.get("next").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    });

    let mut ordered = Map::new();
    for name in order {
        if let Some(state) = states.get(name) {
            ordered.insert(name.to_string(), state.clone());
        }
    }

    let mut out = fsm.clone();
    if let Some(obj) = out.as_object_mut() {
        obj.insert("states".to_string(), Value::Object(ordered));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "version": "1.0",
            "initialState": "A",
            "states": {
                "O": {"transitions": []},
                "C": {"transitions": []},
                "B": {"transitions": [{"name": "to_c", "next": "C", "manual": false}]},
                "A": {"transitions": [{"name": "to_b", "next": "B"}]}
            }
        })
    }

    #[test]
    fn test_order_typed() {
        let definition: WorkflowDefinition = serde_json::from_value(sample()).unwrap();
        let ordered = order_states(definition.clone());
        let names: Vec<_> = ordered.states.keys().cloned().collect();
        assert_eq!(names, vec!["A", "B", "C", "O"]);
        assert_eq!(ordered.initial_state, "A");
        assert_eq!(ordered.states["B"], definition.states["B"]);
        assert_eq!(ordered.extra["version"], json!("1.0"));
    }

    #[test]
    fn test_order_json_keeps_content() {
        let ordered = order_states_json(&sample()).unwrap();
        let names: Vec<_> = ordered["states"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(names, vec!["A", "B", "C", "O"]);
        assert_eq!(ordered["initialState"], json!("A"));
        assert_eq!(ordered["states"]["B"], sample()["states"]["B"]);
    }

    #[test]
    fn test_branching_and_cycles() {
        let fsm = json!({
            "initialState": "start",
            "states": {
                "x": {},
                "start": {"transitions": [{"next": "left"}, {"next": "right"}]},
                "right": {"transitions": [{"next": "start"}]},
                "left": {"transitions": [{"next": "deep"}, {"next": "missing"}]},
                "deep": {"transitions": [{"next": "right"}]}
            }
        });
        let ordered = order_states_json(&fsm).unwrap();
        let names: Vec<_> = ordered["states"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(names, vec!["start", "left", "deep", "right", "x"]);
    }

    #[test]
    fn test_missing_initial_state() {
        assert!(order_states_json(&json!({"states": {}})).is_err());
    }
}
