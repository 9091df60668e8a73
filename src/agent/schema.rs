//! 工具调用格式与响应 schema 校验
//!
//! 模型以 `{"tool": "...", "args": {...}}` 的 JSON 请求方法调用；该格式的 JSON Schema 由 schemars 生成并拼入
//! system prompt。响应 schema 只做结构校验（type / required / properties / items / enum），
//! 足以把具体错误反馈给模型重试。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 模型给出的方法调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolCall {
    /// 方法名，必须是 tools 中声明的函数之一
    pub tool: String,
    /// 方法参数
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCall);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 从文本中提取 JSON 块（```json ... ``` 或首个 `{` 到最后一个 `}`）
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析为方法调用；不是 JSON、缺少 tool 或 tool 为空时返回 None
pub fn parse_tool_call(text: &str) -> Option<ToolCall> {
    let call: ToolCall = serde_json::from_str(extract_json(text)?).ok()?;
    (!call.tool.is_empty()).then_some(call)
}

/// response_format 可以是 `{"type": "json_schema", "json_schema": {"schema": {...}}}`、
/// `{"schema": {...}}` 或 schema 本身
pub fn extract_schema(response_format: &Value) -> Option<&Value> {
    if let Some(schema) = response_format.pointer("/json_schema/schema") {
        return Some(schema);
    }
    if let Some(schema) = response_format.get("schema") {
        return Some(schema);
    }
    match response_format.get("type").and_then(Value::as_str) {
        Some("json_object") | Some("text") | None => None,
        Some(_) => Some(response_format),
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn validate_at(value: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) {
    let here = if path.is_empty() { "$" } else { path };

    match schema.get("type") {
        Some(Value::String(t)) if !type_matches(t, value) => {
            errors.push(format!("{}: expected {}", here, t));
            return;
        }
        Some(Value::Array(types))
            if !types
                .iter()
                .filter_map(Value::as_str)
                .any(|t| type_matches(t, value)) =>
        {
            errors.push(format!("{}: expected one of {}", here, Value::Array(types.clone())));
            return;
        }
        _ => {}
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            errors.push(format!("{}: value not in enum", here));
        }
    }

    if let Value::Object(obj) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(key) {
                    errors.push(format!("{}: missing required property '{}'", here, key));
                }
            }
        }
        if let Some(Value::Object(props)) = schema.get("properties") {
            for (key, sub) in props {
                if let Some(v) = obj.get(key) {
                    validate_at(v, sub, &format!("{}.{}", here, key), errors);
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(item, item_schema, &format!("{}[{}]", here, i), errors);
        }
    }
}

/// 校验文本响应是否满足 schema，返回全部错误（空表示通过）
pub fn validate_response(text: &str, schema: &Value) -> Vec<String> {
    let Some(json) = extract_json(text) else {
        return vec!["response does not contain a JSON object".to_string()];
    };
    match serde_json::from_str::<Value>(json) {
        Ok(value) => {
            let mut errors = Vec::new();
            validate_at(&value, schema, "", &mut errors);
            errors
        }
        Err(e) => vec![format!("invalid JSON: {}", e)],
    }
}
