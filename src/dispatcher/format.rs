//! 文本格式化：容错占位符替换与响应后处理

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

/// 用 values 替换 `{key}`；未知的 key 原样保留
pub fn safe_format(template: &str, values: &Map<String, Value>) -> String {
    let re = PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());
    re.replace_all(template, |caps: &regex::Captures<'_>| match values.get(&caps[1]) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => caps[0].to_string(),
    })
    .into_owned()
}

/// 递归按 key 排序
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// 解析为 JSON 并以 4 空格缩进、key 排序输出；不是合法 JSON 时返回 None
pub fn pretty_json(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    sort_keys(value).serialize(&mut ser).ok()?;
    String::from_utf8(buf).ok()
}

fn extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn fence_language(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "java" => "java",
        "html" => "html",
        "css" => "css",
        "json" => "json",
        "xml" => "xml",
        "sh" => "bash",
        "rb" => "ruby",
        "go" => "go",
        "php" => "php",
        _ => return None,
    })
}

/// 按文件扩展名包一层 Markdown 代码块
pub fn wrap_by_extension(filename: &str, response: &str) -> String {
    match fence_language(&extension(filename)) {
        Some(lang) => format!("```{}\n{}\n```", lang, response),
        None => format!("```\n{}\n```", response),
    }
}

/// 配置了 output.local_fs 时，以第一个文件决定格式：.json 先美化，再按扩展名包代码块
pub fn post_process_response(response: &str, output_files: &[String]) -> String {
    let Some(first) = output_files.first() else {
        return response.to_string();
    };
    let body = if extension(first) == "json" {
        pretty_json(response).unwrap_or_else(|| {
            tracing::warn!(file = %first, "response is not valid JSON, leaving as is");
            response.to_string()
        })
    } else {
        response.to_string()
    };
    wrap_by_extension(first, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_safe_format_keeps_unknown_keys() {
        let values = cache(json!({"name": "Ada", "n": 3}));
        assert_eq!(
            safe_format("Hi {name}, {n} items, {missing} {\"json\": 1}", &values),
            "Hi Ada, 3 items, {missing} {\"json\": 1}"
        );
    }

    #[test]
    fn test_pretty_json_sorts_and_indents() {
        let out = pretty_json(r#"{"b": 1, "a": {"d": 2, "c": 3}}"#).unwrap();
        assert_eq!(
            out,
            "{\n    \"a\": {\n        \"c\": 3,\n        \"d\": 2\n    },\n    \"b\": 1\n}"
        );
        assert!(pretty_json("not json").is_none());
    }

    #[test]
    fn test_post_process() {
        assert_eq!(post_process_response("x", &[]), "x");
        assert_eq!(
            post_process_response("print(1)", &["app.PY".to_string()]),
            "```python\nprint(1)\n```"
        );
        assert_eq!(
            post_process_response("{\"a\":1}", &["out.json".to_string()]),
            "```json\n{\n    \"a\": 1\n}\n```"
        );
        assert_eq!(
            post_process_response("raw", &["notes.txt".to_string()]),
            "```\nraw\n```"
        );
    }
}
