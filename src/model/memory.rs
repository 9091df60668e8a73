//! 对话记忆
//!
//! ChatMemory 按标签保存消息引用列表；消息正文（AiMessage）单独存放在外部存储中。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::now_millis;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息正文
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiMessage {
    pub role: Role,
    pub content: String,
}

impl AiMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 记忆列表中的轻量引用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryRef {
    pub edge_message_id: String,
    #[serde(default)]
    pub last_modified: i64,
}

impl MemoryRef {
    pub fn new(edge_message_id: impl Into<String>) -> Self {
        Self {
            edge_message_id: edge_message_id.into(),
            last_modified: now_millis(),
        }
    }
}

/// 标签 -> 有序引用列表；一个回合内只追加不删除
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMemory {
    pub messages: BTreeMap<String, Vec<MemoryRef>>,
}

impl ChatMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, tag: &str, reference: MemoryRef) {
        self.messages.entry(tag.to_string()).or_default().push(reference);
    }

    /// 把同一个引用追加到每个标签
    pub fn append_to_all(&mut self, tags: &[String], reference: &MemoryRef) {
        for tag in tags {
            self.append(tag, reference.clone());
        }
    }

    pub fn refs(&self, tag: &str) -> &[MemoryRef] {
        self.messages.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, tag: &str) -> usize {
        self.refs(tag).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_to_all_keeps_sibling_tags() {
        let mut memory = ChatMemory::new();
        memory.append("a", MemoryRef::new("old"));
        let tags = vec!["a".to_string(), "b".to_string()];
        memory.append_to_all(&tags, &MemoryRef::new("new"));

        assert_eq!(memory.len("a"), 2);
        assert_eq!(memory.len("b"), 1);
        assert_eq!(memory.refs("a")[1].edge_message_id, "new");
        assert!(memory.refs("missing").is_empty());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(AiMessage::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
