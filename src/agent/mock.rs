//! Mock Agent 执行器（用于测试与离线运行）
//!
//! 依次返回预置回复，用完后回显最后一条 User 消息；可设置为总是失败。
//! 每次调用记录收到的消息，便于断言上下文组装顺序。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::traits::{AgentExecutor, AgentRequest};
use crate::core::{FlowError, FlowResult};
use crate::model::{AiMessage, Role};

#[derive(Debug, Default)]
pub struct MockAgentExecutor {
    replies: Mutex<VecDeque<String>>,
    failure: Option<String>,
    requests: Mutex<Vec<Vec<AiMessage>>>,
}

impl MockAgentExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// 每次调用都返回 AgentExecution 错误
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<Vec<AiMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AgentExecutor for MockAgentExecutor {
    async fn run(&self, request: AgentRequest<'_>) -> FlowResult<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.messages.clone());
        }
        if let Some(reason) = &self.failure {
            return Err(FlowError::AgentExecution(reason.clone()));
        }
        if let Some(reply) = self.replies.lock().ok().and_then(|mut r| r.pop_front()) {
            return Ok(reply);
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo: {}", last_user))
    }
}
