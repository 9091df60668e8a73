//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient；模型名与采样参数随每次请求传入，
//! 因为不同处理器配置可以使用不同的模型。

use async_trait::async_trait;

use crate::model::{AiMessage, ModelConfig};

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首条回复文本
    async fn complete(&self, messages: &[AiMessage], model: &ModelConfig) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
