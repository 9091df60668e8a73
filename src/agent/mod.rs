//! Agent 执行层：AgentExecutor 抽象与实现（LLM / Mock），以及批处理接口

pub mod llm_executor;
pub mod mock;
pub mod schema;
pub mod traits;

use std::sync::Arc;

pub use llm_executor::LlmAgentExecutor;
pub use mock::MockAgentExecutor;
pub use traits::{AgentExecutor, AgentRequest, BatchProcessor};

use crate::config::AppConfig;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};

/// 按 [llm] 段创建 LLM 客户端；provider 为 mock 或未设置 OPENAI_API_KEY 时使用 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_key = std::env::var("OPENAI_API_KEY").is_ok();

    if provider != "mock" && has_key {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            None,
            cfg.llm.request_timeout_secs,
        ))
    } else {
        tracing::warn!("No API key set or provider is mock, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

pub fn create_agent_executor_from_config(cfg: &AppConfig) -> Arc<dyn AgentExecutor> {
    let llm = create_llm_from_config(cfg);
    Arc::new(
        LlmAgentExecutor::new(llm, cfg.agent.max_tool_calls, cfg.agent.max_schema_attempts)
            .with_default_model(cfg.llm.model.clone()),
    )
}
