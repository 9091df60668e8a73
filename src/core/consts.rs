//! 跨模块共享的常量：实体模型名、迁移名、固定回复文本

/// 外部存储中的实体模型名
pub mod model_name {
    pub const FLOW_EDGE_MESSAGE: &str = "flow_edge_message";
    pub const AI_MEMORY_EDGE_MESSAGE: &str = "ai_memory_edge_message";
    pub const EDGE_MESSAGE_STORE: &str = "edge_message_store";
    pub const CHAT_MEMORY: &str = "chat_memory";
    pub const AGENTIC_FLOW_ENTITY: &str = "agentic_flow_entity";
    pub const SCHEDULER_ENTITY: &str = "scheduler_entity";
}

/// 状态机迁移名
pub mod transition {
    pub const PROCESS_USER_INPUT: &str = "process_user_input";
    pub const MANUAL_RETRY: &str = "retry";
    pub const UNLOCK_CHAT: &str = "unlock_chat";
    pub const ROLLBACK: &str = "rollback";
    pub const MANUAL_APPROVE: &str = "manual_approve";
    pub const FAIL: &str = "fail";
}

/// 存储 update 的 meta 中携带目标迁移的键
pub const UPDATE_TRANSITION_META_KEY: &str = "update_transition";

/// 以此前缀开头的状态视为「已锁定」
pub const LOCKED_STATE_PREFIX: &str = "locked_chat";

/// workflow_cache 中的 git 分支键
pub const GIT_BRANCH_PARAM: &str = "git_branch";

/// workflow_cache 中的编程语言键（决定输出仓库）
pub const PROGRAMMING_LANGUAGE_PARAM: &str = "programming_language";

/// 用户「批准」时提交的固定答复
pub const APPROVE: &str = "I'm happy with the current result. Let's proceed to the next iteration. Please call set_additional_question_flag(False) to conclude this discussion.";

/// 迭代次数达到上限时 Agent 回合的短路回复
pub const NEXT_ITERATION_NOTICE: &str = "Let's proceed to the next iteration";

/// Agent 回合内部失败时返回的固定重试提示；实体不会被标记为 failed
pub const AGENT_RETRY_GUIDANCE: &str =
    "Sorry, something went wrong while I was working on this step. Please try again or rephrase your request.";

/// process() 失败时返回给调用方的通用文本（具体错误记录在实体上）
pub const STEP_FAILED_RESPONSE: &str = "returned empty response";

/// Agent 回合未产生任何文本时的回复
pub const NO_RESPONSE: &str = "No response generated";

/// ui 指令类回复的前缀，以及对应的边消息类型
pub const UI_FUNCTION_PREFIX: &str = "ui_function";
