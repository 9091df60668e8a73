//! flowbee - 工作流编排内核
//!
//! 模块划分：
//! - **model**: 实体、边消息、对话记忆与处理器配置的数据模型
//! - **dispatcher**: 配置构建、方法注册、记忆管理、Agent 回合、事件处理与调度器门面
//! - **resolver**: 层级迁移解析（把外部答复应用到锁定实体树中的目标实体）
//! - **fsm**: 状态机定义与状态排序
//! - **store**: 外部存储 / 代码仓库 / 用户解析的抽象与本地实现
//! - **agent**: Agent 执行器抽象与实现（LLM / Mock）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **cli**: 离线命令行参数定义
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与共享常量
//! - **observability**: tracing 初始化

pub mod agent;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatcher;
pub mod fsm;
pub mod llm;
pub mod model;
pub mod observability;
pub mod resolver;
pub mod store;

pub use crate::core::{FlowError, FlowResult};
pub use dispatcher::{WorkflowDispatcher, WorkflowDispatcherBuilder};
pub use resolver::{Resolution, TransitionResolver};
