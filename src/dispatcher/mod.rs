//! 工作流调度：配置构建、方法注册、记忆管理、Agent 回合、事件处理与迁移触发

pub mod ai_agent_handler;
pub mod config_builder;
pub mod config_source;
pub mod event_processor;
pub mod format;
pub mod memory_manager;
pub mod method_registry;
pub mod output;
pub mod transition;
pub mod workflow_dispatcher;

pub use ai_agent_handler::{iteration_exhausted, AiAgentHandler};
pub use config_builder::ConfigBuilder;
pub use config_source::{ConfigSource, DirConfigSource};
pub use event_processor::EventProcessor;
pub use format::{post_process_response, pretty_json, safe_format};
pub use memory_manager::MemoryManager;
pub use method_registry::{MethodProvider, MethodRegistry, WorkflowMethod};
pub use output::{branch_name, OutputWriter, RepositoryNames};
pub use transition::{select_transition, StoreTransitionTrigger, TransitionTrigger};
pub use workflow_dispatcher::{ComponentStatus, WorkflowDispatcher, WorkflowDispatcherBuilder};
