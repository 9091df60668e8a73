//! 数据模型：实体、边消息、对话记忆与处理器配置

pub mod entity;
pub mod memory;
pub mod processor;

pub use entity::{
    AgenticFlowEntity, ChatFlow, EdgeMessagePayload, EdgeMessageType, FlowEdgeMessage,
    FlowEntity, SchedulerEntity, SchedulerStatus, TransitionsMemory, WorkflowEntity,
};
pub use memory::{AiMessage, ChatMemory, MemoryRef, Role};
pub use processor::{
    ConfigMessage, FunctionSpec, InputSpec, ModelConfig, OutputSpec, ProcessorConfig,
    ProcessorKind, ProcessorName, ProcessorType,
};
