//! 工作流调度器门面：组装各组件并提供统一入口
//!
//! 所有外部协作者都可替换；未显式提供时按 AppConfig 使用本地实现
//! （内存实体存储、本地文件仓库、目录配置源、按 [llm] 段创建的 Agent 执行器）。

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use super::ai_agent_handler::AiAgentHandler;
use super::config_builder::ConfigBuilder;
use super::config_source::{ConfigSource, DirConfigSource};
use super::event_processor::EventProcessor;
use super::memory_manager::MemoryManager;
use super::method_registry::{MethodProvider, MethodRegistry};
use super::output::{OutputWriter, RepositoryNames};
use super::transition::StoreTransitionTrigger;
use crate::agent::{create_agent_executor_from_config, AgentExecutor, BatchProcessor};
use crate::config::AppConfig;
use crate::core::{FlowError, FlowResult};
use crate::model::{FlowEntity, ProcessorConfig, ProcessorKind};
use crate::resolver::TransitionResolver;
use crate::store::{
    EntityService, EntityStore, InMemoryEntityStore, LocalRepository, PassthroughUserResolver,
    Repository, UserResolver,
};

/// 各组件的状态摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentStatus {
    pub methods_count: usize,
    pub config_cache_size: u64,
    pub batch_processor: bool,
    pub general_memory_tag: String,
    pub entity_version: String,
}

pub struct WorkflowDispatcher {
    config: AppConfig,
    registry: Arc<MethodRegistry>,
    config_builder: Arc<ConfigBuilder>,
    memory: Arc<MemoryManager>,
    agent: Arc<AiAgentHandler>,
    processor: EventProcessor,
    entities: EntityService,
    has_batch: bool,
}

impl WorkflowDispatcher {
    pub fn builder(config: AppConfig) -> WorkflowDispatcherBuilder {
        WorkflowDispatcherBuilder::new(config)
    }

    /// 把处理器作用在实体上；从不返回错误，失败记录在实体上
    pub async fn process_event(
        &self,
        entity: FlowEntity,
        processor_name: &str,
        technical_id: &str,
    ) -> (FlowEntity, String) {
        self.processor
            .process(entity, processor_name, technical_id)
            .await
    }

    /// 直接调用注册方法
    pub async fn dispatch_function(
        &self,
        name: &str,
        technical_id: &str,
        entity: &mut FlowEntity,
        params: Map<String, Value>,
    ) -> FlowResult<String> {
        self.registry
            .dispatch(name, technical_id, entity, params)
            .await
    }

    pub fn available_methods(&self) -> Vec<String> {
        self.registry.list()
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.registry.has(name)
    }

    /// 校验处理器配置：AI 类交给 AiAgentHandler，function 类要求方法已注册
    pub fn validate_configuration(&self, config: &ProcessorConfig) -> FlowResult<()> {
        if config.kind.is_ai() {
            config.model.validate()?;
            return self.agent.validate_config(config);
        }
        if config.kind == ProcessorKind::Function {
            let name = config
                .function
                .as_ref()
                .map(|f| f.name.as_str())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| FlowError::ConfigParse {
                    path: "function.name".to_string(),
                    reason: "Function name is required".to_string(),
                })?;
            if !self.registry.has(name) {
                return Err(FlowError::UnknownMethod {
                    name: name.to_string(),
                    available: self.registry.list(),
                });
            }
        }
        Ok(())
    }

    pub async fn component_status(&self) -> ComponentStatus {
        ComponentStatus {
            methods_count: self.registry.len(),
            config_cache_size: self.config_builder.cache_size().await,
            batch_processor: self.has_batch,
            general_memory_tag: self.memory.general_tag().to_string(),
            entity_version: self.entities.version().to_string(),
        }
    }

    /// 与调度器共享实体存储的迁移解析器
    pub fn transition_resolver(&self) -> TransitionResolver {
        TransitionResolver::new(
            self.entities.clone(),
            Arc::new(StoreTransitionTrigger::new(self.entities.clone())),
            self.config.resolver.max_fetch_retries,
        )
    }

    pub fn config_builder(&self) -> &Arc<ConfigBuilder> {
        &self.config_builder
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn entities(&self) -> &EntityService {
        &self.entities
    }
}

/// 调度器构建器：外部协作者可逐个替换
pub struct WorkflowDispatcherBuilder {
    config: AppConfig,
    registry: MethodRegistry,
    store: Option<Arc<dyn EntityStore>>,
    repository: Option<Arc<dyn Repository>>,
    executor: Option<Arc<dyn AgentExecutor>>,
    users: Option<Arc<dyn UserResolver>>,
    config_source: Option<Arc<dyn ConfigSource>>,
    batch: Option<Arc<dyn BatchProcessor>>,
}

impl WorkflowDispatcherBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: MethodRegistry::new(),
            store: None,
            repository: None,
            executor: None,
            users: None,
            config_source: None,
            batch: None,
        }
    }

    /// 使用领域对象提供的方法构建注册表
    pub fn with_methods(mut self, provider: &dyn MethodProvider) -> Self {
        self.registry = MethodRegistry::from_provider(provider);
        self
    }

    pub fn with_registry(mut self, registry: MethodRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_user_resolver(mut self, users: Arc<dyn UserResolver>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.config_source = Some(source);
        self
    }

    pub fn with_batch_processor(mut self, batch: Arc<dyn BatchProcessor>) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn build(self) -> WorkflowDispatcher {
        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryEntityStore::new()));
        let entities = EntityService::new(store, config.dispatcher.entity_version.clone());
        let repository = self.repository.unwrap_or_else(|| {
            Arc::new(LocalRepository::new(&config.repository.workspace_root))
        });
        let executor = self
            .executor
            .unwrap_or_else(|| create_agent_executor_from_config(&config));
        let users = self
            .users
            .unwrap_or_else(|| Arc::new(PassthroughUserResolver));
        let source = self.config_source.unwrap_or_else(|| {
            Arc::new(DirConfigSource::new(&config.dispatcher.config_root))
        });
        let names = RepositoryNames::from(&config.repository);

        let registry = Arc::new(self.registry);
        let config_builder = Arc::new(ConfigBuilder::new(source));
        let memory = Arc::new(MemoryManager::new(
            entities.clone(),
            config.dispatcher.general_memory_tag.clone(),
        ));
        let mut agent = AiAgentHandler::new(
            executor,
            registry.clone(),
            memory.clone(),
            entities.clone(),
            repository.clone(),
            names.clone(),
        );
        let has_batch = self.batch.is_some();
        if let Some(batch) = self.batch {
            agent = agent.with_batch_processor(batch);
        }
        let agent = Arc::new(agent);
        let processor = EventProcessor::new(
            registry.clone(),
            config_builder.clone(),
            agent.clone(),
            memory.clone(),
            OutputWriter::new(repository, names, entities.clone()),
            users,
        );

        tracing::info!(
            methods = registry.len(),
            config_root = %config.dispatcher.config_root.display(),
            "workflow dispatcher initialized"
        );

        WorkflowDispatcher {
            config,
            registry,
            config_builder,
            memory,
            agent,
            processor,
            entities,
            has_batch,
        }
    }
}
