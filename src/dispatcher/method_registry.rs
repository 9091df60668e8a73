//! 方法注册表
//!
//! 领域对象实现 MethodProvider，暴露两组方法：类型层面声明的能力（declared_methods）
//! 与显式的名称表（function_registry），同名时后者覆盖前者。
//! 每次 dispatch 输出一条结构化审计日志（JSON）。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::{FlowError, FlowResult};
use crate::model::FlowEntity;

/// 可被工作流调用的方法：名称与异步执行
#[async_trait]
pub trait WorkflowMethod: Send + Sync {
    fn name(&self) -> &str;

    /// args 为静态参数或模型给出的参数；方法可以修改实体
    async fn call(
        &self,
        technical_id: &str,
        entity: &mut FlowEntity,
        args: Map<String, Value>,
    ) -> FlowResult<String>;
}

/// 提供方法的领域对象
pub trait MethodProvider: Send + Sync {
    fn declared_methods(&self) -> Vec<Arc<dyn WorkflowMethod>>;

    fn function_registry(&self) -> HashMap<String, Arc<dyn WorkflowMethod>> {
        HashMap::new()
    }
}

#[derive(Default, Clone)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn WorkflowMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并 provider 的两组方法，function_registry 优先
    pub fn from_provider(provider: &dyn MethodProvider) -> Self {
        let mut registry = Self::new();
        for method in provider.declared_methods() {
            registry.register_arc(method.name().to_string(), method);
        }
        for (name, method) in provider.function_registry() {
            if registry.methods.contains_key(&name) {
                tracing::debug!(method = %name, "function registry overrides declared method");
            }
            registry.register_arc(name, method);
        }
        tracing::info!("Method registry built with {} methods", registry.methods.len());
        registry
    }

    pub fn register(&mut self, method: impl WorkflowMethod + 'static) {
        let name = method.name().to_string();
        self.methods.insert(name, Arc::new(method));
    }

    pub fn register_arc(&mut self, name: String, method: Arc<dyn WorkflowMethod>) {
        self.methods.insert(name, method);
    }

    pub fn has(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn WorkflowMethod>> {
        self.methods.get(name).cloned()
    }

    /// 已注册的方法名（排序）
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// 按名调用；未知名称返回 UnknownMethod 并附带全部已知名称
    pub async fn dispatch(
        &self,
        name: &str,
        technical_id: &str,
        entity: &mut FlowEntity,
        args: Map<String, Value>,
    ) -> FlowResult<String> {
        let method = self.get(name).ok_or_else(|| FlowError::UnknownMethod {
            name: name.to_string(),
            available: self.list(),
        })?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = method.call(technical_id, entity, args).await;

        let audit = serde_json::json!({
            "event": "method_audit",
            "method": name,
            "technical_id": technical_id,
            "ok": result.is_ok(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "method");

        result
    }
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkflowEntity;

    struct Echo(&'static str);

    #[async_trait]
    impl WorkflowMethod for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn call(
            &self,
            technical_id: &str,
            entity: &mut FlowEntity,
            args: Map<String, Value>,
        ) -> FlowResult<String> {
            entity
                .base_mut()
                .workflow_cache
                .insert("touched".to_string(), Value::Bool(true));
            Ok(format!("{}:{}:{}", self.0, technical_id, Value::Object(args)))
        }
    }

    struct Provider;

    impl MethodProvider for Provider {
        fn declared_methods(&self) -> Vec<Arc<dyn WorkflowMethod>> {
            vec![Arc::new(Echo("declared"))]
        }

        fn function_registry(&self) -> HashMap<String, Arc<dyn WorkflowMethod>> {
            let mut table: HashMap<String, Arc<dyn WorkflowMethod>> = HashMap::new();
            table.insert("echo".to_string(), Arc::new(Echo("dynamic")));
            table.insert("alias".to_string(), Arc::new(Echo("alias")));
            table
        }
    }

    #[tokio::test]
    async fn test_dynamic_table_wins() {
        let registry = MethodRegistry::from_provider(&Provider);
        assert_eq!(registry.list(), vec!["alias", "echo"]);

        let mut entity = FlowEntity::from(WorkflowEntity::new("u"));
        let out = registry
            .dispatch("echo", "t1", &mut entity, Map::new())
            .await
            .unwrap();
        assert_eq!(out, "dynamic:t1:{}");
        assert_eq!(entity.base().workflow_cache["touched"], Value::Bool(true));
    }

    #[tokio::test]
    async fn test_unknown_method_lists_names() {
        let registry = MethodRegistry::from_provider(&Provider);
        let mut entity = FlowEntity::from(WorkflowEntity::new("u"));
        let err = registry
            .dispatch("nope", "t1", &mut entity, Map::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FlowError::UnknownMethod {
                name: "nope".to_string(),
                available: vec!["alias".to_string(), "echo".to_string()],
            }
        );
    }
}
