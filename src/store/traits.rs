//! 外部协作者边界
//!
//! 实体存储、代码仓库与用户解析都以 trait 形式注入，核心逻辑只依赖这些接口。

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::FlowResult;

/// 实体存储：按 (model, version, id) 寻址的不透明对象存储
///
/// `update` 的 meta 中若带有 `update_transition`，存储方应在持久化的同时触发该迁移。
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// 新增实体，返回分配的 id
    async fn add(
        &self,
        model: &str,
        version: &str,
        entity: Value,
        meta: Option<Value>,
    ) -> FlowResult<String>;

    async fn get(&self, model: &str, version: &str, id: &str) -> FlowResult<Option<Value>>;

    /// 整体覆盖写入，返回实体 id
    async fn update(
        &self,
        model: &str,
        version: &str,
        id: &str,
        entity: Value,
        meta: Option<Value>,
    ) -> FlowResult<String>;

    /// 按字段相等条件查询
    async fn query_by_condition(
        &self,
        model: &str,
        version: &str,
        condition: &Map<String, Value>,
    ) -> FlowResult<Vec<Value>>;

    /// 实体当前状态下可用的迁移名
    async fn get_transitions(&self, id: &str) -> FlowResult<Vec<String>>;
}

/// 代码仓库：按 (branch, repository, path) 寻址的文件内容
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save(&self, branch: &str, repository: &str, path: &str, content: &str)
        -> FlowResult<()>;

    /// 文件不存在时返回 None
    async fn read(&self, branch: &str, repository: &str, path: &str) -> FlowResult<Option<String>>;

    async fn delete(&self, branch: &str, repository: &str, path: &str) -> FlowResult<()>;
}

/// 用户解析：把实体上的 user_id 映射为实际操作账号
#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn resolve_account(&self, user_id: &str) -> FlowResult<String>;
}

/// 原样返回 user_id
#[derive(Debug, Default, Clone)]
pub struct PassthroughUserResolver;

#[async_trait]
impl UserResolver for PassthroughUserResolver {
    async fn resolve_account(&self, user_id: &str) -> FlowResult<String> {
        Ok(user_id.to_string())
    }
}
