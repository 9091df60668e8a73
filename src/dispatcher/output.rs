//! 步骤输出的写入目标：仓库文件、workflow_cache、内容存储
//!
//! 写入本身不加锁；EventProcessor 持有全局写入闸门，在调用 `write` 时串行化。

use std::sync::Arc;

use serde_json::Value;

use super::format::{pretty_json, safe_format};
use crate::config::RepositorySection;
use crate::core::consts::{GIT_BRANCH_PARAM, PROGRAMMING_LANGUAGE_PARAM};
use crate::core::FlowResult;
use crate::model::{OutputSpec, WorkflowEntity};
use crate::store::{EntityService, Repository};

/// Python / Java 两个输出仓库的名称
#[derive(Debug, Clone)]
pub struct RepositoryNames {
    pub python: String,
    pub java: String,
}

impl Default for RepositoryNames {
    fn default() -> Self {
        Self::from(&RepositorySection::default())
    }
}

impl From<&RepositorySection> for RepositoryNames {
    fn from(section: &RepositorySection) -> Self {
        Self {
            python: section.python_repository.clone(),
            java: section.java_repository.clone(),
        }
    }
}

impl RepositoryNames {
    /// programming_language 优先；否则 workflow_name 以 java 结尾时用 Java 仓库
    pub fn for_entity(&self, entity: &WorkflowEntity) -> &str {
        match entity.cache_str(PROGRAMMING_LANGUAGE_PARAM) {
            Some("PYTHON") => return &self.python,
            Some("JAVA") => return &self.java,
            _ => {}
        }
        let is_java = entity
            .workflow_name
            .as_deref()
            .map(|n| n.ends_with("java"))
            .unwrap_or(false);
        if is_java {
            &self.java
        } else {
            &self.python
        }
    }
}

/// git 分支：workflow_cache.git_branch，缺省为 technical_id
pub fn branch_name<'a>(entity: &'a WorkflowEntity, technical_id: &'a str) -> &'a str {
    entity.cache_str(GIT_BRANCH_PARAM).unwrap_or(technical_id)
}

pub struct OutputWriter {
    repository: Arc<dyn Repository>,
    names: RepositoryNames,
    entities: EntityService,
}

impl OutputWriter {
    pub fn new(
        repository: Arc<dyn Repository>,
        names: RepositoryNames,
        entities: EntityService,
    ) -> Self {
        Self {
            repository,
            names,
            entities,
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn names(&self) -> &RepositoryNames {
        &self.names
    }

    pub async fn write(
        &self,
        entity: &mut WorkflowEntity,
        output: &OutputSpec,
        response: &str,
        technical_id: &str,
    ) -> FlowResult<()> {
        for file in &output.local_fs {
            let content = if file.ends_with(".json") {
                pretty_json(response).unwrap_or_else(|| {
                    tracing::warn!(file = %file, "invalid JSON for .json output, writing raw");
                    response.to_string()
                })
            } else {
                response.to_string()
            };
            let path = safe_format(file, &entity.workflow_cache);
            let branch = branch_name(entity, technical_id).to_string();
            let repository = self.names.for_entity(entity).to_string();
            self.repository
                .save(&branch, &repository, &path, &content)
                .await?;
            tracing::info!(branch = %branch, repository = %repository, path = %path, "output file written");
        }

        for key in &output.workflow_cache {
            entity
                .workflow_cache
                .insert(key.clone(), Value::String(response.to_string()));
        }

        for name in &output.edge_message {
            let id = self
                .entities
                .add_content(&Value::String(response.to_string()))
                .await?;
            entity.edge_messages_store.insert(name.clone(), id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryEntityStore, LocalRepository};
    use serde_json::json;

    #[test]
    fn test_repository_selection() {
        let names = RepositoryNames::default();
        let mut entity = WorkflowEntity::new("u");
        assert_eq!(names.for_entity(&entity), "python_repository");

        entity.workflow_name = Some("build_app_java".to_string());
        assert_eq!(names.for_entity(&entity), "java_repository");

        entity
            .workflow_cache
            .insert("programming_language".to_string(), json!("PYTHON"));
        assert_eq!(names.for_entity(&entity), "python_repository");
    }

    #[tokio::test]
    async fn test_write_all_targets() {
        let dir = tempfile::tempdir().unwrap();
        let service = EntityService::new(Arc::new(InMemoryEntityStore::new()), "1");
        let writer = OutputWriter::new(
            Arc::new(LocalRepository::new(dir.path())),
            RepositoryNames::default(),
            service.clone(),
        );

        let mut entity = WorkflowEntity::new("u");
        entity
            .workflow_cache
            .insert("git_branch".to_string(), json!("feature"));
        entity.workflow_cache.insert("app".to_string(), json!("demo"));

        let output = OutputSpec {
            local_fs: vec!["{app}/app.json".to_string()],
            workflow_cache: vec!["last".to_string()],
            edge_message: vec!["stored".to_string()],
        };
        writer
            .write(&mut entity, &output, r#"{"b":1,"a":2}"#, "tech-1")
            .await
            .unwrap();

        let written =
            std::fs::read_to_string(dir.path().join("python_repository/feature/demo/app.json"))
                .unwrap();
        assert_eq!(written, "{\n    \"a\": 2,\n    \"b\": 1\n}");
        assert_eq!(entity.workflow_cache["last"], json!(r#"{"b":1,"a":2}"#));

        let id = entity.edge_messages_store.get("stored").unwrap();
        assert_eq!(
            service.get_content(id).await.unwrap(),
            Some(json!(r#"{"b":1,"a":2}"#))
        );
    }
}
