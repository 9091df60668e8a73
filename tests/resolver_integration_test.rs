//! 层级迁移解析集成测试

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use flowbee::agent::MockAgentExecutor;
    use flowbee::config::AppConfig;
    use flowbee::core::consts::{model_name, transition};
    use flowbee::dispatcher::WorkflowDispatcher;
    use flowbee::model::{AgenticFlowEntity, EdgeMessageType};
    use flowbee::store::{EntityStore, InMemoryEntityStore};
    use flowbee::TransitionResolver;

    fn node(state: &str, locked: bool, children: &[&str]) -> AgenticFlowEntity {
        let mut entity = AgenticFlowEntity::new("u1", "mem");
        entity.base.current_state = state.to_string();
        entity.locked = locked;
        entity.child_entities = children.iter().map(|c| c.to_string()).collect();
        entity
    }

    struct Tree {
        resolver: TransitionResolver,
        store: Arc<InMemoryEntityStore>,
        _dispatcher: WorkflowDispatcher,
    }

    async fn tree(nodes: Vec<(&str, AgenticFlowEntity)>) -> Tree {
        let store = Arc::new(InMemoryEntityStore::new());
        for (id, entity) in nodes {
            store
                .insert(
                    model_name::AGENTIC_FLOW_ENTITY,
                    id,
                    serde_json::to_value(&entity).unwrap(),
                )
                .await;
        }
        let dispatcher = WorkflowDispatcher::builder(AppConfig::default())
            .with_store(store.clone())
            .with_executor(Arc::new(MockAgentExecutor::new()))
            .build();
        Tree {
            resolver: dispatcher.transition_resolver(),
            store,
            _dispatcher: dispatcher,
        }
    }

    async fn load(store: &InMemoryEntityStore, id: &str) -> AgenticFlowEntity {
        let value = store
            .get(model_name::AGENTIC_FLOW_ENTITY, "1", id)
            .await
            .unwrap()
            .unwrap();
        serde_json::from_value(value).unwrap()
    }

    fn fired(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_picks_unlocked_child_and_skips_locked_leaf() {
        let t = tree(vec![
            ("r", node("locked_chat", true, &["c1", "c2"])),
            ("c1", node("locked_chat", true, &[])),
            ("c2", node("waiting_for_input", false, &[])),
        ])
        .await;

        let out = t.resolver.apply_answer("r", "yes", None).await.unwrap();
        assert!(out.transitioned);
        assert_eq!(out.target_id, "c2");
        assert_eq!(t.store.read_count("c1").await, 0);
        assert_eq!(
            t.store.fired_transitions().await,
            fired(&[("c2", transition::PROCESS_USER_INPUT)])
        );

        let c2 = load(&t.store, "c2").await;
        let answer = &c2.chat_flow.finished_flow[0];
        assert_eq!(answer.kind, EdgeMessageType::Answer);
        assert_eq!(answer.edge_message_id, out.edge_message_id);
        assert!(!answer.consumed);
        assert!(load(&t.store, "r").await.chat_flow.finished_flow.is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_to_root_when_no_candidate() {
        let t = tree(vec![
            ("r", node("locked_chat", true, &["c1", "c2"])),
            ("c1", node("locked_chat", true, &[])),
        ])
        .await;
        t.store.make_unavailable("c2").await;

        let out = t.resolver.apply_answer("r", "yes", None).await.unwrap();
        assert!(out.transitioned);
        assert_eq!(out.target_id, "r");
        assert_eq!(t.store.read_count("c2").await, 3);
        assert_eq!(
            t.store.fired_transitions().await,
            fired(&[
                ("r", transition::UNLOCK_CHAT),
                ("r", transition::PROCESS_USER_INPUT)
            ])
        );

        let root = load(&t.store, "r").await;
        assert!(!root.locked);
        assert_eq!(root.chat_flow.finished_flow.len(), 1);
        assert!(load(&t.store, "c1").await.chat_flow.finished_flow.is_empty());
    }

    #[tokio::test]
    async fn test_descends_into_nested_locked_child() {
        let t = tree(vec![
            ("r", node("locked_chat", true, &["a"])),
            ("a", node("locked_chat", true, &["b"])),
            ("b", node("idle", false, &[])),
        ])
        .await;

        let out = t
            .resolver
            .apply_answer("r", "approve", Some(transition::MANUAL_APPROVE))
            .await
            .unwrap();
        assert_eq!(out.target_id, "b");
        assert_eq!(
            t.store.fired_transitions().await,
            fired(&[("b", transition::MANUAL_APPROVE)])
        );
        assert!(load(&t.store, "b").await.chat_flow.finished_flow[0].consumed);
    }

    #[tokio::test]
    async fn test_most_recent_child_wins() {
        let t = tree(vec![
            ("r", node("locked_chat", true, &["old", "new"])),
            ("old", node("idle", false, &[])),
            ("new", node("idle", false, &[])),
        ])
        .await;

        let out = t.resolver.apply_answer("r", "yes", None).await.unwrap();
        assert_eq!(out.target_id, "new");
        assert_eq!(t.store.read_count("old").await, 0);
    }

    #[tokio::test]
    async fn test_intermediate_without_candidates_defers_to_sibling() {
        let t = tree(vec![
            ("r", node("locked_chat", true, &["done", "busy"])),
            ("done", node("idle", false, &[])),
            ("busy", node("locked_chat", true, &["leaf"])),
            ("leaf", node("locked_chat", true, &[])),
        ])
        .await;

        let out = t.resolver.apply_answer("r", "yes", None).await.unwrap();
        assert_eq!(out.target_id, "done");
        assert!(load(&t.store, "busy").await.chat_flow.finished_flow.is_empty());
    }

    #[tokio::test]
    async fn test_retry_maps_to_rollback() {
        let t = tree(vec![("r", node("idle", false, &[]))]).await;
        let out = t
            .resolver
            .apply_answer("r", "again", Some(transition::MANUAL_RETRY))
            .await
            .unwrap();
        assert!(out.transitioned);
        assert_eq!(
            t.store.fired_transitions().await,
            fired(&[("r", transition::ROLLBACK)])
        );
    }
}
