//! Multi-agent coordination events: titles go through the shared harmonizer like
//! every other progress event, this module only keeps the child-session tree.

use crate::registry::{ChildStatus, SessionRegistry, SessionUpdate};
use serde_json::Value;
use stagecast_core::payload::{profile_tag, succeeded, text};
use stagecast_core::EventType;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct CoordinationRouter;

impl CoordinationRouter {
    /// Applies the tree effect of `event_type` for the coordinating session `parent_id`.
    pub fn observe(
        &self,
        event_type: EventType,
        payload: &Value,
        parent_id: &str,
        registry: &mut SessionRegistry,
    ) -> Vec<SessionUpdate> {
        let Some(child_id) = child_session_id(payload) else {
            return Vec::new();
        };
        let update = match event_type {
            EventType::GenieSlaveInvoked => {
                registry.link_child(parent_id, child_id, profile_tag(payload))
            }
            EventType::GenieSlaveCompleted => {
                let status = if succeeded(payload) {
                    ChildStatus::Completed
                } else {
                    ChildStatus::Failed
                };
                registry.set_child_status(parent_id, child_id, status)
            }
            _ => None,
        };
        if let Some(update) = &update {
            debug!(
                event = "coordination_tree_updated",
                parent_id = %parent_id,
                child_id = %child_id,
                update = ?update
            );
        }
        update.into_iter().collect()
    }
}

fn child_session_id(payload: &Value) -> Option<&str> {
    text(payload, &["slave_session_id", "child_session_id"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoked_then_completed_updates_tree() {
        let mut registry = SessionRegistry::new();
        registry.set_current("parent");
        let router = CoordinationRouter;

        let updates = router.observe(
            EventType::GenieSlaveInvoked,
            &json!({"slave_session_id": "child", "profile_tag": "@SQL"}),
            "parent",
            &mut registry,
        );
        assert_eq!(
            updates,
            vec![SessionUpdate::ChildLinked {
                parent_id: "parent".to_string(),
                child_id: "child".to_string(),
                profile_tag: Some("SQL".to_string()),
            }]
        );

        let updates = router.observe(
            EventType::GenieSlaveCompleted,
            &json!({"slave_session_id": "child", "error": "timeout"}),
            "parent",
            &mut registry,
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(registry.children_of("parent")[0].status, ChildStatus::Failed);
    }

    #[test]
    fn events_without_child_ids_leave_tree_alone() {
        let mut registry = SessionRegistry::new();
        registry.set_current("parent");
        let updates = CoordinationRouter.observe(
            EventType::GenieRoutingDecision,
            &json!({"selected_profiles": ["SQL"]}),
            "parent",
            &mut registry,
        );
        assert!(updates.is_empty());
        assert!(registry.children_of("parent").is_empty());
    }
}
