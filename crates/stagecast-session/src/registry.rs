//! Which session is in the foreground, which ones are still streaming, and the
//! session-list metadata that background streams keep updating.

use serde::Serialize;
use stagecast_core::RenderInstruction;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildSession {
    pub session_id: String,
    pub profile_tag: Option<String>,
    pub status: ChildStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub session_id: String,
    pub is_current: bool,
    pub has_active_stream: bool,
    pub buffered_event_count: u64,
    pub name: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub parent_id: Option<String>,
    pub children: Vec<ChildSession>,
}

impl SessionEntry {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            is_current: false,
            has_active_stream: false,
            buffered_event_count: 0,
            name: None,
            provider: None,
            model: None,
            input_tokens: 0,
            output_tokens: 0,
            parent_id: None,
            children: Vec::new(),
        }
    }
}

/// Session-list change emitted alongside render instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "update", rename_all = "snake_case")]
pub enum SessionUpdate {
    Name {
        session_id: String,
        name: String,
    },
    Model {
        session_id: String,
        provider: Option<String>,
        model: String,
    },
    Tokens {
        session_id: String,
        input_tokens: u64,
        output_tokens: u64,
    },
    ChildLinked {
        parent_id: String,
        child_id: String,
        profile_tag: Option<String>,
    },
    ChildStatus {
        parent_id: String,
        child_id: String,
        status: ChildStatus,
    },
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<String, SessionEntry>,
    current: Option<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the session was not open yet.
    pub fn open_session(&mut self, session_id: &str) -> bool {
        if self.sessions.contains_key(session_id) {
            return false;
        }
        self.sessions
            .insert(session_id.to_string(), SessionEntry::new(session_id));
        true
    }

    /// Moves the foreground to `session_id`, opening it if needed. Background
    /// streams keep running; only the foreground flag moves.
    pub fn set_current(&mut self, session_id: &str) {
        self.open_session(session_id);
        if let Some(previous) = self.current.take() {
            if let Some(entry) = self.sessions.get_mut(&previous) {
                entry.is_current = false;
            }
        }
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.is_current = true;
            entry.buffered_event_count = 0;
        }
        self.current = Some(session_id.to_string());
    }

    pub fn close_session(&mut self, session_id: &str) -> Option<SessionEntry> {
        let removed = self.sessions.remove(session_id);
        if self.current.as_deref() == Some(session_id) {
            self.current = None;
        }
        removed
    }

    pub fn is_current(&self, session_id: &str) -> bool {
        self.current.as_deref() == Some(session_id)
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn entry(&self, session_id: &str) -> Option<&SessionEntry> {
        self.sessions.get(session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionEntry> {
        self.sessions.values()
    }

    pub fn mark_stream_active(&mut self, session_id: &str) {
        self.open_session(session_id);
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.has_active_stream = true;
        }
    }

    pub fn mark_stream_done(&mut self, session_id: &str) {
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.has_active_stream = false;
        }
    }

    pub fn active_stream_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|entry| entry.has_active_stream)
            .count()
    }

    /// Lets foreground instructions through; anything addressed to a background
    /// session is counted and dropped.
    pub fn admit(
        &mut self,
        session_id: &str,
        instructions: Vec<RenderInstruction>,
    ) -> Vec<RenderInstruction> {
        if instructions.is_empty() || self.is_current(session_id) {
            return instructions;
        }
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.buffered_event_count += instructions.len() as u64;
        }
        debug!(
            event = "background_instructions_suppressed",
            session_id = %session_id,
            count = instructions.len()
        );
        Vec::new()
    }

    pub fn set_name(&mut self, session_id: &str, name: &str) -> Option<SessionUpdate> {
        let entry = self.sessions.get_mut(session_id)?;
        let name = name.trim();
        if name.is_empty() || entry.name.as_deref() == Some(name) {
            return None;
        }
        entry.name = Some(name.to_string());
        Some(SessionUpdate::Name {
            session_id: session_id.to_string(),
            name: name.to_string(),
        })
    }

    pub fn set_model(
        &mut self,
        session_id: &str,
        provider: Option<&str>,
        model: &str,
    ) -> Option<SessionUpdate> {
        let entry = self.sessions.get_mut(session_id)?;
        let provider = provider.map(str::to_string).or_else(|| entry.provider.clone());
        if entry.model.as_deref() == Some(model) && entry.provider == provider {
            return None;
        }
        entry.model = Some(model.to_string());
        entry.provider = provider.clone();
        Some(SessionUpdate::Model {
            session_id: session_id.to_string(),
            provider,
            model: model.to_string(),
        })
    }

    /// Session totals reported by the server; never moves backwards.
    pub fn apply_token_totals(
        &mut self,
        session_id: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Option<SessionUpdate> {
        let entry = self.sessions.get_mut(session_id)?;
        let input = entry.input_tokens.max(input_tokens);
        let output = entry.output_tokens.max(output_tokens);
        Self::store_tokens(entry, input, output)
    }

    pub fn add_tokens(
        &mut self,
        session_id: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Option<SessionUpdate> {
        let entry = self.sessions.get_mut(session_id)?;
        let input = entry.input_tokens.saturating_add(input_tokens);
        let output = entry.output_tokens.saturating_add(output_tokens);
        Self::store_tokens(entry, input, output)
    }

    fn store_tokens(entry: &mut SessionEntry, input: u64, output: u64) -> Option<SessionUpdate> {
        if input == entry.input_tokens && output == entry.output_tokens {
            return None;
        }
        entry.input_tokens = input;
        entry.output_tokens = output;
        Some(SessionUpdate::Tokens {
            session_id: entry.session_id.clone(),
            input_tokens: input,
            output_tokens: output,
        })
    }

    /// Records that `parent_id` delegated work to `child_id`. The child is opened
    /// as a background session so the session list can show it right away.
    pub fn link_child(
        &mut self,
        parent_id: &str,
        child_id: &str,
        profile_tag: Option<&str>,
    ) -> Option<SessionUpdate> {
        if parent_id == child_id || !self.sessions.contains_key(parent_id) {
            return None;
        }
        self.open_session(child_id);
        if let Some(child) = self.sessions.get_mut(child_id) {
            child.parent_id = Some(parent_id.to_string());
        }
        let parent = self.sessions.get_mut(parent_id)?;
        if parent
            .children
            .iter()
            .any(|child| child.session_id == child_id)
        {
            return None;
        }
        parent.children.push(ChildSession {
            session_id: child_id.to_string(),
            profile_tag: profile_tag.map(str::to_string),
            status: ChildStatus::Running,
        });
        Some(SessionUpdate::ChildLinked {
            parent_id: parent_id.to_string(),
            child_id: child_id.to_string(),
            profile_tag: profile_tag.map(str::to_string),
        })
    }

    pub fn set_child_status(
        &mut self,
        parent_id: &str,
        child_id: &str,
        status: ChildStatus,
    ) -> Option<SessionUpdate> {
        let parent = self.sessions.get_mut(parent_id)?;
        let child = parent
            .children
            .iter_mut()
            .find(|child| child.session_id == child_id)?;
        if child.status == status {
            return None;
        }
        child.status = status;
        Some(SessionUpdate::ChildStatus {
            parent_id: parent_id.to_string(),
            child_id: child_id.to_string(),
            status,
        })
    }

    pub fn children_of(&self, parent_id: &str) -> &[ChildSession] {
        self.sessions
            .get(parent_id)
            .map(|entry| entry.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent_of(&self, child_id: &str) -> Option<&str> {
        self.sessions
            .get(child_id)
            .and_then(|entry| entry.parent_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn at_most_one_session_is_current() {
        let mut registry = SessionRegistry::new();
        registry.open_session("A");
        registry.open_session("B");
        registry.set_current("A");
        registry.set_current("B");

        let current: Vec<&str> = registry
            .sessions()
            .filter(|entry| entry.is_current)
            .map(|entry| entry.session_id.as_str())
            .collect();
        assert_eq!(current, vec!["B"]);
        assert!(registry.is_current("B"));
        assert!(!registry.is_current("A"));
    }

    #[test]
    fn switching_current_keeps_background_streams_active() {
        let mut registry = SessionRegistry::new();
        registry.set_current("A");
        registry.mark_stream_active("A");
        registry.mark_stream_active("B");
        registry.set_current("B");

        assert_eq!(registry.active_stream_count(), 2);
        assert!(registry.entry("A").is_some_and(|entry| entry.has_active_stream));

        registry.mark_stream_done("A");
        assert_eq!(registry.active_stream_count(), 1);
    }

    #[test]
    fn closing_the_current_session_clears_foreground() {
        let mut registry = SessionRegistry::new();
        registry.set_current("A");
        let removed = registry.close_session("A").expect("entry");
        assert!(removed.is_current);
        assert_eq!(registry.current(), None);
        assert!(registry.entry("A").is_none());
    }

    #[test]
    fn background_instructions_are_counted_not_delivered() {
        let mut registry = SessionRegistry::new();
        registry.set_current("A");
        registry.open_session("B");

        let instructions = vec![
            RenderInstruction::status("Phase 1 started", json!({})),
            RenderInstruction::message("hi", json!({})),
        ];
        assert!(registry.admit("B", instructions.clone()).is_empty());
        assert_eq!(registry.entry("B").map(|entry| entry.buffered_event_count), Some(2));
        assert_eq!(registry.admit("A", instructions.clone()), instructions);

        registry.set_current("B");
        assert_eq!(registry.entry("B").map(|entry| entry.buffered_event_count), Some(0));
    }

    #[test]
    fn token_totals_never_decrease() {
        let mut registry = SessionRegistry::new();
        registry.open_session("A");
        assert!(registry.apply_token_totals("A", 100, 40).is_some());
        assert!(registry.apply_token_totals("A", 90, 30).is_none());
        assert_eq!(
            registry.add_tokens("A", 5, 5),
            Some(SessionUpdate::Tokens {
                session_id: "A".to_string(),
                input_tokens: 105,
                output_tokens: 45,
            })
        );
        assert!(registry.apply_token_totals("unknown", 1, 1).is_none());
    }

    #[test]
    fn name_and_model_updates_report_changes_only() {
        let mut registry = SessionRegistry::new();
        registry.open_session("A");
        assert!(registry.set_name("A", "Quarterly revenue").is_some());
        assert!(registry.set_name("A", "Quarterly revenue").is_none());
        assert!(registry.set_name("A", "   ").is_none());
        assert!(registry.set_model("A", Some("google"), "gemini").is_some());
        assert!(registry.set_model("A", None, "gemini").is_none());
    }

    #[test]
    fn child_tree_links_and_tracks_status() {
        let mut registry = SessionRegistry::new();
        registry.set_current("parent");

        let linked = registry.link_child("parent", "child-1", Some("SQL"));
        assert!(matches!(linked, Some(SessionUpdate::ChildLinked { .. })));
        assert!(registry.link_child("parent", "child-1", Some("SQL")).is_none());
        assert_eq!(registry.parent_of("child-1"), Some("parent"));
        assert!(!registry.is_current("child-1"));

        assert!(registry
            .set_child_status("parent", "child-1", ChildStatus::Completed)
            .is_some());
        assert_eq!(registry.children_of("parent")[0].status, ChildStatus::Completed);
        assert!(registry.children_of("nobody").is_empty());
        assert!(registry.link_child("missing", "child-2", None).is_none());
    }
}
