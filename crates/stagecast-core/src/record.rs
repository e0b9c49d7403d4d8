use crate::profile::ProfileType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Running,
    Completed,
    Error,
    Cancelled,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Running => "running",
            TurnStatus::Completed => "completed",
            TurnStatus::Error => "error",
            TurnStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnStatus::Running)
    }
}

/// One persisted `(event type, payload)` entry of a turn's progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl StoredEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// A completed (or abandoned) turn as the persistence service returns it.
///
/// Detailed progress lives in the list that matches the turn's profile; older
/// records only carry the aggregate fields at the bottom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: String,
    pub session_id: String,
    #[serde(default)]
    pub profile_type: ProfileType,
    pub status: TurnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_trace: Option<Vec<StoredEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_agent_events: Option<Vec<StoredEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_events: Option<Vec<StoredEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genie_events: Option<Vec<StoredEvent>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles_used: Vec<String>,
}

impl TurnRecord {
    pub fn new(
        session_id: impl Into<String>,
        turn_id: impl Into<String>,
        profile_type: ProfileType,
        status: TurnStatus,
    ) -> Self {
        Self {
            turn_id: turn_id.into(),
            session_id: session_id.into(),
            profile_type,
            status,
            error_message: None,
            user_query: None,
            final_answer: None,
            input_tokens: 0,
            output_tokens: 0,
            provider: None,
            model: None,
            created_at: None,
            execution_trace: None,
            conversation_agent_events: None,
            knowledge_events: None,
            genie_events: None,
            tools_used: Vec::new(),
            phase_count: None,
            document_count: None,
            profiles_used: Vec::new(),
        }
    }

    /// Slot where detailed progress for `profile` is stored.
    pub fn events_slot_mut(&mut self, profile: ProfileType) -> &mut Option<Vec<StoredEvent>> {
        match profile {
            ProfileType::ToolEnabled => &mut self.execution_trace,
            ProfileType::LlmOnly | ProfileType::ConversationWithTools => {
                &mut self.conversation_agent_events
            }
            ProfileType::RagFocused => &mut self.knowledge_events,
            ProfileType::Genie => &mut self.genie_events,
        }
    }

    pub fn events_slot(&self, profile: ProfileType) -> Option<&[StoredEvent]> {
        let slot = match profile {
            ProfileType::ToolEnabled => &self.execution_trace,
            ProfileType::LlmOnly | ProfileType::ConversationWithTools => {
                &self.conversation_agent_events
            }
            ProfileType::RagFocused => &self.knowledge_events,
            ProfileType::Genie => &self.genie_events,
        };
        slot.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_record_parses_with_defaults() {
        let record: TurnRecord = serde_json::from_value(json!({
            "turn_id": "t1",
            "session_id": "s1",
            "status": "completed",
            "tools_used": ["base_readQuery"]
        }))
        .expect("parse");
        assert_eq!(record.profile_type, ProfileType::ToolEnabled);
        assert_eq!(record.input_tokens, 0);
        assert!(record.execution_trace.is_none());
        assert_eq!(record.tools_used, vec!["base_readQuery".to_string()]);
    }

    #[test]
    fn events_slot_follows_profile() {
        let mut record = TurnRecord::new("s1", "t1", ProfileType::Genie, TurnStatus::Completed);
        record
            .events_slot_mut(ProfileType::Genie)
            .get_or_insert_with(Vec::new)
            .push(StoredEvent::new("genie_coordination_start", json!({})));
        assert_eq!(record.events_slot(ProfileType::Genie).map(<[_]>::len), Some(1));
        assert!(record.events_slot(ProfileType::ToolEnabled).is_none());
        let encoded = serde_json::to_value(&record).expect("encode");
        assert_eq!(encoded["genie_events"][0]["type"], "genie_coordination_start");
        assert!(encoded.get("execution_trace").is_none());
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!TurnStatus::Running.is_terminal());
        assert!(TurnStatus::Completed.is_terminal());
        assert!(TurnStatus::Error.is_terminal());
        assert!(TurnStatus::Cancelled.is_terminal());
    }
}
