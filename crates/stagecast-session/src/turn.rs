use chrono::{DateTime, Utc};
use serde_json::Value;
use stagecast_core::payload::number;
use stagecast_core::{ProfileType, StoredEvent, TurnRecord, TurnStatus};

/// One request/response cycle of a session, mutated only by frames addressed to
/// its own session and frozen once a terminal status is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub turn_id: String,
    pub session_id: String,
    pub profile: ProfileType,
    pub status: TurnStatus,
    pub events: Vec<StoredEvent>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub task_id: Option<String>,
    pub user_query: Option<String>,
    pub final_answer: Option<String>,
    pub error_message: Option<String>,
    pub forced_stop: bool,
    pub started_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        session_id: impl Into<String>,
        turn_id: impl Into<String>,
        profile: ProfileType,
    ) -> Self {
        Self {
            turn_id: turn_id.into(),
            session_id: session_id.into(),
            profile,
            status: TurnStatus::Running,
            events: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            provider: None,
            model: None,
            task_id: None,
            user_query: None,
            final_answer: None,
            error_message: None,
            forced_stop: false,
            started_at: Utc::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == TurnStatus::Running
    }

    pub fn record_event(&mut self, event_type: &str, payload: &Value) {
        if self.is_running() {
            self.events.push(StoredEvent::new(event_type, payload.clone()));
        }
    }

    /// Returns `true` the first time `task_id` is seen for this turn.
    pub fn observe_task(&mut self, task_id: &str) -> bool {
        if !self.is_running() || self.task_id.as_deref() == Some(task_id) {
            return false;
        }
        self.task_id = Some(task_id.to_string());
        true
    }

    /// Folds a usage frame into the turn counters. Cumulative `turn_*` values win
    /// when present; otherwise per-call `statement_*` values are added. Counters
    /// never decrease.
    pub fn apply_token_usage(&mut self, payload: &Value) -> bool {
        if !self.is_running() {
            return false;
        }
        let before = (self.input_tokens, self.output_tokens);
        self.input_tokens = fold_counter(self.input_tokens, payload, "turn_input", "statement_input");
        self.output_tokens =
            fold_counter(self.output_tokens, payload, "turn_output", "statement_output");
        before != (self.input_tokens, self.output_tokens)
    }

    pub fn set_model(&mut self, provider: Option<&str>, model: Option<&str>) {
        if let Some(provider) = provider {
            self.provider = Some(provider.to_string());
        }
        if let Some(model) = model {
            self.model = Some(model.to_string());
        }
    }

    pub fn finish(&mut self, status: TurnStatus) -> bool {
        if !self.is_running() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    pub fn to_record(&self) -> TurnRecord {
        let mut record = TurnRecord::new(
            self.session_id.clone(),
            self.turn_id.clone(),
            self.profile,
            self.status,
        );
        record.error_message = self.error_message.clone();
        record.user_query = self.user_query.clone();
        record.final_answer = self.final_answer.clone();
        record.input_tokens = self.input_tokens;
        record.output_tokens = self.output_tokens;
        record.provider = self.provider.clone();
        record.model = self.model.clone();
        record.created_at = Some(self.started_at);
        if !self.events.is_empty() {
            *record.events_slot_mut(self.profile) = Some(self.events.clone());
        }
        record.tools_used = self.tools_used();
        record
    }

    fn tools_used(&self) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for event in &self.events {
            if !matches!(
                event.event_type.as_str(),
                "tool_intent" | "conversation_tool_invoked"
            ) {
                continue;
            }
            let Some(name) = event
                .payload
                .get("tool_name")
                .or_else(|| event.payload.get("tool"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            if !tools.iter().any(|known| known == name) {
                tools.push(name.to_string());
            }
        }
        tools
    }
}

fn fold_counter(current: u64, payload: &Value, cumulative_key: &str, delta_key: &str) -> u64 {
    match number(payload, &[cumulative_key]) {
        Some(total) => current.max(total),
        None => current.saturating_add(number(payload, &[delta_key]).unwrap_or(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statement_tokens_accumulate_and_turn_totals_win() {
        let mut turn = Turn::new("s1", "t1", ProfileType::ToolEnabled);
        assert!(turn.apply_token_usage(&json!({"statement_input": 120, "statement_output": 45})));
        assert!(turn.apply_token_usage(&json!({"statement_input": 30, "statement_output": 5})));
        assert_eq!((turn.input_tokens, turn.output_tokens), (150, 50));

        assert!(turn.apply_token_usage(&json!({"turn_input": 400, "turn_output": 90})));
        assert_eq!((turn.input_tokens, turn.output_tokens), (400, 90));

        assert!(!turn.apply_token_usage(&json!({"turn_input": 10, "turn_output": 10})));
        assert_eq!((turn.input_tokens, turn.output_tokens), (400, 90));
    }

    #[test]
    fn finished_turn_is_frozen() {
        let mut turn = Turn::new("s1", "t1", ProfileType::ToolEnabled);
        turn.record_event("phase_start", &json!({"phase_num": 1}));
        assert!(turn.finish(TurnStatus::Completed));
        assert!(!turn.finish(TurnStatus::Error));

        turn.record_event("phase_end", &json!({"phase_num": 1}));
        assert!(!turn.apply_token_usage(&json!({"statement_input": 5})));
        assert!(!turn.observe_task("task-1"));
        assert_eq!(turn.events.len(), 1);
        assert_eq!(turn.status, TurnStatus::Completed);
    }

    #[test]
    fn record_places_events_in_profile_slot() {
        let mut turn = Turn::new("s1", "t1", ProfileType::ConversationWithTools);
        turn.record_event("conversation_tool_invoked", &json!({"tool_name": "search"}));
        turn.record_event("conversation_tool_invoked", &json!({"tool_name": "search"}));
        turn.record_event("conversation_tool_invoked", &json!({"tool_name": "fetch"}));
        turn.finish(TurnStatus::Completed);

        let record = turn.to_record();
        assert_eq!(record.status, TurnStatus::Completed);
        assert_eq!(
            record.conversation_agent_events.as_ref().map(Vec::len),
            Some(3)
        );
        assert!(record.execution_trace.is_none());
        assert_eq!(record.tools_used, vec!["search".to_string(), "fetch".to_string()]);
    }

    #[test]
    fn task_ids_are_reported_once() {
        let mut turn = Turn::new("s1", "t1", ProfileType::ToolEnabled);
        assert!(turn.observe_task("task-1"));
        assert!(!turn.observe_task("task-1"));
        assert!(turn.observe_task("task-2"));
    }
}
