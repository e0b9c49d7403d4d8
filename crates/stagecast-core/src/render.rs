use crate::frame::{encode_ndjson, FrameError};
use crate::payload::{number, text};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderKind {
    StatusAppend,
    StatusFinalize,
    IndicatorUpdate,
    MessageAppend,
    TaskIdUpdate,
}

impl RenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderKind::StatusAppend => "status-append",
            RenderKind::StatusFinalize => "status-finalize",
            RenderKind::IndicatorUpdate => "indicator-update",
            RenderKind::MessageAppend => "message-append",
            RenderKind::TaskIdUpdate => "task-id-update",
        }
    }
}

/// Order-sensitive description of one UI effect, consumed once by the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderInstruction {
    pub kind: RenderKind,
    pub title: String,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub is_terminal: bool,
}

impl RenderInstruction {
    pub fn new(kind: RenderKind, title: impl Into<String>, details: Value) -> Self {
        Self {
            kind,
            title: title.into(),
            details,
            is_terminal: false,
        }
    }

    pub fn status(title: impl Into<String>, details: Value) -> Self {
        Self::new(RenderKind::StatusAppend, title, details)
    }

    pub fn finalize(title: impl Into<String>, details: Value) -> Self {
        Self::new(RenderKind::StatusFinalize, title, details).terminal()
    }

    pub fn indicator(title: impl Into<String>, details: Value) -> Self {
        Self::new(RenderKind::IndicatorUpdate, title, details)
    }

    pub fn message(title: impl Into<String>, details: Value) -> Self {
        Self::new(RenderKind::MessageAppend, title, details)
    }

    pub fn task_id(task_id: &str) -> Self {
        Self::new(
            RenderKind::TaskIdUpdate,
            format!("Task {task_id}"),
            json!({ "task_id": task_id }),
        )
    }

    pub fn terminal(mut self) -> Self {
        self.is_terminal = true;
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_ndjson(self)
    }
}

/// Per-call metric line shown next to an LLM call, e.g. `Tokens: 120 in / 45 out`.
pub fn token_metric_text(payload: &Value) -> String {
    let input = number(payload, &["statement_input"]).unwrap_or(0);
    let output = number(payload, &["statement_output"]).unwrap_or(0);
    format!("Tokens: {input} in / {output} out")
}

/// Indicator text for busy/idle status signals, e.g. `llm busy`.
pub fn indicator_text(payload: &Value) -> String {
    let target = text(payload, &["target"]).unwrap_or("status");
    let state = text(payload, &["state"]).unwrap_or("idle");
    format!("{target} {state}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_with_kebab_case_names() {
        let instruction = RenderInstruction::finalize("Done", json!({}));
        let encoded = serde_json::to_value(&instruction).expect("encode");
        assert_eq!(encoded["kind"], "status-finalize");
        assert_eq!(encoded["is_terminal"], true);
        assert_eq!(RenderKind::TaskIdUpdate.as_str(), "task-id-update");
    }

    #[test]
    fn token_metric_reports_statement_counts() {
        let text = token_metric_text(&json!({
            "statement_input": 120,
            "statement_output": 45,
            "call_id": "c1"
        }));
        assert_eq!(text, "Tokens: 120 in / 45 out");
    }

    #[test]
    fn indicator_text_defaults_missing_fields() {
        assert_eq!(
            indicator_text(&json!({"target": "db", "state": "busy"})),
            "db busy"
        );
        assert_eq!(indicator_text(&json!({})), "status idle");
    }

    #[test]
    fn encoded_instruction_is_one_json_line() {
        let line = RenderInstruction::task_id("t-9").encode().expect("encode");
        assert_eq!(line.last(), Some(&b'\n'));
        let decoded: RenderInstruction =
            serde_json::from_slice(&line[..line.len() - 1]).expect("decode");
        assert_eq!(decoded.kind, RenderKind::TaskIdUpdate);
        assert_eq!(decoded.details["task_id"], "t-9");
    }
}
