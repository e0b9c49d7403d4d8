//! Rebuilds the live render sequence of a stored turn.
//!
//! Stored events go through `progress_instruction` and `finalize_instruction`,
//! the same functions the live router uses, so a replayed turn carries the
//! instructions the user saw live.

use crate::router::{
    finalize_instruction, progress_instruction, DEFAULT_CANCEL_MESSAGE, DEFAULT_ERROR_MESSAGE,
};
use serde::Serialize;
use serde_json::json;
use stagecast_core::titles::plural;
use stagecast_core::{RenderInstruction, StoredEvent, TurnRecord, TurnStatus};
use tracing::debug;

pub const HISTORY_UNAVAILABLE_TITLE: &str = "Detailed history not available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fidelity {
    /// Every stored event replayed.
    Full,
    /// Legacy record; only aggregate fields were available.
    Summary,
    /// Cancelled or failed turn.
    Partial,
}

impl Fidelity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fidelity::Full => "full",
            Fidelity::Summary => "summary",
            Fidelity::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Replay {
    pub fidelity: Fidelity,
    pub instructions: Vec<RenderInstruction>,
}

pub fn replay_turn(record: &TurnRecord) -> Replay {
    let replay = match record.status {
        TurnStatus::Cancelled | TurnStatus::Error => partial(record),
        TurnStatus::Completed | TurnStatus::Running => match detailed_events(record) {
            Some(events) => full(record, events),
            None => summary(record),
        },
    };
    debug!(
        event = "turn_replayed",
        session_id = %record.session_id,
        turn_id = %record.turn_id,
        fidelity = replay.fidelity.as_str(),
        instructions = replay.instructions.len()
    );
    replay
}

fn detailed_events(record: &TurnRecord) -> Option<&[StoredEvent]> {
    record
        .events_slot(record.profile_type)
        .filter(|events| !events.is_empty())
        .or_else(|| {
            record
                .execution_trace
                .as_deref()
                .filter(|events| !events.is_empty())
        })
}

fn partial(record: &TurnRecord) -> Replay {
    let fallback = if record.status == TurnStatus::Cancelled {
        DEFAULT_CANCEL_MESSAGE
    } else {
        DEFAULT_ERROR_MESSAGE
    };
    let message = record
        .error_message
        .as_deref()
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .unwrap_or(fallback);
    Replay {
        fidelity: Fidelity::Partial,
        instructions: vec![RenderInstruction::finalize(
            message,
            json!({
                "turn_id": record.turn_id,
                "status": record.status.as_str(),
            }),
        )],
    }
}

fn full(record: &TurnRecord, events: &[StoredEvent]) -> Replay {
    let profile = record.profile_type;
    let last = events.len().saturating_sub(1);
    let instructions = events
        .iter()
        .enumerate()
        .map(|(index, event)| {
            if index == last {
                finalize_instruction(profile, &event.event_type, &event.payload)
            } else {
                progress_instruction(profile, &event.event_type, &event.payload)
            }
        })
        .collect();
    Replay {
        fidelity: Fidelity::Full,
        instructions,
    }
}

fn summary(record: &TurnRecord) -> Replay {
    let mut parts = Vec::new();
    if let Some(phases) = record.phase_count {
        parts.push(plural(phases, "phase"));
    }
    if !record.tools_used.is_empty() {
        parts.push(plural(record.tools_used.len() as u64, "tool"));
    }
    if let Some(documents) = record.document_count {
        parts.push(plural(documents, "document"));
    }
    if !record.profiles_used.is_empty() {
        parts.push(plural(record.profiles_used.len() as u64, "expert"));
    }
    if record.input_tokens > 0 || record.output_tokens > 0 {
        parts.push(format!(
            "{} in / {} out",
            record.input_tokens, record.output_tokens
        ));
    }
    let title = if parts.is_empty() {
        "Execution complete".to_string()
    } else {
        format!("Execution complete ({})", parts.join(", "))
    };

    Replay {
        fidelity: Fidelity::Summary,
        instructions: vec![
            RenderInstruction::status(
                HISTORY_UNAVAILABLE_TITLE,
                json!({ "fidelity": Fidelity::Summary.as_str() }),
            ),
            RenderInstruction::finalize(
                title,
                json!({
                    "turn_id": record.turn_id,
                    "tools_used": record.tools_used,
                    "profiles_used": record.profiles_used,
                    "phase_count": record.phase_count,
                    "document_count": record.document_count,
                }),
            ),
        ],
    }
}
