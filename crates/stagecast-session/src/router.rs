//! Frame routing: classify, title, and turn each decoded frame into render
//! instructions plus session-list updates.
//!
//! The router itself holds no state. Everything a frame may change lives in the
//! `SessionContext` of the stream it arrived on, or in the shared
//! `SessionRegistry` for session-list metadata.

use crate::coordination::CoordinationRouter;
use crate::lifecycle::{Controls, LifecycleConfig, LifecycleEffect, TurnLifecycle};
use crate::registry::{SessionRegistry, SessionUpdate};
use crate::turn::Turn;
use serde::Serialize;
use serde_json::{json, Value};
use stagecast_core::payload::{number, text};
use stagecast_core::render::{indicator_text, token_metric_text};
use stagecast_core::{
    classify, title, EventFamily, EventFrame, EventType, FrameKind, ProfileType,
    RenderInstruction, TerminalKind, TurnRecord, TurnStatus,
};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub const FORCED_STOP_TITLE: &str = "Stopped (no confirmation from server)";
pub const CANCEL_IN_PROGRESS_TITLE: &str = "Cancellation in progress";
pub const DEFAULT_CANCEL_MESSAGE: &str = "Process cancelled by user.";
pub const DEFAULT_ERROR_MESSAGE: &str = "Execution failed.";

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RouteOutput {
    pub instructions: Vec<RenderInstruction>,
    pub session_updates: Vec<SessionUpdate>,
    pub transition: Option<TurnStatus>,
}

impl RouteOutput {
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty() && self.session_updates.is_empty() && self.transition.is_none()
    }
}

/// Per-stream state: which session the stream belongs to, its profile, the
/// active turn and that turn's lifecycle.
#[derive(Debug)]
pub struct SessionContext {
    pub session_id: String,
    pub profile: ProfileType,
    turn: Option<Turn>,
    lifecycle: TurnLifecycle,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, profile: ProfileType) -> Self {
        Self::with_config(session_id, profile, LifecycleConfig::default())
    }

    pub fn with_config(
        session_id: impl Into<String>,
        profile: ProfileType,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            profile,
            turn: None,
            lifecycle: TurnLifecycle::new(config),
        }
    }

    pub fn turn(&self) -> Option<&Turn> {
        self.turn.as_ref()
    }

    pub fn lifecycle(&self) -> &TurnLifecycle {
        &self.lifecycle
    }

    pub fn controls(&self) -> Controls {
        self.lifecycle.controls()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Starts a new turn, minting a turn id when none is given. Returns the turn
    /// id, or `None` while another turn is still running.
    pub fn begin_turn(&mut self, turn_id: Option<&str>, user_query: Option<&str>) -> Option<String> {
        let turn_id = turn_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if !self.lifecycle.begin(&turn_id) {
            return None;
        }
        let mut turn = Turn::new(self.session_id.clone(), turn_id.clone(), self.profile);
        turn.user_query = user_query.map(str::to_string);
        self.turn = Some(turn);
        debug!(
            event = "turn_started",
            session_id = %self.session_id,
            turn_id = %turn_id
        );
        Some(turn_id)
    }

    pub fn request_cancel(&mut self, now: Instant) -> bool {
        self.lifecycle.request_cancel(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.lifecycle.next_deadline()
    }

    /// Drives the cancel timers. A fired failsafe finalizes the turn as a forced stop.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<RenderInstruction> {
        match self.lifecycle.poll(now) {
            Some(LifecycleEffect::CancelInProgress) => vec![RenderInstruction::indicator(
                CANCEL_IN_PROGRESS_TITLE,
                json!({ "state": "cancel_in_progress" }),
            )],
            Some(LifecycleEffect::ForcedStop) => {
                let mut details = json!({ "forced_stop": true });
                if let Some(turn) = self.turn.as_mut() {
                    turn.finish(TurnStatus::Cancelled);
                    turn.forced_stop = true;
                    turn.error_message = Some(FORCED_STOP_TITLE.to_string());
                    details["turn_id"] = json!(turn.turn_id);
                }
                vec![RenderInstruction::finalize(FORCED_STOP_TITLE, details)]
            }
            None => Vec::new(),
        }
    }

    /// Ends a running turn as `error` when the stream dies without a terminal frame.
    pub fn fail_turn(&mut self, reason: &str) -> Option<RenderInstruction> {
        if !self.lifecycle.finish(TurnStatus::Error) {
            return None;
        }
        let mut details = json!({ "error_message": reason });
        if let Some(turn) = self.turn.as_mut() {
            turn.error_message = Some(reason.to_string());
            turn.finish(TurnStatus::Error);
            details["turn_id"] = json!(turn.turn_id);
        }
        Some(RenderInstruction::finalize(reason, details))
    }

    /// Snapshot of the turn once it reached a terminal status.
    pub fn finished_record(&self) -> Option<TurnRecord> {
        self.turn
            .as_ref()
            .filter(|turn| !turn.is_running())
            .map(Turn::to_record)
    }

    /// The running turn. Frames that arrive before any submit, or that name a new
    /// turn id after the previous turn finished, start one on demand.
    fn running_turn(&mut self, frame: &EventFrame) -> Option<&mut Turn> {
        let stale = match &self.turn {
            None => true,
            Some(turn) => {
                !turn.is_running() && frame.turn_id().is_some_and(|id| id != turn.turn_id)
            }
        };
        if stale {
            self.begin_turn(frame.turn_id(), None);
        }
        self.turn.as_mut().filter(|turn| turn.is_running())
    }
}

/// The instruction a progress event renders as, live and in replay alike.
pub fn progress_instruction(
    profile: ProfileType,
    event_type: &str,
    payload: &Value,
) -> RenderInstruction {
    RenderInstruction::status(
        title(profile, event_type, payload),
        json!({ "event_type": event_type, "payload": payload }),
    )
}

/// The `status-finalize` closing a turn's status stream, live and in replay alike.
pub fn finalize_instruction(
    profile: ProfileType,
    event_type: &str,
    payload: &Value,
) -> RenderInstruction {
    RenderInstruction::finalize(
        title(profile, event_type, payload),
        json!({ "event_type": event_type, "payload": payload }),
    )
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EventRouter {
    coordination: CoordinationRouter,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        &self,
        frame: &EventFrame,
        ctx: &mut SessionContext,
        registry: &mut SessionRegistry,
    ) -> RouteOutput {
        let target = frame
            .session_id()
            .unwrap_or(ctx.session_id.as_str())
            .to_string();
        let owned = target == ctx.session_id;
        let payload = &frame.payload;
        let mut out = RouteOutput::default();
        let mut instructions = Vec::new();

        let kind = classify(&frame.event_name);
        // Unknown frames render exactly one generic instruction.
        if owned && kind != FrameKind::Unknown {
            if let Some(task_id) = frame.task_id() {
                if let Some(turn) = ctx.running_turn(frame) {
                    if turn.observe_task(task_id) {
                        instructions.push(RenderInstruction::task_id(task_id));
                    }
                }
            }
        }

        match kind {
            FrameKind::Indicator => {
                instructions.push(RenderInstruction::indicator(
                    indicator_text(payload),
                    payload.clone(),
                ));
            }
            FrameKind::TokenUsage => {
                if owned {
                    if let Some(turn) = ctx.running_turn(frame) {
                        turn.apply_token_usage(payload);
                    }
                }
                out.session_updates
                    .extend(session_tokens(&target, payload, registry));
                instructions.push(RenderInstruction::indicator(
                    token_metric_text(payload),
                    payload.clone(),
                ));
            }
            FrameKind::Notification => {
                self.route_notification(
                    frame,
                    &target,
                    owned,
                    ctx,
                    registry,
                    &mut instructions,
                    &mut out,
                );
            }
            FrameKind::SessionName => {
                if let Some(name) = payload.get("name").and_then(Value::as_str) {
                    out.session_updates.extend(registry.set_name(&target, name));
                }
            }
            FrameKind::TaskStart => {}
            FrameKind::Terminal(kind) => {
                if owned {
                    self.route_terminal(kind, frame, ctx, &mut instructions, &mut out);
                } else {
                    debug!(
                        event = "foreign_terminal_ignored",
                        stream_session = %ctx.session_id,
                        frame_session = %target,
                        terminal = kind.as_str()
                    );
                }
            }
            FrameKind::Coordination(event_type) => {
                out.session_updates.extend(self.coordination.observe(
                    event_type,
                    payload,
                    &target,
                    registry,
                ));
                progress(ctx, frame, owned, event_type.as_str(), payload, &mut instructions);
            }
            FrameKind::Progress(event_type) => {
                progress(ctx, frame, owned, event_type.as_str(), payload, &mut instructions);
            }
            FrameKind::Message => match payload.get("type").and_then(Value::as_str) {
                Some(event_type) => {
                    if let Some(known) = EventType::parse(event_type) {
                        if known.family() == EventFamily::Coordination {
                            out.session_updates.extend(self.coordination.observe(
                                known, payload, &target, registry,
                            ));
                        }
                    }
                    progress(ctx, frame, owned, event_type, payload, &mut instructions);
                }
                None => {
                    let step = ["step", "details", "message"]
                        .iter()
                        .find_map(|key| payload.get(*key).and_then(Value::as_str))
                        .unwrap_or("message");
                    instructions.push(RenderInstruction::status(step, payload.clone()));
                }
            },
            FrameKind::Unknown => {
                progress(ctx, frame, owned, frame.event_name.trim(), payload, &mut instructions);
            }
        }

        out.instructions = registry.admit(&target, instructions);
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn route_notification(
        &self,
        frame: &EventFrame,
        target: &str,
        owned: bool,
        ctx: &mut SessionContext,
        registry: &mut SessionRegistry,
        instructions: &mut Vec<RenderInstruction>,
        out: &mut RouteOutput,
    ) {
        let envelope = &frame.payload;
        let inner = envelope.get("payload").unwrap_or(envelope);
        let notification_type = envelope
            .get("type")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        let subject = inner
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or(target);

        match notification_type {
            "profile_override_failed" => {
                instructions.push(RenderInstruction::status(
                    override_warning(inner),
                    inner.clone(),
                ));
            }
            "session_name_update" => {
                if let Some(name) = inner.get("name").and_then(Value::as_str) {
                    out.session_updates.extend(registry.set_name(subject, name));
                }
            }
            "session_model_update" => {
                let provider = inner.get("provider").and_then(Value::as_str);
                let model = inner.get("model").and_then(Value::as_str);
                if let Some(model) = model {
                    out.session_updates
                        .extend(registry.set_model(subject, provider, model));
                }
                if owned && subject == ctx.session_id {
                    if let Some(turn) = ctx.running_turn(frame) {
                        turn.set_model(provider, model);
                    }
                }
            }
            other => match EventType::parse(other) {
                Some(event_type) if event_type.is_nested_progress() => {
                    progress(ctx, frame, owned, event_type.as_str(), inner, instructions);
                }
                _ => {
                    let label = if other.is_empty() { "notification" } else { other };
                    instructions.push(RenderInstruction::status(label, envelope.clone()));
                }
            },
        }
    }

    fn route_terminal(
        &self,
        kind: TerminalKind,
        frame: &EventFrame,
        ctx: &mut SessionContext,
        instructions: &mut Vec<RenderInstruction>,
        out: &mut RouteOutput,
    ) {
        let profile = ctx.profile;
        let session_id = ctx.session_id.clone();
        let payload = &frame.payload;
        let Some(turn) = ctx.running_turn(frame) else {
            debug!(
                event = "duplicate_terminal_ignored",
                session_id = %session_id,
                terminal = kind.as_str()
            );
            return;
        };

        let (status, lifecycle_event, summary, text) = match kind {
            TerminalKind::FinalAnswer => {
                let answer = text(payload, &["final_answer", "answer", "content"])
                    .unwrap_or_default()
                    .to_string();
                turn.set_model(
                    payload.get("provider").and_then(Value::as_str),
                    payload.get("model").and_then(Value::as_str),
                );
                turn.final_answer = Some(answer.clone());
                let summary = json!({
                    "input_tokens": turn.input_tokens,
                    "output_tokens": turn.output_tokens,
                });
                (TurnStatus::Completed, EventType::ExecutionComplete, summary, answer)
            }
            TerminalKind::Error => {
                let error = text(payload, &["error", "message", "error_message"]);
                let message = error.unwrap_or(DEFAULT_ERROR_MESSAGE).to_string();
                turn.error_message = Some(message.clone());
                let summary = match error {
                    Some(error) => json!({ "error_message": error }),
                    None => json!({}),
                };
                (TurnStatus::Error, EventType::ExecutionError, summary, message)
            }
            TerminalKind::Cancelled => {
                let reason = text(payload, &["message", "reason"]);
                let message = reason.unwrap_or(DEFAULT_CANCEL_MESSAGE).to_string();
                turn.error_message = Some(message.clone());
                let summary = match reason {
                    Some(reason) => json!({ "reason": reason }),
                    None => json!({}),
                };
                (TurnStatus::Cancelled, EventType::ExecutionCancelled, summary, message)
            }
        };

        turn.record_event(lifecycle_event.as_str(), &summary);
        turn.finish(status);
        let turn_id = turn.turn_id.clone();
        let provider = turn.provider.clone();
        let model = turn.model.clone();
        ctx.lifecycle.finish(status);

        instructions.push(finalize_instruction(
            profile,
            lifecycle_event.as_str(),
            &summary,
        ));
        instructions.push(RenderInstruction::message(
            text,
            json!({
                "turn_id": turn_id,
                "status": status.as_str(),
                "provider": provider,
                "model": model,
            }),
        ));
        out.transition = Some(status);
        debug!(
            event = "turn_finished",
            session_id = %session_id,
            turn_id = %turn_id,
            status = status.as_str()
        );
    }
}

fn progress(
    ctx: &mut SessionContext,
    frame: &EventFrame,
    owned: bool,
    event_type: &str,
    payload: &Value,
    instructions: &mut Vec<RenderInstruction>,
) {
    if owned {
        if let Some(turn) = ctx.running_turn(frame) {
            turn.record_event(event_type, payload);
        }
    }
    instructions.push(progress_instruction(ctx.profile, event_type, payload));
}

fn session_tokens(
    target: &str,
    payload: &Value,
    registry: &mut SessionRegistry,
) -> Option<SessionUpdate> {
    let totals = (
        number(payload, &["total_input"]),
        number(payload, &["total_output"]),
    );
    match totals {
        (None, None) => registry.add_tokens(
            target,
            number(payload, &["statement_input"]).unwrap_or(0),
            number(payload, &["statement_output"]).unwrap_or(0),
        ),
        (input, output) => {
            let current = registry
                .entry(target)
                .map(|entry| (entry.input_tokens, entry.output_tokens))
                .unwrap_or_default();
            registry.apply_token_totals(
                target,
                input.unwrap_or(current.0),
                output.unwrap_or(current.1),
            )
        }
    }
}

fn override_warning(payload: &Value) -> String {
    let requested = text(payload, &["requested_profile"]);
    let fallback = text(payload, &["fallback_profile"]);
    let mut warning = match (requested, fallback) {
        (Some(requested), Some(fallback)) => {
            format!("Profile @{requested} unavailable, using @{fallback}")
        }
        (Some(requested), None) => format!("Profile @{requested} unavailable"),
        _ => "Profile override failed".to_string(),
    };
    if let Some(reason) = text(payload, &["reason"]) {
        warning.push_str(": ");
        warning.push_str(reason);
    }
    if requested.is_none() && fallback.is_none() {
        warn!(event = "profile_override_failed_without_profiles");
    }
    warning
}
