//! Live pull loop: read chunks, decode, route, hand updates to the sink.
//!
//! One task per stream. Streams share nothing but the registry, which is only
//! locked for the duration of a single `route` call.

use crate::lifecycle::Controls;
use crate::registry::{SessionRegistry, SessionUpdate};
use crate::router::{EventRouter, RouteOutput, SessionContext};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;
use stagecast_core::{
    DecodeReport, RenderInstruction, SseFrameDecoder, TurnRecord, TurnStatus,
    DEFAULT_MAX_FRAME_BYTES,
};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

pub const CONNECTION_LOST_TITLE: &str = "Connection lost before the turn completed";

pub type SharedRegistry = Arc<RwLock<SessionRegistry>>;

#[derive(Debug, Clone, Copy)]
pub struct LiveConfig {
    pub max_frame_bytes: usize,
    pub read_buffer_bytes: usize,
    pub channel_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            read_buffer_bytes: 8192,
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveCommand {
    Cancel,
}

/// Everything one routing step produced, plus the control state after it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveUpdate {
    pub session_id: String,
    pub instructions: Vec<RenderInstruction>,
    pub session_updates: Vec<SessionUpdate>,
    pub transition: Option<TurnStatus>,
    pub controls: Controls,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveOutcome {
    pub session_id: String,
    pub record: Option<TurnRecord>,
    pub frames_routed: u64,
    pub frames_dropped: u64,
    pub forced_stop: bool,
}

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("stream for session {session_id} ended before the turn completed")]
    StreamEnded {
        session_id: String,
        record: Option<Box<TurnRecord>>,
    },
    #[error("transport error on session {session_id}: {source}")]
    Transport {
        session_id: String,
        #[source]
        source: io::Error,
        record: Option<Box<TurnRecord>>,
    },
    #[error("live routing task failed: {0}")]
    Task(String),
}

impl LiveError {
    /// The turn as it was failed by the loop, when there was one.
    pub fn record(&self) -> Option<&TurnRecord> {
        match self {
            LiveError::StreamEnded { record, .. } | LiveError::Transport { record, .. } => {
                record.as_deref()
            }
            LiveError::Task(_) => None,
        }
    }
}

pub struct LiveHandle {
    pub updates: mpsc::Receiver<LiveUpdate>,
    commands: mpsc::Sender<LiveCommand>,
    task: JoinHandle<Result<LiveOutcome, LiveError>>,
}

impl LiveHandle {
    pub fn commands(&self) -> mpsc::Sender<LiveCommand> {
        self.commands.clone()
    }

    /// Fire-and-forget cancel; completion shows up as a terminal frame or the failsafe.
    pub async fn cancel(&self) -> bool {
        self.commands.send(LiveCommand::Cancel).await.is_ok()
    }

    pub async fn recv(&mut self) -> Option<LiveUpdate> {
        self.updates.recv().await
    }

    /// Waits for the loop to end. Updates not yet received are discarded.
    pub async fn join(self) -> Result<LiveOutcome, LiveError> {
        drop(self.updates);
        self.task
            .await
            .map_err(|err| LiveError::Task(err.to_string()))?
    }
}

struct ReadState<R> {
    reader: R,
    decoder: SseFrameDecoder,
    buf: Vec<u8>,
    done: bool,
}

/// Lazy per-connection decode: one report per chunk read, a final report from
/// the flushed decoder at EOF, then the stream ends. Not restartable.
pub fn decode_stream<R>(
    reader: R,
    max_frame_bytes: usize,
    read_buffer_bytes: usize,
) -> impl Stream<Item = io::Result<DecodeReport>>
where
    R: AsyncRead + Unpin,
{
    let state = ReadState {
        reader,
        decoder: SseFrameDecoder::new(max_frame_bytes),
        buf: vec![0u8; read_buffer_bytes.max(1)],
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        match state.reader.read(&mut state.buf).await {
            Ok(0) => {
                state.done = true;
                let report = state.decoder.finish();
                Some((Ok(report), state))
            }
            Ok(read) => {
                let report = state.decoder.push_chunk(&state.buf[..read]);
                Some((Ok(report), state))
            }
            Err(err) => {
                state.done = true;
                Some((Err(err), state))
            }
        }
    })
}

pub fn start_live_routing<R>(
    reader: R,
    context: SessionContext,
    registry: SharedRegistry,
    router: EventRouter,
    config: LiveConfig,
) -> LiveHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (update_tx, update_rx) = mpsc::channel(config.channel_capacity.max(1));
    let (command_tx, command_rx) = mpsc::channel(8);
    let task = tokio::spawn(live_loop(
        reader, context, registry, router, config, update_tx, command_rx,
    ));
    LiveHandle {
        updates: update_rx,
        commands: command_tx,
        task,
    }
}

enum Exit {
    Eof,
    Transport(io::Error),
    ForcedStop,
}

async fn live_loop<R>(
    reader: R,
    mut ctx: SessionContext,
    registry: SharedRegistry,
    router: EventRouter,
    config: LiveConfig,
    tx: mpsc::Sender<LiveUpdate>,
    mut command_rx: mpsc::Receiver<LiveCommand>,
) -> Result<LiveOutcome, LiveError>
where
    R: AsyncRead + Unpin,
{
    let session_id = ctx.session_id.clone();
    registry.write().await.mark_stream_active(&session_id);
    info!(event = "live_stream_start", session_id = %session_id, profile = ctx.profile.as_str());

    let mut reports = Box::pin(decode_stream(
        reader,
        config.max_frame_bytes,
        config.read_buffer_bytes,
    ));
    let mut frames_routed = 0u64;
    let mut frames_dropped = 0u64;
    let mut command_open = true;

    let exit = loop {
        let deadline = ctx.next_deadline();
        tokio::select! {
            next = reports.next() => {
                let report = match next {
                    Some(Ok(report)) => report,
                    Some(Err(err)) => break Exit::Transport(err),
                    None => break Exit::Eof,
                };
                for err in report.errors {
                    frames_dropped += 1;
                    warn!(event = "frame_dropped", session_id = %session_id, error = %err);
                }
                for frame in report.frames {
                    let output = {
                        let mut registry = registry.write().await;
                        router.route(&frame, &mut ctx, &mut registry)
                    };
                    frames_routed += 1;
                    if !output.is_empty() {
                        let _ = tx.send(update(&ctx, output)).await;
                    }
                }
            }
            command = command_rx.recv(), if command_open => {
                match command {
                    Some(LiveCommand::Cancel) => {
                        if ctx.request_cancel(Instant::now()) {
                            info!(event = "cancel_requested", session_id = %session_id);
                            let _ = tx.send(update(&ctx, RouteOutput::default())).await;
                        } else {
                            warn!(
                                event = "cancel_ignored",
                                session_id = %session_id,
                                reason = ignored_cancel_reason(&ctx)
                            );
                        }
                    }
                    None => command_open = false,
                }
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                let instructions = ctx.poll_timers(Instant::now());
                if instructions.is_empty() {
                    continue;
                }
                let forced = ctx.lifecycle().forced_stop();
                let instructions = registry.write().await.admit(&session_id, instructions);
                let output = RouteOutput {
                    instructions,
                    transition: forced.then_some(TurnStatus::Cancelled),
                    ..RouteOutput::default()
                };
                let _ = tx.send(update(&ctx, output)).await;
                if forced {
                    break Exit::ForcedStop;
                }
            }
        }
    };

    registry.write().await.mark_stream_done(&session_id);

    let (lost, transport_error) = match exit {
        Exit::Eof => (ctx.is_running(), None),
        Exit::Transport(err) => (ctx.is_running(), Some(err)),
        Exit::ForcedStop => (false, None),
    };

    if lost {
        if let Some(instruction) = ctx.fail_turn(CONNECTION_LOST_TITLE) {
            let instructions = registry.write().await.admit(&session_id, vec![instruction]);
            let output = RouteOutput {
                instructions,
                transition: Some(TurnStatus::Error),
                ..RouteOutput::default()
            };
            let _ = tx.send(update(&ctx, output)).await;
        }
    }

    let record = ctx.finished_record();
    match transport_error {
        Some(source) => {
            warn!(event = "live_transport_error", session_id = %session_id, error = %source);
            Err(LiveError::Transport {
                session_id,
                source,
                record: record.map(Box::new),
            })
        }
        None if lost => {
            warn!(event = "live_stream_lost", session_id = %session_id);
            Err(LiveError::StreamEnded {
                session_id,
                record: record.map(Box::new),
            })
        }
        None => {
            let forced_stop = ctx.lifecycle().forced_stop();
            debug!(
                event = "live_stream_end",
                session_id = %session_id,
                frames_routed,
                frames_dropped,
                forced_stop
            );
            Ok(LiveOutcome {
                session_id,
                record,
                frames_routed,
                frames_dropped,
                forced_stop,
            })
        }
    }
}

fn update(ctx: &SessionContext, output: RouteOutput) -> LiveUpdate {
    LiveUpdate {
        session_id: ctx.session_id.clone(),
        instructions: output.instructions,
        session_updates: output.session_updates,
        transition: output.transition,
        controls: ctx.controls(),
    }
}

fn ignored_cancel_reason(ctx: &SessionContext) -> &'static str {
    if ctx.is_running() {
        "cancel_already_pending"
    } else {
        "no_running_turn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecast_core::ProfileType;

    #[tokio::test]
    async fn decode_stream_flushes_trailing_frame_at_eof() {
        let raw: &[u8] = b"event: phase_start\ndata: {\"phase_num\":1}\n\nevent: phase_end\ndata: {\"phase_num\":1}";
        let reports: Vec<DecodeReport> = decode_stream(raw, 1024, 7)
            .map(|report| report.expect("read"))
            .collect()
            .await;
        let names: Vec<String> = reports
            .into_iter()
            .flat_map(|report| report.frames)
            .map(|frame| frame.event_name)
            .collect();
        assert_eq!(names, vec!["phase_start".to_string(), "phase_end".to_string()]);
    }

    #[tokio::test]
    async fn completed_stream_returns_the_finished_record() {
        let registry: SharedRegistry = Arc::new(RwLock::new(SessionRegistry::new()));
        registry.write().await.set_current("S1");
        let raw: &[u8] = b"event: plan_generated\ndata: {\"phase_count\":1}\n\n\
event: final_answer\ndata: {\"final_answer\":\"done\"}\n\n";
        let mut handle = start_live_routing(
            raw,
            SessionContext::new("S1", ProfileType::ToolEnabled),
            registry.clone(),
            EventRouter::new(),
            LiveConfig::default(),
        );

        let mut transitions = Vec::new();
        while let Some(update) = handle.recv().await {
            transitions.extend(update.transition);
        }
        let outcome = handle.join().await.expect("outcome");

        assert_eq!(transitions, vec![TurnStatus::Completed]);
        assert_eq!(outcome.frames_routed, 2);
        let record = outcome.record.expect("record");
        assert_eq!(record.final_answer.as_deref(), Some("done"));
        assert!(!registry.read().await.entry("S1").expect("S1").has_active_stream);
    }

    #[test]
    fn ignored_cancels_report_why() {
        let mut ctx = SessionContext::new("S1", ProfileType::ToolEnabled);
        assert!(!ctx.request_cancel(Instant::now()));
        assert_eq!(ignored_cancel_reason(&ctx), "no_running_turn");

        ctx.begin_turn(Some("turn-1"), None);
        assert!(ctx.request_cancel(Instant::now()));
        assert!(!ctx.request_cancel(Instant::now()));
        assert_eq!(ignored_cancel_reason(&ctx), "cancel_already_pending");
    }
}
