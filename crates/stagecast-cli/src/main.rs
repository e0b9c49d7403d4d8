mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Cli, Command, LiveConfig, ReplaySource, TitleArgs};
use serde_json::Value;
use stagecast_core::{title, ProfileType, RenderInstruction, TurnRecord};
use stagecast_session::{
    replay_turn, start_live_routing, EventRouter, LiveCommand, Replay, SessionContext,
    SessionRegistry,
};
use stagecast_storage::{SqliteTurnStore, TurnStore};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Command::Live(args) => run_live(config::load_live_config(args)?).await,
        Command::Replay(args) => run_replay(config::replay_source(args)?),
        Command::Title(args) => run_title(args),
    }
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("STAGECAST_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn run_live(config: LiveConfig) -> Result<()> {
    let registry = Arc::new(RwLock::new(SessionRegistry::new()));
    registry.write().await.set_current(&config.session_id);
    let context =
        SessionContext::with_config(config.session_id.clone(), config.profile, config.lifecycle);

    let reader: Box<dyn AsyncRead + Unpin + Send> = match &config.input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let live_config = stagecast_session::LiveConfig {
        max_frame_bytes: config.max_frame_bytes,
        ..stagecast_session::LiveConfig::default()
    };
    let mut handle = start_live_routing(
        reader,
        context,
        registry,
        EventRouter::new(),
        live_config,
    );

    let commands = handle.commands();
    let cancel_after = config.cancel_after;
    tokio::spawn(async move {
        match cancel_after {
            Some(delay) => tokio::time::sleep(delay).await,
            None => {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
            }
        }
        let _ = commands.send(LiveCommand::Cancel).await;
    });

    let mut stdout = tokio::io::stdout();
    while let Some(update) = handle.recv().await {
        for session_update in &update.session_updates {
            info!(event = "session_update", update = ?session_update);
        }
        for instruction in &update.instructions {
            if let Some(line) = encode_line(instruction) {
                stdout.write_all(&line).await?;
            }
        }
        stdout.flush().await?;
    }

    match handle.join().await {
        Ok(outcome) => {
            info!(
                event = "live_done",
                session_id = %outcome.session_id,
                frames_routed = outcome.frames_routed,
                frames_dropped = outcome.frames_dropped,
                forced_stop = outcome.forced_stop
            );
            if let Some(record) = &outcome.record {
                persist(&config, record)?;
            }
            Ok(())
        }
        Err(err) => {
            if let Some(record) = err.record() {
                if let Err(persist_err) = persist(&config, record) {
                    warn!(event = "record_persist_failed", error = %persist_err);
                }
            }
            Err(err.into())
        }
    }
}

/// One NDJSON output line; an instruction that cannot be encoded is logged and
/// skipped.
fn encode_line(instruction: &RenderInstruction) -> Option<Vec<u8>> {
    match instruction.encode() {
        Ok(line) => Some(line),
        Err(err) => {
            warn!(
                event = "instruction_encode_failed",
                kind = instruction.kind.as_str(),
                error = %err
            );
            None
        }
    }
}

fn persist(config: &LiveConfig, record: &TurnRecord) -> Result<()> {
    let Some(path) = &config.record_db else {
        return Ok(());
    };
    let store = SqliteTurnStore::open(path)
        .with_context(|| format!("failed to open turn store {}", path.display()))?;
    store.save_turn(record)?;
    info!(
        event = "turn_recorded",
        session_id = %record.session_id,
        turn_id = %record.turn_id,
        status = record.status.as_str()
    );
    Ok(())
}

fn load_replay(source: &ReplaySource) -> Result<Replay> {
    let record: TurnRecord = match source {
        ReplaySource::File(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&raw).context("failed to parse turn record")?
        }
        ReplaySource::Store {
            db,
            session_id,
            turn_id,
        } => SqliteTurnStore::open(db)
            .with_context(|| format!("failed to open turn store {}", db.display()))?
            .fetch_turn(session_id, turn_id)?,
    };
    Ok(replay_turn(&record))
}

fn run_replay(source: ReplaySource) -> Result<()> {
    let replay = load_replay(&source)?;
    info!(
        event = "replay",
        fidelity = replay.fidelity.as_str(),
        instructions = replay.instructions.len()
    );
    write_ndjson(&replay.instructions)
}

fn run_title(args: TitleArgs) -> Result<()> {
    let profile: ProfileType = args
        .profile
        .parse()
        .with_context(|| format!("invalid profile {:?}", args.profile))?;
    let payload: Value = serde_json::from_str(&args.payload).context("payload must be JSON")?;
    println!("{}", title(profile, &args.event, &payload));
    Ok(())
}

fn write_ndjson(instructions: &[RenderInstruction]) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for instruction in instructions {
        if let Some(line) = encode_line(instruction) {
            out.write_all(&line)?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagecast_core::{RenderKind, StoredEvent, TurnStatus};
    use stagecast_session::Fidelity;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn replay_from_record_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        let record = json!({
            "turn_id": "t1",
            "session_id": "s1",
            "status": "cancelled",
            "error_message": "Process cancelled by user."
        });
        file.write_all(record.to_string().as_bytes())
            .expect("write record");

        let replay =
            load_replay(&ReplaySource::File(file.path().to_path_buf())).expect("replay");
        assert_eq!(replay.fidelity, Fidelity::Partial);
        assert_eq!(replay.instructions.len(), 1);
        assert_eq!(replay.instructions[0].kind, RenderKind::StatusFinalize);
        assert_eq!(replay.instructions[0].title, "Process cancelled by user.");
    }

    #[test]
    fn replay_from_turn_store() {
        let dir = TempDir::new().expect("temp dir");
        let db = dir.path().join("turns.db");
        let mut record = TurnRecord::new("s1", "t1", ProfileType::ToolEnabled, TurnStatus::Completed);
        record.execution_trace = Some(vec![StoredEvent::new(
            "plan_generated",
            json!({"phase_count": 3}),
        )]);
        SqliteTurnStore::open(&db)
            .expect("open store")
            .save_turn(&record)
            .expect("save");

        let replay = load_replay(&ReplaySource::Store {
            db,
            session_id: "s1".to_string(),
            turn_id: "t1".to_string(),
        })
        .expect("replay");
        assert_eq!(replay.fidelity, Fidelity::Full);
        assert_eq!(replay.instructions[0].title, "Plan generated (3 phases)");
        assert!(replay.instructions[0].is_terminal);
    }

    #[tokio::test]
    async fn instructions_larger_than_the_input_limit_do_not_end_the_stream() {
        let dir = TempDir::new().expect("temp dir");
        let input = dir.path().join("stream.sse");
        let db = dir.path().join("live.db");
        let goal = "g".repeat(600);
        let stream = format!(
            "event: phase_start\ndata: {{\"phase_num\":1,\"goal\":\"{goal}\"}}\n\n\
event: final_answer\ndata: {{\"final_answer\":\"done\",\"turn_id\":\"t1\"}}\n\n"
        );
        std::fs::write(&input, stream).expect("write stream");

        let config = LiveConfig {
            session_id: "s1".to_string(),
            profile: ProfileType::ToolEnabled,
            input: Some(input),
            record_db: Some(db.clone()),
            cancel_after: None,
            lifecycle: stagecast_session::LifecycleConfig::default(),
            max_frame_bytes: 1024,
        };
        run_live(config).await.expect("healthy stream");

        let stored = SqliteTurnStore::open(&db)
            .expect("reopen")
            .turns_for_session("s1")
            .expect("turns");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].final_answer.as_deref(), Some("done"));
    }

    #[test]
    fn encoded_lines_are_newline_terminated_json() {
        let instruction = RenderInstruction::status("x".repeat(4096), json!({"n": 1}));
        let line = encode_line(&instruction).expect("encodes");
        assert_eq!(line.last(), Some(&b'\n'));
        let decoded: RenderInstruction =
            serde_json::from_slice(&line[..line.len() - 1]).expect("decode");
        assert_eq!(decoded, instruction);
    }

    #[test]
    fn finished_turn_is_recorded_when_database_is_configured() {
        let dir = TempDir::new().expect("temp dir");
        let db = dir.path().join("live.db");
        let mut config = LiveConfig {
            session_id: "s1".to_string(),
            profile: ProfileType::ToolEnabled,
            input: None,
            record_db: None,
            cancel_after: None,
            lifecycle: stagecast_session::LifecycleConfig::default(),
            max_frame_bytes: 1024,
        };
        let record = TurnRecord::new("s1", "t1", ProfileType::ToolEnabled, TurnStatus::Error);
        persist(&config, &record).expect("no-op persist");
        assert!(!db.exists());

        config.record_db = Some(db.clone());
        persist(&config, &record).expect("persist");
        let stored = SqliteTurnStore::open(&db)
            .expect("reopen")
            .fetch_turn("s1", "t1")
            .expect("fetch");
        assert_eq!(stored.status, TurnStatus::Error);
    }
}
