use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use stagecast_core::{ProfileType, DEFAULT_MAX_FRAME_BYTES};
use stagecast_session::LifecycleConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "stagecast")]
#[command(about = "Render agent progress streams and stored turns", long_about = None)]
pub struct Cli {
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Command {
    /// Route a live push stream and print render instructions as NDJSON
    Live(LiveArgs),
    /// Rebuild the render instructions of a stored turn
    Replay(ReplayArgs),
    /// Print one harmonized title
    Title(TitleArgs),
}

#[derive(Args, Debug)]
pub struct LiveArgs {
    #[arg(long, default_value = "")]
    pub session: String,
    #[arg(long, default_value = "")]
    pub profile: String,
    /// Read the stream from a file instead of stdin
    #[arg(long)]
    pub input: Option<PathBuf>,
    /// Store the finished turn so it can be replayed
    #[arg(long)]
    pub record_db: Option<PathBuf>,
    /// Request a cancel this long after the stream starts
    #[arg(long)]
    pub cancel_after_ms: Option<u64>,
    #[arg(long)]
    pub cancel_grace_ms: Option<u64>,
    #[arg(long)]
    pub cancel_failsafe_ms: Option<u64>,
    #[arg(long)]
    pub max_frame_bytes: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// A turn record as JSON
    #[arg(long, conflicts_with_all = ["db", "session", "turn"])]
    pub record: Option<PathBuf>,
    #[arg(long)]
    pub db: Option<PathBuf>,
    #[arg(long)]
    pub session: Option<String>,
    #[arg(long)]
    pub turn: Option<String>,
}

#[derive(Args, Debug)]
pub struct TitleArgs {
    #[arg(long)]
    pub profile: String,
    #[arg(long)]
    pub event: String,
    #[arg(long, default_value = "{}")]
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub session_id: String,
    pub profile: ProfileType,
    pub input: Option<PathBuf>,
    pub record_db: Option<PathBuf>,
    pub cancel_after: Option<Duration>,
    pub lifecycle: LifecycleConfig,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaySource {
    File(PathBuf),
    Store {
        db: PathBuf,
        session_id: String,
        turn_id: String,
    },
}

pub fn load_live_config(args: LiveArgs) -> Result<LiveConfig> {
    load_live_config_with(args, &env_value)
}

fn load_live_config_with(args: LiveArgs, env: &dyn Fn(&str) -> Option<String>) -> Result<LiveConfig> {
    let session_id = resolve_text(&args.session, "STAGECAST_SESSION_ID", env)
        .unwrap_or_else(|| format!("pid-{}", std::process::id()));
    let profile = match resolve_text(&args.profile, "STAGECAST_PROFILE", env) {
        Some(raw) => raw
            .parse::<ProfileType>()
            .with_context(|| format!("invalid profile {raw:?}"))?,
        None => ProfileType::default(),
    };
    let record_db = args
        .record_db
        .or_else(|| env("STAGECAST_DB").map(PathBuf::from));

    let defaults = LifecycleConfig::default();
    let cancel_grace = resolve_millis(args.cancel_grace_ms, "STAGECAST_CANCEL_GRACE_MS", env)?
        .unwrap_or(defaults.cancel_grace);
    let cancel_failsafe =
        resolve_millis(args.cancel_failsafe_ms, "STAGECAST_CANCEL_FAILSAFE_MS", env)?
            .unwrap_or(defaults.cancel_failsafe);
    if cancel_failsafe < cancel_grace {
        bail!(
            "cancel failsafe ({}ms) must not be shorter than the grace period ({}ms)",
            cancel_failsafe.as_millis(),
            cancel_grace.as_millis()
        );
    }

    let max_frame_bytes = match args.max_frame_bytes {
        Some(value) => value,
        None => match env("STAGECAST_MAX_FRAME_BYTES") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid STAGECAST_MAX_FRAME_BYTES {raw:?}"))?,
            None => DEFAULT_MAX_FRAME_BYTES,
        },
    };

    Ok(LiveConfig {
        session_id,
        profile,
        input: args.input,
        record_db,
        cancel_after: args.cancel_after_ms.map(Duration::from_millis),
        lifecycle: LifecycleConfig {
            cancel_grace,
            cancel_failsafe,
        },
        max_frame_bytes,
    })
}

pub fn replay_source(args: ReplayArgs) -> Result<ReplaySource> {
    replay_source_with(args, &env_value)
}

fn replay_source_with(args: ReplayArgs, env: &dyn Fn(&str) -> Option<String>) -> Result<ReplaySource> {
    if let Some(path) = args.record {
        return Ok(ReplaySource::File(path));
    }
    let db = args
        .db
        .or_else(|| env("STAGECAST_DB").map(PathBuf::from))
        .context("either --record or --db (or STAGECAST_DB) is required")?;
    let session_id = args
        .session
        .filter(|value| !value.trim().is_empty())
        .or_else(|| env("STAGECAST_SESSION_ID"))
        .context("--session is required when replaying from a database")?;
    let turn_id = args
        .turn
        .filter(|value| !value.trim().is_empty())
        .context("--turn is required when replaying from a database")?;
    Ok(ReplaySource::Store {
        db,
        session_id,
        turn_id,
    })
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn resolve_text(flag: &str, key: &str, env: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    env(key).map(|value| value.trim().to_string())
}

fn resolve_millis(
    flag: Option<u64>,
    key: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<Option<Duration>> {
    if let Some(value) = flag {
        return Ok(Some(Duration::from_millis(value)));
    }
    match env(key) {
        Some(raw) => {
            let millis: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {key} {raw:?}"))?;
            Ok(Some(Duration::from_millis(millis)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn live_args() -> LiveArgs {
        LiveArgs {
            session: String::new(),
            profile: String::new(),
            input: None,
            record_db: None,
            cancel_after_ms: None,
            cancel_grace_ms: None,
            cancel_failsafe_ms: None,
            max_frame_bytes: None,
        }
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn flags_win_over_environment() {
        let mut args = live_args();
        args.session = "flag-session".to_string();
        args.cancel_grace_ms = Some(200);
        let env = env_from(&[
            ("STAGECAST_SESSION_ID", "env-session"),
            ("STAGECAST_PROFILE", "rag-focused"),
            ("STAGECAST_CANCEL_GRACE_MS", "900"),
            ("STAGECAST_MAX_FRAME_BYTES", "4096"),
        ]);
        let config = load_live_config_with(args, &env).expect("config");
        assert_eq!(config.session_id, "flag-session");
        assert_eq!(config.profile, ProfileType::RagFocused);
        assert_eq!(config.lifecycle.cancel_grace, Duration::from_millis(200));
        assert_eq!(config.lifecycle.cancel_failsafe, Duration::from_secs(10));
        assert_eq!(config.max_frame_bytes, 4096);
    }

    #[test]
    fn defaults_apply_without_flags_or_environment() {
        let config = load_live_config_with(live_args(), &env_from(&[])).expect("config");
        assert!(config.session_id.starts_with("pid-"));
        assert_eq!(config.profile, ProfileType::ToolEnabled);
        assert_eq!(config.lifecycle, LifecycleConfig::default());
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert!(config.record_db.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let env = env_from(&[("STAGECAST_PROFILE", "wizard")]);
        assert!(load_live_config_with(live_args(), &env).is_err());

        let mut args = live_args();
        args.cancel_grace_ms = Some(5_000);
        args.cancel_failsafe_ms = Some(1_000);
        assert!(load_live_config_with(args, &env_from(&[])).is_err());
    }

    #[test]
    fn replay_source_prefers_record_file() {
        let args = ReplayArgs {
            record: Some(PathBuf::from("turn.json")),
            db: None,
            session: None,
            turn: None,
        };
        assert_eq!(
            replay_source_with(args, &env_from(&[])).expect("source"),
            ReplaySource::File(PathBuf::from("turn.json"))
        );
    }

    #[test]
    fn replay_source_reads_database_from_environment() {
        let args = ReplayArgs {
            record: None,
            db: None,
            session: Some("s1".to_string()),
            turn: Some("t1".to_string()),
        };
        let env = env_from(&[("STAGECAST_DB", "/tmp/turns.db")]);
        assert_eq!(
            replay_source_with(args, &env).expect("source"),
            ReplaySource::Store {
                db: PathBuf::from("/tmp/turns.db"),
                session_id: "s1".to_string(),
                turn_id: "t1".to_string(),
            }
        );

        let missing_turn = ReplayArgs {
            record: None,
            db: Some(PathBuf::from("x.db")),
            session: Some("s1".to_string()),
            turn: None,
        };
        assert!(replay_source_with(missing_turn, &env_from(&[])).is_err());
    }
}
