pub mod coordination;
pub mod lifecycle;
pub mod live;
pub mod registry;
pub mod replay;
pub mod router;
pub mod turn;

pub use coordination::CoordinationRouter;
pub use lifecycle::{
    Controls, LifecycleConfig, LifecycleEffect, LifecycleState, TurnLifecycle,
    DEFAULT_CANCEL_FAILSAFE, DEFAULT_CANCEL_GRACE,
};
pub use live::{
    decode_stream, start_live_routing, LiveCommand, LiveConfig, LiveError, LiveHandle,
    LiveOutcome, LiveUpdate, SharedRegistry, CONNECTION_LOST_TITLE,
};
pub use registry::{ChildSession, ChildStatus, SessionEntry, SessionRegistry, SessionUpdate};
pub use replay::{replay_turn, Fidelity, Replay, HISTORY_UNAVAILABLE_TITLE};
pub use router::{
    finalize_instruction, progress_instruction, EventRouter, RouteOutput, SessionContext,
    FORCED_STOP_TITLE,
};
pub use turn::Turn;
