pub mod events;
pub mod frame;
pub mod payload;
pub mod profile;
pub mod record;
pub mod render;
pub mod titles;

pub use events::{classify, EventFamily, EventType, FrameKind, TerminalKind};
pub use frame::{
    encode_ndjson, DecodeReport, EventFrame, FrameError, SseFrameDecoder, DEFAULT_EVENT_NAME,
    DEFAULT_MAX_FRAME_BYTES,
};
pub use profile::{ParseProfileError, ProfileType};
pub use record::{StoredEvent, TurnRecord, TurnStatus};
pub use render::{RenderInstruction, RenderKind};
pub use titles::{title, title_for};
