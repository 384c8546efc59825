//! Wire protocol shared by the browser client and the session server.
//!
//! Three pieces: compile-time [`limits`] both sides must agree on, the
//! domain [`types`] that make up a session's state, and the tagged
//! [`messages`] exchanged over the websocket. HTTP error shapes live in
//! [`http`].

pub mod http;
pub mod limits;
pub mod messages;
pub mod types;

pub use messages::{
    AddTrackPayload, ClientCommand, ClientMessage, ServerBroadcast, MUTATING_TYPES,
    READ_ONLY_TYPES, is_state_mutating_message,
};
pub use types::{
    ChorusParams, CursorPosition, DelayParams, DistortionParams, EffectsState, FmParams,
    LoopRegion, NoteName, ParameterLock, PlayerInfo, ReverbParams, Scale, ScaleId, Session,
    SessionState, Track,
};
