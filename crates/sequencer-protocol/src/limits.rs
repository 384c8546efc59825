//! Compile-time constants shared by every wire participant (§6.4).
//!
//! These must stay identical between any client and server implementation;
//! `tests::limits_match_spec_table` pins them against the specification.

pub const MAX_TRACKS: usize = 16;
pub const MAX_STEPS: usize = 128;

pub const MIN_TEMPO: i32 = 60;
pub const MAX_TEMPO: i32 = 180;

pub const MIN_SWING: i32 = 0;
pub const MAX_SWING: i32 = 100;

pub const MIN_VOLUME: f64 = 0.0;
pub const MAX_VOLUME: f64 = 1.0;

pub const MIN_TRANSPOSE: i32 = -24;
pub const MAX_TRANSPOSE: i32 = 24;

pub const MIN_PLOCK_PITCH: i32 = -24;
pub const MAX_PLOCK_PITCH: i32 = 24;

pub const MIN_PLOCK_VOLUME: f64 = 0.0;
pub const MAX_PLOCK_VOLUME: f64 = 1.0;

pub const MIN_CURSOR_POSITION: f64 = 0.0;
pub const MAX_CURSOR_POSITION: f64 = 100.0;

/// 64 KiB, enforced on both HTTP bodies and WS frames.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

pub const MAX_CONCURRENT_STREAMS: usize = 10;

pub const VALID_DELAY_TIMES: &[&str] = &[
    "32n", "16n", "16t", "8n", "8t", "4n", "4t", "2n", "2t", "1n", "1m", "2m", "4m",
];

pub const VALID_STEP_COUNTS: &[u32] = &[
    3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 15, 16, 18, 20, 21, 24, 27, 32, 36, 48, 64, 96, 128,
];

/// The 18 colors x 73 animals identity space (§3.1 `PlayerInfo`).
pub const PLAYER_COLOR_COUNT: u64 = 18;
pub const PLAYER_ANIMAL_COUNT: u64 = 73;

/// `SessionState::version` this build writes and expects on load (§3.5).
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
