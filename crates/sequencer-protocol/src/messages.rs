//! Client commands and server broadcasts (§4.3, §6.1).
//!
//! Mirrors `rt_protocol::WsMessage`: a single `#[serde(tag = "type")]`
//! discriminated union per direction, `snake_case` variant names matching
//! the wire `type` tags verbatim.

use serde::{Deserialize, Serialize};

use crate::types::{CursorPosition, EffectsState, FmParams, ParameterLock, Scale, SessionState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTrackPayload {
    pub track_id: String,
    pub name: String,
    pub sample_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    // --- mutating (authoritative) ---
    ToggleStep {
        track_id: String,
        step: u32,
    },
    SetTempo {
        tempo: i32,
    },
    SetSwing {
        swing: i32,
    },
    SetParameterLock {
        track_id: String,
        step: u32,
        #[serde(default)]
        lock: Option<ParameterLock>,
    },
    AddTrack(AddTrackPayload),
    DeleteTrack {
        track_id: String,
    },
    ClearTrack {
        track_id: String,
    },
    SetTrackSample {
        track_id: String,
        sample_id: String,
    },
    SetTrackVolume {
        track_id: String,
        volume: f64,
    },
    SetTrackTranspose {
        track_id: String,
        transpose: i32,
    },
    SetTrackStepCount {
        track_id: String,
        step_count: u32,
    },
    SetTrackSwing {
        track_id: String,
        #[serde(default)]
        swing: Option<i32>,
    },
    SetEffects {
        effects: serde_json::Value,
    },
    SetScale {
        #[serde(default)]
        scale: Option<Scale>,
    },
    SetFmParams {
        track_id: String,
        #[serde(default)]
        fm_params: Option<FmParams>,
    },
    CopySequence {
        source_track_id: String,
        dest_track_id: String,
    },
    MoveSequence {
        source_track_id: String,
        dest_track_id: String,
    },
    SetSessionName {
        #[serde(default)]
        name: Option<String>,
    },
    BatchClearSteps {
        track_id: String,
        steps: Vec<u32>,
    },
    BatchSetParameterLocks {
        track_id: String,
        locks: Vec<(u32, Option<ParameterLock>)>,
    },
    SetLoopRegion {
        start: u32,
        end: u32,
    },

    // --- read-only ---
    Play,
    Stop,
    StateHash {
        hash: String,
    },
    RequestSnapshot,
    ClockSyncRequest {
        client_time: i64,
    },
    CursorMove {
        #[serde(flatten)]
        position: CursorPosition,
        #[serde(default)]
        track_id: Option<String>,
    },
    MuteTrack {
        track_id: String,
        muted: bool,
    },
    SoloTrack {
        track_id: String,
        soloed: bool,
    },
}

/// Mutating command wire tags, the authoritative set from §4.3. Order
/// matches spec.md's listing; length (21) is asserted in tests.
pub const MUTATING_TYPES: &[&str] = &[
    "toggle_step",
    "set_tempo",
    "set_swing",
    "set_parameter_lock",
    "add_track",
    "delete_track",
    "clear_track",
    "set_track_sample",
    "set_track_volume",
    "set_track_transpose",
    "set_track_step_count",
    "set_track_swing",
    "set_effects",
    "set_scale",
    "set_fm_params",
    "copy_sequence",
    "move_sequence",
    "set_session_name",
    "batch_clear_steps",
    "batch_set_parameter_locks",
    "set_loop_region",
];

pub const READ_ONLY_TYPES: &[&str] = &[
    "play",
    "stop",
    "state_hash",
    "request_snapshot",
    "clock_sync_request",
    "cursor_move",
    "mute_track",
    "solo_track",
];

/// The single branch point for immutability enforcement (§4.3): no
/// per-handler mutability checks exist anywhere else in the engine.
pub fn is_state_mutating_message(type_tag: &str) -> bool {
    MUTATING_TYPES.contains(&type_tag)
}

impl ClientCommand {
    /// The wire `type` tag for this command, without a round-trip through
    /// JSON. Kept in lock-step with the `#[serde(tag = "type")]` attribute
    /// by `tests::type_tag_matches_serde_tag`.
    pub fn type_tag(&self) -> &'static str {
        match self {
            ClientCommand::ToggleStep { .. } => "toggle_step",
            ClientCommand::SetTempo { .. } => "set_tempo",
            ClientCommand::SetSwing { .. } => "set_swing",
            ClientCommand::SetParameterLock { .. } => "set_parameter_lock",
            ClientCommand::AddTrack(_) => "add_track",
            ClientCommand::DeleteTrack { .. } => "delete_track",
            ClientCommand::ClearTrack { .. } => "clear_track",
            ClientCommand::SetTrackSample { .. } => "set_track_sample",
            ClientCommand::SetTrackVolume { .. } => "set_track_volume",
            ClientCommand::SetTrackTranspose { .. } => "set_track_transpose",
            ClientCommand::SetTrackStepCount { .. } => "set_track_step_count",
            ClientCommand::SetTrackSwing { .. } => "set_track_swing",
            ClientCommand::SetEffects { .. } => "set_effects",
            ClientCommand::SetScale { .. } => "set_scale",
            ClientCommand::SetFmParams { .. } => "set_fm_params",
            ClientCommand::CopySequence { .. } => "copy_sequence",
            ClientCommand::MoveSequence { .. } => "move_sequence",
            ClientCommand::SetSessionName { .. } => "set_session_name",
            ClientCommand::BatchClearSteps { .. } => "batch_clear_steps",
            ClientCommand::BatchSetParameterLocks { .. } => "batch_set_parameter_locks",
            ClientCommand::SetLoopRegion { .. } => "set_loop_region",
            ClientCommand::Play => "play",
            ClientCommand::Stop => "stop",
            ClientCommand::StateHash { .. } => "state_hash",
            ClientCommand::RequestSnapshot => "request_snapshot",
            ClientCommand::ClockSyncRequest { .. } => "clock_sync_request",
            ClientCommand::CursorMove { .. } => "cursor_move",
            ClientCommand::MuteTrack { .. } => "mute_track",
            ClientCommand::SoloTrack { .. } => "solo_track",
        }
    }

    pub fn is_mutating(&self) -> bool {
        is_state_mutating_message(self.type_tag())
    }
}

/// Inbound frame envelope: the command plus the optional per-client
/// sequencing fields carried by every message (§6.1).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientMessage {
    #[serde(flatten)]
    pub command: ClientCommand,
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub ack: Option<u64>,
}

/// Envelope shared by every state-mutating broadcast (§6.1, §8.1): a
/// monotone `seq` plus, when the triggering command carried one, the
/// `client_seq` it should resolve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEnvelope {
    pub seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_seq: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterLockEffect {
    pub track_id: String,
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<ParameterLock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerBroadcast {
    // --- state-mutating: one-to-one with ClientCommand's mutating set ---
    StepToggled {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
        step: u32,
        value: bool,
    },
    TempoSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        tempo: i32,
    },
    SwingSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        swing: i32,
    },
    ParameterLockSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        #[serde(flatten)]
        effect: ParameterLockEffect,
    },
    TrackAdded {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
    },
    TrackDeleted {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
    },
    TrackCleared {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
    },
    TrackSampleSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
        sample_id: String,
    },
    TrackVolumeSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
        volume: f64,
    },
    TrackTransposeSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
        transpose: i32,
    },
    TrackStepCountSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
        step_count: u32,
    },
    TrackSwingSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        swing: Option<i32>,
    },
    EffectsSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        effects: EffectsState,
    },
    ScaleSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<Scale>,
    },
    FmParamsSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fm_params: Option<FmParams>,
    },
    SequenceCopied {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        source_track_id: String,
        dest_track_id: String,
    },
    SequenceMoved {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        source_track_id: String,
        dest_track_id: String,
    },
    SessionNameSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    StepsBatchCleared {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
        steps: Vec<u32>,
    },
    ParameterLocksBatchSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        track_id: String,
        locks: Vec<(u32, Option<ParameterLock>)>,
    },
    LoopRegionSet {
        #[serde(flatten)]
        envelope: BroadcastEnvelope,
        player_id: String,
        start: u32,
        end: u32,
    },

    // --- informational, no serverSeq ---
    CursorMoved {
        player_id: String,
        #[serde(flatten)]
        position: CursorPosition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        track_id: Option<String>,
    },
    PlayerJoined {
        player: crate::types::PlayerInfo,
    },
    PlayerLeft {
        player_id: String,
    },
    PlaybackStarted {
        player_id: String,
    },
    PlaybackStopped {
        player_id: String,
    },
    ClockSyncResponse {
        client_time: i64,
        server_time: i64,
    },
    Snapshot {
        state: SessionState,
        players: Vec<crate::types::PlayerInfo>,
        player_id: String,
        server_seq: u64,
        playing_player_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        immutable: Option<bool>,
    },
    Error {
        message: String,
    },
    StateSync {
        state: SessionState,
        player_count: usize,
    },
    TrackMuted {
        player_id: String,
        track_id: String,
        muted: bool,
    },
    TrackSoloed {
        player_id: String,
        track_id: String,
        soloed: bool,
    },
}

impl ServerBroadcast {
    /// `Some(seq)` for state-mutating broadcasts (§4.8), `None` for the
    /// informational ones that never carry a sequence number.
    pub fn server_seq(&self) -> Option<u64> {
        use ServerBroadcast::*;
        match self {
            StepToggled { envelope, .. }
            | TempoSet { envelope, .. }
            | SwingSet { envelope, .. }
            | ParameterLockSet { envelope, .. }
            | TrackAdded { envelope, .. }
            | TrackDeleted { envelope, .. }
            | TrackCleared { envelope, .. }
            | TrackSampleSet { envelope, .. }
            | TrackVolumeSet { envelope, .. }
            | TrackTransposeSet { envelope, .. }
            | TrackStepCountSet { envelope, .. }
            | TrackSwingSet { envelope, .. }
            | EffectsSet { envelope, .. }
            | ScaleSet { envelope, .. }
            | FmParamsSet { envelope, .. }
            | SequenceCopied { envelope, .. }
            | SequenceMoved { envelope, .. }
            | SessionNameSet { envelope, .. }
            | StepsBatchCleared { envelope, .. }
            | ParameterLocksBatchSet { envelope, .. }
            | LoopRegionSet { envelope, .. } => Some(envelope.seq),
            _ => None,
        }
    }
}
