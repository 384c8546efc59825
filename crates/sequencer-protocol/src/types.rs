//! Wire/domain data shapes shared by protocol and model (§3.1).
//!
//! Every type here round-trips through JSON as `camelCase`, matching the
//! browser client's field naming (`clientSeq`, `stepCount`, `playerId`, ...).

use serde::{Deserialize, Serialize};

use crate::limits::MAX_STEPS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterLock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie: Option<bool>,
}

impl ParameterLock {
    pub fn is_empty(&self) -> bool {
        self.pitch.is_none() && self.volume.is_none() && self.tie.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FmParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harmonicity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulation_index: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub name: String,
    pub sample_id: String,
    /// Always exactly `MAX_STEPS` long; `step_count` windows the active region.
    pub steps: Vec<bool>,
    /// Always exactly `MAX_STEPS` long.
    pub parameter_locks: Vec<Option<ParameterLock>>,
    pub volume: f64,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub soloed: bool,
    pub transpose: i32,
    pub step_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swing: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fm_params: Option<FmParams>,
}

impl Track {
    pub fn new(id: impl Into<String>, name: impl Into<String>, sample_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sample_id: sample_id.into(),
            steps: vec![false; MAX_STEPS],
            parameter_locks: vec![None; MAX_STEPS],
            volume: 0.8,
            muted: false,
            soloed: false,
            transpose: 0,
            step_count: 16,
            swing: None,
            fm_params: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverbParams {
    pub decay: f64,
    pub wet: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayParams {
    pub feedback: f64,
    pub wet: f64,
    /// One of `VALID_DELAY_TIMES`; validated on every write path, never
    /// trusted from raw deserialization alone.
    pub time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChorusParams {
    pub frequency: f64,
    pub depth: f64,
    pub wet: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistortionParams {
    pub amount: f64,
    pub wet: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectsState {
    pub reverb: ReverbParams,
    pub delay: DelayParams,
    pub chorus: ChorusParams,
    pub distortion: DistortionParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteName {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl NoteName {
    pub const ALL: [NoteName; 12] = [
        NoteName::C,
        NoteName::CSharp,
        NoteName::D,
        NoteName::DSharp,
        NoteName::E,
        NoteName::F,
        NoteName::FSharp,
        NoteName::G,
        NoteName::GSharp,
        NoteName::A,
        NoteName::ASharp,
        NoteName::B,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleId {
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    Chromatic,
    MinorPentatonic,
    MajorPentatonic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scale {
    pub root: NoteName,
    pub scale_id: ScaleId,
    pub locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub tracks: Vec<Track>,
    pub tempo: i32,
    pub swing: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<EffectsState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_region: Option<LoopRegion>,
    pub version: u32,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            tempo: 120,
            swing: 0,
            effects: None,
            scale: None,
            loop_region: None,
            version: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_accessed_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remixed_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remixed_from_name: Option<String>,
    #[serde(default)]
    pub remix_count: u64,
    #[serde(default)]
    pub immutable: bool,
    pub state: SessionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: String,
    pub connected_at: i64,
    pub last_message_at: i64,
    pub message_count: u64,
    pub color_index: u32,
    pub animal: String,
    pub color: String,
    pub name: String,
}
