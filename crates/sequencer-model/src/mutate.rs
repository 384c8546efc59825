//! Pure operations over an in-memory `SessionState` (§4.4, §4.5.3).
//!
//! Each handler looks up its track by id (never by wire index), applies
//! the already-sanitized field, and returns the effect to broadcast. No
//! handler talks to transport or storage — that's the engine's job.

use sequencer_protocol::limits::MAX_TRACKS;
use sequencer_protocol::{ClientCommand, EffectsState, FmParams, ParameterLock, Scale, SessionState, Track};

use crate::validate::{validate_cursor_position, validate_parameter_lock, validate_session_name};

/// The effect of a successfully-applied mutating command, stripped of the
/// envelope (`seq`/`clientSeq`/`playerId`) the engine attaches on broadcast.
/// One variant per mutating command in §4.3, in the same order.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationEffect {
    StepToggled { track_id: String, step: u32, value: bool },
    TempoSet { tempo: i32 },
    SwingSet { swing: i32 },
    ParameterLockSet { track_id: String, step: u32, lock: Option<ParameterLock> },
    TrackAdded { track_id: String },
    TrackDeleted { track_id: String },
    TrackCleared { track_id: String },
    TrackSampleSet { track_id: String, sample_id: String },
    TrackVolumeSet { track_id: String, volume: f64 },
    TrackTransposeSet { track_id: String, transpose: i32 },
    TrackStepCountSet { track_id: String, step_count: u32 },
    TrackSwingSet { track_id: String, swing: Option<i32> },
    EffectsSet { effects: EffectsState },
    ScaleSet { scale: Option<Scale> },
    FmParamsSet { track_id: String, fm_params: Option<FmParams> },
    SequenceCopied { source_track_id: String, dest_track_id: String },
    SequenceMoved { source_track_id: String, dest_track_id: String },
    SessionNameSet { name: Option<String> },
    StepsBatchCleared { track_id: String, steps: Vec<u32> },
    ParameterLocksBatchSet { track_id: String, locks: Vec<(u32, Option<ParameterLock>)> },
    LoopRegionSet { start: u32, end: u32 },
}

/// Rejection that never reaches the state: the engine sends a typed error
/// and does not mutate or broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyError {
    Validation(String),
    Capacity(String),
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyError::Validation(msg) | ApplyError::Capacity(msg) => f.write_str(msg),
        }
    }
}

/// Applies `command` to `state`. Callers must have already confirmed
/// `command.is_mutating()` and that the session is not `immutable` — this
/// is the single place the §4.5.3 algorithmic notes are implemented.
///
/// Returns `Ok(None)` only for commands with no effect to broadcast (there
/// are none among the mutating set today; every mutating command yields a
/// broadcast even on no-op, per §4.5.6).
pub fn apply_mutation(
    state: &mut SessionState,
    command: &ClientCommand,
) -> Result<MutationEffect, ApplyError> {
    match command {
        ClientCommand::ToggleStep { track_id, step } => {
            let track = find_track_mut(state, track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {track_id}")))?;
            let idx = *step as usize;
            if idx >= track.steps.len() {
                return Err(ApplyError::Validation(format!("step {step} out of range")));
            }
            track.steps[idx] = !track.steps[idx];
            let value = track.steps[idx];
            Ok(MutationEffect::StepToggled { track_id: track_id.clone(), step: *step, value })
        }
        ClientCommand::SetTempo { tempo } => {
            state.tempo = (*tempo).clamp(
                sequencer_protocol::limits::MIN_TEMPO,
                sequencer_protocol::limits::MAX_TEMPO,
            );
            Ok(MutationEffect::TempoSet { tempo: state.tempo })
        }
        ClientCommand::SetSwing { swing } => {
            state.swing = (*swing).clamp(
                sequencer_protocol::limits::MIN_SWING,
                sequencer_protocol::limits::MAX_SWING,
            );
            Ok(MutationEffect::SwingSet { swing: state.swing })
        }
        ClientCommand::SetParameterLock { track_id, step, lock } => {
            let sanitized = validate_parameter_lock(lock.clone());
            let track = find_track_mut(state, track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {track_id}")))?;
            let idx = *step as usize;
            if idx >= track.parameter_locks.len() {
                return Err(ApplyError::Validation(format!("step {step} out of range")));
            }
            track.parameter_locks[idx] = sanitized.clone();
            Ok(MutationEffect::ParameterLockSet { track_id: track_id.clone(), step: *step, lock: sanitized })
        }
        ClientCommand::AddTrack(payload) => {
            // §4.5.3: re-add of an existing id is a no-op that still
            // broadcasts, so the sender's pending mutation can resolve.
            if find_track(state, &payload.track_id).is_some() {
                return Ok(MutationEffect::TrackAdded { track_id: payload.track_id.clone() });
            }
            if state.tracks.len() >= MAX_TRACKS {
                return Err(ApplyError::Capacity(format!("session already has {MAX_TRACKS} tracks")));
            }
            state.tracks.push(Track::new(&payload.track_id, &payload.name, &payload.sample_id));
            Ok(MutationEffect::TrackAdded { track_id: payload.track_id.clone() })
        }
        ClientCommand::DeleteTrack { track_id } => {
            let before = state.tracks.len();
            state.tracks.retain(|t| &t.id != track_id);
            let _ = before; // absence is a no-op, not an error (§7)
            Ok(MutationEffect::TrackDeleted { track_id: track_id.clone() })
        }
        ClientCommand::ClearTrack { track_id } => {
            let track = find_track_mut(state, track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {track_id}")))?;
            track.steps = vec![false; sequencer_protocol::limits::MAX_STEPS];
            track.parameter_locks = vec![None; sequencer_protocol::limits::MAX_STEPS];
            Ok(MutationEffect::TrackCleared { track_id: track_id.clone() })
        }
        ClientCommand::SetTrackSample { track_id, sample_id } => {
            let track = find_track_mut(state, track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {track_id}")))?;
            track.sample_id = sample_id.clone();
            Ok(MutationEffect::TrackSampleSet { track_id: track_id.clone(), sample_id: sample_id.clone() })
        }
        ClientCommand::SetTrackVolume { track_id, volume } => {
            let clamped = if volume.is_finite() {
                volume.clamp(sequencer_protocol::limits::MIN_VOLUME, sequencer_protocol::limits::MAX_VOLUME)
            } else {
                sequencer_protocol::limits::MIN_VOLUME
            };
            let track = find_track_mut(state, track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {track_id}")))?;
            track.volume = clamped;
            Ok(MutationEffect::TrackVolumeSet { track_id: track_id.clone(), volume: clamped })
        }
        ClientCommand::SetTrackTranspose { track_id, transpose } => {
            let clamped = (*transpose).clamp(
                sequencer_protocol::limits::MIN_TRANSPOSE,
                sequencer_protocol::limits::MAX_TRANSPOSE,
            );
            let track = find_track_mut(state, track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {track_id}")))?;
            track.transpose = clamped;
            Ok(MutationEffect::TrackTransposeSet { track_id: track_id.clone(), transpose: clamped })
        }
        ClientCommand::SetTrackStepCount { track_id, step_count } => {
            if !sequencer_protocol::limits::VALID_STEP_COUNTS.contains(step_count) {
                return Err(ApplyError::Validation(format!("{step_count} is not an approved step count")));
            }
            let track = find_track_mut(state, track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {track_id}")))?;
            track.step_count = *step_count;
            Ok(MutationEffect::TrackStepCountSet { track_id: track_id.clone(), step_count: *step_count })
        }
        ClientCommand::SetTrackSwing { track_id, swing } => {
            let clamped = swing.map(|s| {
                s.clamp(sequencer_protocol::limits::MIN_SWING, sequencer_protocol::limits::MAX_SWING)
            });
            let track = find_track_mut(state, track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {track_id}")))?;
            track.swing = clamped;
            Ok(MutationEffect::TrackSwingSet { track_id: track_id.clone(), swing: clamped })
        }
        ClientCommand::SetEffects { effects } => {
            let parsed: EffectsState = serde_json::from_value(effects.clone())
                .map_err(|e| ApplyError::Validation(format!("invalid effects payload: {e}")))?;
            let errors = crate::validate::validate_effects(&parsed);
            if !errors.is_empty() {
                return Err(ApplyError::Validation(errors.join("; ")));
            }
            state.effects = Some(parsed.clone());
            Ok(MutationEffect::EffectsSet { effects: parsed })
        }
        ClientCommand::SetScale { scale } => {
            state.scale = *scale;
            Ok(MutationEffect::ScaleSet { scale: *scale })
        }
        ClientCommand::SetFmParams { track_id, fm_params } => {
            let track = find_track_mut(state, track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {track_id}")))?;
            track.fm_params = fm_params.clone();
            Ok(MutationEffect::FmParamsSet { track_id: track_id.clone(), fm_params: fm_params.clone() })
        }
        ClientCommand::CopySequence { source_track_id, dest_track_id } => {
            let (steps, locks, step_count) = {
                let source = find_track(state, source_track_id)
                    .ok_or_else(|| ApplyError::Validation(format!("unknown track {source_track_id}")))?;
                (source.steps.clone(), source.parameter_locks.clone(), source.step_count)
            };
            let dest = find_track_mut(state, dest_track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {dest_track_id}")))?;
            dest.steps = steps;
            dest.parameter_locks = locks;
            dest.step_count = step_count;
            Ok(MutationEffect::SequenceCopied {
                source_track_id: source_track_id.clone(),
                dest_track_id: dest_track_id.clone(),
            })
        }
        ClientCommand::MoveSequence { source_track_id, dest_track_id } => {
            let (steps, locks, step_count) = {
                let source = find_track_mut(state, source_track_id)
                    .ok_or_else(|| ApplyError::Validation(format!("unknown track {source_track_id}")))?;
                let steps = std::mem::replace(&mut source.steps, vec![false; sequencer_protocol::limits::MAX_STEPS]);
                let locks = std::mem::replace(&mut source.parameter_locks, vec![None; sequencer_protocol::limits::MAX_STEPS]);
                let step_count = std::mem::replace(&mut source.step_count, 16);
                (steps, locks, step_count)
            };
            let dest = find_track_mut(state, dest_track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {dest_track_id}")))?;
            dest.steps = steps;
            dest.parameter_locks = locks;
            dest.step_count = step_count;
            Ok(MutationEffect::SequenceMoved {
                source_track_id: source_track_id.clone(),
                dest_track_id: dest_track_id.clone(),
            })
        }
        ClientCommand::SetSessionName { name } => {
            let sanitized = validate_session_name(name.clone()).map_err(ApplyError::Validation)?;
            Ok(MutationEffect::SessionNameSet { name: sanitized })
        }
        ClientCommand::BatchClearSteps { track_id, steps } => {
            let track = find_track_mut(state, track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {track_id}")))?;
            for &step in steps {
                if let Some(slot) = track.steps.get_mut(step as usize) {
                    *slot = false;
                }
            }
            Ok(MutationEffect::StepsBatchCleared { track_id: track_id.clone(), steps: steps.clone() })
        }
        ClientCommand::BatchSetParameterLocks { track_id, locks } => {
            let sanitized: Vec<(u32, Option<ParameterLock>)> = locks
                .iter()
                .map(|(step, lock)| (*step, validate_parameter_lock(lock.clone())))
                .collect();
            let track = find_track_mut(state, track_id)
                .ok_or_else(|| ApplyError::Validation(format!("unknown track {track_id}")))?;
            for (step, lock) in &sanitized {
                if let Some(slot) = track.parameter_locks.get_mut(*step as usize) {
                    *slot = lock.clone();
                }
            }
            Ok(MutationEffect::ParameterLocksBatchSet { track_id: track_id.clone(), locks: sanitized })
        }
        ClientCommand::SetLoopRegion { start, end } => {
            let (start, end) = if start <= end { (*start, *end) } else { (*end, *start) };
            state.loop_region = Some(sequencer_protocol::LoopRegion { start, end });
            Ok(MutationEffect::LoopRegionSet { start, end })
        }

        // Read-only commands never reach apply_mutation; the engine branches
        // on `ClientCommand::is_mutating()` before calling in.
        _ => unreachable!("apply_mutation called with a non-mutating command"),
    }
}

/// Sanitizes an inbound `cursor_move` position. Exposed alongside
/// `apply_mutation` since cursor moves are read-only (never go through
/// here) but still need the same validation path.
pub fn sanitize_cursor_move(position: sequencer_protocol::CursorPosition) -> sequencer_protocol::CursorPosition {
    validate_cursor_position(position)
}

fn find_track<'a>(state: &'a SessionState, track_id: &str) -> Option<&'a Track> {
    state.tracks.iter().find(|t| t.id == track_id)
}

fn find_track_mut<'a>(state: &'a mut SessionState, track_id: &str) -> Option<&'a mut Track> {
    state.tracks.iter_mut().find(|t| t.id == track_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequencer_protocol::AddTrackPayload;

    fn state_with_track(id: &str) -> SessionState {
        SessionState { tracks: vec![Track::new(id, "kick", "s1")], ..SessionState::default() }
    }

    #[test]
    fn toggle_step_flips_and_broadcasts_final_value() {
        let mut state = state_with_track("t1");
        let cmd = ClientCommand::ToggleStep { track_id: "t1".to_owned(), step: 0 };
        let effect = apply_mutation(&mut state, &cmd).unwrap();
        assert_eq!(effect, MutationEffect::StepToggled { track_id: "t1".to_owned(), step: 0, value: true });
        assert!(state.tracks[0].steps[0]);
    }

    #[test]
    fn add_track_at_capacity_is_rejected() {
        let mut state = SessionState::default();
        for i in 0..sequencer_protocol::limits::MAX_TRACKS {
            state.tracks.push(Track::new(format!("t{i}"), "x", "s"));
        }
        let cmd = ClientCommand::AddTrack(AddTrackPayload {
            track_id: "overflow".to_owned(),
            name: "x".to_owned(),
            sample_id: "s".to_owned(),
        });
        assert!(matches!(apply_mutation(&mut state, &cmd), Err(ApplyError::Capacity(_))));
    }

    #[test]
    fn add_track_duplicate_id_is_a_noop_that_still_returns_an_effect() {
        let mut state = state_with_track("t1");
        let cmd = ClientCommand::AddTrack(AddTrackPayload {
            track_id: "t1".to_owned(),
            name: "ignored".to_owned(),
            sample_id: "ignored".to_owned(),
        });
        let effect = apply_mutation(&mut state, &cmd).unwrap();
        assert_eq!(effect, MutationEffect::TrackAdded { track_id: "t1".to_owned() });
        assert_eq!(state.tracks.len(), 1);
        assert_eq!(state.tracks[0].name, "kick");
    }

    #[test]
    fn delete_of_absent_track_is_a_noop_that_still_returns_an_effect() {
        let mut state = state_with_track("t1");
        let cmd = ClientCommand::DeleteTrack { track_id: "absent".to_owned() };
        let effect = apply_mutation(&mut state, &cmd).unwrap();
        assert_eq!(effect, MutationEffect::TrackDeleted { track_id: "absent".to_owned() });
        assert_eq!(state.tracks.len(), 1);
    }

    #[test]
    fn move_sequence_resets_source_and_copies_to_dest() {
        let mut state = SessionState {
            tracks: vec![Track::new("src", "a", "s"), Track::new("dst", "b", "s")],
            ..SessionState::default()
        };
        state.tracks[0].steps[3] = true;
        state.tracks[0].step_count = 32;

        let cmd = ClientCommand::MoveSequence { source_track_id: "src".to_owned(), dest_track_id: "dst".to_owned() };
        apply_mutation(&mut state, &cmd).unwrap();

        assert!(state.tracks[1].steps[3]);
        assert_eq!(state.tracks[1].step_count, 32);
        assert!(!state.tracks[0].steps[3]);
        assert_eq!(state.tracks[0].step_count, 16);
    }

    #[test]
    fn set_loop_region_normalizes_inverted_bounds() {
        let mut state = SessionState::default();
        let cmd = ClientCommand::SetLoopRegion { start: 10, end: 2 };
        let effect = apply_mutation(&mut state, &cmd).unwrap();
        assert_eq!(effect, MutationEffect::LoopRegionSet { start: 2, end: 10 });
    }

    #[test]
    fn set_tempo_clamps_into_range() {
        let mut state = SessionState::default();
        let cmd = ClientCommand::SetTempo { tempo: 999 };
        apply_mutation(&mut state, &cmd).unwrap();
        assert_eq!(state.tempo, sequencer_protocol::limits::MAX_TEMPO);
    }
}
