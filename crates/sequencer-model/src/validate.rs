//! Bounds, sanitization, and repair over untyped-ish client input (§4.1).
//!
//! Every function here is pure: no transport, no storage. The engine never
//! trusts a client value without routing it through one of these first.

use sequencer_protocol::limits::{
    MAX_CURSOR_POSITION, MAX_PLOCK_PITCH, MAX_PLOCK_VOLUME, MAX_STEPS, MAX_SWING, MAX_TEMPO,
    MAX_TRANSPOSE, MAX_VOLUME, MIN_CURSOR_POSITION, MIN_PLOCK_PITCH, MIN_PLOCK_VOLUME, MIN_SWING,
    MIN_TEMPO, MIN_TRANSPOSE, MIN_VOLUME, VALID_DELAY_TIMES, VALID_STEP_COUNTS,
};
use sequencer_protocol::{CursorPosition, EffectsState, ParameterLock, SessionState, Track};

/// Clamps a parameter lock into range and collapses an empty lock to `None`,
/// mirroring `validateParameterLock`'s null-on-empty contract.
pub fn validate_parameter_lock(lock: Option<ParameterLock>) -> Option<ParameterLock> {
    let mut lock = lock?;
    if let Some(pitch) = lock.pitch {
        lock.pitch = Some(pitch.clamp(MIN_PLOCK_PITCH, MAX_PLOCK_PITCH));
    }
    if let Some(volume) = lock.volume {
        lock.volume = Some(if volume.is_finite() {
            volume.clamp(MIN_PLOCK_VOLUME, MAX_PLOCK_VOLUME)
        } else {
            MIN_PLOCK_VOLUME
        });
    }
    if lock.is_empty() { None } else { Some(lock) }
}

/// Clamps cursor coordinates into `[0,100]`; non-finite values fall back to
/// the minimum rather than propagating `NaN`/`inf` onto the wire.
pub fn validate_cursor_position(mut pos: CursorPosition) -> CursorPosition {
    pos.x = clamp_or_min(pos.x, MIN_CURSOR_POSITION, MAX_CURSOR_POSITION);
    pos.y = clamp_or_min(pos.y, MIN_CURSOR_POSITION, MAX_CURSOR_POSITION);
    pos
}

fn clamp_or_min(v: f64, min: f64, max: f64) -> f64 {
    if v.is_finite() { v.clamp(min, max) } else { min }
}

/// `null` clears the name; otherwise the name must be non-script and ≤100
/// chars. Rejection returns the reason rather than silently sanitizing —
/// callers surface it as a validation error.
pub fn validate_session_name(name: Option<String>) -> Result<Option<String>, String> {
    let Some(name) = name else { return Ok(None) };
    if name.chars().count() > 100 {
        return Err("session name exceeds 100 characters".to_owned());
    }
    if contains_script_pattern(&name) {
        return Err("session name contains a disallowed pattern".to_owned());
    }
    Ok(Some(name))
}

fn contains_script_pattern(s: &str) -> bool {
    let lower = s.to_lowercase();
    lower.contains("<script")
        || lower.contains("javascript:")
        || lower.contains("onerror=")
        || lower.contains("onload=")
        || lower.contains("onclick=")
}

/// `isBodySizeValid`: bodies over `MAX_MESSAGE_SIZE` are rejected outright.
pub fn is_body_size_valid(content_length: usize) -> bool {
    content_length <= sequencer_protocol::limits::MAX_MESSAGE_SIZE
}

/// Canonical-v4 shape check: 8-4-4-4-12 hex groups, version nibble `4`,
/// variant nibble in `8`..=`b`. No crate dependency — this is a pure
/// string-shape check, not a UUID parse/generate facility.
pub fn is_valid_uuid(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    let groups = [8, 13, 18, 23];
    for &i in &groups {
        if bytes[i] != b'-' {
            return false;
        }
    }
    for (i, &b) in bytes.iter().enumerate() {
        if groups.contains(&i) {
            continue;
        }
        if !b.is_ascii_hexdigit() {
            return false;
        }
    }
    if bytes[14] != b'4' {
        return false;
    }
    matches!(bytes[19], b'8' | b'9' | b'a' | b'b' | b'A' | b'B')
}

/// `validateStateInvariants`: a post-apply sweep. Returns every invariant
/// violation found; an empty vec means `state` is internally consistent.
pub fn validate_state_invariants(state: &SessionState) -> Vec<String> {
    let mut errors = Vec::new();

    if state.tracks.len() > sequencer_protocol::limits::MAX_TRACKS {
        errors.push(format!("track count {} exceeds MAX_TRACKS", state.tracks.len()));
    }
    let mut seen_ids = std::collections::HashSet::new();
    for track in &state.tracks {
        if !seen_ids.insert(&track.id) {
            errors.push(format!("duplicate track id {}", track.id));
        }
        if track.steps.len() != MAX_STEPS {
            errors.push(format!("track {} steps length {} != MAX_STEPS", track.id, track.steps.len()));
        }
        if track.parameter_locks.len() != MAX_STEPS {
            errors.push(format!(
                "track {} parameterLocks length {} != MAX_STEPS",
                track.id,
                track.parameter_locks.len()
            ));
        }
        if !(MIN_VOLUME..=MAX_VOLUME).contains(&track.volume) {
            errors.push(format!("track {} volume {} out of range", track.id, track.volume));
        }
        if !VALID_STEP_COUNTS.contains(&track.step_count) {
            errors.push(format!("track {} stepCount {} not approved", track.id, track.step_count));
        }
    }
    if !(MIN_TEMPO..=MAX_TEMPO).contains(&state.tempo) {
        errors.push(format!("tempo {} out of range", state.tempo));
    }
    if !(MIN_SWING..=MAX_SWING).contains(&state.swing) {
        errors.push(format!("swing {} out of range", state.swing));
    }
    if let Some(loop_region) = &state.loop_region
        && loop_region.start > loop_region.end
    {
        errors.push("loopRegion.start > loopRegion.end".to_owned());
    }
    if let Some(effects) = &state.effects {
        errors.extend(validate_effects(effects));
    }

    errors
}

/// Bounds-checks an `EffectsState` payload (§3.1's required shape); used
/// both by the full-state sweep and by `set_effects`'s own validation.
pub fn validate_effects(effects: &EffectsState) -> Vec<String> {
    let mut errors = Vec::new();
    if !(0.1..=10.0).contains(&effects.reverb.decay) {
        errors.push("effects.reverb.decay out of range".to_owned());
    }
    if !(MIN_VOLUME..=MAX_VOLUME).contains(&effects.reverb.wet) {
        errors.push("effects.reverb.wet out of range".to_owned());
    }
    if !VALID_DELAY_TIMES.contains(&effects.delay.time.as_str()) {
        errors.push(format!("effects.delay.time {:?} is not a valid delay time", effects.delay.time));
    }
    if !(0.0..=0.95).contains(&effects.delay.feedback) {
        errors.push("effects.delay.feedback out of range".to_owned());
    }
    if !(MIN_VOLUME..=MAX_VOLUME).contains(&effects.delay.wet) {
        errors.push("effects.delay.wet out of range".to_owned());
    }
    if !(0.1..=10.0).contains(&effects.chorus.frequency) {
        errors.push("effects.chorus.frequency out of range".to_owned());
    }
    if !(MIN_VOLUME..=MAX_VOLUME).contains(&effects.chorus.depth) {
        errors.push("effects.chorus.depth out of range".to_owned());
    }
    if !(MIN_VOLUME..=MAX_VOLUME).contains(&effects.chorus.wet) {
        errors.push("effects.chorus.wet out of range".to_owned());
    }
    if !(MIN_VOLUME..=MAX_VOLUME).contains(&effects.distortion.amount) {
        errors.push("effects.distortion.amount out of range".to_owned());
    }
    if !(MIN_VOLUME..=MAX_VOLUME).contains(&effects.distortion.wet) {
        errors.push("effects.distortion.wet out of range".to_owned());
    }
    errors
}

/// Brings a loaded snapshot up to `CURRENT_SCHEMA_VERSION` before `repair`
/// and validation run over it (§3.5, §4.6's "Schema versioning"). There is
/// only one schema generation so far, so this stamps the version and
/// returns; a future version bump adds its migration arm above the stamp.
pub fn migrate_state(state: &mut SessionState) {
    if state.version < sequencer_protocol::limits::CURRENT_SCHEMA_VERSION {
        state.version = sequencer_protocol::limits::CURRENT_SCHEMA_VERSION;
    }
}

/// Best-effort normalization so a load of an older or hand-edited snapshot
/// never trips `validate_state_invariants`. Returns a human-readable list of
/// repairs made, for logging. Idempotent: `repair(repair(x)) == repair(x)`.
pub fn repair_state_invariants(state: &mut SessionState) -> Vec<String> {
    let mut repairs = Vec::new();

    let mut seen_ids = std::collections::HashSet::new();
    let before = state.tracks.len();
    state.tracks.retain(|t| seen_ids.insert(t.id.clone()));
    if state.tracks.len() != before {
        repairs.push(format!("dropped {} duplicate track id(s)", before - state.tracks.len()));
    }
    if state.tracks.len() > sequencer_protocol::limits::MAX_TRACKS {
        repairs.push(format!("truncated tracks to MAX_TRACKS ({})", sequencer_protocol::limits::MAX_TRACKS));
        state.tracks.truncate(sequencer_protocol::limits::MAX_TRACKS);
    }

    for track in &mut state.tracks {
        repair_track(track, &mut repairs);
    }

    let clamped_tempo = state.tempo.clamp(MIN_TEMPO, MAX_TEMPO);
    if clamped_tempo != state.tempo {
        repairs.push(format!("clamped tempo {} -> {}", state.tempo, clamped_tempo));
        state.tempo = clamped_tempo;
    }
    let clamped_swing = state.swing.clamp(MIN_SWING, MAX_SWING);
    if clamped_swing != state.swing {
        repairs.push(format!("clamped swing {} -> {}", state.swing, clamped_swing));
        state.swing = clamped_swing;
    }
    if let Some(loop_region) = &mut state.loop_region
        && loop_region.start > loop_region.end
    {
        std::mem::swap(&mut loop_region.start, &mut loop_region.end);
        repairs.push("swapped inverted loopRegion bounds".to_owned());
    }

    repairs
}

fn repair_track(track: &mut Track, repairs: &mut Vec<String>) {
    if track.steps.len() != MAX_STEPS {
        repairs.push(format!("padded/truncated track {} steps to MAX_STEPS", track.id));
        track.steps.resize(MAX_STEPS, false);
    }
    if track.parameter_locks.len() != MAX_STEPS {
        repairs.push(format!("padded/truncated track {} parameterLocks to MAX_STEPS", track.id));
        track.parameter_locks.resize(MAX_STEPS, None);
    }
    let clamped_volume = track.volume.clamp(MIN_VOLUME, MAX_VOLUME);
    if !track.volume.is_finite() || clamped_volume != track.volume {
        repairs.push(format!("clamped track {} volume", track.id));
        track.volume = if track.volume.is_finite() { clamped_volume } else { 0.8 };
    }
    if !VALID_STEP_COUNTS.contains(&track.step_count) {
        let nearest = *VALID_STEP_COUNTS
            .iter()
            .min_by_key(|&&c| (c as i64 - track.step_count as i64).abs())
            .unwrap_or(&16);
        repairs.push(format!("normalized track {} stepCount {} -> {}", track.id, track.step_count, nearest));
        track.step_count = nearest;
    }
    let clamped_transpose = track.transpose.clamp(MIN_TRANSPOSE, MAX_TRANSPOSE);
    if clamped_transpose != track.transpose {
        repairs.push(format!("clamped track {} transpose", track.id));
        track.transpose = clamped_transpose;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_lock_clamps_and_collapses_to_none_when_empty() {
        let lock = ParameterLock { pitch: Some(100), volume: None, tie: None };
        let sanitized = validate_parameter_lock(Some(lock)).unwrap();
        assert_eq!(sanitized.pitch, Some(MAX_PLOCK_PITCH));

        let empty = ParameterLock { pitch: None, volume: None, tie: None };
        assert_eq!(validate_parameter_lock(Some(empty)), None);
        assert_eq!(validate_parameter_lock(None), None);
    }

    #[test]
    fn cursor_position_clamps_out_of_range_and_non_finite() {
        let pos = validate_cursor_position(CursorPosition { x: 150.0, y: -10.0, step: None });
        assert_eq!(pos.x, MAX_CURSOR_POSITION);
        assert_eq!(pos.y, MIN_CURSOR_POSITION);

        let pos = validate_cursor_position(CursorPosition { x: f64::NAN, y: 50.0, step: None });
        assert_eq!(pos.x, MIN_CURSOR_POSITION);
    }

    #[test]
    fn session_name_rejects_script_patterns_and_overlength() {
        assert!(validate_session_name(Some("<script>alert(1)</script>".to_owned())).is_err());
        assert!(validate_session_name(Some("a".repeat(101))).is_err());
        assert_eq!(validate_session_name(None).unwrap(), None);
        assert_eq!(validate_session_name(Some("my jam".to_owned())).unwrap(), Some("my jam".to_owned()));
    }

    #[test]
    fn uuid_shape_check_accepts_only_canonical_v4() {
        assert!(is_valid_uuid("3fa85f64-5717-4562-b3fc-2c963f66afa6"));
        assert!(!is_valid_uuid("3fa85f64-5717-1562-b3fc-2c963f66afa6")); // wrong version
        assert!(!is_valid_uuid("not-a-uuid"));
        assert!(!is_valid_uuid("3fa85f645717456-b3fc-2c963f66afa6"));
    }

    #[test]
    fn repair_is_idempotent_and_drops_duplicate_track_ids() {
        let mut state = SessionState {
            tracks: vec![Track::new("t1", "kick", "s1"), Track::new("t1", "dup", "s1")],
            tempo: 999,
            ..SessionState::default()
        };
        let first = repair_state_invariants(&mut state);
        assert!(!first.is_empty());
        assert_eq!(state.tracks.len(), 1);
        assert_eq!(state.tempo, MAX_TEMPO);

        let second = repair_state_invariants(&mut state);
        assert!(second.is_empty(), "repair should be a no-op once state is clean");
        assert!(validate_state_invariants(&state).is_empty());
    }

    #[test]
    fn migrate_state_stamps_current_version_and_is_idempotent() {
        let mut state = SessionState { version: 0, ..SessionState::default() };
        migrate_state(&mut state);
        assert_eq!(state.version, sequencer_protocol::limits::CURRENT_SCHEMA_VERSION);
        migrate_state(&mut state);
        assert_eq!(state.version, sequencer_protocol::limits::CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn validate_state_invariants_reports_duplicate_ids_and_bad_tempo() {
        let state = SessionState {
            tracks: vec![Track::new("t1", "kick", "s1"), Track::new("t1", "dup", "s1")],
            tempo: 5,
            ..SessionState::default()
        };
        let errors = validate_state_invariants(&state);
        assert!(errors.iter().any(|e| e.contains("duplicate track id")));
        assert!(errors.iter().any(|e| e.contains("tempo")));
    }
}
