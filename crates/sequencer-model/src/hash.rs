//! Deterministic serialization for client/server state-agreement (§4.2).
//!
//! Two serializers exist on purpose: the wire form (tolerant, evolving,
//! handled by `serde` in `sequencer_protocol`) and this one (strict,
//! stable, excludes local-only fields). Never merge them.

use sequencer_protocol::{EffectsState, ParameterLock, SessionState, Track};
use std::fmt::Write as _;

/// Deterministic textual form of `state`: fixed field order, sorted track
/// order by id, full `MAX_STEPS`-length arrays, local-only `muted`/`soloed`
/// excluded, optional fields normalized to their canonical defaults.
pub fn canonicalize(state: &SessionState) -> String {
    let mut out = String::new();
    out.push_str("tempo=");
    let _ = write!(out, "{}", state.tempo);
    out.push_str(";swing=");
    let _ = write!(out, "{}", state.swing);
    out.push_str(";version=");
    let _ = write!(out, "{}", state.version);

    out.push_str(";loopRegion=");
    match &state.loop_region {
        Some(region) => {
            let _ = write!(out, "{}-{}", region.start, region.end);
        }
        None => out.push_str("none"),
    }

    out.push_str(";scale=");
    match &state.scale {
        Some(scale) => {
            let _ = write!(out, "{:?}:{:?}:{}", scale.root, scale.scale_id, scale.locked);
        }
        None => out.push_str("none"),
    }

    out.push_str(";effects=");
    match &state.effects {
        Some(effects) => canonicalize_effects(effects, &mut out),
        None => out.push_str("none"),
    }

    let mut tracks: Vec<&Track> = state.tracks.iter().collect();
    tracks.sort_by(|a, b| a.id.cmp(&b.id));
    out.push_str(";tracks=[");
    for (i, track) in tracks.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        canonicalize_track(track, &mut out);
    }
    out.push(']');

    out
}

fn canonicalize_effects(effects: &EffectsState, out: &mut String) {
    let _ = write!(
        out,
        "reverb({},{}):delay({},{},{}):chorus({},{},{}):distortion({},{})",
        effects.reverb.decay,
        effects.reverb.wet,
        effects.delay.time,
        effects.delay.feedback,
        effects.delay.wet,
        effects.chorus.frequency,
        effects.chorus.depth,
        effects.chorus.wet,
        effects.distortion.amount,
        effects.distortion.wet,
    );
}

fn canonicalize_track(track: &Track, out: &mut String) {
    // `muted`/`soloed` intentionally absent (§3.2 invariant 6, §4.5.5).
    let _ = write!(
        out,
        "{{id={};name={};sampleId={};volume={};transpose={};stepCount={};swing=",
        track.id, track.name, track.sample_id, track.volume, track.transpose, track.step_count,
    );
    match track.swing {
        Some(s) => {
            let _ = write!(out, "{s}");
        }
        None => out.push_str("none"),
    }
    out.push_str(";fmParams=");
    match &track.fm_params {
        Some(fm) => {
            let _ = write!(out, "{:?},{:?}", fm.harmonicity, fm.modulation_index);
        }
        None => out.push_str("none"),
    }
    out.push_str(";steps=");
    for &s in &track.steps {
        out.push(if s { '1' } else { '0' });
    }
    out.push_str(";plocks=[");
    for (i, lock) in track.parameter_locks.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        canonicalize_lock(lock.as_ref(), out);
    }
    out.push_str("]}");
}

fn canonicalize_lock(lock: Option<&ParameterLock>, out: &mut String) {
    match lock {
        None => out.push('_'),
        Some(l) => {
            let _ = write!(out, "({:?},{:?},{:?})", l.pitch, l.volume, l.tie);
        }
    }
}

/// FNV-1a 64-bit digest of the canonical form, hex-encoded. Used for the
/// `state_hash` drift check; not a cryptographic hash.
pub fn hash_state(state: &SessionState) -> String {
    format!("{:016x}", fnv1a64(canonicalize(state).as_bytes()))
}

pub(crate) fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequencer_protocol::Track;

    #[test]
    fn canonical_form_ignores_mute_and_solo() {
        let mut a = SessionState { tracks: vec![Track::new("t1", "kick", "s1")], ..SessionState::default() };
        let mut b = a.clone();
        a.tracks[0].muted = true;
        b.tracks[0].muted = false;
        a.tracks[0].soloed = true;
        b.tracks[0].soloed = false;
        assert_eq!(canonicalize(&a), canonicalize(&b));
        assert_eq!(hash_state(&a), hash_state(&b));
    }

    #[test]
    fn canonical_form_is_independent_of_track_insertion_order() {
        let a = SessionState {
            tracks: vec![Track::new("t2", "snare", "s2"), Track::new("t1", "kick", "s1")],
            ..SessionState::default()
        };
        let b = SessionState {
            tracks: vec![Track::new("t1", "kick", "s1"), Track::new("t2", "snare", "s2")],
            ..SessionState::default()
        };
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn canonical_form_differs_for_logically_different_state() {
        let a = SessionState { tempo: 120, ..SessionState::default() };
        let b = SessionState { tempo: 140, ..SessionState::default() };
        assert_ne!(hash_state(&a), hash_state(&b));
    }
}
