//! Deterministic player identity derivation (§3.1 `PlayerInfo`).
//!
//! The source material left the "stable hash into an 18x73 space" detail
//! unspecified (§9 open questions name a different ambiguity but this one
//! is the same flavor of gap). We resolve it here: FNV-1a 64 over the raw
//! player id, reduced mod 18 and mod 73 for color and animal indices. Same
//! id always yields the same `(color, animal)` pair, on any instance.

use crate::hash::fnv1a64;
use sequencer_protocol::limits::{PLAYER_ANIMAL_COUNT, PLAYER_COLOR_COUNT};

pub const COLORS: [&str; 18] = [
    "red", "orange", "amber", "yellow", "lime", "green", "emerald", "teal", "cyan", "sky", "blue",
    "indigo", "violet", "purple", "fuchsia", "pink", "rose", "slate",
];

pub const ANIMALS: [&str; 73] = [
    "otter", "fox", "wolf", "bear", "panda", "koala", "lemur", "tiger", "lion", "leopard",
    "cheetah", "jaguar", "lynx", "bobcat", "puma", "rabbit", "hare", "squirrel", "chipmunk",
    "beaver", "badger", "raccoon", "skunk", "weasel", "ferret", "mink", "stoat", "hedgehog",
    "porcupine", "armadillo", "sloth", "anteater", "platypus", "wombat", "kangaroo", "wallaby",
    "possum", "deer", "elk", "moose", "bison", "buffalo", "gazelle", "antelope", "giraffe",
    "zebra", "hippo", "rhino", "elephant", "camel", "llama", "alpaca", "goat", "sheep", "horse",
    "donkey", "pig", "boar", "owl", "falcon", "hawk", "eagle", "heron", "crane", "stork",
    "pelican", "flamingo", "penguin", "puffin", "toucan", "parrot", "peacock", "swan",
];

/// Returns `(color_index, color, animal)` deterministically derived from
/// `player_id`. `color_index` is carried on the wire so the client can
/// render consistently even if its own copy of `COLORS` ever drifts.
pub fn derive_identity(player_id: &str) -> (u32, &'static str, &'static str) {
    let digest = fnv1a64(player_id.as_bytes());
    let color_index = (digest % PLAYER_COLOR_COUNT) as u32;
    let animal_index = ((digest / PLAYER_COLOR_COUNT) % PLAYER_ANIMAL_COUNT) as usize;
    (color_index, COLORS[color_index as usize], ANIMALS[animal_index])
}
