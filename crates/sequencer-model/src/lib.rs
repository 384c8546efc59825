//! Session state model, validators, canonical hasher, and identity
//! derivation (C1, C2, C4) shared by the session engine.

pub mod hash;
pub mod identity;
pub mod mutate;
pub mod validate;

pub use hash::{canonicalize, hash_state};
pub use identity::derive_identity;
pub use mutate::{apply_mutation, sanitize_cursor_move, ApplyError, MutationEffect};
