//! Persistent ledgers keyed by site key.
//!
//! Every function takes the store explicitly; callers are expected to
//! serialize mutations (the tracker owns the only writer).

pub mod allowlist;
pub mod cycle;
pub mod edit_lock;
pub mod time;
