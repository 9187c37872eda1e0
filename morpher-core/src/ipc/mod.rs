//! Observer-facing types.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host UI
//! or the offline renderer can forward them as JSON.

pub mod events;
