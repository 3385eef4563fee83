//! Data models module
//!
//! Defines conversation turns, Gemini wire structures and the outward relay events

pub mod chat;
pub mod events;
pub mod gemini;

/// Numeric user identifier issued by the identity collaborator
pub type UserId = u64;
