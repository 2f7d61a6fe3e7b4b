//! Shared data model for the murmur workspace: persisted records, report and
//! summary documents, command envelopes and broadcast payloads.

pub mod api;
pub mod events;
pub mod models;
pub mod timestamp;
