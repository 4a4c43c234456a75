//! Mentorhub — internal messaging engine for a youth mentoring platform.
//!
//! The platform tracks staff, mentors, mentees, guardians and volunteers;
//! this crate implements its one genuinely stateful subsystem: threaded
//! conversations with per-thread reply policies, group-recipient
//! expansion, automatic guardian carbon-copy, per-recipient read/archive
//! state, and real-time notification fan-out.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod config;
pub mod db;
pub mod directory;
pub mod logging;
pub mod messaging;
