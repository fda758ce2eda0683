//! # Call Bridge
//!
//! Everything that happens on one bridged call:
//!
//! - **session**: per-call state (ids, parameters, phase, upstream link state)
//! - **translator**: pure mapping between carrier frames and agent frames
//! - **controller**: the call state machine; turns incoming frames into effects
//! - **socket**: the actor that owns the carrier socket and performs the effects

pub mod controller;
pub mod session;
pub mod socket;
pub mod translator;
