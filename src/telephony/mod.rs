//! # Telephony Side
//!
//! Everything that talks to the carrier:
//! - **protocol**: media-stream socket frames (`start`, `media`, `stop`, `clear`, ...)
//! - **twiml**: the XML documents the carrier executes
//! - **client**: the REST client used to originate, inspect and redirect calls

pub mod client;
pub mod protocol;
pub mod twiml;
