//! # Conversational Agent Side
//!
//! - **protocol**: frames exchanged with the agent (`audio`, `ping`, `client_tool_call`, ...)
//! - **connector**: signed-session handshake and the upstream socket itself

pub mod connector;
pub mod protocol;
