//! # Call Session
//!
//! Per-call state owned by exactly one bridge. Nothing here is shared between
//! calls or persisted; the session is dropped with its bridge.
//!
//! ## Session Lifecycle:
//! 1. **AwaitingStart**: telephony socket accepted, no `start` frame yet
//! 2. **Streaming**: identifiers and parameters known, audio flowing
//! 3. **Transferring**: human handoff requested, audio still flowing
//! 4. **Closed**: terminal; repeated close signals are no-ops

use crate::agent::connector::UpstreamState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub const PARAM_PROMPT: &str = "prompt";
pub const PARAM_FIRST_MESSAGE: &str = "first_message";
pub const PARAM_CLIENT: &str = "client";
pub const PARAM_SOURCE: &str = "source";
pub const PARAM_AGE: &str = "age";
pub const PARAM_DAMAGE: &str = "damage";
pub const PARAM_INSURANCE: &str = "insurance";
pub const PARAM_FORWARD_TO: &str = "forward_to";

/// Lifecycle phase of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    AwaitingStart,
    Streaming,
    Transferring,
    Closed,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPhase::AwaitingStart => "awaiting_start",
            CallPhase::Streaming => "streaming",
            CallPhase::Transferring => "transferring",
            CallPhase::Closed => "closed",
        }
    }
}

/// Parameters the carrier hands back in the stream's `start` frame.
///
/// Blank values are treated as absent, since the TwiML always carries every
/// parameter name even when the originating request left it empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallParameters(HashMap<String, String>);

impl CallParameters {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self(values)
    }

    /// The value as the carrier delivered it. Whitespace-only counts as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn prompt(&self) -> Option<&str> {
        self.get(PARAM_PROMPT)
    }

    pub fn first_message(&self) -> Option<&str> {
        self.get(PARAM_FIRST_MESSAGE)
    }

    pub fn client(&self) -> Option<&str> {
        self.get(PARAM_CLIENT)
    }

    pub fn source(&self) -> Option<&str> {
        self.get(PARAM_SOURCE)
    }

    pub fn forward_to(&self) -> Option<&str> {
        self.get(PARAM_FORWARD_TO)
    }

    /// Non-blank parameters, for use as agent dynamic variables.
    pub fn non_empty(&self) -> HashMap<String, String> {
        self.0
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Frame counters kept for the closing log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_to_agent: u64,
    pub frames_to_telephony: u64,
    pub dropped_frames: u64,
}

/// State of one bridged call.
#[derive(Debug)]
pub struct CallSession {
    stream_sid: Option<String>,
    call_sid: Option<String>,
    parameters: CallParameters,
    phase: CallPhase,
    upstream: UpstreamState,
    initiation_sent: bool,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    pub stats: SessionStats,
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            stream_sid: None,
            call_sid: None,
            parameters: CallParameters::default(),
            phase: CallPhase::AwaitingStart,
            upstream: UpstreamState::Connecting,
            initiation_sent: false,
            created_at: Utc::now(),
            started_at: None,
            stats: SessionStats::default(),
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref()
    }

    pub fn parameters(&self) -> &CallParameters {
        &self.parameters
    }

    pub fn upstream(&self) -> UpstreamState {
        self.upstream
    }

    pub fn is_closed(&self) -> bool {
        self.phase == CallPhase::Closed
    }

    /// Record stream identity and parameters.
    ///
    /// ## State Transition:
    /// AwaitingStart → Streaming
    pub fn start(
        &mut self,
        stream_sid: String,
        call_sid: String,
        parameters: CallParameters,
    ) -> Result<(), String> {
        match self.phase {
            CallPhase::AwaitingStart => {
                self.stream_sid = Some(stream_sid);
                self.call_sid = Some(call_sid);
                self.parameters = parameters;
                self.phase = CallPhase::Streaming;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            other => Err(format!("Cannot start stream from phase: {}", other.as_str())),
        }
    }

    /// ## State Transition:
    /// Streaming → Transferring
    pub fn begin_transfer(&mut self) -> Result<(), String> {
        match self.phase {
            CallPhase::Streaming => {
                self.phase = CallPhase::Transferring;
                Ok(())
            }
            other => Err(format!("Cannot transfer from phase: {}", other.as_str())),
        }
    }

    /// Move to Closed from any phase. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if self.phase == CallPhase::Closed {
            return false;
        }
        self.phase = CallPhase::Closed;
        true
    }

    pub fn upstream_opened(&mut self) {
        if self.upstream == UpstreamState::Connecting {
            self.upstream = UpstreamState::Open;
        }
    }

    pub fn upstream_closed(&mut self) {
        self.upstream = UpstreamState::Closed;
    }

    /// True exactly when the initiation payload is due: the stream has started,
    /// the agent socket is open and nothing was sent yet.
    pub fn initiation_due(&self) -> bool {
        !self.initiation_sent
            && self.stream_sid.is_some()
            && self.upstream == UpstreamState::Open
            && matches!(self.phase, CallPhase::Streaming | CallPhase::Transferring)
    }

    pub fn mark_initiation_sent(&mut self) {
        self.initiation_sent = true;
    }

    /// Seconds since the socket was accepted.
    pub fn age_seconds(&self) -> f64 {
        Utc::now().signed_duration_since(self.created_at).num_milliseconds() as f64 / 1000.0
    }

    /// Seconds of streamed audio, zero before `start`.
    pub fn streaming_seconds(&self) -> f64 {
        match self.started_at {
            Some(started) => Utc::now().signed_duration_since(started).num_milliseconds() as f64 / 1000.0,
            None => 0.0,
        }
    }
}
