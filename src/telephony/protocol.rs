//! # Media Stream Wire Format
//!
//! JSON text frames exchanged with the carrier over the telephony socket.
//! Inbound frames are tagged by `event` (`connected`, `start`, `media`, `stop`, ...);
//! we only ever send `media` and `clear` back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A frame received from the carrier.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    /// First frame on every stream, before `start`
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },

    /// Stream metadata, including the parameters embedded in the TwiML
    Start { start: StreamStart },

    /// One chunk of caller audio (8kHz mu-law, base64)
    Media { media: MediaChunk },

    /// Carrier finished the stream
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },

    /// Playback marker acknowledgement
    Mark {
        #[serde(default)]
        mark: Option<MarkLabel>,
    },

    /// Keypad digit pressed by the caller
    Dtmf {
        #[serde(default)]
        dtmf: Option<DtmfDigit>,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaChunk {
    pub payload: String,
    /// `inbound` (the callee) or `outbound` (what we play); absent on
    /// single-track streams
    #[serde(default)]
    pub track: Option<String>,
}

impl MediaChunk {
    /// Whether this chunk is the callee's voice. Chunks without a track are.
    pub fn is_inbound(&self) -> bool {
        self.track.as_deref().map_or(true, |track| track == "inbound")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkLabel {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DtmfDigit {
    #[serde(default)]
    pub digit: Option<String>,
}

impl TelephonyEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TelephonyEvent::Connected { .. } => "connected",
            TelephonyEvent::Start { .. } => "start",
            TelephonyEvent::Media { .. } => "media",
            TelephonyEvent::Stop { .. } => "stop",
            TelephonyEvent::Mark { .. } => "mark",
            TelephonyEvent::Dtmf { .. } => "dtmf",
            TelephonyEvent::Unknown => "unknown",
        }
    }
}

/// A frame we send to the carrier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyCommand {
    /// Play agent audio to the caller
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },

    /// Flush any audio still buffered for playback
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl TelephonyCommand {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
