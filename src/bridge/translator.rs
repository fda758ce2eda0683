//! # Protocol Translator
//!
//! Stateless mapping between the carrier's media-stream events and the agent's
//! conversation events. Each function looks at one frame and decides what, if
//! anything, it becomes on the other side; the controller applies the result to
//! the session and the sockets.
//!
//! ## Telephony → Agent
//! | event   | result |
//! |---------|--------|
//! | start   | session start (never forwarded) |
//! | media   | `{ "user_audio_chunk": payload }`, payload untouched |
//! | media (outbound track) | ignored |
//! | stop    | close the agent leg, close the session |
//! | connected, mark, dtmf | logged only |
//! | other   | ignored |
//!
//! ## Agent → Telephony
//! | type | result |
//! |------|--------|
//! | audio (stream known) | `media` frame with the stream sid |
//! | interruption (stream known) | `clear` frame |
//! | ping | `pong` back to the agent, same event id |
//! | client_tool_call | human handoff |
//! | transcripts, responses, metadata, tool_request | logged only |
//!
//! Every frame maps to at most one outbound frame and nothing is reordered.

use crate::agent::protocol::{
    AgentCommand, AgentControl, AgentEvent, AgentOverride, ConversationConfigOverride,
    PromptOverride,
};
use crate::bridge::session::CallParameters;
use crate::telephony::protocol::{OutboundMedia, TelephonyCommand, TelephonyEvent};
use tracing::{debug, info};

const DEFAULT_PROMPT: &str = "You are Shifa, a friendly phone assistant calling on behalf of our team. \
Introduce yourself, confirm you are speaking with the right person, and find out what they need. \
Keep every answer to one or two short sentences, never invent facts, and if the person asks \
for a human, use the transfer_to_human tool.";

const DEFAULT_FIRST_MESSAGE: &str =
    "Hello! This is Shifa, an AI assistant. Do you have a moment to talk?";

/// Fallback script used when the call parameters carry no prompt or opening line.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDefaults {
    pub prompt: String,
    pub first_message: String,
}

impl Default for ConversationDefaults {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            first_message: DEFAULT_FIRST_MESSAGE.to_string(),
        }
    }
}

/// What a telephony frame turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundRoute {
    Start {
        stream_sid: String,
        call_sid: String,
        parameters: CallParameters,
    },
    Forward(AgentCommand),
    Stop,
    Ignore(&'static str),
}

/// What an agent frame turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundRoute {
    Telephony(TelephonyCommand),
    Agent(AgentCommand),
    Handoff {
        tool_name: Option<String>,
        tool_call_id: Option<String>,
    },
    Drop(&'static str),
    Observed,
}

pub fn route_telephony(event: TelephonyEvent) -> InboundRoute {
    match event {
        TelephonyEvent::Start { start } => InboundRoute::Start {
            stream_sid: start.stream_sid,
            call_sid: start.call_sid,
            parameters: CallParameters::new(start.custom_parameters),
        },
        TelephonyEvent::Media { media } if !media.is_inbound() => {
            InboundRoute::Ignore("outbound track media")
        }
        TelephonyEvent::Media { media } => InboundRoute::Forward(user_audio(media.payload)),
        TelephonyEvent::Stop { .. } => InboundRoute::Stop,
        TelephonyEvent::Connected { protocol } => {
            debug!(protocol = ?protocol, "Carrier media stream connected");
            InboundRoute::Ignore("connected")
        }
        TelephonyEvent::Mark { mark } => {
            debug!(mark = ?mark.and_then(|m| m.name), "Playback mark reached");
            InboundRoute::Ignore("mark")
        }
        TelephonyEvent::Dtmf { dtmf } => {
            info!(digit = ?dtmf.and_then(|d| d.digit), "Caller pressed a key");
            InboundRoute::Ignore("dtmf")
        }
        other => InboundRoute::Ignore(other.name()),
    }
}

/// Route one agent frame. `stream_sid` is the session's stream, if known.
pub fn route_agent(stream_sid: Option<&str>, event: AgentEvent) -> OutboundRoute {
    match event {
        AgentEvent::ConversationInitiationMetadata {
            conversation_initiation_metadata_event,
        } => {
            let (conversation_id, output_format) = match conversation_initiation_metadata_event {
                Some(meta) => (meta.conversation_id, meta.agent_output_audio_format),
                None => (None, None),
            };
            info!(
                conversation_id = %conversation_id.unwrap_or_default(),
                output_format = ?output_format,
                "Received initiation metadata"
            );
            OutboundRoute::Observed
        }
        AgentEvent::Audio { .. } => {
            let Some(stream_sid) = stream_sid else {
                return OutboundRoute::Drop("audio before stream start");
            };
            match event.audio_payload() {
                Some(payload) => OutboundRoute::Telephony(media(stream_sid, payload)),
                None => OutboundRoute::Drop("audio frame without payload"),
            }
        }
        AgentEvent::Interruption => match stream_sid {
            Some(stream_sid) => OutboundRoute::Telephony(clear(stream_sid)),
            None => OutboundRoute::Drop("interruption before stream start"),
        },
        AgentEvent::Ping { ping_event } => {
            let Some(ping) = ping_event else {
                return OutboundRoute::Drop("ping without event id");
            };
            debug!(event_id = ?ping.event_id, ping_ms = ?ping.ping_ms, "Agent ping");
            match ping.event_id {
                Some(event_id) => OutboundRoute::Agent(AgentCommand::Control(AgentControl::Pong { event_id })),
                None => OutboundRoute::Drop("ping without event id"),
            }
        }
        AgentEvent::UserTranscript {
            user_transcription_event,
        } => {
            if let Some(text) = user_transcription_event.and_then(|e| e.user_transcript) {
                info!(transcript = %text, "User said");
            }
            OutboundRoute::Observed
        }
        AgentEvent::AgentResponse {
            agent_response_event,
        } => {
            if let Some(text) = agent_response_event.and_then(|e| e.agent_response) {
                info!(response = %text, "Agent said");
            }
            OutboundRoute::Observed
        }
        AgentEvent::AgentResponseCorrection {
            agent_response_correction_event,
        } => {
            if let Some(correction) = agent_response_correction_event {
                info!(
                    original = %correction.original_agent_response.unwrap_or_default(),
                    corrected = %correction.corrected_agent_response.unwrap_or_default(),
                    "Agent response corrected"
                );
            }
            OutboundRoute::Observed
        }
        AgentEvent::ToolRequest { tool_request } => {
            let tool_name = tool_request.and_then(|t| t.tool_name).unwrap_or_default();
            info!(tool = %tool_name, "Agent requested tool");
            OutboundRoute::Observed
        }
        AgentEvent::ClientToolCall { client_tool_call } => {
            let (tool_name, tool_call_id) = match client_tool_call {
                Some(call) => {
                    debug!(tool = ?call.tool_name, parameters = ?call.parameters, "Agent called client tool");
                    (call.tool_name, call.tool_call_id)
                }
                None => (None, None),
            };
            OutboundRoute::Handoff {
                tool_name,
                tool_call_id,
            }
        }
        AgentEvent::Unknown => {
            debug!("Unhandled agent message type");
            OutboundRoute::Observed
        }
    }
}

pub fn user_audio(payload: String) -> AgentCommand {
    AgentCommand::UserAudio {
        user_audio_chunk: payload,
    }
}

pub fn media(stream_sid: &str, payload: &str) -> TelephonyCommand {
    TelephonyCommand::Media {
        stream_sid: stream_sid.to_string(),
        media: OutboundMedia {
            payload: payload.to_string(),
        },
    }
}

pub fn clear(stream_sid: &str) -> TelephonyCommand {
    TelephonyCommand::Clear {
        stream_sid: stream_sid.to_string(),
    }
}

/// The `conversation_initiation_client_data` payload for a started call.
pub fn initiation(parameters: &CallParameters, defaults: &ConversationDefaults) -> AgentCommand {
    let prompt = parameters.prompt().unwrap_or(&defaults.prompt).to_string();
    let first_message = parameters
        .first_message()
        .unwrap_or(&defaults.first_message)
        .to_string();

    AgentCommand::Control(AgentControl::ConversationInitiationClientData {
        conversation_config_override: ConversationConfigOverride {
            agent: AgentOverride {
                prompt: PromptOverride { prompt },
                first_message,
            },
        },
        dynamic_variables: parameters.non_empty(),
    })
}

pub fn tool_result(tool_call_id: String, result: &str, is_error: bool) -> AgentCommand {
    AgentCommand::Control(AgentControl::ClientToolResult {
        tool_call_id,
        result: result.to_string(),
        is_error,
    })
}
