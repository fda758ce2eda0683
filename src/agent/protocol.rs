//! # Agent Socket Wire Format
//!
//! JSON frames exchanged with the conversational agent. Frames from the agent
//! are tagged by `type`. Frames to the agent are either tagged the same way
//! or, for caller audio, a bare `{ "user_audio_chunk": ... }` object.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A frame received from the agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ConversationInitiationMetadata {
        #[serde(default)]
        conversation_initiation_metadata_event: Option<InitiationMetadata>,
    },

    /// Agent speech. The chunk arrives in one of two shapes depending on the
    /// agent's protocol version.
    Audio {
        #[serde(default)]
        audio: Option<AudioChunk>,
        #[serde(default)]
        audio_event: Option<AudioEvent>,
    },

    /// The caller talked over the agent; pending playback must be discarded
    Interruption,

    Ping {
        #[serde(default)]
        ping_event: Option<PingEvent>,
    },

    UserTranscript {
        #[serde(default)]
        user_transcription_event: Option<UserTranscription>,
    },

    AgentResponse {
        #[serde(default)]
        agent_response_event: Option<AgentResponseEvent>,
    },

    AgentResponseCorrection {
        #[serde(default)]
        agent_response_correction_event: Option<AgentResponseCorrectionEvent>,
    },

    /// Server-side tool invocation, informational only
    ToolRequest {
        #[serde(default)]
        tool_request: Option<ToolInvocation>,
    },

    /// Tool the agent wants us to run; used for the human handoff
    ClientToolCall {
        #[serde(default)]
        client_tool_call: Option<ToolInvocation>,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiationMetadata {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub agent_output_audio_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioChunk {
    #[serde(default)]
    pub chunk: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioEvent {
    #[serde(default)]
    pub audio_base_64: Option<String>,
}

/// Ping/pong ids are echoed back verbatim, whatever their JSON type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    Number(u64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    #[serde(default)]
    pub event_id: Option<EventId>,
    #[serde(default)]
    pub ping_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserTranscription {
    #[serde(default)]
    pub user_transcript: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponseEvent {
    #[serde(default)]
    pub agent_response: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponseCorrectionEvent {
    #[serde(default)]
    pub original_agent_response: Option<String>,
    #[serde(default)]
    pub corrected_agent_response: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolInvocation {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

impl AgentEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Base64 audio of an `audio` frame, from whichever shape carried it.
    pub fn audio_payload(&self) -> Option<&str> {
        match self {
            AgentEvent::Audio { audio, audio_event } => audio
                .as_ref()
                .and_then(|a| a.chunk.as_deref())
                .filter(|chunk| !chunk.is_empty())
                .or_else(|| audio_event.as_ref().and_then(|e| e.audio_base_64.as_deref()))
                .filter(|payload| !payload.is_empty()),
            _ => None,
        }
    }
}

/// A frame we send to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AgentCommand {
    /// Caller audio, base64 exactly as the carrier delivered it
    UserAudio { user_audio_chunk: String },
    Control(AgentControl),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentControl {
    ConversationInitiationClientData {
        conversation_config_override: ConversationConfigOverride,
        #[serde(skip_serializing_if = "HashMap::is_empty")]
        dynamic_variables: HashMap<String, String>,
    },
    Pong {
        event_id: EventId,
    },
    ClientToolResult {
        tool_call_id: String,
        result: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationConfigOverride {
    pub agent: AgentOverride,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentOverride {
    pub prompt: PromptOverride,
    pub first_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptOverride {
    pub prompt: String,
}

impl AgentCommand {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn is_initiation(&self) -> bool {
        matches!(
            self,
            AgentCommand::Control(AgentControl::ConversationInitiationClientData { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audio_payload_from_both_shapes() {
        let legacy = AgentEvent::parse(r#"{"type":"audio","audio":{"chunk":"QUJD"}}"#).unwrap();
        assert_eq!(legacy.audio_payload(), Some("QUJD"));

        let current = AgentEvent::parse(
            r#"{"type":"audio","audio_event":{"audio_base_64":"REVG","event_id":3}}"#,
        )
        .unwrap();
        assert_eq!(current.audio_payload(), Some("REVG"));

        let empty = AgentEvent::parse(r#"{"type":"audio"}"#).unwrap();
        assert_eq!(empty.audio_payload(), None);
    }

    #[test]
    fn test_empty_audio_strings_are_not_payloads() {
        let fallback = AgentEvent::parse(
            r#"{"type":"audio","audio":{"chunk":""},"audio_event":{"audio_base_64":"REVG"}}"#,
        )
        .unwrap();
        assert_eq!(fallback.audio_payload(), Some("REVG"));

        let blank = AgentEvent::parse(r#"{"type":"audio","audio_event":{"audio_base_64":""}}"#).unwrap();
        assert_eq!(blank.audio_payload(), None);
    }

    #[test]
    fn test_parse_ping_and_tool_call() {
        match AgentEvent::parse(r#"{"type":"ping","ping_event":{"event_id":7,"ping_ms":40}}"#).unwrap() {
            AgentEvent::Ping { ping_event } => {
                let ping = ping_event.unwrap();
                assert_eq!(ping.event_id, Some(EventId::Number(7)));
                assert_eq!(ping.ping_ms, Some(40));
            }
            other => panic!("Wrong event: {:?}", other),
        }

        let call = AgentEvent::parse(
            r#"{"type":"client_tool_call","client_tool_call":{"tool_name":"transfer_to_human","tool_call_id":"t1","parameters":{}}}"#,
        )
        .unwrap();
        match call {
            AgentEvent::ClientToolCall { client_tool_call } => {
                let call = client_tool_call.unwrap();
                assert_eq!(call.tool_name.as_deref(), Some("transfer_to_human"));
                assert_eq!(call.tool_call_id.as_deref(), Some("t1"));
                assert_eq!(call.parameters, Some(json!({})));
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_interruption_with_extra_fields() {
        let event = AgentEvent::parse(r#"{"type":"interruption","interruption_event":{"event_id":9}}"#).unwrap();
        assert!(matches!(event, AgentEvent::Interruption));
        assert!(matches!(AgentEvent::parse(r#"{"type":"vad_score"}"#).unwrap(), AgentEvent::Unknown));
    }

    #[test]
    fn test_command_serialization() {
        let audio = AgentCommand::UserAudio { user_audio_chunk: "AAAA".to_string() };
        assert_eq!(audio.to_json().unwrap(), r#"{"user_audio_chunk":"AAAA"}"#);

        let pong = AgentCommand::Control(AgentControl::Pong { event_id: EventId::Number(7) });
        let value: serde_json::Value = serde_json::from_str(&pong.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "pong", "event_id": 7}));

        let init = AgentCommand::Control(AgentControl::ConversationInitiationClientData {
            conversation_config_override: ConversationConfigOverride {
                agent: AgentOverride {
                    prompt: PromptOverride { prompt: "p".to_string() },
                    first_message: "hello".to_string(),
                },
            },
            dynamic_variables: HashMap::new(),
        });
        assert!(init.is_initiation());
        let value: serde_json::Value = serde_json::from_str(&init.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "conversation_initiation_client_data",
                "conversation_config_override": {
                    "agent": { "prompt": { "prompt": "p" }, "first_message": "hello" }
                }
            })
        );
    }
}
