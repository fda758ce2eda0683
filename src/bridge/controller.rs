//! # Bridge Controller
//!
//! The per-call state machine. Every socket event is fed in through one of the
//! `on_*` methods, which update the [`CallSession`] and return the [`Effect`]s
//! the socket layer must carry out, in order. Nothing here touches a socket,
//! so the whole call flow can be driven from tests.
//!
//! ## Ordering rules:
//! - Effects are returned in the order they must be applied
//! - The initiation payload goes out exactly once, as soon as the stream has
//!   started *and* the agent socket is open, whichever happens last
//! - A pong is returned from the same call that handled its ping, so it is
//!   queued ahead of anything the agent receives afterwards
//!
//! ## Closing rules:
//! - Telephony `stop` or telephony socket close: close the agent leg
//! - Agent socket close or error: close the telephony socket
//! - Closing is idempotent; events after close are ignored

use crate::agent::connector::UpstreamState;
use crate::agent::protocol::{AgentCommand, AgentEvent};
use crate::bridge::session::{CallPhase, CallSession};
use crate::bridge::translator::{self, ConversationDefaults, InboundRoute, OutboundRoute};
use crate::error::CallError;
use crate::telephony::protocol::{TelephonyCommand, TelephonyEvent};
use crate::transfer::TransferRequest;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Something the socket layer must do on behalf of the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write a frame to the telephony socket
    Telephony(TelephonyCommand),
    /// Write a frame to the agent socket
    Agent(AgentCommand),
    /// Close the agent socket (no-op if it never opened)
    CloseAgent,
    /// Close the telephony socket and stop the bridge
    CloseTelephony,
    /// Start the human handoff in the background
    Transfer(TransferRequest),
}

pub struct BridgeController {
    session: CallSession,
    defaults: Arc<ConversationDefaults>,
    default_forward_number: Option<String>,
}

impl BridgeController {
    pub fn new(defaults: Arc<ConversationDefaults>, default_forward_number: Option<String>) -> Self {
        Self {
            session: CallSession::new(),
            defaults,
            default_forward_number,
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    // ---- telephony side ----

    pub fn on_telephony_frame(&mut self, text: &str) -> Vec<Effect> {
        match TelephonyEvent::parse(text) {
            Ok(event) => self.on_telephony_event(event),
            Err(err) => {
                warn!(error = %CallError::from(err), "Dropping malformed telephony frame");
                Vec::new()
            }
        }
    }

    pub fn on_telephony_event(&mut self, event: TelephonyEvent) -> Vec<Effect> {
        if self.session.is_closed() {
            debug!(event = event.name(), "Ignoring telephony event after close");
            return Vec::new();
        }

        match translator::route_telephony(event) {
            InboundRoute::Start {
                stream_sid,
                call_sid,
                parameters,
            } => {
                info!(
                    stream_sid = %stream_sid,
                    call_sid = %call_sid,
                    parameters = parameters.len(),
                    "Stream started"
                );
                if parameters.is_empty() {
                    debug!("Stream started without call parameters, using default script");
                }
                if let Err(reason) = self.session.start(stream_sid, call_sid, parameters) {
                    warn!("Ignoring duplicate start event: {}", reason);
                    return Vec::new();
                }
                self.initiation_if_due()
            }
            InboundRoute::Forward(command) => {
                if self.session.stream_sid().is_none() {
                    self.session.stats.dropped_frames += 1;
                    debug!("Dropping caller audio received before stream start");
                    return Vec::new();
                }
                if self.session.upstream() != UpstreamState::Open {
                    self.session.stats.dropped_frames += 1;
                    return Vec::new();
                }
                self.session.stats.frames_to_agent += 1;
                vec![Effect::Agent(command)]
            }
            InboundRoute::Stop => {
                info!(stream_sid = ?self.session.stream_sid(), "Stream stopped by carrier");
                self.close_agent_side()
            }
            InboundRoute::Ignore(name) => {
                debug!(event = name, "Unhandled telephony event");
                Vec::new()
            }
        }
    }

    /// Telephony socket closed or errored.
    pub fn on_telephony_closed(&mut self) -> Vec<Effect> {
        if !self.session.is_closed() {
            info!(call_sid = ?self.session.call_sid(), "Telephony socket disconnected");
        }
        self.close_agent_side()
    }

    // ---- agent side ----

    /// The agent socket handshake completed.
    pub fn on_agent_open(&mut self) -> Vec<Effect> {
        if self.session.is_closed() {
            debug!("Agent connected after the call ended, closing it");
            return vec![Effect::CloseAgent];
        }
        self.session.upstream_opened();
        self.initiation_if_due()
    }

    /// Signed-session fetch or handshake failed. The caller stays connected
    /// but will not hear the agent.
    pub fn on_agent_setup_failed(&mut self, err: &CallError) -> Vec<Effect> {
        error!(call_sid = ?self.session.call_sid(), error = %err, "Agent setup failed");
        self.session.upstream_closed();
        Vec::new()
    }

    pub fn on_agent_frame(&mut self, text: &str) -> Vec<Effect> {
        match AgentEvent::parse(text) {
            Ok(event) => self.on_agent_event(event),
            Err(err) => {
                warn!(error = %CallError::from(err), "Dropping malformed agent frame");
                Vec::new()
            }
        }
    }

    pub fn on_agent_event(&mut self, event: AgentEvent) -> Vec<Effect> {
        if self.session.is_closed() {
            return Vec::new();
        }

        match translator::route_agent(self.session.stream_sid(), event) {
            OutboundRoute::Telephony(command) => {
                self.session.stats.frames_to_telephony += 1;
                vec![Effect::Telephony(command)]
            }
            OutboundRoute::Agent(command) => vec![Effect::Agent(command)],
            OutboundRoute::Handoff {
                tool_name,
                tool_call_id,
            } => self.handoff(tool_name, tool_call_id),
            OutboundRoute::Drop(reason) => {
                self.session.stats.dropped_frames += 1;
                debug!(reason, "Dropping agent frame");
                Vec::new()
            }
            OutboundRoute::Observed => Vec::new(),
        }
    }

    /// Agent socket closed: the call is over for us.
    pub fn on_agent_closed(&mut self) -> Vec<Effect> {
        info!(call_sid = ?self.session.call_sid(), "Agent disconnected");
        self.session.upstream_closed();
        if self.finish() {
            vec![Effect::CloseTelephony]
        } else {
            Vec::new()
        }
    }

    pub fn on_agent_error(&mut self, err: &CallError) -> Vec<Effect> {
        warn!(call_sid = ?self.session.call_sid(), error = %err, "Agent socket error");
        self.on_agent_closed()
    }

    // ---- internals ----

    fn initiation_if_due(&mut self) -> Vec<Effect> {
        if !self.session.initiation_due() {
            return Vec::new();
        }
        self.session.mark_initiation_sent();
        let command = translator::initiation(self.session.parameters(), &self.defaults);
        info!(
            call_sid = ?self.session.call_sid(),
            custom_prompt = self.session.parameters().prompt().is_some(),
            "Sending conversation initiation"
        );
        vec![Effect::Agent(command)]
    }

    fn handoff(&mut self, tool_name: Option<String>, tool_call_id: Option<String>) -> Vec<Effect> {
        info!(tool = %tool_name.as_deref().unwrap_or("unknown"), "Agent requested human handoff");

        let Some(call_sid) = self.session.call_sid().map(str::to_string) else {
            warn!("Handoff requested before the stream started");
            return Self::acknowledge(tool_call_id, "The call is not connected yet", true);
        };

        let target = self
            .session
            .parameters()
            .forward_to()
            .map(str::to_string)
            .or_else(|| self.default_forward_number.clone());
        let Some(target_number) = target else {
            warn!(call_sid = %call_sid, "No forward-to number for handoff");
            return Self::acknowledge(tool_call_id, "No transfer number is available for this call", true);
        };

        if self.session.phase() == CallPhase::Transferring {
            debug!(call_sid = %call_sid, "Handoff already in progress");
            return Self::acknowledge(tool_call_id, "Transfer already in progress", false);
        }
        if let Err(reason) = self.session.begin_transfer() {
            warn!("{}", reason);
            return Vec::new();
        }

        let mut effects = vec![Effect::Transfer(TransferRequest {
            call_sid,
            target_number,
        })];
        effects.extend(Self::acknowledge(
            tool_call_id,
            "Transferring the call to a human agent",
            false,
        ));
        effects
    }

    fn acknowledge(tool_call_id: Option<String>, result: &str, is_error: bool) -> Vec<Effect> {
        tool_call_id
            .map(|id| vec![Effect::Agent(translator::tool_result(id, result, is_error))])
            .unwrap_or_default()
    }

    fn close_agent_side(&mut self) -> Vec<Effect> {
        if !self.finish() {
            return Vec::new();
        }
        if self.session.upstream() == UpstreamState::Closed {
            return Vec::new();
        }
        self.session.upstream_closed();
        vec![Effect::CloseAgent]
    }

    /// Close the session, logging a summary the first time.
    fn finish(&mut self) -> bool {
        if !self.session.close() {
            return false;
        }
        let stats = self.session.stats;
        info!(
            call_sid = ?self.session.call_sid(),
            stream_sid = ?self.session.stream_sid(),
            age_seconds = self.session.age_seconds(),
            streaming_seconds = self.session.streaming_seconds(),
            frames_to_agent = stats.frames_to_agent,
            frames_to_telephony = stats.frames_to_telephony,
            dropped_frames = stats.dropped_frames,
            "Call session closed"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::protocol::{AgentControl, EventId};
    use crate::telephony::protocol::OutboundMedia;
    use serde_json::json;

    fn controller() -> BridgeController {
        BridgeController::new(Arc::new(ConversationDefaults::default()), None)
    }

    fn start_frame(params: serde_json::Value) -> String {
        json!({
            "event": "start",
            "start": { "streamSid": "S1", "callSid": "C1", "customParameters": params },
            "streamSid": "S1"
        })
        .to_string()
    }

    fn media_frame(payload: &str) -> String {
        json!({ "event": "media", "streamSid": "S1", "media": { "payload": payload } }).to_string()
    }

    /// Controller with the stream started, the agent open and the initiation sent.
    fn streaming(params: serde_json::Value) -> BridgeController {
        let mut bridge = controller();
        assert!(bridge.on_telephony_frame(&start_frame(params)).is_empty());
        let effects = bridge.on_agent_open();
        assert_eq!(effects.len(), 1);
        bridge
    }

    fn telephony_json(effect: &Effect) -> serde_json::Value {
        match effect {
            Effect::Telephony(command) => serde_json::from_str(&command.to_json().unwrap()).unwrap(),
            other => panic!("Expected telephony frame, got {:?}", other),
        }
    }

    #[test]
    fn test_initiation_when_agent_opens_first() {
        let mut bridge = controller();
        assert!(bridge.on_agent_open().is_empty());

        let effects = bridge.on_telephony_frame(&start_frame(json!({ "prompt": "Custom" })));
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::Agent(command) => {
                assert!(command.is_initiation());
                let value: serde_json::Value = serde_json::from_str(&command.to_json().unwrap()).unwrap();
                assert_eq!(value["conversation_config_override"]["agent"]["prompt"]["prompt"], "Custom");
            }
            other => panic!("Unexpected effect {:?}", other),
        }

        // never sent twice
        assert!(bridge.on_agent_open().is_empty());
    }

    #[test]
    fn test_initiation_when_start_arrives_first() {
        let mut bridge = controller();
        assert!(bridge.on_telephony_frame(&start_frame(json!({}))).is_empty());
        let effects = bridge.on_agent_open();
        assert!(matches!(&effects[..], [Effect::Agent(c)] if c.is_initiation()));
    }

    #[test]
    fn test_media_forwarded_in_order_with_identical_payload() {
        let mut bridge = streaming(json!({}));
        let payloads = ["AAAA", "//79/A==", "f39/fw=="];
        let effects: Vec<Effect> = payloads
            .iter()
            .flat_map(|p| bridge.on_telephony_frame(&media_frame(p)))
            .collect();

        let expected: Vec<Effect> = payloads
            .iter()
            .map(|p| Effect::Agent(AgentCommand::UserAudio { user_audio_chunk: p.to_string() }))
            .collect();
        assert_eq!(effects, expected);
        assert_eq!(bridge.session().stats.frames_to_agent, 3);
    }

    #[test]
    fn test_media_before_start_is_not_forwarded() {
        let mut bridge = controller();
        bridge.on_agent_open();
        assert!(bridge.on_telephony_frame(&media_frame("AAAA")).is_empty());
        assert_eq!(bridge.session().stats.dropped_frames, 1);
    }

    #[test]
    fn test_media_while_agent_connecting_is_dropped() {
        let mut bridge = controller();
        bridge.on_telephony_frame(&start_frame(json!({})));
        assert!(bridge.on_telephony_frame(&media_frame("AAAA")).is_empty());
    }

    #[test]
    fn test_agent_audio_scenario() {
        let mut bridge = streaming(json!({}));

        for frame in [
            r#"{"type":"audio","audio":{"chunk":"AAAA"}}"#,
            r#"{"type":"audio","audio_event":{"audio_base_64":"AAAA","event_id":1}}"#,
        ] {
            let effects = bridge.on_agent_frame(frame);
            assert_eq!(effects.len(), 1);
            assert_eq!(
                telephony_json(&effects[0]),
                json!({ "event": "media", "streamSid": "S1", "media": { "payload": "AAAA" } })
            );
        }
    }

    #[test]
    fn test_agent_audio_before_stream_produces_nothing() {
        let mut bridge = controller();
        bridge.on_agent_open();
        assert!(bridge.on_agent_frame(r#"{"type":"audio","audio":{"chunk":"AAAA"}}"#).is_empty());
        assert!(bridge.on_agent_frame(r#"{"type":"interruption"}"#).is_empty());
    }

    #[test]
    fn test_interruption_scenario() {
        let mut bridge = streaming(json!({}));
        let effects = bridge.on_agent_frame(r#"{"type":"interruption","interruption_event":{"event_id":4}}"#);
        assert_eq!(effects.len(), 1);
        assert_eq!(telephony_json(&effects[0]), json!({ "event": "clear", "streamSid": "S1" }));
    }

    #[test]
    fn test_ping_answered_before_anything_else() {
        let mut bridge = streaming(json!({}));
        let effects = bridge.on_agent_frame(r#"{"type":"ping","ping_event":{"event_id":17,"ping_ms":30}}"#);
        assert_eq!(
            effects,
            vec![Effect::Agent(AgentCommand::Control(AgentControl::Pong {
                event_id: EventId::Number(17)
            }))]
        );

        // the next agent-directed frame comes after the pong
        let next = bridge.on_telephony_frame(&media_frame("AAAA"));
        assert!(matches!(&next[..], [Effect::Agent(AgentCommand::UserAudio { .. })]));
    }

    #[test]
    fn test_stop_closes_agent_and_is_idempotent() {
        let mut bridge = streaming(json!({}));
        let stop = r#"{"event":"stop","streamSid":"S1"}"#;

        assert_eq!(bridge.on_telephony_frame(stop), vec![Effect::CloseAgent]);
        assert_eq!(bridge.session().phase(), CallPhase::Closed);
        assert_eq!(bridge.session().upstream(), UpstreamState::Closed);

        assert!(bridge.on_telephony_frame(stop).is_empty());
        assert!(bridge.on_telephony_closed().is_empty());
        assert!(bridge.on_agent_closed().is_empty());
        assert_eq!(bridge.session().phase(), CallPhase::Closed);
    }

    #[test]
    fn test_agent_close_closes_telephony() {
        let mut bridge = streaming(json!({}));
        assert_eq!(bridge.on_agent_closed(), vec![Effect::CloseTelephony]);
        assert_eq!(bridge.session().phase(), CallPhase::Closed);
        assert!(bridge.on_agent_frame(r#"{"type":"audio","audio":{"chunk":"AAAA"}}"#).is_empty());
        assert!(bridge.on_telephony_closed().is_empty());
    }

    #[test]
    fn test_socket_error_before_start() {
        let mut bridge = controller();
        assert_eq!(bridge.on_telephony_closed(), vec![Effect::CloseAgent]);
        assert_eq!(bridge.session().phase(), CallPhase::Closed);
        // a late agent handshake is closed straight away
        assert_eq!(bridge.on_agent_open(), vec![Effect::CloseAgent]);
    }

    #[test]
    fn test_setup_failure_keeps_call_up() {
        let mut bridge = controller();
        let effects = bridge.on_agent_setup_failed(&CallError::SetupFailure("401".to_string()));
        assert!(effects.is_empty());
        bridge.on_telephony_frame(&start_frame(json!({})));
        assert_eq!(bridge.session().phase(), CallPhase::Streaming);
        assert!(bridge.on_telephony_frame(&media_frame("AAAA")).is_empty());
        // stop does not try to close an agent leg that never existed
        assert!(bridge.on_telephony_frame(r#"{"event":"stop"}"#).is_empty());
        assert_eq!(bridge.session().phase(), CallPhase::Closed);
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let mut bridge = streaming(json!({}));
        assert!(bridge.on_telephony_frame("{not json").is_empty());
        assert!(bridge.on_agent_frame("[]").is_empty());
        assert_eq!(bridge.session().phase(), CallPhase::Streaming);
    }

    #[test]
    fn test_transfer_scenario() {
        let mut bridge = streaming(json!({ "forward_to": "+15551230000" }));
        let effects = bridge.on_agent_frame(
            r#"{"type":"client_tool_call","client_tool_call":{"tool_name":"transfer_to_human","tool_call_id":"tc_1","parameters":{}}}"#,
        );

        assert_eq!(
            effects[0],
            Effect::Transfer(TransferRequest {
                call_sid: "C1".to_string(),
                target_number: "+15551230000".to_string(),
            })
        );
        assert!(matches!(
            &effects[1],
            Effect::Agent(AgentCommand::Control(AgentControl::ClientToolResult { tool_call_id, is_error: false, .. }))
                if tool_call_id == "tc_1"
        ));
        assert_eq!(bridge.session().phase(), CallPhase::Transferring);

        // audio keeps flowing both ways
        let audio = bridge.on_agent_frame(r#"{"type":"audio","audio":{"chunk":"BBBB"}}"#);
        assert_eq!(
            audio,
            vec![Effect::Telephony(TelephonyCommand::Media {
                stream_sid: "S1".to_string(),
                media: OutboundMedia { payload: "BBBB".to_string() },
            })]
        );
        assert_eq!(bridge.on_telephony_frame(&media_frame("CCCC")).len(), 1);

        // a second request does not start another transfer
        let again = bridge.on_agent_frame(r#"{"type":"client_tool_call","client_tool_call":{"tool_name":"transfer_to_human"}}"#);
        assert!(again.is_empty());
    }

    #[test]
    fn test_transfer_falls_back_to_default_number() {
        let mut bridge = BridgeController::new(
            Arc::new(ConversationDefaults::default()),
            Some("+15559990000".to_string()),
        );
        bridge.on_telephony_frame(&start_frame(json!({})));
        bridge.on_agent_open();

        let effects = bridge.on_agent_frame(r#"{"type":"client_tool_call","client_tool_call":{"tool_name":"transfer_to_human"}}"#);
        assert_eq!(
            effects,
            vec![Effect::Transfer(TransferRequest {
                call_sid: "C1".to_string(),
                target_number: "+15559990000".to_string(),
            })]
        );
    }

    #[test]
    fn test_transfer_without_number_is_refused() {
        let mut bridge = streaming(json!({}));
        let effects = bridge.on_agent_frame(
            r#"{"type":"client_tool_call","client_tool_call":{"tool_name":"transfer_to_human","tool_call_id":"tc_2"}}"#,
        );
        assert!(matches!(
            &effects[..],
            [Effect::Agent(AgentCommand::Control(AgentControl::ClientToolResult { is_error: true, .. }))]
        ));
        assert_eq!(bridge.session().phase(), CallPhase::Streaming);
    }
}
