//! # Media Stream Socket
//!
//! The carrier connects to `/outbound-media-stream` once the callee picks up.
//! Each connection becomes one [`MediaStreamSocket`] actor, which:
//!
//! 1. Opens the agent socket as soon as the carrier connects (before `start`)
//! 2. Feeds carrier frames and agent signals into a [`BridgeController`]
//! 3. Performs the [`Effect`]s the controller returns
//!
//! ## Lifecycle:
//! - The actor stops when the carrier closes, the agent closes, or the carrier
//!   socket has been silent for `bridge.idle_timeout_secs`
//! - Stopping always closes the agent side
//! - Transfers run on their own task and outlive the actor

use crate::agent::connector::{AgentConnection, AgentConnector, AgentSignal};
use crate::bridge::controller::{BridgeController, Effect};
use crate::error::CallError;
use crate::state::AppState;
use crate::transfer::TransferOrchestrator;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the idle check runs.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

pub struct MediaStreamSocket {
    controller: BridgeController,
    agent: Option<AgentConnection>,
    connector: AgentConnector,
    transfers: TransferOrchestrator,
    state: web::Data<AppState>,
    idle_timeout: Duration,
    last_activity: Instant,
}

impl MediaStreamSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        let controller = BridgeController::new(
            state.defaults.clone(),
            state.config.default_forward_number().map(str::to_string),
        );

        Self {
            controller,
            agent: None,
            connector: state.agents.clone(),
            transfers: state.transfers.clone(),
            idle_timeout: Duration::from_secs(state.config.bridge.idle_timeout_secs),
            last_activity: Instant::now(),
            state,
        }
    }

    /// Fetch a signed session and open the agent socket without blocking the
    /// carrier stream. Carrier frames keep flowing while this is pending.
    fn connect_agent(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let connector = self.connector.clone();
        let connect = async move { connector.connect().await };

        ctx.spawn(connect.into_actor(self).map(|result, act, ctx| {
            let effects = match result {
                Ok((connection, signals)) => {
                    act.agent = Some(connection);
                    ctx.add_stream(signals);
                    act.controller.on_agent_open()
                }
                Err(err) => act.controller.on_agent_setup_failed(&err),
            };
            act.apply(effects, ctx);
        }));
    }

    fn apply(&mut self, effects: Vec<Effect>, ctx: &mut ws::WebsocketContext<Self>) {
        for effect in effects {
            match effect {
                Effect::Telephony(command) => match command.to_json() {
                    Ok(json) => ctx.text(json),
                    Err(err) => error!(error = %err, "Failed to encode carrier frame"),
                },
                Effect::Agent(command) => match &self.agent {
                    Some(connection) => {
                        if let Err(err) = connection.send(&command) {
                            warn!(error = %err, "Failed to send frame to agent");
                        }
                    }
                    None if command.is_initiation() => {
                        warn!("Agent not connected, conversation initiation not delivered")
                    }
                    None => debug!("Agent not connected, dropping frame"),
                },
                Effect::CloseAgent => {
                    if let Some(connection) = self.agent.take() {
                        connection.close();
                    }
                }
                Effect::CloseTelephony => {
                    ctx.close(Some(ws::CloseCode::Normal.into()));
                    ctx.stop();
                }
                Effect::Transfer(request) => {
                    self.state.increment_transfers();
                    self.transfers.spawn(request);
                }
            }
        }
    }
}

impl Actor for MediaStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Carrier connected to outbound media stream");
        self.state.increment_active_calls();
        self.connect_agent(ctx);

        ctx.run_interval(IDLE_CHECK_INTERVAL, |act, ctx| {
            if act.last_activity.elapsed() > act.idle_timeout {
                warn!(
                    call_sid = ?act.controller.session().call_sid(),
                    idle_secs = act.last_activity.elapsed().as_secs(),
                    "Media stream idle, closing call"
                );
                let effects = act.controller.on_telephony_closed();
                act.apply(effects, ctx);
                ctx.stop();
            }
        });
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        let effects = self.controller.on_telephony_closed();
        self.apply(effects, ctx);
        self.state.decrement_active_calls();
        info!(
            call_sid = ?self.controller.session().call_sid(),
            "Media stream connection stopped"
        );
    }
}

/// Carrier frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_activity = Instant::now();
                let effects = self.controller.on_telephony_frame(&text);
                self.apply(effects, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                warn!(bytes = data.len(), "Ignoring binary frame from carrier");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_activity = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_activity = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(?reason, "Carrier closed media stream");
                let effects = self.controller.on_telephony_closed();
                self.apply(effects, ctx);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Ignoring continuation frame from carrier");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(error = %CallError::Socket(err.to_string()), "Carrier socket error");
                let effects = self.controller.on_telephony_closed();
                self.apply(effects, ctx);
                ctx.stop();
            }
        }
    }
}

/// Agent socket signals.
impl StreamHandler<AgentSignal> for MediaStreamSocket {
    fn handle(&mut self, signal: AgentSignal, ctx: &mut Self::Context) {
        let effects = match signal {
            AgentSignal::Message(text) => self.controller.on_agent_frame(&text),
            AgentSignal::Closed => {
                self.agent = None;
                self.controller.on_agent_closed()
            }
            AgentSignal::Error(reason) => {
                self.agent = None;
                self.controller.on_agent_error(&CallError::Socket(reason))
            }
        };
        self.apply(effects, ctx);
    }

    /// The signal stream ending is reported through `AgentSignal::Closed`;
    /// it must not stop the carrier side by itself.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!("Agent signal stream finished");
    }
}

/// WebSocket upgrade for the carrier's media stream.
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    debug!(peer = ?req.connection_info().peer_addr(), "Media stream upgrade requested");
    ws::start(MediaStreamSocket::new(state), &req, stream)
}
