//! # Transfer Orchestrator
//!
//! Hands a live call over to a human by way of a conference:
//!
//! 1. Fetch the call to learn the customer's number
//! 2. Redirect the customer's leg into conference `transfer-{call_sid}`, set up
//!    so it neither starts the mix nor ends the conference on its own
//! 3. Dial the human agent with TwiML that joins the same conference, starting
//!    the mix on entry and ending the conference when the agent hangs up
//!
//! Best effort: the first failing step is logged and the transfer stops there.
//! Nothing is retried or rolled back. Transfers run on their own task and are
//! never awaited by the bridge.

use crate::error::{CallError, CallResult};
use crate::telephony::client::{CallInstructions, TelephonyClient};
use crate::telephony::twiml;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub call_sid: String,
    pub target_number: String,
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub conference: String,
    pub agent_call_sid: String,
}

#[derive(Clone)]
pub struct TransferOrchestrator {
    telephony: TelephonyClient,
}

impl TransferOrchestrator {
    pub fn new(telephony: TelephonyClient) -> Self {
        Self { telephony }
    }

    /// Run the transfer on a background task.
    pub fn spawn(&self, request: TransferRequest) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(err) = orchestrator.transfer(&request).await {
                error!(
                    call_sid = %request.call_sid,
                    target = %request.target_number,
                    error = %err,
                    "Transfer failed"
                );
            }
        });
    }

    pub async fn transfer(&self, request: &TransferRequest) -> CallResult<TransferOutcome> {
        let conference = twiml::conference_name(&request.call_sid);
        info!(
            call_sid = %request.call_sid,
            target = %request.target_number,
            conference = %conference,
            "Starting transfer to human agent"
        );

        let call = self
            .telephony
            .fetch_call(&request.call_sid)
            .await
            .map_err(|e| step_failed("fetch call", e))?;
        debug!(call_sid = %request.call_sid, status = ?call.status, "Fetched call for transfer");
        let customer = call.customer_number().map(str::to_string);
        if customer.is_none() {
            warn!(call_sid = %request.call_sid, "Call has no customer number");
        }

        self.telephony
            .update_call_twiml(&request.call_sid, &twiml::conference_hold(&conference))
            .await
            .map_err(|e| step_failed("move caller into conference", e))?;

        let announcement = customer
            .as_deref()
            .map(|number| format!("Incoming transfer from {}.", number));
        let agent_call = self
            .telephony
            .create_call(
                &request.target_number,
                CallInstructions::Twiml(twiml::conference_join(&conference, announcement.as_deref())),
            )
            .await
            .map_err(|e| step_failed("dial human agent", e))?;

        info!(
            call_sid = %request.call_sid,
            agent_call_sid = %agent_call.sid,
            conference = %conference,
            "Human agent dialed into conference"
        );

        Ok(TransferOutcome {
            conference,
            agent_call_sid: agent_call.sid,
        })
    }
}

fn step_failed(step: &str, err: CallError) -> CallError {
    CallError::TransferFailure(format!("{}: {}", step, err))
}
