//! # Carrier REST Client
//!
//! Thin wrapper over the carrier's Calls resource:
//! - originate a call (`POST Calls.json`) driven by a TwiML url or inline TwiML
//! - fetch one call (`GET Calls/{sid}.json`)
//! - replace a live call's instructions (`POST Calls/{sid}.json` with `Twiml`)
//!
//! The client holds no per-call state; one instance is shared by every request
//! handler and every bridge.

use crate::config::TelephonyConfig;
use crate::error::{CallError, CallResult};
use serde::Deserialize;
use tracing::debug;

/// The subset of the carrier's call resource we read.
#[derive(Debug, Clone, Deserialize)]
pub struct CallResource {
    pub sid: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
}

impl CallResource {
    /// The party on the far side of our number: the callee for calls we placed,
    /// the caller otherwise.
    pub fn customer_number(&self) -> Option<&str> {
        let outbound = self
            .direction
            .as_deref()
            .map(|direction| direction.starts_with("outbound"))
            .unwrap_or(true);

        if outbound {
            self.to.as_deref()
        } else {
            self.from.as_deref()
        }
    }
}

/// What the carrier should do once the new call is answered.
#[derive(Debug, Clone)]
pub enum CallInstructions {
    /// Fetch TwiML from this url
    Url(String),
    /// Execute this TwiML document
    Twiml(String),
}

#[derive(Clone)]
pub struct TelephonyClient {
    http: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    caller_id: String,
}

impl TelephonyClient {
    pub fn new(http: reqwest::Client, config: &TelephonyConfig) -> Self {
        Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            caller_id: config.phone_number.clone(),
        }
    }

    fn calls_url(&self) -> String {
        format!("{}/2010-04-01/Accounts/{}/Calls.json", self.base_url, self.account_sid)
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.base_url, self.account_sid, call_sid
        )
    }

    /// Place a call from our number to `to`.
    pub async fn create_call(&self, to: &str, instructions: CallInstructions) -> CallResult<CallResource> {
        let (key, value) = match &instructions {
            CallInstructions::Url(url) => ("Url", url.as_str()),
            CallInstructions::Twiml(twiml) => ("Twiml", twiml.as_str()),
        };

        debug!(to = %to, instructions = key, "Creating outbound call");

        let response = self
            .http
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.caller_id.as_str()), (key, value)])
            .send()
            .await?;

        Self::parse_call(response).await
    }

    pub async fn fetch_call(&self, call_sid: &str) -> CallResult<CallResource> {
        let response = self
            .http
            .get(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;

        Self::parse_call(response).await
    }

    /// Replace whatever the live call is doing with `twiml`.
    pub async fn update_call_twiml(&self, call_sid: &str, twiml: &str) -> CallResult<CallResource> {
        let response = self
            .http
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Twiml", twiml)])
            .send()
            .await?;

        Self::parse_call(response).await
    }

    async fn parse_call(response: reqwest::Response) -> CallResult<CallResource> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<CallResource>().await?)
    }
}
