//! # Opening Line Generation
//!
//! Produces the agent's first sentence for an outbound call.
//!
//! ## How it works:
//! 1. The configured template is rendered: `{name}` is replaced by the call
//!    parameter `name` (unknown or blank placeholders are dropped)
//! 2. If a text-generation key is configured, the rendered line and the lead
//!    facts are sent to a chat-completion endpoint asking for a natural,
//!    personalised rewrite
//! 3. Any failure in step 2 falls back to the rendered template

use crate::config::GenerationConfig;
use crate::error::{CallError, CallResult};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Clone)]
pub struct OpeningLineGenerator {
    http: reqwest::Client,
    config: GenerationConfig,
}

impl OpeningLineGenerator {
    pub fn new(http: reqwest::Client, config: GenerationConfig) -> Self {
        Self { http, config }
    }

    /// Opening line for a call with the given parameters. Never fails.
    pub async fn opening_line(&self, parameters: &HashMap<String, String>) -> String {
        let rendered = render_template(&self.config.template, parameters);

        if self.api_key().is_none() {
            return rendered;
        }

        match self.personalise(&rendered, parameters).await {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "Opening line generation failed, using template");
                rendered
            }
        }
    }

    fn api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
    }

    async fn personalise(&self, rendered: &str, parameters: &HashMap<String, String>) -> CallResult<String> {
        let api_key = self.api_key().unwrap_or_default();

        let mut facts: Vec<String> = parameters
            .iter()
            .filter(|(key, value)| !value.trim().is_empty() && !matches!(key.as_str(), "prompt" | "first_message" | "forward_to"))
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect();
        facts.sort();

        let body = json!({
            "model": self.config.model,
            "temperature": 0.7,
            "max_tokens": 80,
            "messages": [
                {
                    "role": "system",
                    "content": "You write the first sentence an AI phone agent says when the callee picks up. \
                                One or two short spoken sentences, no emojis, no placeholders."
                },
                {
                    "role": "user",
                    "content": format!("Draft: {}\nFacts:\n{}", rendered, facts.join("\n"))
                }
            ]
        });

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.config.api_base_url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let completion: ChatCompletion = response.json().await?;
        let line = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().trim_matches('"').to_string())
            .filter(|line| !line.is_empty())
            .ok_or_else(|| CallError::Api {
                status: status.as_u16(),
                body: "empty completion".to_string(),
            })?;

        debug!(line = %line, "Generated opening line");
        Ok(line)
    }
}

/// Substitute `{name}` placeholders from `parameters`.
///
/// Placeholders without a non-blank value are removed, along with the space in
/// front of them, so "Hi {client}, ..." renders as "Hi, ..." when the name is
/// unknown.
pub fn render_template(template: &str, parameters: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|i| open + i) else {
            break;
        };
        out.push_str(&rest[..open]);

        let key = rest[open + 1..close].trim();
        match parameters.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            Some(value) => out.push_str(value),
            None => {
                if out.ends_with(' ') {
                    out.pop();
                }
            }
        }
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    out
}
