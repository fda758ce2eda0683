//! # Configuration Management
//!
//! This module loads the bridge configuration once at startup from several sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables with the `APP_` prefix (`APP_TELEPHONY__ACCOUNT_SID`, ...)
//! - The conventional variable names used by hosting platforms and the carrier/agent
//!   dashboards (`PORT`, `TWILIO_ACCOUNT_SID`, `ELEVENLABS_API_KEY`, ...)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Conventional environment variables (HOST, PORT, TWILIO_*, ELEVENLABS_*, OPENAI_API_KEY)
//! 2. Prefixed environment variables (APP_SERVER__PORT, APP_AGENT__AGENT_ID, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! The resulting [`AppConfig`] is validated before the server binds; a missing
//! secret aborts startup instead of failing the first call.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
///
/// ## Why separate config structs:
/// Each outbound collaborator (carrier, voice agent, text generation) gets its
/// own section so its client can be constructed from just that slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub telephony: TelephonyConfig,
    pub agent: AgentConfig,
    pub generation: GenerationConfig,
    pub transfer: TransferConfig,
    pub bridge: BridgeConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address to bind to ("0.0.0.0" in production)
/// - `port`: TCP port to listen on
/// - `public_host`: hostname the carrier must use to reach us (e.g. an ngrok domain).
///   When unset, the `Host` header of the incoming request is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub public_host: Option<String>,
}

/// Carrier (Twilio) REST credentials and caller id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Number every outbound leg is placed from, in E.164 format.
    pub phone_number: String,
    pub api_base_url: String,
}

/// Conversational agent (ElevenLabs) credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub api_key: String,
    pub agent_id: String,
    pub api_base_url: String,
}

/// Opening-line generation settings.
///
/// ## Fields:
/// - `api_key`: when absent, the opening line is the rendered template only
/// - `model`: chat-completion model name
/// - `template`: greeting template; `{client}`, `{source}` and any other call
///   parameter name in braces are substituted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub api_base_url: String,
    pub template: String,
}

/// Human handoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Used when the call parameters carry no `forward_to` number.
    #[serde(default)]
    pub default_forward_number: Option<String>,
}

/// Per-call bridge tuning.
///
/// ## Fields:
/// - `idle_timeout_secs`: close a call whose telephony socket has been silent
///   this long. The carrier sends a media frame every 20ms while a call is up,
///   so silence means the stream is gone even if no close arrived.
/// - `http_timeout_secs`: timeout for every outbound REST request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub idle_timeout_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                public_host: None,
            },
            telephony: TelephonyConfig {
                account_sid: String::new(),
                auth_token: String::new(),
                phone_number: String::new(),
                api_base_url: "https://api.twilio.com".to_string(),
            },
            agent: AgentConfig {
                api_key: String::new(),
                agent_id: String::new(),
                api_base_url: "https://api.elevenlabs.io".to_string(),
            },
            generation: GenerationConfig {
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                api_base_url: "https://api.openai.com".to_string(),
                template: "Hi {client}, this is Shifa calling about the enquiry you left on {source}. Do you have a minute?".to_string(),
            },
            transfer: TransferConfig {
                default_forward_number: None,
            },
            bridge: BridgeConfig {
                idle_timeout_secs: 60,
                http_timeout_secs: 15,
            },
        }
    }
}

/// Conventional environment variable names and the config keys they override.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("PUBLIC_HOST", "server.public_host"),
    ("TWILIO_ACCOUNT_SID", "telephony.account_sid"),
    ("TWILIO_AUTH_TOKEN", "telephony.auth_token"),
    ("TWILIO_PHONE_NUMBER", "telephony.phone_number"),
    ("ELEVENLABS_API_KEY", "agent.api_key"),
    ("ELEVENLABS_AGENT_ID", "agent.agent_id"),
    ("OPENAI_API_KEY", "generation.api_key"),
    ("TRANSFER_NUMBER", "transfer.default_forward_number"),
];

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with `APP_` environment variables, `__` separating sections
    /// 4. Override with the conventional variable names in [`ENV_OVERRIDES`]
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        for (var, key) in ENV_OVERRIDES {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(*key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration is usable.
    ///
    /// ## What this checks:
    /// - Server port and bridge timeouts are not 0
    /// - Carrier credentials and caller number are present
    /// - Agent api key and agent id are present
    ///
    /// A generation api key is optional; without it the template is used verbatim.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.bridge.idle_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Idle timeout must be greater than 0"));
        }

        if self.bridge.http_timeout_secs == 0 {
            return Err(anyhow::anyhow!("HTTP timeout must be greater than 0"));
        }

        let required = [
            ("telephony.account_sid", &self.telephony.account_sid),
            ("telephony.auth_token", &self.telephony.auth_token),
            ("telephony.phone_number", &self.telephony.phone_number),
            ("agent.api_key", &self.agent.api_key),
            ("agent.agent_id", &self.agent.agent_id),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(anyhow::anyhow!(
                "Missing required configuration: {}",
                missing.join(", ")
            ));
        }

        Ok(())
    }

    /// The default forward-to number, ignoring blank values.
    pub fn default_forward_number(&self) -> Option<&str> {
        self.transfer
            .default_forward_number
            .as_deref()
            .map(str::trim)
            .filter(|number| !number.is_empty())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.telephony.account_sid = "AC123".to_string();
    config.telephony.auth_token = "secret".to_string();
    config.telephony.phone_number = "+15550001111".to_string();
    config.agent.api_key = "xi-key".to_string();
    config.agent.agent_id = "agent_1".to_string();
    config
}
