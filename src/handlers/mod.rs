pub mod calls;
pub mod twiml;

pub use calls::*;
pub use twiml::*;

use crate::config::AppConfig;
use crate::error::AppError;
use actix_web::{web, HttpRequest};

/// Host the carrier should use to reach this server: the configured public
/// host if any, otherwise the `Host` the request came in on.
pub(crate) fn public_host(req: &HttpRequest, config: &AppConfig) -> String {
    config
        .server
        .public_host
        .as_deref()
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| req.connection_info().host().to_string())
}

/// JSON body errors answer with the same JSON error shape as the handlers.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| AppError::BadRequest(format!("Invalid JSON body: {}", err)).into())
}

/// Form body errors answer with the same JSON error shape as the handlers.
pub fn form_config() -> web::FormConfig {
    web::FormConfig::default()
        .error_handler(|err, _req| AppError::BadRequest(format!("Invalid form body: {}", err)).into())
}
