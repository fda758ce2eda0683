use crate::handlers::public_host;
use crate::state::AppState;
use crate::telephony::twiml;

use actix_web::{web, HttpRequest, HttpResponse};
use std::collections::BTreeMap;
use tracing::debug;

/// TwiML fetched by the carrier when an outbound call is answered.
///
/// Connects the call to our media socket and passes every non-blank query
/// parameter along as a stream parameter. Served for both GET and POST; the
/// carrier's form body is ignored.
pub async fn outbound_call_twiml(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<BTreeMap<String, String>>,
) -> HttpResponse {
    let host = public_host(&req, &state.config);
    let parameters: Vec<(&str, &str)> = query
        .iter()
        .map(|(name, value)| (name.as_str(), value.trim()))
        .filter(|(_, value)| !value.is_empty())
        .collect();

    debug!(host = %host, parameters = parameters.len(), "Serving stream TwiML");

    HttpResponse::Ok()
        .content_type("text/xml")
        .body(twiml::stream_connect(&twiml::media_stream_url(&host), &parameters))
}
