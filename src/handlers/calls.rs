use crate::bridge::session::{
    PARAM_AGE, PARAM_CLIENT, PARAM_DAMAGE, PARAM_FIRST_MESSAGE, PARAM_FORWARD_TO, PARAM_INSURANCE,
    PARAM_PROMPT, PARAM_SOURCE,
};
use crate::error::{AppError, AppResult};
use crate::handlers::public_host;
use crate::state::AppState;
use crate::telephony::client::CallInstructions;

use actix_web::{web, Either, HttpRequest, HttpResponse};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tracing::{error, info};

/// Body of `POST /outbound-call`, sent either as JSON or as a url-encoded
/// form.
///
/// Everything except `number` is forwarded to the media stream as a call
/// parameter. Scalar JSON values are accepted for every field so that
/// `"age": 42` and `"age": "42"` mean the same thing.
#[derive(Debug, Default, Deserialize)]
pub struct OutboundCallRequest {
    #[serde(default, deserialize_with = "scalar")]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub prompt: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub first_message: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub client: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub age: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub damage: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub insurance: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub forward_to: Option<String>,
}

impl OutboundCallRequest {
    /// Non-blank call parameters, keyed by name. Sorted so the TwiML url is
    /// stable for the same request.
    pub fn parameters(&self) -> BTreeMap<String, String> {
        [
            (PARAM_PROMPT, &self.prompt),
            (PARAM_FIRST_MESSAGE, &self.first_message),
            (PARAM_CLIENT, &self.client),
            (PARAM_SOURCE, &self.source),
            (PARAM_AGE, &self.age),
            (PARAM_DAMAGE, &self.damage),
            (PARAM_INSURANCE, &self.insurance),
            (PARAM_FORWARD_TO, &self.forward_to),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            let value = value.as_deref()?.trim();
            (!value.is_empty()).then(|| (name.to_string(), value.to_string()))
        })
        .collect()
    }
}

fn scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// `https://{host}/outbound-call-twiml?{parameters}`
pub(crate) fn twiml_url(host: &str, parameters: &BTreeMap<String, String>) -> AppResult<String> {
    reqwest::Url::parse_with_params(&format!("https://{}/outbound-call-twiml", host), parameters)
        .map(String::from)
        .map_err(|e| AppError::Internal(format!("Invalid TwiML url for host {}: {}", host, e)))
}

/// Place an outbound call whose answer connects to our media stream.
///
/// ## Flow:
/// 1. Reject requests without a destination number (400)
/// 2. Generate the opening line if the request has no `first_message`
/// 3. Ask the carrier to call `number`, fetching TwiML from
///    `/outbound-call-twiml` with every parameter in the query string
pub async fn outbound_call(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: Either<web::Json<OutboundCallRequest>, web::Form<OutboundCallRequest>>,
) -> AppResult<HttpResponse> {
    let request = match body {
        Either::Left(json) => json.into_inner(),
        Either::Right(form) => form.into_inner(),
    };
    let number = request
        .number
        .as_deref()
        .map(str::trim)
        .filter(|number| !number.is_empty())
        .ok_or_else(|| AppError::BadRequest("Phone number is required".to_string()))?
        .to_string();

    let mut parameters = request.parameters();
    if !parameters.contains_key(PARAM_FIRST_MESSAGE) {
        let lookup: HashMap<String, String> = parameters.clone().into_iter().collect();
        let line = state.opening_lines.opening_line(&lookup).await;
        parameters.insert(PARAM_FIRST_MESSAGE.to_string(), line);
    }

    let host = public_host(&req, &state.config);
    let url = twiml_url(&host, &parameters)?;

    info!(
        to = %number,
        client = ?parameters.get(PARAM_CLIENT),
        parameters = parameters.len(),
        "Placing outbound call"
    );

    match state.telephony.create_call(&number, CallInstructions::Url(url)).await {
        Ok(call) => {
            state.increment_calls_placed();
            info!(call_sid = %call.sid, status = ?call.status, to = %number, "Call initiated");
            Ok(HttpResponse::Ok().json(json!({
                "success": true,
                "message": "Call initiated",
                "callSid": call.sid
            })))
        }
        Err(err) => {
            error!(to = %number, error = %err, "Failed to initiate call");
            Ok(HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": "Failed to initiate call"
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{form_config, json_config};
    use actix_web::{test as actix_test, App};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app_state(carrier_url: String) -> web::Data<AppState> {
        let mut config = crate::config::test_config();
        config.telephony.api_base_url = carrier_url;
        config.server.public_host = Some("bridge.example.com".to_string());
        web::Data::new(AppState::new(config).unwrap())
    }

    #[test]
    fn test_parameters_skip_blank_values() {
        let request: OutboundCallRequest = serde_json::from_value(json!({
            "number": "+15550009999",
            "client": "Ana",
            "source": "  ",
            "age": 42,
            "insurance": null
        }))
        .unwrap();

        let parameters = request.parameters();
        assert_eq!(parameters.len(), 2);
        assert_eq!(parameters["client"], "Ana");
        assert_eq!(parameters["age"], "42");
    }

    #[test]
    fn test_twiml_url_encodes_parameters() {
        let parameters: BTreeMap<String, String> = [
            ("client".to_string(), "Ana María".to_string()),
            ("first_message".to_string(), "Hi & welcome".to_string()),
        ]
        .into_iter()
        .collect();

        let url = twiml_url("bridge.example.com", &parameters).unwrap();
        assert!(url.starts_with("https://bridge.example.com/outbound-call-twiml?"));
        assert!(url.contains("client=Ana+Mar%C3%ADa"));
        assert!(url.contains("first_message=Hi+%26+welcome"));
    }

    #[actix_web::test]
    async fn test_missing_number_is_rejected() {
        let app = actix_test::init_service(
            App::new()
                .app_data(app_state("http://127.0.0.1:9".to_string()))
                .route("/outbound-call", web::post().to(outbound_call)),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/outbound-call")
            .set_json(json!({ "client": "Ana" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"]["message"], "Phone number is required");
    }

    #[actix_web::test]
    async fn test_call_is_placed_with_twiml_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
            .and(body_string_contains("To=%2B15550009999"))
            .and(body_string_contains("bridge.example.com%2Foutbound-call-twiml"))
            .and(body_string_contains("first_message"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sid": "CA42" })))
            .expect(1)
            .mount(&server)
            .await;

        let state = app_state(server.uri());
        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/outbound-call", web::post().to(outbound_call)),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/outbound-call")
            .set_json(json!({ "number": "+15550009999", "client": "Ana", "source": "Facebook" }))
            .to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Call initiated");
        assert_eq!(body["callSid"], "CA42");
        assert_eq!(state.get_metrics_snapshot().calls_placed, 1);
    }

    #[actix_web::test]
    async fn test_carrier_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "message": "bad To" })))
            .mount(&server)
            .await;

        let app = actix_test::init_service(
            App::new()
                .app_data(app_state(server.uri()))
                .route("/outbound-call", web::post().to(outbound_call)),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/outbound-call")
            .set_json(json!({ "number": "+15550009999", "first_message": "Hello" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 500);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Failed to initiate call");
    }

    fn call_app(
        state: web::Data<AppState>,
    ) -> App<
        impl actix_web::dev::ServiceFactory<
            actix_web::dev::ServiceRequest,
            Config = (),
            Response = actix_web::dev::ServiceResponse,
            Error = actix_web::Error,
            InitError = (),
        >,
    > {
        App::new()
            .app_data(state)
            .app_data(json_config())
            .app_data(form_config())
            .route("/outbound-call", web::post().to(outbound_call))
    }

    #[actix_web::test]
    async fn test_form_body_places_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
            .and(body_string_contains("To=%2B15550009999"))
            .and(body_string_contains("client%3DAna"))
            .and(body_string_contains("age%3D42"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sid": "CA7", "status": "queued" })))
            .expect(1)
            .mount(&server)
            .await;

        let state = app_state(server.uri());
        let app = actix_test::init_service(call_app(state.clone())).await;

        let req = actix_test::TestRequest::post()
            .uri("/outbound-call")
            .insert_header(("content-type", "application/x-www-form-urlencoded"))
            .set_payload("number=%2B15550009999&client=Ana&age=42&first_message=Hello")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["callSid"], "CA7");
        assert_eq!(state.get_metrics_snapshot().calls_placed, 1);
    }

    #[actix_web::test]
    async fn test_form_body_without_number_is_rejected() {
        let app = actix_test::init_service(call_app(app_state("http://127.0.0.1:9".to_string()))).await;

        let req = actix_test::TestRequest::post()
            .uri("/outbound-call")
            .insert_header(("content-type", "application/x-www-form-urlencoded"))
            .set_payload("client=Ana")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["message"], "Phone number is required");
    }

    #[actix_web::test]
    async fn test_malformed_json_gets_json_error() {
        let app = actix_test::init_service(call_app(app_state("http://127.0.0.1:9".to_string()))).await;

        let req = actix_test::TestRequest::post()
            .uri("/outbound-call")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["type"], "bad_request");
    }
}
