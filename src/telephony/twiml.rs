//! TwiML documents returned to, or pushed at, the carrier.

/// `<Connect><Stream>` document pointing the carrier at our media socket.
///
/// Every parameter becomes a `<Parameter>` element and shows up again as
/// `customParameters` in the stream's `start` frame.
pub fn stream_connect(stream_url: &str, parameters: &[(&str, &str)]) -> String {
    let params: String = parameters
        .iter()
        .map(|(name, value)| {
            format!(
                "\n      <Parameter name=\"{}\" value=\"{}\" />",
                escape_xml(name),
                escape_xml(value)
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Connect>
    <Stream url="{url}">{params}
    </Stream>
  </Connect>
</Response>"#,
        url = escape_xml(stream_url),
        params = params,
    )
}

/// Holding leg for the caller: waits in the conference without starting or
/// ending it.
pub fn conference_hold(conference: &str) -> String {
    conference_dial(conference, false, false, None)
}

/// Agent leg: starts the conference mix on entry and ends it on exit.
/// `announcement` is spoken to the agent before joining.
pub fn conference_join(conference: &str, announcement: Option<&str>) -> String {
    conference_dial(conference, true, true, announcement)
}

fn conference_dial(
    conference: &str,
    start_on_enter: bool,
    end_on_exit: bool,
    announcement: Option<&str>,
) -> String {
    let say = match announcement {
        Some(text) if !text.is_empty() => format!("<Say>{}</Say>", escape_xml(text)),
        _ => String::new(),
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response>{say}<Dial><Conference startConferenceOnEnter="{start}" endConferenceOnExit="{end}">{name}</Conference></Dial></Response>"#,
        say = say,
        start = start_on_enter,
        end = end_on_exit,
        name = escape_xml(conference),
    )
}

/// Conference name for a call's handoff, stable for the same call.
pub fn conference_name(call_sid: &str) -> String {
    format!("transfer-{}", call_sid)
}

/// Media socket url for a public host: `wss://{host}/outbound-media-stream`.
pub fn media_stream_url(host: &str) -> String {
    let host = host
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!("wss://{}/outbound-media-stream", host)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
