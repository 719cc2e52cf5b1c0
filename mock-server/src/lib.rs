use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Boundary the mock server writes its responses with.
pub const RESPONSE_BOUNDARY: &str = "batch_mock_response";

/// One inner request decoded from a batch body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InnerRequest {
    pub method: String,
    pub uri: String,
    pub body: Option<Value>,
}

pub fn app() -> Router {
    Router::new().route("/batch", post(batch))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn batch(headers: HeaderMap, body: String) -> Response {
    let Some(boundary) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(boundary_param)
    else {
        return (StatusCode::BAD_REQUEST, "missing multipart boundary").into_response();
    };

    let requests = match decode_batch(&body, boundary) {
        Ok(requests) => requests,
        Err(msg) => {
            tracing::warn!(error = msg.as_str(), "rejecting batch body");
            return (StatusCode::BAD_REQUEST, msg).into_response();
        }
    };
    tracing::info!(parts = requests.len(), "serving batch");

    match encode_response(&requests) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                format!("multipart/mixed; boundary={RESPONSE_BOUNDARY}"),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to encode batch response");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

fn boundary_param(content_type: &str) -> Option<&str> {
    let (mime, params) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case("multipart/mixed") {
        return None;
    }
    params
        .split(';')
        .filter_map(|p| p.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
}

/// Split a batch body into its inner requests.
pub fn decode_batch(body: &str, boundary: &str) -> Result<Vec<InnerRequest>, String> {
    let closer = format!("--{boundary}--");
    let Some(open) = body.strip_suffix(closer.as_str()) else {
        return Err("batch body does not end with the closing delimiter".to_string());
    };
    let delimiter = format!("--{boundary}\r\n");
    let mut sections = open.split(delimiter.as_str());
    if sections.next() != Some("") {
        return Err("batch body does not start with a delimiter".to_string());
    }
    sections.map(decode_part).collect()
}

fn decode_part(part: &str) -> Result<InnerRequest, String> {
    let (outer, rest) = part
        .split_once("\r\n\r\n")
        .ok_or_else(|| "part has no header block".to_string())?;
    if outer != "Content-Type: application/http" {
        return Err(format!("unexpected part header: {outer}"));
    }
    let (request_line, inner) = rest
        .split_once("\r\n")
        .ok_or_else(|| "part has no request line".to_string())?;
    let (method, uri) = request_line
        .split_once(' ')
        .ok_or_else(|| format!("malformed request line: {request_line}"))?;

    let body = match inner.split_once("\r\n\r\n") {
        Some((_, json)) => {
            let json = json.strip_suffix("\r\n").unwrap_or(json);
            Some(serde_json::from_str(json).map_err(|e| format!("bad inner body: {e}"))?)
        }
        None if inner == "\r\n" => None,
        None => return Err(format!("unexpected inner body: {inner:?}")),
    };

    Ok(InnerRequest {
        method: method.to_string(),
        uri: uri.to_string(),
        body,
    })
}

/// Answer every inner request in order.
///
/// Paths under `/fail` get a plain-text 500, paths under `/missing` a JSON
/// error body, everything else an echo of the request.
pub fn encode_response(requests: &[InnerRequest]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for request in requests {
        let path = request.uri.split('?').next().unwrap_or_default();
        let (status, content_type, payload) = if path.starts_with("/fail") {
            ("500 Internal Server Error", "text/plain", "upstream failure".to_string())
        } else if path.starts_with("/missing") {
            (
                "404 Not Found",
                "application/json; charset=UTF-8",
                json!({ "errors": [ { "message": "not found" } ] }).to_string(),
            )
        } else {
            (
                "200 OK",
                "application/json; charset=UTF-8",
                serde_json::to_string(request)?,
            )
        };
        out.push_str(&format!(
            "--{RESPONSE_BOUNDARY}\r\nContent-Type: application/http\r\n\r\nHTTP/1.1 {status}\r\nContent-Type: {content_type}\r\n\r\n{payload}\r\n"
        ));
    }
    out.push_str(&format!("--{RESPONSE_BOUNDARY}--"));
    Ok(out)
}
