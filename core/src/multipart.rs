//! Multipart framing for batch request and response bodies.
//!
//! # Design
//! Both directions are plain functions over strings. A request part is
//!
//! ```text
//! --{boundary}\r\n
//! Content-Type: application/http\r\n
//! \r\n
//! {METHOD} {uri}\r\n
//! [Content-Type: application/json\r\n\r\n{json}]\r\n
//! ```
//!
//! and the body closes with `--{boundary}--` and no trailing line break.
//!
//! Response parts are not parsed as MIME. Each part's JSON is taken to be the
//! text between its first `{` and its last `}`, which skips whatever status
//! line and headers precede it. A part where that fails is kept verbatim as
//! `PartResult::Unparsed`, so one bad part never costs the rest of the batch.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{CallDescriptor, PartResult, QueryValue};

const CRLF: &str = "\r\n";
const HTTP_PART_HEADER: &str = "Content-Type: application/http";
const JSON_BODY_HEADER: &str = "Content-Type: application/json";

/// Everything but `A-Za-z0-9 - _ . ! ~ * ' ( )` is escaped, and a space
/// becomes `%20`.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Serialize `calls` into a multipart batch body delimited by `boundary`.
///
/// Parts appear in the order of `calls`. An empty slice yields only the
/// closing delimiter.
pub fn create_batch_body(calls: &[CallDescriptor], boundary: &str) -> String {
    let mut body = String::new();
    for call in calls {
        write_part(&mut body, call, boundary);
    }
    body.push_str("--");
    body.push_str(boundary);
    body.push_str("--");

    debug!(parts = calls.len(), bytes = body.len(), "assembled batch body");
    body
}

fn write_part(out: &mut String, call: &CallDescriptor, boundary: &str) {
    out.push_str("--");
    out.push_str(boundary);
    out.push_str(CRLF);
    out.push_str(HTTP_PART_HEADER);
    out.push_str(CRLF);
    out.push_str(CRLF);

    out.push_str(call.resolved_method());
    out.push(' ');
    out.push_str(&target_uri(call));
    out.push_str(CRLF);

    if let Some(json) = &call.request_body {
        out.push_str(JSON_BODY_HEADER);
        out.push_str(CRLF);
        out.push_str(CRLF);
        out.push_str(&json.to_string());
    }
    out.push_str(CRLF);
}

/// The descriptor's uri with its query string appended, if it has one.
fn target_uri(call: &CallDescriptor) -> String {
    let query = encode_query(&call.query_params);
    if query.is_empty() {
        call.uri.clone()
    } else {
        format!("{}?{query}", call.uri)
    }
}

/// Percent-encoded query string, pairs in input order joined by `&`.
pub fn encode_query(params: &[(String, QueryValue)]) -> String {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        let key = utf8_percent_encode(key, QUERY_COMPONENT);
        match value {
            QueryValue::One(value) => {
                pairs.push(format!("{key}={}", utf8_percent_encode(value, QUERY_COMPONENT)));
            }
            QueryValue::Many(values) => {
                for value in values {
                    pairs.push(format!("{key}={}", utf8_percent_encode(value, QUERY_COMPONENT)));
                }
            }
        }
    }
    pairs.join("&")
}

/// Decode a multipart batch response into one `PartResult` per part.
///
/// The text before the first `--{boundary}` and after the last one is
/// discarded. With fewer than two delimiters there is nothing to decode and
/// the result is empty. This function never fails.
pub fn parse_batch_response(response: &str, boundary: &str) -> Vec<PartResult> {
    let delimiter = format!("--{boundary}");
    let sections: Vec<&str> = response.split(delimiter.as_str()).collect();
    if sections.len() < 2 {
        warn!(boundary, "batch response contains no delimiter");
        return Vec::new();
    }

    sections[1..sections.len() - 1]
        .iter()
        .enumerate()
        .map(|(index, part)| parse_part(index, part))
        .collect()
}

fn parse_part(index: usize, part: &str) -> PartResult {
    let Some(json) = json_span(part) else {
        debug!(index, "no JSON object in batch part");
        return PartResult::Unparsed(part.to_string());
    };
    match serde_json::from_str(json) {
        Ok(value) => PartResult::Json(value),
        Err(err) => {
            debug!(index, error = %err, "batch part is not valid JSON");
            PartResult::Unparsed(part.to_string())
        }
    }
}

/// Slice from the first `{` through the last `}`, when they are in order.
fn json_span(part: &str) -> Option<&str> {
    let start = part.find('{')?;
    let end = part.rfind('}')?;
    (start < end).then(|| &part[start..=end])
}

/// A fresh boundary token, `batch_` followed by 32 hex digits.
pub fn generate_boundary() -> String {
    format!("batch_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use serde_json::json;

    fn response_part(boundary: &str, json: &str) -> String {
        format!(
            "--{boundary}\r\nContent-Type: application/http\r\n\r\nHTTP/1.1 200 OK\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{json}\r\n"
        )
    }

    #[test]
    fn builds_post_with_query_and_body() {
        let call = CallDescriptor::new("https://x/y")
            .method("POST")
            .query("a", "1")
            .query("b", "2")
            .json_body(&json!({ "k": "v" }))
            .unwrap();
        let body = create_batch_body(&[call], "B1");
        assert_eq!(
            body,
            "--B1\r\nContent-Type: application/http\r\n\r\nPOST https://x/y?a=1&b=2\r\nContent-Type: application/json\r\n\r\n{\"k\":\"v\"}\r\n--B1--"
        );
    }

    #[test]
    fn builds_get_without_body() {
        let body = create_batch_body(&[CallDescriptor::new("/v1/a")], "xyz");
        assert_eq!(
            body,
            "--xyz\r\nContent-Type: application/http\r\n\r\nGET /v1/a\r\n\r\n--xyz--"
        );
    }

    #[test]
    fn empty_call_list_is_only_the_closer() {
        assert_eq!(create_batch_body(&[], "B"), "--B--");
    }

    #[test]
    fn one_delimiter_per_call_plus_closer() {
        let calls = vec![
            CallDescriptor::new("/a"),
            CallDescriptor::new("/b").method(HttpMethod::Put),
            CallDescriptor::new("/c")
                .method(HttpMethod::Patch)
                .json_body(&json!([1, 2]))
                .unwrap(),
        ];
        let body = create_batch_body(&calls, "sep");
        assert!(body.starts_with("--sep\r\n"));
        assert!(body.contains("\r\nPUT /b\r\n"));
        assert!(body.contains("\r\nPATCH /c\r\n"));
        assert!(body.ends_with("--sep--"));
        assert_eq!(body.matches("--sep").count(), calls.len() + 1);
        assert_eq!(body.matches("--sep\r\n").count(), calls.len());
    }

    #[test]
    fn array_values_repeat_the_key() {
        let call = CallDescriptor::new("/s")
            .query("id", vec!["1", "2"])
            .query("empty", Vec::<String>::new())
            .query("q", "a b&c");
        assert_eq!(target_uri(&call), "/s?id=1&id=2&q=a%20b%26c");
    }

    #[test]
    fn query_escaping_keeps_unreserved_marks() {
        let call = CallDescriptor::new("/s")
            .query("q", "a b")
            .query("t", "x~y!(z)*'")
            .query("k=v", "caf\u{e9}/?#");
        assert_eq!(
            target_uri(&call),
            "/s?q=a%20b&t=x~y!(z)*'&k%3Dv=caf%C3%A9%2F%3F%23"
        );
    }

    #[test]
    fn empty_query_adds_no_question_mark() {
        let call = CallDescriptor::new("/s").query("none", Vec::<String>::new());
        assert_eq!(target_uri(&call), "/s");
    }

    #[test]
    fn body_keys_keep_insertion_order() {
        let call: CallDescriptor = serde_json::from_str(
            r#"{"uri":"/o","method":"PUT","body":{"zeta":1,"alpha":2}}"#,
        )
        .unwrap();
        let body = create_batch_body(&[call], "B");
        assert!(body.contains("{\"zeta\":1,\"alpha\":2}\r\n"));
    }

    #[test]
    fn parses_single_json_part() {
        let results = parse_batch_response("--B1\r\n...{\"ok\":true}...\r\n--B1--", "B1");
        assert_eq!(results, vec![PartResult::Json(json!({ "ok": true }))]);
    }

    #[test]
    fn parses_parts_in_order() {
        let bodies = [json!({ "n": 1 }), json!({ "n": 2, "nested": { "x": [] } }), json!({})];
        let mut response = String::new();
        for body in &bodies {
            response.push_str(&response_part("batch_r", &body.to_string()));
        }
        response.push_str("--batch_r--");

        let parsed: Vec<_> = parse_batch_response(&response, "batch_r")
            .into_iter()
            .map(PartResult::into_value)
            .collect();
        assert_eq!(parsed, bodies);
    }

    #[test]
    fn part_without_braces_becomes_placeholder() {
        let response = "--B\r\nHTTP/1.1 204 No Content\r\n\r\n--B--";
        let results = parse_batch_response(response, "B");
        assert_eq!(
            results,
            vec![PartResult::Unparsed("\r\nHTTP/1.1 204 No Content\r\n\r\n".to_string())]
        );
        assert_eq!(
            results[0].to_value(),
            json!({ "errors": [ { "message": "\r\nHTTP/1.1 204 No Content\r\n\r\n" } ] })
        );
    }

    #[test]
    fn invalid_json_becomes_placeholder() {
        let response = format!("{}--B--", response_part("B", "{\"a\": {\"b\": 1}"));
        let results = parse_batch_response(&response, "B");
        assert_eq!(results.len(), 1);
        assert!(matches!(&results[0], PartResult::Unparsed(raw) if raw.contains("HTTP/1.1 200 OK")));
    }

    #[test]
    fn closing_brace_before_opening_is_unparsed() {
        let results = parse_batch_response("--B\r\n} then {\r\n--B--", "B");
        assert_eq!(results, vec![PartResult::Unparsed("\r\n} then {\r\n".to_string())]);
    }

    #[test]
    fn bad_part_does_not_affect_neighbours() {
        let response = format!(
            "{}--B\r\nHTTP/1.1 503 Service Unavailable\r\n\r\nbackend down\r\n{}--B--",
            response_part("B", "{\"first\":1}"),
            response_part("B", "{\"third\":3}"),
        );
        let results = parse_batch_response(&response, "B");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], PartResult::Json(json!({ "first": 1 })));
        assert!(results[1].is_error());
        assert_eq!(results[2], PartResult::Json(json!({ "third": 3 })));
    }

    #[test]
    fn whitespace_part_is_kept() {
        let results = parse_batch_response("--B\r\n\r\n--B--", "B");
        assert_eq!(results, vec![PartResult::Unparsed("\r\n\r\n".to_string())]);
    }

    #[test]
    fn malformed_input_never_panics() {
        for input in ["", "no delimiters", "--B", "--B--", "--B{", "--B}{--B", "{--B--B}"] {
            let _ = parse_batch_response(input, "B");
        }
        assert!(parse_batch_response("", "B").is_empty());
        assert!(parse_batch_response("--B--", "B").is_empty());
    }

    #[test]
    fn request_body_round_trips_through_response() {
        let bodies = [json!({ "title": "a" }), json!({ "title": "b", "tags": ["x"] })];
        let calls: Vec<_> = bodies
            .iter()
            .map(|b| CallDescriptor::new("/items").method("POST").json_body(b).unwrap())
            .collect();
        let request = create_batch_body(&calls, "rt");

        // Echo each request part back as a response part.
        let echoed: String = request
            .split("--rt")
            .filter(|part| part.contains('{'))
            .map(|part| {
                let json = &part[part.find('{').unwrap()..=part.rfind('}').unwrap()];
                response_part("rt", json)
            })
            .collect();
        let response = format!("{echoed}--rt--");

        let parsed: Vec<_> = parse_batch_response(&response, "rt")
            .into_iter()
            .map(PartResult::into_value)
            .collect();
        assert_eq!(parsed, bodies);
    }

    #[test]
    fn generated_boundaries_are_unique() {
        let a = generate_boundary();
        let b = generate_boundary();
        assert!(a.starts_with("batch_"));
        assert_eq!(a.len(), "batch_".len() + 32);
        assert_ne!(a, b);
    }
}
