//! Stateless HTTP request builder and response parser for a batch endpoint.
//!
//! # Design
//! `BatchClient` holds only the endpoint and the boundary it writes with. A
//! batch exchange is split into `build_request`, which produces an
//! `HttpRequest`, and `parse_response`, which consumes an `HttpResponse`. The
//! caller executes the HTTP round-trip in between, keeping the core free of
//! I/O.

use tracing::debug;

use crate::error::BatchError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::multipart::{create_batch_body, generate_boundary, parse_batch_response};
use crate::types::{CallDescriptor, PartResult};

/// Synchronous, stateless client for a multipart batch endpoint.
#[derive(Debug, Clone)]
pub struct BatchClient {
    endpoint: String,
    boundary: String,
}

impl BatchClient {
    /// Client for `endpoint` writing with a freshly generated boundary.
    pub fn new(endpoint: &str) -> Self {
        Self::with_boundary(endpoint, &generate_boundary())
    }

    pub fn with_boundary(endpoint: &str, boundary: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            boundary: boundary.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    pub fn build_request(&self, calls: &[CallDescriptor]) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Post,
            path: self.endpoint.clone(),
            headers: vec![("content-type".to_string(), self.content_type())],
            body: Some(create_batch_body(calls, &self.boundary)),
        }
    }

    /// Decode a batch response into per-call results, in request order.
    ///
    /// The boundary announced in the response `content-type` wins over the
    /// one this client wrote with, since servers may pick their own.
    pub fn parse_response(&self, response: HttpResponse) -> Result<Vec<PartResult>, BatchError> {
        check_status(&response, 200)?;
        let boundary = response
            .header("content-type")
            .and_then(boundary_from_content_type)
            .unwrap_or(self.boundary.as_str());
        debug!(boundary, bytes = response.body.len(), "parsing batch response");
        Ok(parse_batch_response(&response.body, boundary))
    }
}

/// Map non-success status codes to `BatchError::HttpError`.
fn check_status(response: &HttpResponse, expected: u16) -> Result<(), BatchError> {
    if response.status == expected {
        return Ok(());
    }
    Err(BatchError::HttpError {
        status: response.status,
        body: response.body.clone(),
    })
}

/// The `boundary` parameter of a `multipart/*` content type, unquoted.
pub fn boundary_from_content_type(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        (!value.is_empty()).then_some(value)
    })
}
